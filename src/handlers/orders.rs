use crate::{
    auth::{AdminUser, AuthUser},
    errors::{ErrorResponse, ServiceError},
    handlers::PageParams,
    services::orders::{CreateOrderRequest, OrderListResponse, OrderResponse, PaymentProof},
    AppState,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use uuid::Uuid;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_order).get(list_orders))
        .route("/myorders", get(my_orders))
        .route("/farmer/myorders", get(farmer_orders))
        .route("/:id", get(get_order))
        .route("/:id/pay", put(mark_paid))
        .route("/:id/deliver", put(mark_delivered))
        .route("/:id/cancel", put(cancel_order))
}

/// Place an order. Stock is checked, not reserved; deduction happens when
/// the order is paid.
#[utoipa::path(
    post,
    path = "/api/v1/orders",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, body = OrderResponse),
        (status = 404, description = "Unknown product", body = ErrorResponse),
        (status = 422, description = "Insufficient stock", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub(crate) async fn create_order(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<OrderResponse>), ServiceError> {
    let order = state.services.orders.create_order(&user, request).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// Admin listing across all buyers.
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    params(PageParams),
    responses(
        (status = 200, body = OrderListResponse),
        (status = 403, body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub(crate) async fn list_orders(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(params): Query<PageParams>,
) -> Result<Json<OrderListResponse>, ServiceError> {
    Ok(Json(
        state
            .services
            .orders
            .list_orders(params.page(), params.per_page())
            .await?,
    ))
}

/// The caller's own purchase history.
#[utoipa::path(
    get,
    path = "/api/v1/orders/myorders",
    params(PageParams),
    responses((status = 200, body = OrderListResponse)),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub(crate) async fn my_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<PageParams>,
) -> Result<Json<OrderListResponse>, ServiceError> {
    Ok(Json(
        state
            .services
            .orders
            .list_buyer_orders(user.id, params.page(), params.per_page())
            .await?,
    ))
}

/// Orders containing at least one of the calling farmer's products.
#[utoipa::path(
    get,
    path = "/api/v1/orders/farmer/myorders",
    params(PageParams),
    responses(
        (status = 200, body = OrderListResponse),
        (status = 403, body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub(crate) async fn farmer_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<PageParams>,
) -> Result<Json<OrderListResponse>, ServiceError> {
    if !user.is_farmer() {
        return Err(ServiceError::Forbidden(
            "Only farmers have a sales view".to_string(),
        ));
    }
    Ok(Json(
        state
            .services
            .orders
            .list_farmer_orders(user.id, params.page(), params.per_page())
            .await?,
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, body = OrderResponse),
        (status = 403, body = ErrorResponse),
        (status = 404, body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub(crate) async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderResponse>, ServiceError> {
    Ok(Json(state.services.orders.get_order(id, &user).await?))
}

/// Settle an order. For M-Pesa orders a successful gateway payment must
/// already exist; cards and transfers pass proof in the body.
#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/pay",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = PaymentProof,
    responses(
        (status = 200, body = OrderResponse),
        (status = 400, description = "Already paid or missing proof", body = ErrorResponse),
        (status = 422, description = "Insufficient stock", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub(crate) async fn mark_paid(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    proof: Option<Json<PaymentProof>>,
) -> Result<Json<OrderResponse>, ServiceError> {
    let proof = proof.map(|Json(p)| p).unwrap_or_default();
    Ok(Json(
        state.services.orders.mark_paid(id, &user, proof).await?,
    ))
}

#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/deliver",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, body = OrderResponse),
        (status = 403, body = ErrorResponse),
        (status = 404, body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub(crate) async fn mark_delivered(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderResponse>, ServiceError> {
    Ok(Json(state.services.orders.mark_delivered(id, &user).await?))
}

#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}/cancel",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, body = OrderResponse),
        (status = 400, description = "Delivered or already cancelled", body = ErrorResponse),
        (status = 403, body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "orders"
)]
pub(crate) async fn cancel_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderResponse>, ServiceError> {
    Ok(Json(state.services.orders.cancel_order(id, &user).await?))
}
