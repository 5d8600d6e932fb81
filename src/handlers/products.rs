use crate::{
    auth::AuthUser,
    entities::product,
    errors::{ErrorResponse, ServiceError},
    handlers::PageParams,
    services::products::{
        CreateProductRequest, ProductFilter, ProductListResponse, UpdateProductRequest,
    },
    AppState,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use uuid::Uuid;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_products).post(create_product))
        .route("/myproducts", get(my_products))
        .route(
            "/:id",
            get(get_product).put(update_product).delete(delete_product),
        )
}

/// Public catalog with optional filters.
#[utoipa::path(
    get,
    path = "/api/v1/products",
    params(ProductFilter),
    responses((status = 200, body = ProductListResponse)),
    tag = "products"
)]
pub(crate) async fn list_products(
    State(state): State<AppState>,
    Query(filter): Query<ProductFilter>,
) -> Result<Json<ProductListResponse>, ServiceError> {
    Ok(Json(state.services.products.list_products(filter).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/products/{id}",
    params(("id" = Uuid, Path, description = "Product id")),
    responses(
        (status = 200, body = product::Model),
        (status = 404, body = ErrorResponse)
    ),
    tag = "products"
)]
pub(crate) async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<product::Model>, ServiceError> {
    Ok(Json(state.services.products.get_product(id).await?))
}

/// Farmers list produce under their own account.
#[utoipa::path(
    post,
    path = "/api/v1/products",
    request_body = CreateProductRequest,
    responses(
        (status = 201, body = product::Model),
        (status = 400, body = ErrorResponse),
        (status = 403, body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "products"
)]
pub(crate) async fn create_product(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<product::Model>), ServiceError> {
    let product = state
        .services
        .products
        .create_product(&user, request)
        .await?;
    Ok((StatusCode::CREATED, Json(product)))
}

#[utoipa::path(
    get,
    path = "/api/v1/products/myproducts",
    params(PageParams),
    responses((status = 200, body = ProductListResponse)),
    security(("bearer_auth" = [])),
    tag = "products"
)]
pub(crate) async fn my_products(
    State(state): State<AppState>,
    user: AuthUser,
    Query(params): Query<PageParams>,
) -> Result<Json<ProductListResponse>, ServiceError> {
    Ok(Json(
        state
            .services
            .products
            .list_farmer_products(user.id, params.page(), params.per_page())
            .await?,
    ))
}

#[utoipa::path(
    put,
    path = "/api/v1/products/{id}",
    params(("id" = Uuid, Path, description = "Product id")),
    request_body = UpdateProductRequest,
    responses(
        (status = 200, body = product::Model),
        (status = 403, body = ErrorResponse),
        (status = 404, body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "products"
)]
pub(crate) async fn update_product(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateProductRequest>,
) -> Result<Json<product::Model>, ServiceError> {
    Ok(Json(
        state
            .services
            .products
            .update_product(id, &user, request)
            .await?,
    ))
}

#[utoipa::path(
    delete,
    path = "/api/v1/products/{id}",
    params(("id" = Uuid, Path, description = "Product id")),
    responses(
        (status = 204, description = "Listing removed"),
        (status = 403, body = ErrorResponse),
        (status = 404, body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "products"
)]
pub(crate) async fn delete_product(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ServiceError> {
    state.services.products.delete_product(id, &user).await?;
    Ok(StatusCode::NO_CONTENT)
}
