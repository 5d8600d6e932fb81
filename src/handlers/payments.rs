use crate::{
    auth::AuthUser,
    entities::payment,
    errors::{ErrorResponse, ServiceError},
    services::payments::{
        CallbackEnvelope, InitiatePaymentRequest, InitiatePaymentResponse, PaymentDetails,
    },
    AppState,
};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tracing::{error, warn};
use uuid::Uuid;

const SIGNATURE_HEADER: &str = "x-callback-signature";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/mpesa/stk-push", post(initiate_stk_push))
        .route("/mpesa/callback", post(mpesa_callback))
        .route("/status/:id", get(get_payment))
        .route("/order/:id", get(list_order_payments))
}

/// Prompt the buyer's phone for payment of an M-Pesa order.
#[utoipa::path(
    post,
    path = "/api/v1/payments/mpesa/stk-push",
    request_body = InitiatePaymentRequest,
    responses(
        (status = 202, description = "Charge prompt sent", body = InitiatePaymentResponse),
        (status = 400, description = "Invalid phone, wrong method or already paid", body = ErrorResponse),
        (status = 502, description = "Gateway rejected the request", body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "payments"
)]
pub(crate) async fn initiate_stk_push(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<InitiatePaymentRequest>,
) -> Result<(StatusCode, Json<InitiatePaymentResponse>), ServiceError> {
    let response = state
        .services
        .payments
        .initiate_stk_push(&user, request.order_id, &request.phone)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// Gateway result callback. Unauthenticated by design; when a callback
/// secret is configured the body must carry a valid HMAC signature. Always
/// answers HTTP 200 once the signature checks out; a reconciliation failure
/// is reported back with a non-zero ResultCode so the gateway retries.
/// Replayed callbacks are acknowledged with ResultCode 0.
#[utoipa::path(
    post,
    path = "/api/v1/payments/mpesa/callback",
    request_body(content = CallbackEnvelope, content_type = "application/json"),
    responses(
        (status = 200, description = "Callback acknowledged"),
        (status = 401, description = "Bad signature", body = ErrorResponse)
    ),
    tag = "payments"
)]
pub(crate) async fn mpesa_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    state
        .services
        .payments
        .verify_callback_signature(&body, signature)?;

    let ack = match serde_json::from_slice::<CallbackEnvelope>(&body) {
        Ok(envelope) => match state.services.payments.process_callback(envelope).await {
            Ok(()) => json!({ "ResultCode": 0, "ResultDesc": "Accepted" }),
            Err(e) => {
                error!(error = %e, "Callback reconciliation failed");
                json!({ "ResultCode": 1, "ResultDesc": "Reconciliation failed" })
            }
        },
        Err(e) => {
            warn!(error = %e, "Unparseable callback body");
            json!({ "ResultCode": 1, "ResultDesc": "Unparseable callback body" })
        }
    };
    Ok(Json(ack))
}

/// Payment status check, with the linked order summarized.
#[utoipa::path(
    get,
    path = "/api/v1/payments/status/{id}",
    params(("id" = Uuid, Path, description = "Payment id")),
    responses(
        (status = 200, body = PaymentDetails),
        (status = 403, body = ErrorResponse),
        (status = 404, body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "payments"
)]
pub(crate) async fn get_payment(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<PaymentDetails>, ServiceError> {
    Ok(Json(state.services.payments.get_payment(id, &user).await?))
}

/// Charge attempts recorded against one order, newest first.
#[utoipa::path(
    get,
    path = "/api/v1/payments/order/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, body = [payment::Model]),
        (status = 403, body = ErrorResponse),
        (status = 404, body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "payments"
)]
pub(crate) async fn list_order_payments(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<payment::Model>>, ServiceError> {
    Ok(Json(
        state
            .services
            .payments
            .list_order_payments(id, &user)
            .await?,
    ))
}
