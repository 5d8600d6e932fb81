use crate::{
    errors::{ErrorResponse, ServiceError},
    services::users::{AuthResponse, LoginRequest, RegisterRequest},
    AppState,
};
use axum::{extract::State, http::StatusCode, routing::post, Json, Router};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
}

/// Create an account and sign in.
#[utoipa::path(
    post,
    path = "/api/v1/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created", body = AuthResponse),
        (status = 400, description = "Validation failed", body = ErrorResponse),
        (status = 403, description = "Admin self-registration rejected", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub(crate) async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ServiceError> {
    let response = state.services.users.register(request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// Exchange credentials for a bearer token.
#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in", body = AuthResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 403, description = "Account deactivated", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub(crate) async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ServiceError> {
    let response = state.services.users.login(request).await?;
    Ok(Json(response))
}
