use crate::{
    auth::AdminUser,
    errors::{ErrorResponse, ServiceError},
    services::reports::DashboardReport,
    AppState,
};
use axum::{extract::State, routing::get, Json, Router};

pub fn routes() -> Router<AppState> {
    Router::new().route("/dashboard", get(dashboard))
}

/// Marketplace-wide aggregates for the admin dashboard.
#[utoipa::path(
    get,
    path = "/api/v1/reports/dashboard",
    responses(
        (status = 200, body = DashboardReport),
        (status = 403, body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "reports"
)]
pub(crate) async fn dashboard(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<Json<DashboardReport>, ServiceError> {
    Ok(Json(state.services.reports.dashboard().await?))
}
