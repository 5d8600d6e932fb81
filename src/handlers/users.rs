use crate::{
    auth::{AdminUser, AuthUser},
    errors::{ErrorResponse, ServiceError},
    handlers::PageParams,
    services::users::{
        AdminUpdateUserRequest, UpdateProfileRequest, UserListResponse, UserResponse,
    },
    AppState,
};
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use uuid::Uuid;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/profile", get(me).put(update_me))
        .route("/", get(list_users))
        .route("/:id", get(get_user).put(admin_update_user))
}

/// The authenticated caller's profile.
#[utoipa::path(
    get,
    path = "/api/v1/users/profile",
    responses(
        (status = 200, body = UserResponse),
        (status = 401, body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "users"
)]
pub(crate) async fn me(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<UserResponse>, ServiceError> {
    Ok(Json(state.services.users.get_profile(user.id).await?))
}

#[utoipa::path(
    put,
    path = "/api/v1/users/profile",
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, body = UserResponse),
        (status = 400, body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "users"
)]
pub(crate) async fn update_me(
    State(state): State<AppState>,
    user: AuthUser,
    Json(request): Json<UpdateProfileRequest>,
) -> Result<Json<UserResponse>, ServiceError> {
    Ok(Json(
        state.services.users.update_profile(&user, request).await?,
    ))
}

/// Admin-only account listing.
#[utoipa::path(
    get,
    path = "/api/v1/users",
    params(PageParams),
    responses(
        (status = 200, body = UserListResponse),
        (status = 403, body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "users"
)]
pub(crate) async fn list_users(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(params): Query<PageParams>,
) -> Result<Json<UserListResponse>, ServiceError> {
    Ok(Json(
        state
            .services
            .users
            .list_users(params.page(), params.per_page())
            .await?,
    ))
}

/// Any authenticated user may look up a public profile.
#[utoipa::path(
    get,
    path = "/api/v1/users/{id}",
    params(("id" = Uuid, Path, description = "User id")),
    responses(
        (status = 200, body = UserResponse),
        (status = 404, body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "users"
)]
pub(crate) async fn get_user(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<UserResponse>, ServiceError> {
    Ok(Json(state.services.users.get_profile(id).await?))
}

/// Admin role/activation changes.
#[utoipa::path(
    put,
    path = "/api/v1/users/{id}",
    params(("id" = Uuid, Path, description = "User id")),
    request_body = AdminUpdateUserRequest,
    responses(
        (status = 200, body = UserResponse),
        (status = 403, body = ErrorResponse),
        (status = 404, body = ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "users"
)]
pub(crate) async fn admin_update_user(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<Uuid>,
    Json(request): Json<AdminUpdateUserRequest>,
) -> Result<Json<UserResponse>, ServiceError> {
    Ok(Json(
        state
            .services
            .users
            .admin_update_user(&admin.0, id, request)
            .await?,
    ))
}
