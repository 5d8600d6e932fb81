use crate::{
    auth::{AuthService, AuthUser},
    entities::user::{self, UserRole},
    errors::ServiceError,
};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RegisterRequest {
    #[validate(length(min = 1, message = "Name is required"))]
    pub name: String,
    #[validate(email(message = "A valid email address is required"))]
    pub email: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,
    pub role: UserRole,
    pub farm_name: Option<String>,
    pub farm_location: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub farm_name: Option<String>,
    pub farm_location: Option<String>,
    pub avatar_url: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct AdminUpdateUserRequest {
    pub role: Option<UserRole>,
    pub is_active: Option<bool>,
}

/// Account representation returned by the API; never carries the hash.
#[derive(Debug, Serialize, ToSchema)]
pub struct UserResponse {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    pub farm_name: Option<String>,
    pub farm_location: Option<String>,
    pub phone: Option<String>,
    pub avatar_url: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<user::Model> for UserResponse {
    fn from(model: user::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            email: model.email,
            role: model.role,
            farm_name: model.farm_name,
            farm_location: model.farm_location,
            phone: model.phone,
            avatar_url: model.avatar_url,
            is_active: model.is_active,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserResponse,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UserListResponse {
    pub users: Vec<UserResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Registration, login and profile management.
#[derive(Clone)]
pub struct UserService {
    db: Arc<DatabaseConnection>,
    auth: Arc<AuthService>,
}

impl UserService {
    pub fn new(db: Arc<DatabaseConnection>, auth: Arc<AuthService>) -> Self {
        Self { db, auth }
    }

    /// Creates an account and signs the caller in. Admin accounts cannot be
    /// self-registered; an existing admin promotes them.
    #[instrument(skip(self, request), fields(email = %request.email))]
    pub async fn register(&self, request: RegisterRequest) -> Result<AuthResponse, ServiceError> {
        request.validate()?;

        if request.role == UserRole::Admin {
            return Err(ServiceError::Forbidden(
                "Admin accounts cannot be self-registered".to_string(),
            ));
        }
        if request.role == UserRole::Farmer
            && (request.farm_name.as_deref().unwrap_or("").is_empty()
                || request.farm_location.as_deref().unwrap_or("").is_empty())
        {
            return Err(ServiceError::ValidationError(
                "Farmer accounts require a farm name and location".to_string(),
            ));
        }

        let email = request.email.trim().to_lowercase();
        let db = &*self.db;

        let existing = user::Entity::find()
            .filter(user::Column::Email.eq(email.clone()))
            .one(db)
            .await?;
        if existing.is_some() {
            return Err(ServiceError::ValidationError(
                "Email is already registered".to_string(),
            ));
        }

        let now = Utc::now();
        let model = user::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(request.name.trim().to_string()),
            email: Set(email),
            password_hash: Set(self.auth.hash_password(&request.password)?),
            role: Set(request.role),
            farm_name: Set(request.farm_name),
            farm_location: Set(request.farm_location),
            phone: Set(request.phone),
            avatar_url: Set(None),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(None),
        }
        .insert(db)
        .await?;

        info!(user_id = %model.id, role = model.role.as_str(), "User registered");
        let token = self.auth.generate_token(&model)?;
        Ok(AuthResponse {
            token,
            user: model.into(),
        })
    }

    /// Credentials are checked in constant style: both the unknown-email and
    /// wrong-password paths answer with the same unauthorized message.
    #[instrument(skip(self, request), fields(email = %request.email))]
    pub async fn login(&self, request: LoginRequest) -> Result<AuthResponse, ServiceError> {
        request.validate()?;
        let email = request.email.trim().to_lowercase();

        let user = user::Entity::find()
            .filter(user::Column::Email.eq(email))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::Unauthorized("Invalid email or password".to_string()))?;

        if !self.auth.verify_password(&request.password, &user.password_hash)? {
            return Err(ServiceError::Unauthorized(
                "Invalid email or password".to_string(),
            ));
        }
        if !user.is_active {
            return Err(ServiceError::Forbidden(
                "Account has been deactivated".to_string(),
            ));
        }

        info!(user_id = %user.id, "User logged in");
        let token = self.auth.generate_token(&user)?;
        Ok(AuthResponse {
            token,
            user: user.into(),
        })
    }

    #[instrument(skip(self))]
    pub async fn get_profile(&self, user_id: Uuid) -> Result<UserResponse, ServiceError> {
        let user = user::Entity::find_by_id(user_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("User {} not found", user_id)))?;
        Ok(user.into())
    }

    #[instrument(skip(self, request), fields(user_id = %actor.id))]
    pub async fn update_profile(
        &self,
        actor: &AuthUser,
        request: UpdateProfileRequest,
    ) -> Result<UserResponse, ServiceError> {
        let db = &*self.db;
        let user = user::Entity::find_by_id(actor.id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("User {} not found", actor.id)))?;

        let mut active: user::ActiveModel = user.into();
        if let Some(name) = request.name {
            if name.trim().is_empty() {
                return Err(ServiceError::ValidationError(
                    "Name cannot be empty".to_string(),
                ));
            }
            active.name = Set(name.trim().to_string());
        }
        if let Some(phone) = request.phone {
            active.phone = Set(Some(phone));
        }
        if let Some(farm_name) = request.farm_name {
            active.farm_name = Set(Some(farm_name));
        }
        if let Some(farm_location) = request.farm_location {
            active.farm_location = Set(Some(farm_location));
        }
        if let Some(avatar_url) = request.avatar_url {
            active.avatar_url = Set(Some(avatar_url));
        }
        if let Some(password) = request.password {
            if password.len() < 8 {
                return Err(ServiceError::ValidationError(
                    "Password must be at least 8 characters".to_string(),
                ));
            }
            active.password_hash = Set(self.auth.hash_password(&password)?);
        }
        active.updated_at = Set(Some(Utc::now()));

        let updated = active.update(db).await?;
        Ok(updated.into())
    }

    /// Admin listing of all accounts, newest first.
    #[instrument(skip(self))]
    pub async fn list_users(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<UserListResponse, ServiceError> {
        let paginator = user::Entity::find()
            .order_by_desc(user::Column::CreatedAt)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await?;
        let users = paginator
            .fetch_page(page.saturating_sub(1))
            .await?
            .into_iter()
            .map(UserResponse::from)
            .collect();

        Ok(UserListResponse {
            users,
            total,
            page,
            per_page,
        })
    }

    /// Role changes and deactivation. An admin cannot deactivate or demote
    /// their own account, which keeps at least the acting admin alive.
    #[instrument(skip(self, request), fields(user_id = %user_id, actor = %actor.id))]
    pub async fn admin_update_user(
        &self,
        actor: &AuthUser,
        user_id: Uuid,
        request: AdminUpdateUserRequest,
    ) -> Result<UserResponse, ServiceError> {
        if user_id == actor.id
            && (request.is_active == Some(false)
                || request.role.is_some_and(|r| r != UserRole::Admin))
        {
            return Err(ServiceError::InvalidOperation(
                "Admins cannot demote or deactivate themselves".to_string(),
            ));
        }

        let db = &*self.db;
        let user = user::Entity::find_by_id(user_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("User {} not found", user_id)))?;

        let mut active: user::ActiveModel = user.into();
        if let Some(role) = request.role {
            active.role = Set(role);
        }
        if let Some(is_active) = request.is_active {
            active.is_active = Set(is_active);
        }
        active.updated_at = Set(Some(Utc::now()));

        let updated = active.update(db).await?;
        info!(user_id = %updated.id, role = updated.role.as_str(),
              is_active = updated.is_active, "User updated by admin");
        Ok(updated.into())
    }
}
