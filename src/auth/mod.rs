//! Bearer-token authentication for the marketplace API.
//!
//! Tokens are JWTs signed with the configured secret; the extractor verifies
//! the token, loads the acting user, rejects deactivated accounts and
//! attaches the identity to the request.

use crate::{
    entities::user::{self, UserRole},
    errors::ServiceError,
    AppState,
};
use argon2::{
    password_hash::{rand_core::OsRng, SaltString},
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use axum::{async_trait, extract::FromRequestParts, http::header, http::request::Parts};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use sea_orm::{DatabaseConnection, EntityTrait};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Claims carried in every access token.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id)
    pub sub: String,
    pub role: String,
    pub iat: i64,
    pub exp: i64,
}

/// Identity of the authenticated caller, loaded fresh from the database on
/// every request so role and active-flag changes take effect immediately.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    pub phone: Option<String>,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    pub fn is_farmer(&self) -> bool {
        self.role == UserRole::Farmer
    }
}

impl From<&user::Model> for AuthUser {
    fn from(model: &user::Model) -> Self {
        Self {
            id: model.id,
            name: model.name.clone(),
            email: model.email.clone(),
            role: model.role,
            phone: model.phone.clone(),
        }
    }
}

/// Issues and validates tokens, and hashes credentials.
#[derive(Clone)]
pub struct AuthService {
    jwt_secret: String,
    token_ttl_secs: u64,
    db: Arc<DatabaseConnection>,
}

impl AuthService {
    pub fn new(jwt_secret: String, token_ttl_secs: u64, db: Arc<DatabaseConnection>) -> Self {
        Self {
            jwt_secret,
            token_ttl_secs,
            db,
        }
    }

    pub fn hash_password(&self, password: &str) -> Result<String, ServiceError> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| ServiceError::HashError(e.to_string()))
    }

    pub fn verify_password(&self, password: &str, hash: &str) -> Result<bool, ServiceError> {
        let parsed = PasswordHash::new(hash).map_err(|e| ServiceError::HashError(e.to_string()))?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok())
    }

    pub fn generate_token(&self, user: &user::Model) -> Result<String, ServiceError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: user.id.to_string(),
            role: user.role.as_str().to_string(),
            iat: now,
            exp: now + self.token_ttl_secs as i64,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
        .map_err(|e| ServiceError::InternalError(format!("token encoding failed: {}", e)))
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims, ServiceError> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map(|data| data.claims)
        .map_err(|_| ServiceError::Unauthorized("Invalid or expired token".to_string()))
    }

    /// Verify a bearer token and load the acting user.
    pub async fn authenticate(&self, token: &str) -> Result<AuthUser, ServiceError> {
        let claims = self.validate_token(token)?;
        let user_id = Uuid::parse_str(&claims.sub)
            .map_err(|_| ServiceError::Unauthorized("Malformed token subject".to_string()))?;

        let user = user::Entity::find_by_id(user_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::Unauthorized("Unknown user".to_string()))?;

        if !user.is_active {
            return Err(ServiceError::Forbidden(
                "Account has been deactivated".to_string(),
            ));
        }

        Ok(AuthUser::from(&user))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header_value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                ServiceError::Unauthorized("Missing authorization header".to_string())
            })?;

        let token = header_value
            .strip_prefix("Bearer ")
            .map(str::trim)
            .ok_or_else(|| ServiceError::Unauthorized("Expected bearer token".to_string()))?;

        state.auth.authenticate(token).await
    }
}

/// Marker extractor for admin-only routes.
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthUser);

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            return Err(ServiceError::Forbidden("Admin access required".to_string()));
        }
        Ok(AdminUser(user))
    }
}
