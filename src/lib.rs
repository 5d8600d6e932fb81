//! AgriCart: a two-sided marketplace backend connecting farmers and buyers.
//!
//! Farmers list produce, buyers order it, M-Pesa (or cash on delivery)
//! settles it, and both sides get live notifications as orders move through
//! the paid / delivered / cancelled lifecycle.

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod notifications;
pub mod openapi;
pub mod services;

use crate::{
    auth::AuthService,
    config::AppConfig,
    events::EventSender,
    notifications::NotificationHub,
    services::{
        mpesa::MpesaGateway, orders::OrderService, payments::PaymentService,
        products::ProductService, reports::ReportService, users::UserService,
    },
};
use axum::{routing::get, Json, Router};
use sea_orm::DatabaseConnection;
use serde_json::json;
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// One instance of every domain service, shared across requests.
#[derive(Clone)]
pub struct AppServices {
    pub users: UserService,
    pub products: ProductService,
    pub orders: OrderService,
    pub payments: PaymentService,
    pub reports: ReportService,
}

impl AppServices {
    pub fn build(
        db: Arc<DatabaseConnection>,
        auth: Arc<AuthService>,
        event_sender: EventSender,
        config: &AppConfig,
    ) -> Self {
        let gateway = MpesaGateway::new(config.mpesa.clone());
        Self {
            users: UserService::new(db.clone(), auth),
            products: ProductService::new(db.clone()),
            orders: OrderService::new(db.clone(), event_sender.clone()),
            payments: PaymentService::new(
                db.clone(),
                event_sender,
                gateway,
                config.mpesa.callback_secret.clone(),
            ),
            reports: ReportService::new(db),
        }
    }
}

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
    pub auth: Arc<AuthService>,
    pub hub: Arc<NotificationHub>,
    pub services: AppServices,
}

impl AppState {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: Arc<AppConfig>,
        event_sender: EventSender,
        hub: Arc<NotificationHub>,
    ) -> Self {
        let auth = Arc::new(AuthService::new(
            config.jwt_secret.clone(),
            config.jwt_expiration,
            db.clone(),
        ));
        let services = AppServices::build(db.clone(), auth.clone(), event_sender, &config);
        Self {
            db,
            config,
            auth,
            hub,
            services,
        }
    }
}

/// Versioned API surface.
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .nest("/auth", handlers::auth::routes())
        .nest("/users", handlers::users::routes())
        .nest("/products", handlers::products::routes())
        .nest("/orders", handlers::orders::routes())
        .nest("/payments", handlers::payments::routes())
        .nest("/reports", handlers::reports::routes())
        .nest("/notifications", handlers::notifications::routes())
}

/// Full application router: health, interactive docs and the v1 API.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(health))
        .merge(
            SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()),
        )
        .nest("/api/v1", api_v1_routes())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
