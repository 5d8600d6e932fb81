//! OpenAPI document served at `/api-docs/openapi.json` and browsable via
//! Swagger UI at `/docs`.

use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "AgriCart API",
        description = "Marketplace backend connecting farmers and buyers: produce listings, orders, M-Pesa payments and live notifications.",
        license(name = "MIT")
    ),
    paths(
        crate::handlers::auth::register,
        crate::handlers::auth::login,
        crate::handlers::users::me,
        crate::handlers::users::update_me,
        crate::handlers::users::list_users,
        crate::handlers::users::get_user,
        crate::handlers::users::admin_update_user,
        crate::handlers::products::list_products,
        crate::handlers::products::get_product,
        crate::handlers::products::create_product,
        crate::handlers::products::my_products,
        crate::handlers::products::update_product,
        crate::handlers::products::delete_product,
        crate::handlers::orders::create_order,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::my_orders,
        crate::handlers::orders::farmer_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::mark_paid,
        crate::handlers::orders::mark_delivered,
        crate::handlers::orders::cancel_order,
        crate::handlers::payments::initiate_stk_push,
        crate::handlers::payments::mpesa_callback,
        crate::handlers::payments::get_payment,
        crate::handlers::payments::list_order_payments,
        crate::handlers::reports::dashboard,
        crate::handlers::notifications::stream,
    ),
    components(schemas(
        crate::errors::ErrorResponse,
        crate::errors::StockShortage,
        crate::entities::order::Model,
        crate::entities::order::OrderStatus,
        crate::entities::order::PaymentMethod,
        crate::entities::order_item::Model,
        crate::entities::payment::Model,
        crate::entities::payment::PaymentStatus,
        crate::entities::product::Model,
        crate::entities::user::UserRole,
        crate::services::orders::CreateOrderRequest,
        crate::services::orders::OrderItemInput,
        crate::services::orders::OrderListResponse,
        crate::services::orders::OrderResponse,
        crate::services::orders::PaymentProof,
        crate::services::orders::PaymentResult,
        crate::services::orders::ShippingAddress,
        crate::services::payments::CallbackBody,
        crate::services::payments::CallbackEnvelope,
        crate::services::payments::CallbackMetadata,
        crate::services::payments::InitiatePaymentRequest,
        crate::services::payments::InitiatePaymentResponse,
        crate::services::payments::MetadataItem,
        crate::services::payments::PaymentDetails,
        crate::services::payments::PaymentOrderSummary,
        crate::services::payments::StkCallback,
        crate::services::products::CreateProductRequest,
        crate::services::products::ProductListResponse,
        crate::services::products::UpdateProductRequest,
        crate::services::reports::DashboardReport,
        crate::services::reports::OrderCounts,
        crate::services::reports::UserCounts,
        crate::services::users::AdminUpdateUserRequest,
        crate::services::users::AuthResponse,
        crate::services::users::LoginRequest,
        crate::services::users::RegisterRequest,
        crate::services::users::UpdateProfileRequest,
        crate::services::users::UserListResponse,
        crate::services::users::UserResponse,
    )),
    modifiers(&BearerAuth),
    tags(
        (name = "auth", description = "Registration and sign-in"),
        (name = "users", description = "Profiles and account administration"),
        (name = "products", description = "Produce catalog"),
        (name = "orders", description = "Order lifecycle"),
        (name = "payments", description = "M-Pesa payments"),
        (name = "reports", description = "Admin reporting"),
        (name = "notifications", description = "Live notification streams"),
    )
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}
