//! Shared fixtures: an in-memory sqlite database with the full schema, plus
//! seed helpers for users, products and orders.

#![allow(dead_code)]

use agricart_api::{
    auth::AuthUser,
    entities::{
        order::{self, OrderStatus, PaymentMethod},
        order_item, product,
        user::{self, UserRole},
    },
    events::{Event, EventSender},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Schema, Set,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

pub async fn test_db() -> Arc<DatabaseConnection> {
    // A single connection keeps every session on the same in-memory database.
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).sqlx_logging(false);
    let db = Database::connect(options).await.expect("sqlite connect");

    let backend = db.get_database_backend();
    let schema = Schema::new(backend);
    let statements = [
        schema.create_table_from_entity(agricart_api::entities::User),
        schema.create_table_from_entity(agricart_api::entities::Product),
        schema.create_table_from_entity(agricart_api::entities::Order),
        schema.create_table_from_entity(agricart_api::entities::OrderItem),
        schema.create_table_from_entity(agricart_api::entities::Payment),
    ];
    for statement in statements {
        db.execute(backend.build(&statement))
            .await
            .expect("create table");
    }

    Arc::new(db)
}

pub fn event_channel() -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(64);
    (EventSender::new(tx), rx)
}

pub async fn seed_user(db: &DatabaseConnection, name: &str, role: UserRole) -> user::Model {
    let (farm_name, farm_location) = if role == UserRole::Farmer {
        (Some(format!("{} Farm", name)), Some("Nakuru".to_string()))
    } else {
        (None, None)
    };
    user::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(name.to_string()),
        email: Set(format!("{}@example.com", name.to_lowercase())),
        password_hash: Set("unused-in-tests".to_string()),
        role: Set(role),
        farm_name: Set(farm_name),
        farm_location: Set(farm_location),
        phone: Set(Some("254712345678".to_string())),
        avatar_url: Set(None),
        is_active: Set(true),
        created_at: Set(Utc::now()),
        updated_at: Set(None),
    }
    .insert(db)
    .await
    .expect("seed user")
}

pub async fn seed_product(
    db: &DatabaseConnection,
    farmer: &user::Model,
    name: &str,
    price: Decimal,
    stock: i32,
) -> product::Model {
    product::ActiveModel {
        id: Set(Uuid::new_v4()),
        farmer_id: Set(farmer.id),
        name: Set(name.to_string()),
        description: Set(format!("Fresh {}", name)),
        category: Set("vegetables".to_string()),
        price: Set(price),
        stock: Set(stock),
        image_url: Set(None),
        is_organic: Set(false),
        location: Set(farmer.farm_location.clone().unwrap_or_default()),
        created_at: Set(Utc::now()),
        updated_at: Set(None),
    }
    .insert(db)
    .await
    .expect("seed product")
}

/// Insert an order (and one line item per product) directly, bypassing the
/// service, for tests that need a specific starting state.
pub async fn seed_order(
    db: &DatabaseConnection,
    buyer: &user::Model,
    items: &[(product::Model, i32)],
    payment_method: PaymentMethod,
    status: OrderStatus,
) -> order::Model {
    let now = Utc::now();
    let total: Decimal = items
        .iter()
        .map(|(p, qty)| p.price * Decimal::from(*qty))
        .sum();

    let order = order::ActiveModel {
        id: Set(Uuid::new_v4()),
        buyer_id: Set(buyer.id),
        shipping_address: Set("Moi Avenue".to_string()),
        city: Set("Nairobi".to_string()),
        postal_code: Set("00100".to_string()),
        country: Set("Kenya".to_string()),
        payment_method: Set(payment_method),
        items_price: Set(total),
        tax_price: Set(Decimal::ZERO),
        shipping_price: Set(Decimal::ZERO),
        total_price: Set(total),
        status: Set(status),
        paid_at: Set(None),
        delivered_at: Set(None),
        cancelled_at: Set(None),
        cancelled_by: Set(None),
        inventory_updated: Set(false),
        payment_ref: Set(None),
        payment_status: Set(None),
        payment_time: Set(None),
        payment_phone: Set(None),
        created_at: Set(now),
        updated_at: Set(None),
    }
    .insert(db)
    .await
    .expect("seed order");

    for (product, quantity) in items {
        order_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            product_id: Set(product.id),
            farmer_id: Set(product.farmer_id),
            name: Set(product.name.clone()),
            image_url: Set(None),
            quantity: Set(*quantity),
            unit_price: Set(product.price),
            farm_name: Set("Seeded Farm".to_string()),
            farmer_phone: Set(None),
            created_at: Set(now),
        }
        .insert(db)
        .await
        .expect("seed order item");
    }

    order
}

pub fn actor(user: &user::Model) -> AuthUser {
    AuthUser::from(user)
}

/// Drain every event currently queued without blocking.
pub fn drain_events(rx: &mut mpsc::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub async fn stock_of(db: &DatabaseConnection, product_id: Uuid) -> i32 {
    use sea_orm::EntityTrait;
    product::Entity::find_by_id(product_id)
        .one(db)
        .await
        .expect("query product")
        .expect("product exists")
        .stock
}
