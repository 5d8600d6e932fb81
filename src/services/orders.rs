use crate::{
    auth::AuthUser,
    entities::{
        order::{self, OrderStatus, PaymentMethod},
        order_item, product, user,
    },
    errors::{ServiceError, StockShortage},
    events::{Event, EventSender},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct ShippingAddress {
    #[validate(length(min = 1, message = "Address is required"))]
    pub address: String,
    #[validate(length(min = 1, message = "City is required"))]
    pub city: String,
    pub postal_code: String,
    pub country: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderItemInput {
    pub product_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateOrderRequest {
    #[validate(length(min = 1, message = "Order must contain at least one item"))]
    pub items: Vec<OrderItemInput>,
    #[validate]
    pub shipping_address: ShippingAddress,
    pub payment_method: PaymentMethod,
    pub items_price: Decimal,
    pub tax_price: Decimal,
    pub shipping_price: Decimal,
    pub total_price: Decimal,
}

/// Caller-supplied proof for card/PayPal/bank-transfer payments. M-Pesa and
/// cash-on-delivery orders ignore it.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct PaymentProof {
    pub transaction_id: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PaymentResult {
    pub reference: Option<String>,
    pub status: Option<String>,
    pub time: Option<DateTime<Utc>>,
    pub phone: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub buyer_id: Uuid,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub shipping_address: ShippingAddress,
    pub items: Vec<order_item::Model>,
    pub items_price: Decimal,
    pub tax_price: Decimal,
    pub shipping_price: Decimal,
    pub total_price: Decimal,
    pub is_paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub is_delivered: bool,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub inventory_updated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_result: Option<PaymentResult>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderListResponse {
    pub orders: Vec<OrderResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Deduct `quantity` from a product's stock with a conditional update.
/// Returns false when the product is missing or stock is insufficient; the
/// caller decides whether that aborts the surrounding transaction.
pub(crate) async fn deduct_stock<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    quantity: i32,
) -> Result<bool, ServiceError> {
    let result = product::Entity::update_many()
        .col_expr(
            product::Column::Stock,
            Expr::col(product::Column::Stock).sub(quantity),
        )
        .filter(product::Column::Id.eq(product_id))
        .filter(product::Column::Stock.gte(quantity))
        .exec(conn)
        .await?;
    Ok(result.rows_affected > 0)
}

/// Restore `quantity` onto a product's stock. A missing product is a no-op.
pub(crate) async fn restore_stock<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    quantity: i32,
) -> Result<bool, ServiceError> {
    let result = product::Entity::update_many()
        .col_expr(
            product::Column::Stock,
            Expr::col(product::Column::Stock).add(quantity),
        )
        .filter(product::Column::Id.eq(product_id))
        .exec(conn)
        .await?;
    Ok(result.rows_affected > 0)
}

/// Compare line items against current product stock. Missing products count
/// as zero available.
pub(crate) async fn stock_shortages<C: ConnectionTrait>(
    conn: &C,
    items: &[order_item::Model],
) -> Result<Vec<StockShortage>, ServiceError> {
    let product_ids: Vec<Uuid> = items.iter().map(|i| i.product_id).collect();
    let products: HashMap<Uuid, product::Model> = product::Entity::find()
        .filter(product::Column::Id.is_in(product_ids))
        .all(conn)
        .await?
        .into_iter()
        .map(|p| (p.id, p))
        .collect();

    let mut shortages = Vec::new();
    for item in items {
        let available = products.get(&item.product_id).map(|p| p.stock).unwrap_or(0);
        if item.quantity > available {
            shortages.push(StockShortage {
                product_id: item.product_id,
                product_name: item.name.clone(),
                requested: item.quantity,
                available,
            });
        }
    }
    Ok(shortages)
}

pub(crate) fn distinct_farmers(items: &[order_item::Model]) -> Vec<Uuid> {
    items
        .iter()
        .map(|i| i.farmer_id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Order workflow: creation with a line-item snapshot, the paid transition
/// with idempotent stock deduction, delivery and cancellation.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Validates cart contents against live inventory and persists the order
    /// with an immutable line-item snapshot. Stock is checked but not
    /// deducted here; deduction happens at payment time.
    #[instrument(skip(self, request), fields(buyer_id = %buyer.id))]
    pub async fn create_order(
        &self,
        buyer: &AuthUser,
        request: CreateOrderRequest,
    ) -> Result<OrderResponse, ServiceError> {
        request.validate()?;
        if request.items.iter().any(|i| i.quantity < 1) {
            return Err(ServiceError::ValidationError(
                "Item quantities must be at least 1".to_string(),
            ));
        }

        let db = &*self.db;
        let product_ids: Vec<Uuid> = request.items.iter().map(|i| i.product_id).collect();
        let products: HashMap<Uuid, product::Model> = product::Entity::find()
            .filter(product::Column::Id.is_in(product_ids.clone()))
            .all(db)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        let missing: Vec<String> = product_ids
            .iter()
            .filter(|id| !products.contains_key(id))
            .map(|id| id.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ServiceError::NotFound(format!(
                "Products not found: {}",
                missing.join(", ")
            )));
        }

        let mut shortages = Vec::new();
        for item in &request.items {
            let product = &products[&item.product_id];
            if item.quantity > product.stock {
                shortages.push(StockShortage {
                    product_id: product.id,
                    product_name: product.name.clone(),
                    requested: item.quantity,
                    available: product.stock,
                });
            }
        }
        if !shortages.is_empty() {
            return Err(ServiceError::InsufficientStock(shortages));
        }

        // Snapshot farm identity from the owning farmers as of this instant.
        let farmer_ids: Vec<Uuid> = products.values().map(|p| p.farmer_id).collect();
        let farmers: HashMap<Uuid, user::Model> = user::Entity::find()
            .filter(user::Column::Id.is_in(farmer_ids))
            .all(db)
            .await?
            .into_iter()
            .map(|u| (u.id, u))
            .collect();

        let now = Utc::now();
        let order_id = Uuid::new_v4();

        let txn = db.begin().await?;

        let order_model = order::ActiveModel {
            id: Set(order_id),
            buyer_id: Set(buyer.id),
            shipping_address: Set(request.shipping_address.address.clone()),
            city: Set(request.shipping_address.city.clone()),
            postal_code: Set(request.shipping_address.postal_code.clone()),
            country: Set(request.shipping_address.country.clone()),
            payment_method: Set(request.payment_method),
            items_price: Set(request.items_price),
            tax_price: Set(request.tax_price),
            shipping_price: Set(request.shipping_price),
            total_price: Set(request.total_price),
            status: Set(OrderStatus::Processing),
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
            updated_at: Set(Some(now)),
        }
        .insert(&txn)
        .await?;

        let mut items = Vec::with_capacity(request.items.len());
        for input in &request.items {
            let product = &products[&input.product_id];
            let farmer = farmers.get(&product.farmer_id);
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(product.id),
                farmer_id: Set(product.farmer_id),
                name: Set(product.name.clone()),
                image_url: Set(product.image_url.clone()),
                quantity: Set(input.quantity),
                unit_price: Set(product.price),
                farm_name: Set(farmer
                    .and_then(|f| f.farm_name.clone())
                    .unwrap_or_default()),
                farmer_phone: Set(farmer.and_then(|f| f.phone.clone())),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;
            items.push(item);
        }

        txn.commit().await?;

        info!(order_id = %order_id, item_count = items.len(), "Order created");
        self.event_sender
            .send(Event::OrderCreated {
                order_id,
                buyer_id: buyer.id,
            })
            .await;

        Ok(to_response(order_model, items))
    }

    /// The central state transition: verifies payment proof, deducts stock
    /// exactly once and stamps the order paid, all inside one transaction.
    #[instrument(skip(self, proof), fields(order_id = %order_id, actor = %actor.id))]
    pub async fn mark_paid(
        &self,
        order_id: Uuid,
        actor: &AuthUser,
        proof: PaymentProof,
    ) -> Result<OrderResponse, ServiceError> {
        let txn = self.db.begin().await?;

        let order = order::Entity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if order.buyer_id != actor.id && !actor.is_admin() {
            return Err(ServiceError::Forbidden(
                "Only the buyer or an admin can pay for this order".to_string(),
            ));
        }
        if order.is_paid() {
            return Err(ServiceError::InvalidOperation(
                "Order is already paid".to_string(),
            ));
        }

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&txn)
            .await?;

        // Re-check against current stock; creation-time checks may be stale.
        let shortages = stock_shortages(&txn, &items).await?;
        if !shortages.is_empty() {
            return Err(ServiceError::InsufficientStock(shortages));
        }

        let now = Utc::now();
        let (payment_ref, payment_status, payment_time, payment_phone) = match order.payment_method
        {
            PaymentMethod::Mpesa => {
                let payment = crate::entities::payment::Entity::find()
                    .filter(crate::entities::payment::Column::OrderId.eq(order_id))
                    .filter(
                        crate::entities::payment::Column::Status
                            .eq(crate::entities::payment::PaymentStatus::Successful),
                    )
                    .one(&txn)
                    .await?
                    .ok_or_else(|| {
                        ServiceError::InvalidOperation(
                            "No successful M-Pesa payment found for this order".to_string(),
                        )
                    })?;
                (
                    payment.receipt_number.clone(),
                    Some("successful".to_string()),
                    payment.transaction_date.or(Some(now)),
                    Some(payment.phone_number.clone()),
                )
            }
            PaymentMethod::CashOnDelivery => {
                let buyer = user::Entity::find_by_id(order.buyer_id).one(&txn).await?;
                (
                    None,
                    Some("cash_on_delivery".to_string()),
                    Some(now),
                    buyer.and_then(|b| b.phone),
                )
            }
            _ => {
                let transaction_id = proof.transaction_id.ok_or_else(|| {
                    ServiceError::ValidationError(
                        "A transaction id is required for this payment method".to_string(),
                    )
                })?;
                let status = proof.status.ok_or_else(|| {
                    ServiceError::ValidationError(
                        "A payment status is required for this payment method".to_string(),
                    )
                })?;
                (Some(transaction_id), Some(status), Some(now), None)
            }
        };

        // First paid transition deducts stock; the flag makes the deduction
        // idempotent when the M-Pesa callback already performed it.
        let mut notified_farmers = Vec::new();
        if !order.inventory_updated {
            for item in &items {
                if !deduct_stock(&txn, item.product_id, item.quantity).await? {
                    let available = product::Entity::find_by_id(item.product_id)
                        .one(&txn)
                        .await?
                        .map(|p| p.stock)
                        .unwrap_or(0);
                    return Err(ServiceError::InsufficientStock(vec![StockShortage {
                        product_id: item.product_id,
                        product_name: item.name.clone(),
                        requested: item.quantity,
                        available,
                    }]));
                }
            }
            notified_farmers = distinct_farmers(&items);
        }

        let buyer_id = order.buyer_id;
        let mut active: order::ActiveModel = order.into();
        active.paid_at = Set(Some(now));
        active.status = Set(OrderStatus::Processing);
        active.inventory_updated = Set(true);
        active.payment_ref = Set(payment_ref);
        active.payment_status = Set(payment_status);
        active.payment_time = Set(payment_time);
        active.payment_phone = Set(payment_phone);
        active.updated_at = Set(Some(now));
        let updated = active.update(&txn).await?;

        txn.commit().await?;

        info!(order_id = %order_id, "Order marked paid");
        for farmer_id in notified_farmers {
            self.event_sender
                .send(Event::FarmerOrderPaid {
                    order_id,
                    farmer_id,
                })
                .await;
        }
        self.event_sender
            .send(Event::OrderPaid { order_id, buyer_id })
            .await;

        Ok(to_response(updated, items))
    }

    /// Delivery is a single-document write; no inventory interaction.
    #[instrument(skip(self), fields(order_id = %order_id, actor = %actor.id))]
    pub async fn mark_delivered(
        &self,
        order_id: Uuid,
        actor: &AuthUser,
    ) -> Result<OrderResponse, ServiceError> {
        let db = &*self.db;
        let order = order::Entity::find_by_id(order_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(db)
            .await?;

        let farmer_owns_line = items.iter().any(|i| i.farmer_id == actor.id);
        if !actor.is_admin() && !(actor.is_farmer() && farmer_owns_line) {
            return Err(ServiceError::Forbidden(
                "Only an admin or a farmer with produce in this order can mark it delivered"
                    .to_string(),
            ));
        }

        let now = Utc::now();
        let buyer_id = order.buyer_id;
        let mut active: order::ActiveModel = order.into();
        active.delivered_at = Set(Some(now));
        active.status = Set(OrderStatus::Delivered);
        active.updated_at = Set(Some(now));
        let updated = active.update(db).await?;

        info!(order_id = %order_id, "Order marked delivered");
        self.event_sender
            .send(Event::OrderDelivered { order_id, buyer_id })
            .await;

        Ok(to_response(updated, items))
    }

    /// Cancels an order, restoring stock when it had already been deducted.
    /// Restoration is best-effort per item: a product deleted since the
    /// order was placed is skipped, not fatal.
    #[instrument(skip(self), fields(order_id = %order_id, actor = %actor.id))]
    pub async fn cancel_order(
        &self,
        order_id: Uuid,
        actor: &AuthUser,
    ) -> Result<OrderResponse, ServiceError> {
        let txn = self.db.begin().await?;

        let order = order::Entity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if order.buyer_id != actor.id && !actor.is_admin() {
            return Err(ServiceError::Forbidden(
                "Only the buyer or an admin can cancel this order".to_string(),
            ));
        }
        match order.status {
            OrderStatus::Delivered => {
                return Err(ServiceError::InvalidOperation(
                    "A delivered order cannot be cancelled".to_string(),
                ));
            }
            OrderStatus::Cancelled => {
                return Err(ServiceError::InvalidOperation(
                    "Order is already cancelled".to_string(),
                ));
            }
            OrderStatus::Processing | OrderStatus::Shipped => {}
        }

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&txn)
            .await?;

        if order.inventory_updated {
            for item in &items {
                if !restore_stock(&txn, item.product_id, item.quantity).await? {
                    warn!(
                        order_id = %order_id,
                        product_id = %item.product_id,
                        "Product missing during stock restoration; skipping"
                    );
                }
            }
        }

        let now = Utc::now();
        let buyer_id = order.buyer_id;
        let mut active: order::ActiveModel = order.into();
        active.status = Set(OrderStatus::Cancelled);
        active.cancelled_at = Set(Some(now));
        active.cancelled_by = Set(Some(actor.id));
        active.updated_at = Set(Some(now));
        let updated = active.update(&txn).await?;

        txn.commit().await?;

        info!(order_id = %order_id, "Order cancelled");
        self.event_sender
            .send(Event::OrderCancelled { order_id, buyer_id })
            .await;
        for farmer_id in distinct_farmers(&items) {
            self.event_sender
                .send(Event::FarmerOrderCancelled {
                    order_id,
                    farmer_id,
                })
                .await;
        }

        Ok(to_response(updated, items))
    }

    /// Visible to the buyer, an admin, or a farmer with produce in the order.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_order(
        &self,
        order_id: Uuid,
        actor: &AuthUser,
    ) -> Result<OrderResponse, ServiceError> {
        let db = &*self.db;
        let order = order::Entity::find_by_id(order_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(db)
            .await?;

        let farmer_owns_line = items.iter().any(|i| i.farmer_id == actor.id);
        if order.buyer_id != actor.id && !actor.is_admin() && !farmer_owns_line {
            return Err(ServiceError::Forbidden(
                "You do not have access to this order".to_string(),
            ));
        }

        Ok(to_response(order, items))
    }

    #[instrument(skip(self))]
    pub async fn list_buyer_orders(
        &self,
        buyer_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<OrderListResponse, ServiceError> {
        let paginator = order::Entity::find()
            .filter(order::Column::BuyerId.eq(buyer_id))
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;
        self.into_list(orders, total, page, per_page).await
    }

    /// Orders containing at least one of the farmer's products.
    #[instrument(skip(self))]
    pub async fn list_farmer_orders(
        &self,
        farmer_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<OrderListResponse, ServiceError> {
        let db = &*self.db;
        let order_ids: BTreeSet<Uuid> = order_item::Entity::find()
            .filter(order_item::Column::FarmerId.eq(farmer_id))
            .all(db)
            .await?
            .into_iter()
            .map(|i| i.order_id)
            .collect();

        let paginator = order::Entity::find()
            .filter(order::Column::Id.is_in(order_ids))
            .order_by_desc(order::Column::CreatedAt)
            .paginate(db, per_page);

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;
        self.into_list(orders, total, page, per_page).await
    }

    /// Admin listing across all buyers.
    #[instrument(skip(self))]
    pub async fn list_orders(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<OrderListResponse, ServiceError> {
        let paginator = order::Entity::find()
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await?;
        let orders = paginator.fetch_page(page.saturating_sub(1)).await?;
        self.into_list(orders, total, page, per_page).await
    }

    async fn into_list(
        &self,
        orders: Vec<order::Model>,
        total: u64,
        page: u64,
        per_page: u64,
    ) -> Result<OrderListResponse, ServiceError> {
        let order_ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
        let mut items_by_order: HashMap<Uuid, Vec<order_item::Model>> = HashMap::new();
        for item in order_item::Entity::find()
            .filter(order_item::Column::OrderId.is_in(order_ids))
            .all(&*self.db)
            .await?
        {
            items_by_order.entry(item.order_id).or_default().push(item);
        }

        let orders = orders
            .into_iter()
            .map(|o| {
                let items = items_by_order.remove(&o.id).unwrap_or_default();
                to_response(o, items)
            })
            .collect();

        Ok(OrderListResponse {
            orders,
            total,
            page,
            per_page,
        })
    }
}

fn to_response(order: order::Model, items: Vec<order_item::Model>) -> OrderResponse {
    let payment_result = if order.payment_ref.is_some()
        || order.payment_status.is_some()
        || order.payment_time.is_some()
    {
        Some(PaymentResult {
            reference: order.payment_ref.clone(),
            status: order.payment_status.clone(),
            time: order.payment_time,
            phone: order.payment_phone.clone(),
        })
    } else {
        None
    };

    OrderResponse {
        id: order.id,
        buyer_id: order.buyer_id,
        status: order.status,
        payment_method: order.payment_method,
        shipping_address: ShippingAddress {
            address: order.shipping_address,
            city: order.city,
            postal_code: order.postal_code,
            country: order.country,
        },
        items,
        items_price: order.items_price,
        tax_price: order.tax_price,
        shipping_price: order.shipping_price,
        total_price: order.total_price,
        is_paid: order.paid_at.is_some(),
        paid_at: order.paid_at,
        is_delivered: order.delivered_at.is_some(),
        delivered_at: order.delivered_at,
        cancelled_at: order.cancelled_at,
        inventory_updated: order.inventory_updated,
        payment_result,
        created_at: order.created_at,
    }
}
