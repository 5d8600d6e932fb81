use crate::{
    auth::AuthUser,
    entities::{
        order::{self, OrderStatus, PaymentMethod},
        order_item,
        payment::{self, PaymentStatus},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::mpesa::{normalize_phone, MpesaGateway},
    services::orders::{deduct_stock, distinct_farmers, stock_shortages},
};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use rust_decimal::{prelude::ToPrimitive, Decimal};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Deserialize, ToSchema)]
pub struct InitiatePaymentRequest {
    pub order_id: Uuid,
    pub phone: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct InitiatePaymentResponse {
    pub payment_id: Uuid,
    pub checkout_request_id: String,
    pub merchant_request_id: String,
    pub customer_message: String,
}

/// The order a payment belongs to, reduced to what a status check needs.
#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentOrderSummary {
    pub id: Uuid,
    pub buyer_id: Uuid,
    pub status: OrderStatus,
    pub total_price: Decimal,
    pub is_paid: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PaymentDetails {
    pub payment: payment::Model,
    pub order: PaymentOrderSummary,
}

/// Daraja result callback envelope, exactly as the gateway posts it.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CallbackEnvelope {
    #[serde(rename = "Body")]
    pub body: CallbackBody,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CallbackBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResultCode")]
    pub result_code: i32,
    #[serde(rename = "ResultDesc")]
    pub result_desc: String,
    #[serde(rename = "CallbackMetadata")]
    pub callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CallbackMetadata {
    #[serde(rename = "Item")]
    pub item: Vec<MetadataItem>,
}

/// Metadata items arrive as name/value pairs; `Value` is absent on some
/// entries, and its JSON type varies by name.
#[derive(Debug, Deserialize, ToSchema)]
pub struct MetadataItem {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value")]
    pub value: Option<serde_json::Value>,
}

/// Fields extracted from a successful callback's metadata.
#[derive(Debug, Default, PartialEq)]
struct CallbackFacts {
    receipt_number: Option<String>,
    transaction_date: Option<DateTime<Utc>>,
    phone_number: Option<String>,
}

fn extract_facts(metadata: &CallbackMetadata) -> CallbackFacts {
    let mut facts = CallbackFacts::default();
    for item in &metadata.item {
        let Some(value) = &item.value else { continue };
        match item.name.as_str() {
            "MpesaReceiptNumber" => {
                facts.receipt_number = value.as_str().map(str::to_string);
            }
            "TransactionDate" => {
                // Arrives as a numeric literal like 20260827104500.
                let raw = match value {
                    serde_json::Value::Number(n) => n.to_string(),
                    serde_json::Value::String(s) => s.clone(),
                    _ => continue,
                };
                if let Ok(naive) = NaiveDateTime::parse_from_str(&raw, "%Y%m%d%H%M%S") {
                    facts.transaction_date = Some(Utc.from_utc_datetime(&naive));
                }
            }
            "PhoneNumber" => {
                facts.phone_number = Some(match value {
                    serde_json::Value::Number(n) => n.to_string(),
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                });
            }
            _ => {}
        }
    }
    facts
}

/// Mobile-money payments: STK push initiation and asynchronous callback
/// reconciliation against orders and inventory.
#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    gateway: MpesaGateway,
    callback_secret: Option<String>,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        gateway: MpesaGateway,
        callback_secret: Option<String>,
    ) -> Self {
        Self {
            db,
            event_sender,
            gateway,
            callback_secret,
        }
    }

    /// Pushes a charge prompt to the buyer's phone and records a pending
    /// payment keyed by the gateway's checkout request id.
    #[instrument(skip(self), fields(order_id = %order_id, actor = %actor.id))]
    pub async fn initiate_stk_push(
        &self,
        actor: &AuthUser,
        order_id: Uuid,
        phone: &str,
    ) -> Result<InitiatePaymentResponse, ServiceError> {
        let phone = normalize_phone(phone)?;

        let db = &*self.db;
        let order = order::Entity::find_by_id(order_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if order.buyer_id != actor.id {
            return Err(ServiceError::Forbidden(
                "Only the buyer can pay for this order".to_string(),
            ));
        }
        if order.is_paid() {
            return Err(ServiceError::InvalidOperation(
                "Order is already paid".to_string(),
            ));
        }
        if order.payment_method != PaymentMethod::Mpesa {
            return Err(ServiceError::InvalidOperation(
                "Order is not payable via M-Pesa".to_string(),
            ));
        }

        // The gateway charges whole shillings.
        let amount = order
            .total_price
            .round()
            .to_u64()
            .filter(|a| *a >= 1)
            .ok_or_else(|| {
                ServiceError::InvalidOperation("Order total is not chargeable".to_string())
            })?;

        let reference = format!("AGC-{}", &order_id.to_string()[..8]);
        let accepted = self
            .gateway
            .stk_push(&phone, amount, &reference, "AgriCart order payment")
            .await?;

        let now = Utc::now();
        let model = payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            user_id: Set(actor.id),
            method: Set("mpesa".to_string()),
            amount: Set(order.total_price),
            status: Set(PaymentStatus::Pending),
            checkout_request_id: Set(accepted.checkout_request_id.clone()),
            merchant_request_id: Set(accepted.merchant_request_id.clone()),
            phone_number: Set(phone),
            receipt_number: Set(None),
            transaction_date: Set(None),
            result_code: Set(None),
            result_desc: Set(None),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        }
        .insert(db)
        .await?;

        info!(payment_id = %model.id, checkout_request_id = %model.checkout_request_id,
              "STK push accepted, payment pending");

        Ok(InitiatePaymentResponse {
            payment_id: model.id,
            checkout_request_id: accepted.checkout_request_id,
            merchant_request_id: accepted.merchant_request_id,
            customer_message: accepted.customer_message,
        })
    }

    /// Authenticates a callback body against the shared secret, when one is
    /// configured. The signature is the hex HMAC-SHA256 of the raw body.
    pub fn verify_callback_signature(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<(), ServiceError> {
        let Some(secret) = &self.callback_secret else {
            return Ok(());
        };
        let signature = signature.ok_or_else(|| {
            ServiceError::Unauthorized("Missing callback signature".to_string())
        })?;
        let expected = hex::decode(signature.trim())
            .map_err(|_| ServiceError::Unauthorized("Malformed callback signature".to_string()))?;

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| ServiceError::InternalError(e.to_string()))?;
        mac.update(body);
        mac.verify_slice(&expected)
            .map_err(|_| ServiceError::Unauthorized("Invalid callback signature".to_string()))
    }

    /// Reconciles a gateway result against the pending payment and, on
    /// success, against the order. Replays of an already-settled callback
    /// are acknowledged without side effects.
    #[instrument(skip(self, envelope),
                 fields(checkout_request_id = %envelope.body.stk_callback.checkout_request_id))]
    pub async fn process_callback(&self, envelope: CallbackEnvelope) -> Result<(), ServiceError> {
        let callback = envelope.body.stk_callback;

        let payment = payment::Entity::find()
            .filter(payment::Column::CheckoutRequestId.eq(callback.checkout_request_id.clone()))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "No payment for checkout request {}",
                    callback.checkout_request_id
                ))
            })?;

        if payment.status != PaymentStatus::Pending {
            info!(payment_id = %payment.id, status = ?payment.status,
                  "Callback replay ignored; payment already settled");
            return Ok(());
        }

        if callback.result_code == 0 {
            self.settle_success(payment, &callback).await
        } else {
            self.settle_failure(payment, &callback).await
        }
    }

    async fn settle_success(
        &self,
        payment: payment::Model,
        callback: &StkCallback,
    ) -> Result<(), ServiceError> {
        let facts = callback
            .callback_metadata
            .as_ref()
            .map(extract_facts)
            .unwrap_or_default();
        let now = Utc::now();

        let txn = self.db.begin().await?;

        let payment_id = payment.id;
        let order_id = payment.order_id;
        let paid_phone = facts
            .phone_number
            .clone()
            .unwrap_or_else(|| payment.phone_number.clone());

        let mut active: payment::ActiveModel = payment.into();
        active.status = Set(PaymentStatus::Successful);
        active.receipt_number = Set(facts.receipt_number.clone());
        active.transaction_date = Set(facts.transaction_date);
        active.result_code = Set(Some(callback.result_code));
        active.result_desc = Set(Some(callback.result_desc.clone()));
        active.updated_at = Set(Some(now));
        active.update(&txn).await?;

        let order = order::Entity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        // Another path may have stamped the order paid while this callback
        // was in flight; the payment record above is still the settlement of
        // record either way.
        if order.is_paid() {
            txn.commit().await?;
            info!(payment_id = %payment_id, order_id = %order_id,
                  "Payment settled; order was already paid");
            return Ok(());
        }

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&txn)
            .await?;

        let mut notified_farmers = Vec::new();
        let mut stamp_order = true;
        if !order.inventory_updated {
            // The money has already moved, so a shortage cannot fail the
            // settlement. The order is left unpaid for support to resolve.
            let shortages = stock_shortages(&txn, &items).await?;
            if shortages.is_empty() {
                for item in &items {
                    if !deduct_stock(&txn, item.product_id, item.quantity).await? {
                        stamp_order = false;
                        break;
                    }
                }
            } else {
                stamp_order = false;
            }
            if stamp_order {
                notified_farmers = distinct_farmers(&items);
            } else {
                warn!(order_id = %order_id, payment_id = %payment_id,
                      "Stock shortage while settling paid callback; order left unpaid");
            }
        }

        let buyer_id = order.buyer_id;
        if stamp_order {
            let mut active: order::ActiveModel = order.into();
            active.paid_at = Set(Some(now));
            active.status = Set(OrderStatus::Processing);
            active.inventory_updated = Set(true);
            active.payment_ref = Set(facts.receipt_number.clone());
            active.payment_status = Set(Some("successful".to_string()));
            active.payment_time = Set(facts.transaction_date.or(Some(now)));
            active.payment_phone = Set(Some(paid_phone));
            active.updated_at = Set(Some(now));
            active.update(&txn).await?;
        }

        txn.commit().await?;

        if stamp_order {
            info!(payment_id = %payment_id, order_id = %order_id, "Payment and order settled");
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
        }
        Ok(())
    }

    async fn settle_failure(
        &self,
        payment: payment::Model,
        callback: &StkCallback,
    ) -> Result<(), ServiceError> {
        let payment_id = payment.id;
        let user_id = payment.user_id;
        let now = Utc::now();

        let mut active: payment::ActiveModel = payment.into();
        active.status = Set(PaymentStatus::Failed);
        active.result_code = Set(Some(callback.result_code));
        active.result_desc = Set(Some(callback.result_desc.clone()));
        active.updated_at = Set(Some(now));
        active.update(&*self.db).await?;

        info!(payment_id = %payment_id, result_code = callback.result_code,
              result_desc = %callback.result_desc, "Payment failed");
        self.event_sender
            .send(Event::PaymentFailed {
                payment_id,
                user_id,
            })
            .await;
        Ok(())
    }

    /// Visible to the paying buyer or an admin. The linked order is
    /// summarized alongside the payment record.
    #[instrument(skip(self), fields(payment_id = %payment_id))]
    pub async fn get_payment(
        &self,
        payment_id: Uuid,
        actor: &AuthUser,
    ) -> Result<PaymentDetails, ServiceError> {
        let payment = payment::Entity::find_by_id(payment_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Payment {} not found", payment_id))
            })?;

        if payment.user_id != actor.id && !actor.is_admin() {
            return Err(ServiceError::Forbidden(
                "You do not have access to this payment".to_string(),
            ));
        }

        let order = order::Entity::find_by_id(payment.order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Order {} not found", payment.order_id))
            })?;

        Ok(PaymentDetails {
            order: PaymentOrderSummary {
                id: order.id,
                buyer_id: order.buyer_id,
                status: order.status,
                total_price: order.total_price,
                is_paid: order.is_paid(),
            },
            payment,
        })
    }

    /// Payments recorded against one order, newest first. Buyer or admin.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn list_order_payments(
        &self,
        order_id: Uuid,
        actor: &AuthUser,
    ) -> Result<Vec<payment::Model>, ServiceError> {
        let db = &*self.db;
        let order = order::Entity::find_by_id(order_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        if order.buyer_id != actor.id && !actor.is_admin() {
            return Err(ServiceError::Forbidden(
                "You do not have access to this order's payments".to_string(),
            ));
        }

        use sea_orm::QueryOrder;
        Ok(payment::Entity::find()
            .filter(payment::Column::OrderId.eq(order_id))
            .order_by_desc(payment::Column::CreatedAt)
            .all(db)
            .await?)
    }
}
