mod common;

use agricart_api::{
    entities::{
        order::{OrderStatus, PaymentMethod},
        user::UserRole,
    },
    errors::ServiceError,
    events::Event,
    services::orders::{
        CreateOrderRequest, OrderItemInput, OrderService, PaymentProof, ShippingAddress,
    },
};
use assert_matches::assert_matches;
use common::*;
use rstest::rstest;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

fn order_request(items: Vec<(Uuid, i32)>, total: Decimal, method: PaymentMethod) -> CreateOrderRequest {
    CreateOrderRequest {
        items: items
            .into_iter()
            .map(|(product_id, quantity)| OrderItemInput {
                product_id,
                quantity,
            })
            .collect(),
        shipping_address: ShippingAddress {
            address: "Moi Avenue".into(),
            city: "Nairobi".into(),
            postal_code: "00100".into(),
            country: "Kenya".into(),
        },
        payment_method: method,
        items_price: total,
        tax_price: Decimal::ZERO,
        shipping_price: Decimal::ZERO,
        total_price: total,
    }
}

#[tokio::test]
async fn creating_an_order_snapshots_items_without_touching_stock() {
    let db = test_db().await;
    let (sender, mut events) = event_channel();
    let service = OrderService::new(db.clone(), sender);

    let farmer = seed_user(&db, "Kamau", UserRole::Farmer).await;
    let buyer = seed_user(&db, "Wanjiku", UserRole::Buyer).await;
    let spinach = seed_product(&db, &farmer, "Spinach", dec!(40), 10).await;

    let order = service
        .create_order(
            &actor(&buyer),
            order_request(vec![(spinach.id, 3)], dec!(120), PaymentMethod::Mpesa),
        )
        .await
        .unwrap();

    assert_eq!(order.status, OrderStatus::Processing);
    assert!(!order.is_paid);
    assert!(!order.inventory_updated);
    assert_eq!(order.items.len(), 1);
    assert_eq!(order.items[0].name, "Spinach");
    assert_eq!(order.items[0].unit_price, dec!(40));
    assert_eq!(order.items[0].farmer_id, farmer.id);
    assert_eq!(order.items[0].farm_name, "Kamau Farm");

    // Stock is only checked at creation, not reserved.
    assert_eq!(stock_of(&db, spinach.id).await, 10);

    let emitted = drain_events(&mut events);
    assert_matches!(emitted.as_slice(), [Event::OrderCreated { buyer_id, .. }] => {
        assert_eq!(*buyer_id, buyer.id);
    });
}

#[tokio::test]
async fn unknown_product_fails_order_creation() {
    let db = test_db().await;
    let (sender, _events) = event_channel();
    let service = OrderService::new(db.clone(), sender);
    let buyer = seed_user(&db, "Wanjiku", UserRole::Buyer).await;

    let missing = Uuid::new_v4();
    let err = service
        .create_order(
            &actor(&buyer),
            order_request(vec![(missing, 1)], dec!(40), PaymentMethod::Mpesa),
        )
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::NotFound(msg) => {
        assert!(msg.contains(&missing.to_string()));
    });
}

#[tokio::test]
async fn shortage_at_creation_reports_every_deficient_line() {
    let db = test_db().await;
    let (sender, _events) = event_channel();
    let service = OrderService::new(db.clone(), sender);

    let farmer = seed_user(&db, "Kamau", UserRole::Farmer).await;
    let buyer = seed_user(&db, "Wanjiku", UserRole::Buyer).await;
    let spinach = seed_product(&db, &farmer, "Spinach", dec!(40), 2).await;
    let kale = seed_product(&db, &farmer, "Kale", dec!(30), 5).await;

    let err = service
        .create_order(
            &actor(&buyer),
            order_request(
                vec![(spinach.id, 5), (kale.id, 10)],
                dec!(500),
                PaymentMethod::Mpesa,
            ),
        )
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::InsufficientStock(shortages) => {
        assert_eq!(shortages.len(), 2);
        let spinach_line = shortages.iter().find(|s| s.product_id == spinach.id).unwrap();
        assert_eq!(spinach_line.requested, 5);
        assert_eq!(spinach_line.available, 2);
    });
}

#[tokio::test]
async fn zero_quantity_lines_are_rejected() {
    let db = test_db().await;
    let (sender, _events) = event_channel();
    let service = OrderService::new(db.clone(), sender);

    let farmer = seed_user(&db, "Kamau", UserRole::Farmer).await;
    let buyer = seed_user(&db, "Wanjiku", UserRole::Buyer).await;
    let spinach = seed_product(&db, &farmer, "Spinach", dec!(40), 10).await;

    let err = service
        .create_order(
            &actor(&buyer),
            order_request(vec![(spinach.id, 0)], dec!(0), PaymentMethod::Mpesa),
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
}

#[tokio::test]
async fn cash_on_delivery_payment_deducts_stock_and_notifies() {
    let db = test_db().await;
    let (sender, mut events) = event_channel();
    let service = OrderService::new(db.clone(), sender);

    let farmer = seed_user(&db, "Kamau", UserRole::Farmer).await;
    let buyer = seed_user(&db, "Wanjiku", UserRole::Buyer).await;
    let spinach = seed_product(&db, &farmer, "Spinach", dec!(40), 10).await;
    let order = seed_order(
        &db,
        &buyer,
        &[(spinach.clone(), 3)],
        PaymentMethod::CashOnDelivery,
        OrderStatus::Processing,
    )
    .await;

    let paid = service
        .mark_paid(order.id, &actor(&buyer), PaymentProof::default())
        .await
        .unwrap();

    assert!(paid.is_paid);
    assert!(paid.inventory_updated);
    assert_eq!(
        paid.payment_result.as_ref().unwrap().status.as_deref(),
        Some("cash_on_delivery")
    );
    assert_eq!(stock_of(&db, spinach.id).await, 7);

    let emitted = drain_events(&mut events);
    assert!(emitted
        .iter()
        .any(|e| matches!(e, Event::OrderPaid { buyer_id, .. } if *buyer_id == buyer.id)));
    assert!(emitted
        .iter()
        .any(|e| matches!(e, Event::FarmerOrderPaid { farmer_id, .. } if *farmer_id == farmer.id)));
}

#[tokio::test]
async fn paying_twice_is_rejected_and_stock_deducts_once() {
    let db = test_db().await;
    let (sender, _events) = event_channel();
    let service = OrderService::new(db.clone(), sender);

    let farmer = seed_user(&db, "Kamau", UserRole::Farmer).await;
    let buyer = seed_user(&db, "Wanjiku", UserRole::Buyer).await;
    let spinach = seed_product(&db, &farmer, "Spinach", dec!(40), 10).await;
    let order = seed_order(
        &db,
        &buyer,
        &[(spinach.clone(), 3)],
        PaymentMethod::CashOnDelivery,
        OrderStatus::Processing,
    )
    .await;

    service
        .mark_paid(order.id, &actor(&buyer), PaymentProof::default())
        .await
        .unwrap();
    let err = service
        .mark_paid(order.id, &actor(&buyer), PaymentProof::default())
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::InvalidOperation(_));
    assert_eq!(stock_of(&db, spinach.id).await, 7);
}

#[tokio::test]
async fn only_the_buyer_or_admin_can_pay() {
    let db = test_db().await;
    let (sender, _events) = event_channel();
    let service = OrderService::new(db.clone(), sender);

    let farmer = seed_user(&db, "Kamau", UserRole::Farmer).await;
    let buyer = seed_user(&db, "Wanjiku", UserRole::Buyer).await;
    let stranger = seed_user(&db, "Otieno", UserRole::Buyer).await;
    let admin = seed_user(&db, "Admin", UserRole::Admin).await;
    let spinach = seed_product(&db, &farmer, "Spinach", dec!(40), 10).await;
    let order = seed_order(
        &db,
        &buyer,
        &[(spinach, 1)],
        PaymentMethod::CashOnDelivery,
        OrderStatus::Processing,
    )
    .await;

    let err = service
        .mark_paid(order.id, &actor(&stranger), PaymentProof::default())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Forbidden(_));

    // Admin may settle on the buyer's behalf.
    assert!(service
        .mark_paid(order.id, &actor(&admin), PaymentProof::default())
        .await
        .is_ok());
}

#[tokio::test]
async fn card_payments_require_proof() {
    let db = test_db().await;
    let (sender, _events) = event_channel();
    let service = OrderService::new(db.clone(), sender);

    let farmer = seed_user(&db, "Kamau", UserRole::Farmer).await;
    let buyer = seed_user(&db, "Wanjiku", UserRole::Buyer).await;
    let spinach = seed_product(&db, &farmer, "Spinach", dec!(40), 10).await;
    let order = seed_order(
        &db,
        &buyer,
        &[(spinach.clone(), 1)],
        PaymentMethod::CreditCard,
        OrderStatus::Processing,
    )
    .await;

    let err = service
        .mark_paid(order.id, &actor(&buyer), PaymentProof::default())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let paid = service
        .mark_paid(
            order.id,
            &actor(&buyer),
            PaymentProof {
                transaction_id: Some("txn_123".into()),
                status: Some("completed".into()),
            },
        )
        .await
        .unwrap();
    assert_eq!(
        paid.payment_result.as_ref().unwrap().reference.as_deref(),
        Some("txn_123")
    );
    assert_eq!(stock_of(&db, spinach.id).await, 9);
}

#[tokio::test]
async fn stock_sold_out_between_creation_and_payment_aborts_cleanly() {
    let db = test_db().await;
    let (sender, mut events) = event_channel();
    let service = OrderService::new(db.clone(), sender);

    let farmer = seed_user(&db, "Kamau", UserRole::Farmer).await;
    let buyer = seed_user(&db, "Wanjiku", UserRole::Buyer).await;
    // Order wants 3 but only 2 remain by the time payment happens.
    let spinach = seed_product(&db, &farmer, "Spinach", dec!(40), 2).await;
    let order = seed_order(
        &db,
        &buyer,
        &[(spinach.clone(), 3)],
        PaymentMethod::CashOnDelivery,
        OrderStatus::Processing,
    )
    .await;

    let err = service
        .mark_paid(order.id, &actor(&buyer), PaymentProof::default())
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InsufficientStock(_));

    // Nothing was deducted and the order is still payable later.
    assert_eq!(stock_of(&db, spinach.id).await, 2);
    let fetched = service.get_order(order.id, &actor(&buyer)).await.unwrap();
    assert!(!fetched.is_paid);
    assert!(drain_events(&mut events).is_empty());
}

#[tokio::test]
async fn delivery_is_restricted_to_admins_and_line_farmers() {
    let db = test_db().await;
    let (sender, mut events) = event_channel();
    let service = OrderService::new(db.clone(), sender);

    let farmer = seed_user(&db, "Kamau", UserRole::Farmer).await;
    let other_farmer = seed_user(&db, "Njoroge", UserRole::Farmer).await;
    let buyer = seed_user(&db, "Wanjiku", UserRole::Buyer).await;
    let spinach = seed_product(&db, &farmer, "Spinach", dec!(40), 10).await;
    let order = seed_order(
        &db,
        &buyer,
        &[(spinach, 1)],
        PaymentMethod::CashOnDelivery,
        OrderStatus::Processing,
    )
    .await;

    assert_matches!(
        service
            .mark_delivered(order.id, &actor(&other_farmer))
            .await
            .unwrap_err(),
        ServiceError::Forbidden(_)
    );
    assert_matches!(
        service
            .mark_delivered(order.id, &actor(&buyer))
            .await
            .unwrap_err(),
        ServiceError::Forbidden(_)
    );

    let delivered = service
        .mark_delivered(order.id, &actor(&farmer))
        .await
        .unwrap();
    assert!(delivered.is_delivered);
    assert_eq!(delivered.status, OrderStatus::Delivered);

    let emitted = drain_events(&mut events);
    assert!(emitted
        .iter()
        .any(|e| matches!(e, Event::OrderDelivered { buyer_id, .. } if *buyer_id == buyer.id)));
}

#[tokio::test]
async fn cancelling_an_unpaid_order_does_not_restock() {
    let db = test_db().await;
    let (sender, mut events) = event_channel();
    let service = OrderService::new(db.clone(), sender);

    let farmer = seed_user(&db, "Kamau", UserRole::Farmer).await;
    let buyer = seed_user(&db, "Wanjiku", UserRole::Buyer).await;
    let spinach = seed_product(&db, &farmer, "Spinach", dec!(40), 10).await;
    let order = seed_order(
        &db,
        &buyer,
        &[(spinach.clone(), 3)],
        PaymentMethod::Mpesa,
        OrderStatus::Processing,
    )
    .await;

    let cancelled = service.cancel_order(order.id, &actor(&buyer)).await.unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(stock_of(&db, spinach.id).await, 10);

    let emitted = drain_events(&mut events);
    assert!(emitted
        .iter()
        .any(|e| matches!(e, Event::OrderCancelled { .. })));
    assert!(emitted
        .iter()
        .any(|e| matches!(e, Event::FarmerOrderCancelled { farmer_id, .. } if *farmer_id == farmer.id)));
}

#[tokio::test]
async fn cancelling_a_paid_order_restores_stock() {
    let db = test_db().await;
    let (sender, _events) = event_channel();
    let service = OrderService::new(db.clone(), sender);

    let farmer = seed_user(&db, "Kamau", UserRole::Farmer).await;
    let buyer = seed_user(&db, "Wanjiku", UserRole::Buyer).await;
    let spinach = seed_product(&db, &farmer, "Spinach", dec!(40), 10).await;
    let order = seed_order(
        &db,
        &buyer,
        &[(spinach.clone(), 4)],
        PaymentMethod::CashOnDelivery,
        OrderStatus::Processing,
    )
    .await;

    service
        .mark_paid(order.id, &actor(&buyer), PaymentProof::default())
        .await
        .unwrap();
    assert_eq!(stock_of(&db, spinach.id).await, 6);

    service.cancel_order(order.id, &actor(&buyer)).await.unwrap();
    assert_eq!(stock_of(&db, spinach.id).await, 10);
}

#[rstest]
#[case::delivered(OrderStatus::Delivered)]
#[case::cancelled(OrderStatus::Cancelled)]
#[tokio::test]
async fn terminal_orders_cannot_be_cancelled(#[case] status: OrderStatus) {
    let db = test_db().await;
    let (sender, _events) = event_channel();
    let service = OrderService::new(db.clone(), sender);

    let farmer = seed_user(&db, "Kamau", UserRole::Farmer).await;
    let buyer = seed_user(&db, "Wanjiku", UserRole::Buyer).await;
    let spinach = seed_product(&db, &farmer, "Spinach", dec!(40), 10).await;
    let order = seed_order(
        &db,
        &buyer,
        &[(spinach, 1)],
        PaymentMethod::CashOnDelivery,
        status,
    )
    .await;

    let err = service
        .cancel_order(order.id, &actor(&buyer))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidOperation(_));
}

#[tokio::test]
async fn order_visibility_covers_buyer_admin_and_line_farmer() {
    let db = test_db().await;
    let (sender, _events) = event_channel();
    let service = OrderService::new(db.clone(), sender);

    let farmer = seed_user(&db, "Kamau", UserRole::Farmer).await;
    let other_farmer = seed_user(&db, "Njoroge", UserRole::Farmer).await;
    let buyer = seed_user(&db, "Wanjiku", UserRole::Buyer).await;
    let stranger = seed_user(&db, "Otieno", UserRole::Buyer).await;
    let admin = seed_user(&db, "Admin", UserRole::Admin).await;
    let spinach = seed_product(&db, &farmer, "Spinach", dec!(40), 10).await;
    let order = seed_order(
        &db,
        &buyer,
        &[(spinach, 1)],
        PaymentMethod::Mpesa,
        OrderStatus::Processing,
    )
    .await;

    assert!(service.get_order(order.id, &actor(&buyer)).await.is_ok());
    assert!(service.get_order(order.id, &actor(&admin)).await.is_ok());
    assert!(service.get_order(order.id, &actor(&farmer)).await.is_ok());
    assert_matches!(
        service
            .get_order(order.id, &actor(&stranger))
            .await
            .unwrap_err(),
        ServiceError::Forbidden(_)
    );
    assert_matches!(
        service
            .get_order(order.id, &actor(&other_farmer))
            .await
            .unwrap_err(),
        ServiceError::Forbidden(_)
    );
}

#[tokio::test]
async fn farmer_listing_only_contains_orders_with_their_produce() {
    let db = test_db().await;
    let (sender, _events) = event_channel();
    let service = OrderService::new(db.clone(), sender);

    let farmer_a = seed_user(&db, "Kamau", UserRole::Farmer).await;
    let farmer_b = seed_user(&db, "Njoroge", UserRole::Farmer).await;
    let buyer = seed_user(&db, "Wanjiku", UserRole::Buyer).await;
    let spinach = seed_product(&db, &farmer_a, "Spinach", dec!(40), 10).await;
    let maize = seed_product(&db, &farmer_b, "Maize", dec!(60), 10).await;

    let order_a = seed_order(
        &db,
        &buyer,
        &[(spinach, 1)],
        PaymentMethod::Mpesa,
        OrderStatus::Processing,
    )
    .await;
    seed_order(
        &db,
        &buyer,
        &[(maize, 2)],
        PaymentMethod::Mpesa,
        OrderStatus::Processing,
    )
    .await;

    let listed = service.list_farmer_orders(farmer_a.id, 1, 20).await.unwrap();
    assert_eq!(listed.total, 1);
    assert_eq!(listed.orders[0].id, order_a.id);

    let buyer_orders = service.list_buyer_orders(buyer.id, 1, 20).await.unwrap();
    assert_eq!(buyer_orders.total, 2);
}
