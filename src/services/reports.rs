use crate::{
    entities::{
        order::{self, OrderStatus},
        product,
        user::{self, UserRole},
    },
    errors::ServiceError,
};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct UserCounts {
    pub total: u64,
    pub admins: u64,
    pub farmers: u64,
    pub buyers: u64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderCounts {
    pub total: u64,
    pub processing: u64,
    pub delivered: u64,
    pub cancelled: u64,
    pub paid: u64,
}

/// Admin dashboard aggregates.
#[derive(Debug, Serialize, ToSchema)]
pub struct DashboardReport {
    pub users: UserCounts,
    pub product_count: u64,
    pub orders: OrderCounts,
    /// Sum of total_price over paid orders
    pub revenue: Decimal,
    pub recent_orders: Vec<order::Model>,
}

const RECENT_ORDERS: u64 = 10;

#[derive(Clone)]
pub struct ReportService {
    db: Arc<DatabaseConnection>,
}

impl ReportService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn dashboard(&self) -> Result<DashboardReport, ServiceError> {
        let db = &*self.db;

        let users = UserCounts {
            total: user::Entity::find().count(db).await?,
            admins: user::Entity::find()
                .filter(user::Column::Role.eq(UserRole::Admin))
                .count(db)
                .await?,
            farmers: user::Entity::find()
                .filter(user::Column::Role.eq(UserRole::Farmer))
                .count(db)
                .await?,
            buyers: user::Entity::find()
                .filter(user::Column::Role.eq(UserRole::Buyer))
                .count(db)
                .await?,
        };

        let product_count = product::Entity::find().count(db).await?;

        let orders = OrderCounts {
            total: order::Entity::find().count(db).await?,
            processing: order::Entity::find()
                .filter(order::Column::Status.eq(OrderStatus::Processing))
                .count(db)
                .await?,
            delivered: order::Entity::find()
                .filter(order::Column::Status.eq(OrderStatus::Delivered))
                .count(db)
                .await?,
            cancelled: order::Entity::find()
                .filter(order::Column::Status.eq(OrderStatus::Cancelled))
                .count(db)
                .await?,
            paid: order::Entity::find()
                .filter(order::Column::PaidAt.is_not_null())
                .count(db)
                .await?,
        };

        let revenue: Option<Decimal> = order::Entity::find()
            .select_only()
            .column_as(Expr::col(order::Column::TotalPrice).sum(), "revenue")
            .filter(order::Column::PaidAt.is_not_null())
            .into_tuple()
            .one(db)
            .await?
            .flatten();

        let recent_orders = order::Entity::find()
            .order_by_desc(order::Column::CreatedAt)
            .limit(RECENT_ORDERS)
            .all(db)
            .await?;

        Ok(DashboardReport {
            users,
            product_count,
            orders,
            revenue: revenue.unwrap_or_default(),
            recent_orders,
        })
    }
}
