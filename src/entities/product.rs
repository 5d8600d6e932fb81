use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Produce listing owned by a farmer. Stock is mutated only by the order
/// workflow after creation (payment deducts, cancellation restores).
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize, ToSchema)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub farmer_id: Uuid,
    pub name: String,
    pub description: String,
    pub category: String,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub price: Decimal,
    /// Never negative; deducted with a conditional update at payment time
    pub stock: i32,
    #[sea_orm(nullable)]
    pub image_url: Option<String>,
    pub is_organic: bool,
    /// Copied from the owning farmer's farm_location at creation
    pub location: String,
    pub created_at: DateTime<Utc>,
    #[sea_orm(nullable)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::FarmerId",
        to = "super::user::Column::Id"
    )]
    Farmer,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Farmer.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
