use crate::{
    auth::AuthUser,
    entities::{product, user},
    errors::ServiceError,
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, ModelTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateProductRequest {
    #[validate(length(min = 1, message = "Product name is required"))]
    pub name: String,
    pub description: String,
    #[validate(length(min = 1, message = "Category is required"))]
    pub category: String,
    pub price: Decimal,
    pub stock: i32,
    pub image_url: Option<String>,
    #[serde(default)]
    pub is_organic: bool,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateProductRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub price: Option<Decimal>,
    pub stock: Option<i32>,
    pub image_url: Option<String>,
    pub is_organic: Option<bool>,
}

/// Catalog filters; all optional and combinable.
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct ProductFilter {
    pub category: Option<String>,
    pub is_organic: Option<bool>,
    /// Case-insensitive substring match on name and description
    pub search: Option<String>,
    pub min_price: Option<Decimal>,
    pub max_price: Option<Decimal>,
    pub farmer_id: Option<Uuid>,
    /// Hide listings with no remaining stock
    pub in_stock: Option<bool>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProductListResponse {
    pub products: Vec<product::Model>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

const DEFAULT_PER_PAGE: u64 = 20;
const MAX_PER_PAGE: u64 = 100;

/// Produce catalog: farmer-owned CRUD plus public browsing with filters.
#[derive(Clone)]
pub struct ProductService {
    db: Arc<DatabaseConnection>,
}

impl ProductService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Only farmers list produce. The listing's location is copied from the
    /// farmer's registered farm location at creation time.
    #[instrument(skip(self, request), fields(farmer_id = %actor.id))]
    pub async fn create_product(
        &self,
        actor: &AuthUser,
        request: CreateProductRequest,
    ) -> Result<product::Model, ServiceError> {
        request.validate()?;
        if !actor.is_farmer() {
            return Err(ServiceError::Forbidden(
                "Only farmers can list produce".to_string(),
            ));
        }
        if request.price <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "Price must be positive".to_string(),
            ));
        }
        if request.stock < 0 {
            return Err(ServiceError::ValidationError(
                "Stock cannot be negative".to_string(),
            ));
        }

        let db = &*self.db;
        let farmer = user::Entity::find_by_id(actor.id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("User {} not found", actor.id)))?;

        let model = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            farmer_id: Set(actor.id),
            name: Set(request.name.trim().to_string()),
            description: Set(request.description),
            category: Set(request.category),
            price: Set(request.price),
            stock: Set(request.stock),
            image_url: Set(request.image_url),
            is_organic: Set(request.is_organic),
            location: Set(farmer.farm_location.unwrap_or_default()),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(db)
        .await?;

        info!(product_id = %model.id, "Product listed");
        Ok(model)
    }

    #[instrument(skip(self))]
    pub async fn get_product(&self, product_id: Uuid) -> Result<product::Model, ServiceError> {
        product::Entity::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))
    }

    /// The owning farmer or an admin may edit a listing.
    #[instrument(skip(self, request), fields(product_id = %product_id, actor = %actor.id))]
    pub async fn update_product(
        &self,
        product_id: Uuid,
        actor: &AuthUser,
        request: UpdateProductRequest,
    ) -> Result<product::Model, ServiceError> {
        let db = &*self.db;
        let product = product::Entity::find_by_id(product_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        if product.farmer_id != actor.id && !actor.is_admin() {
            return Err(ServiceError::Forbidden(
                "Only the owning farmer or an admin can edit this listing".to_string(),
            ));
        }

        if let Some(price) = request.price {
            if price <= Decimal::ZERO {
                return Err(ServiceError::ValidationError(
                    "Price must be positive".to_string(),
                ));
            }
        }
        if let Some(stock) = request.stock {
            if stock < 0 {
                return Err(ServiceError::ValidationError(
                    "Stock cannot be negative".to_string(),
                ));
            }
        }

        let mut active: product::ActiveModel = product.into();
        if let Some(name) = request.name {
            active.name = Set(name.trim().to_string());
        }
        if let Some(description) = request.description {
            active.description = Set(description);
        }
        if let Some(category) = request.category {
            active.category = Set(category);
        }
        if let Some(price) = request.price {
            active.price = Set(price);
        }
        if let Some(stock) = request.stock {
            active.stock = Set(stock);
        }
        if let Some(image_url) = request.image_url {
            active.image_url = Set(Some(image_url));
        }
        if let Some(is_organic) = request.is_organic {
            active.is_organic = Set(is_organic);
        }
        active.updated_at = Set(Some(Utc::now()));

        Ok(active.update(db).await?)
    }

    /// Deleting a listing does not touch existing orders; their line items
    /// hold a snapshot of everything they need.
    #[instrument(skip(self), fields(product_id = %product_id, actor = %actor.id))]
    pub async fn delete_product(
        &self,
        product_id: Uuid,
        actor: &AuthUser,
    ) -> Result<(), ServiceError> {
        let db = &*self.db;
        let product = product::Entity::find_by_id(product_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        if product.farmer_id != actor.id && !actor.is_admin() {
            return Err(ServiceError::Forbidden(
                "Only the owning farmer or an admin can delete this listing".to_string(),
            ));
        }

        product.delete(db).await?;
        info!(product_id = %product_id, "Product deleted");
        Ok(())
    }

    /// Public catalog browsing.
    #[instrument(skip(self, filter))]
    pub async fn list_products(
        &self,
        filter: ProductFilter,
    ) -> Result<ProductListResponse, ServiceError> {
        let page = filter.page.unwrap_or(1).max(1);
        let per_page = filter
            .per_page
            .unwrap_or(DEFAULT_PER_PAGE)
            .clamp(1, MAX_PER_PAGE);

        let mut condition = Condition::all();
        if let Some(category) = &filter.category {
            condition = condition.add(product::Column::Category.eq(category.clone()));
        }
        if let Some(is_organic) = filter.is_organic {
            condition = condition.add(product::Column::IsOrganic.eq(is_organic));
        }
        if let Some(farmer_id) = filter.farmer_id {
            condition = condition.add(product::Column::FarmerId.eq(farmer_id));
        }
        if let Some(min_price) = filter.min_price {
            condition = condition.add(product::Column::Price.gte(min_price));
        }
        if let Some(max_price) = filter.max_price {
            condition = condition.add(product::Column::Price.lte(max_price));
        }
        if filter.in_stock == Some(true) {
            condition = condition.add(product::Column::Stock.gt(0));
        }
        if let Some(search) = &filter.search {
            let needle = search.trim();
            condition = condition.add(
                Condition::any()
                    .add(product::Column::Name.contains(needle))
                    .add(product::Column::Description.contains(needle)),
            );
        }

        let paginator = product::Entity::find()
            .filter(condition)
            .order_by_desc(product::Column::CreatedAt)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await?;
        let products = paginator.fetch_page(page - 1).await?;

        Ok(ProductListResponse {
            products,
            total,
            page,
            per_page,
        })
    }

    /// A farmer's own listings.
    #[instrument(skip(self))]
    pub async fn list_farmer_products(
        &self,
        farmer_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<ProductListResponse, ServiceError> {
        self.list_products(ProductFilter {
            farmer_id: Some(farmer_id),
            page: Some(page),
            per_page: Some(per_page),
            ..Default::default()
        })
        .await
    }
}
