/// Data models for catalog-service
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Product row as stored in PostgreSQL.
///
/// `source_images` is fixed by create/update; `compressed_images` is
/// appended to by the ingestion worker as each source image finishes
/// processing, so its length may lag behind `source_images`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Product {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub description: String,
    pub price: f64,
    pub source_images: Vec<String>,
    pub compressed_images: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request body for POST /products
#[derive(Debug, Clone, Deserialize)]
pub struct CreateProductRequest {
    pub user_id: i64,
    pub product_name: String,
    pub product_description: Option<String>,
    pub product_price: f64,
    #[serde(default)]
    pub product_images: Vec<String>,
}

/// Request body for PUT /products/{id}
///
/// Replaces the user-editable fields; the compressed-image list is owned by
/// the ingestion worker and left untouched.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateProductRequest {
    pub user_id: i64,
    pub product_name: String,
    pub product_description: Option<String>,
    pub product_price: f64,
    #[serde(default)]
    pub product_images: Vec<String>,
}

/// Query parameters for GET /products
#[derive(Debug, Clone, Deserialize)]
pub struct ProductFilter {
    pub user_id: i64,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub product_name: Option<String>,
}

/// Public representation of a product
#[derive(Debug, Clone, Serialize)]
pub struct ProductResponse {
    pub id: i64,
    pub user_id: i64,
    pub product_name: String,
    pub product_description: String,
    pub product_price: f64,
    pub product_images: Vec<String>,
    pub compressed_product_images: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Product> for ProductResponse {
    fn from(p: Product) -> Self {
        ProductResponse {
            id: p.id,
            user_id: p.user_id,
            product_name: p.name,
            product_description: p.description,
            product_price: p.price,
            product_images: p.source_images,
            compressed_product_images: p.compressed_images,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}
