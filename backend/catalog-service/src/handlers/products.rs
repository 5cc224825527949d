/// Product handlers - HTTP endpoints for product operations
use actix_web::web;
use sqlx::PgPool;
use tracing::{error, warn};

use crate::cache::ProductCache;
use crate::db::product_repo;
use crate::error::{AppError, Result};
use crate::models::{CreateProductRequest, ProductFilter, ProductResponse, UpdateProductRequest};
use crate::queue::ImageQueue;

/// Create a product and enqueue its source images for ingestion.
///
/// The response returns as soon as the row and its work items are durably
/// recorded; compression happens asynchronously and shows up on the product
/// as the worker finishes each image. If the queue rejects an item the whole
/// creation fails so the client can retry, rather than leaving a product
/// whose images will never be processed.
pub async fn create_product(
    pool: web::Data<PgPool>,
    queue: web::Data<ImageQueue>,
    req: web::Json<CreateProductRequest>,
) -> Result<actix_web::HttpResponse> {
    let req = req.into_inner();
    validate_product_fields(&req.product_name, req.product_price, &req.product_images)?;

    let product = product_repo::insert_product(pool.get_ref(), &req).await?;

    for source_url in &product.source_images {
        if let Err(e) = queue.enqueue(product.id, source_url).await {
            error!(
                product_id = product.id,
                source_url = %source_url,
                error = %e,
                "Failed to enqueue image, rolling back creation"
            );
            if let Err(del_err) = product_repo::delete_product(pool.get_ref(), product.id).await {
                error!(
                    product_id = product.id,
                    error = %del_err,
                    "Compensating delete failed; row left behind"
                );
            }
            return Err(e.into());
        }
    }

    Ok(actix_web::HttpResponse::Created().json(ProductResponse::from(product)))
}

/// Get a specific product, read-through via the cache.
pub async fn get_product(
    pool: web::Data<PgPool>,
    cache: web::Data<ProductCache>,
    product_id: web::Path<String>,
) -> Result<actix_web::HttpResponse> {
    let product_id = parse_product_id(&product_id)?;

    match cache.get(product_id).await {
        Ok(Some(product)) => {
            return Ok(actix_web::HttpResponse::Ok().json(ProductResponse::from(product)));
        }
        Ok(None) => {}
        Err(e) => {
            warn!(product_id, error = %e, "Cache read failed, falling back to store");
        }
    }

    let product = product_repo::fetch_product(pool.get_ref(), product_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Product not found".to_string()))?;

    // Populate for the next reader; a failure only costs the next hit.
    if let Err(e) = cache.set(&product).await {
        warn!(product_id, error = %e, "Cache population failed");
    }

    Ok(actix_web::HttpResponse::Ok().json(ProductResponse::from(product)))
}

/// Filtered listing for a user, straight from the store (bypasses cache).
pub async fn list_products(
    pool: web::Data<PgPool>,
    filter: web::Query<ProductFilter>,
) -> Result<actix_web::HttpResponse> {
    let products = product_repo::list_products(pool.get_ref(), &filter).await?;

    let responses: Vec<ProductResponse> = products.into_iter().map(|p| p.into()).collect();
    Ok(actix_web::HttpResponse::Ok().json(responses))
}

/// Replace a product's user-editable fields.
pub async fn update_product(
    pool: web::Data<PgPool>,
    cache: web::Data<ProductCache>,
    product_id: web::Path<String>,
    req: web::Json<UpdateProductRequest>,
) -> Result<actix_web::HttpResponse> {
    let product_id = parse_product_id(&product_id)?;
    let req = req.into_inner();
    validate_product_fields(&req.product_name, req.product_price, &req.product_images)?;

    let product = product_repo::update_product(pool.get_ref(), product_id, &req)
        .await?
        .ok_or_else(|| AppError::NotFound("Product not found".to_string()))?;

    if let Err(e) = cache.invalidate(product_id).await {
        warn!(product_id, error = %e, "Cache invalidation failed after update");
    }

    Ok(actix_web::HttpResponse::Ok().json(ProductResponse::from(product)))
}

/// Delete a product.
///
/// Work items still in flight for the row become moot; the worker's persist
/// step notices the missing product and drops them.
pub async fn delete_product(
    pool: web::Data<PgPool>,
    cache: web::Data<ProductCache>,
    product_id: web::Path<String>,
) -> Result<actix_web::HttpResponse> {
    let product_id = parse_product_id(&product_id)?;

    let deleted = product_repo::delete_product(pool.get_ref(), product_id).await?;
    if !deleted {
        return Err(AppError::NotFound("Product not found".to_string()));
    }

    if let Err(e) = cache.invalidate(product_id).await {
        warn!(product_id, error = %e, "Cache invalidation failed after delete");
    }

    Ok(actix_web::HttpResponse::NoContent().finish())
}

fn parse_product_id(raw: &str) -> Result<i64> {
    raw.parse()
        .map_err(|_| AppError::BadRequest("Invalid product ID".to_string()))
}

fn validate_product_fields(name: &str, price: f64, images: &[String]) -> Result<()> {
    if name.trim().is_empty() {
        return Err(AppError::ValidationError(
            "product_name is required".to_string(),
        ));
    }
    if !price.is_finite() || price < 0.0 {
        return Err(AppError::ValidationError(
            "product_price must be a non-negative number".to_string(),
        ));
    }
    if images.iter().any(|url| url.trim().is_empty()) {
        return Err(AppError::ValidationError(
            "product_images must not contain empty URLs".to_string(),
        ));
    }
    Ok(())
}
