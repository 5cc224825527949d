/// Product repository - database operations for products
use crate::error::Result;
use crate::models::{CreateProductRequest, Product, ProductFilter, UpdateProductRequest};
use sqlx::{PgPool, Postgres, QueryBuilder};

const PRODUCT_COLUMNS: &str = "id, user_id, name, description, price, source_images, \
     compressed_images, created_at, updated_at";

/// Result of an [`append_compressed_image`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The compressed URL was appended to the product's list.
    Appended,
    /// The compressed URL was already recorded; nothing changed.
    AlreadyPresent,
    /// The product no longer exists, or the source URL is no longer part of
    /// its image list. The work is moot.
    Moot,
}

pub async fn insert_product(pool: &PgPool, req: &CreateProductRequest) -> Result<Product> {
    let product = sqlx::query_as::<_, Product>(&format!(
        "INSERT INTO products (user_id, name, description, price, source_images, compressed_images) \
         VALUES ($1, $2, $3, $4, $5, '{{}}') \
         RETURNING {PRODUCT_COLUMNS}"
    ))
    .bind(req.user_id)
    .bind(&req.product_name)
    .bind(req.product_description.as_deref().unwrap_or(""))
    .bind(req.product_price)
    .bind(&req.product_images)
    .fetch_one(pool)
    .await?;

    Ok(product)
}

pub async fn fetch_product(pool: &PgPool, id: i64) -> Result<Option<Product>> {
    let product = sqlx::query_as::<_, Product>(&format!(
        "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(product)
}

pub async fn update_product(
    pool: &PgPool,
    id: i64,
    req: &UpdateProductRequest,
) -> Result<Option<Product>> {
    let product = sqlx::query_as::<_, Product>(&format!(
        "UPDATE products \
         SET user_id = $2, name = $3, description = $4, price = $5, source_images = $6, \
             updated_at = NOW() \
         WHERE id = $1 \
         RETURNING {PRODUCT_COLUMNS}"
    ))
    .bind(id)
    .bind(req.user_id)
    .bind(&req.product_name)
    .bind(req.product_description.as_deref().unwrap_or(""))
    .bind(req.product_price)
    .bind(&req.product_images)
    .fetch_optional(pool)
    .await?;

    Ok(product)
}

pub async fn delete_product(pool: &PgPool, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM products WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn list_products(pool: &PgPool, filter: &ProductFilter) -> Result<Vec<Product>> {
    let mut query = build_list_query(filter);
    let products = query
        .build_query_as::<Product>()
        .fetch_all(pool)
        .await?;

    Ok(products)
}

/// Assemble the filtered listing query from typed predicates. Bind positions
/// are managed by the builder, so optional filters cannot shift each other's
/// parameter indexes.
pub fn build_list_query(filter: &ProductFilter) -> QueryBuilder<'static, Postgres> {
    let mut query: QueryBuilder<'static, Postgres> = QueryBuilder::new(format!(
        "SELECT {PRODUCT_COLUMNS} FROM products WHERE user_id = "
    ));
    query.push_bind(filter.user_id);

    if let Some(min_price) = filter.min_price {
        query.push(" AND price >= ");
        query.push_bind(min_price);
    }
    if let Some(max_price) = filter.max_price {
        query.push(" AND price <= ");
        query.push_bind(max_price);
    }
    if let Some(name) = &filter.product_name {
        query.push(" AND name ILIKE ");
        query.push_bind(format!("%{}%", name));
    }

    query.push(" ORDER BY created_at DESC");
    query
}

/// Append a compressed-image URL to the owning product, atomically.
///
/// The row is locked while the current list is inspected, so concurrent
/// appends for the same product cannot lose updates, and an already-present
/// URL is never duplicated. The match requires both the product id and the
/// source URL to still be current; anything else reports [`AppendOutcome::Moot`].
pub async fn append_compressed_image(
    pool: &PgPool,
    product_id: i64,
    source_url: &str,
    compressed_url: &str,
) -> Result<AppendOutcome> {
    let already_present: Option<bool> = sqlx::query_scalar(
        "WITH target AS ( \
             SELECT id, $3 = ANY(compressed_images) AS already_present \
             FROM products \
             WHERE id = $1 AND $2 = ANY(source_images) \
             FOR UPDATE \
         ), \
         appended AS ( \
             UPDATE products p \
             SET compressed_images = array_append(p.compressed_images, $3), \
                 updated_at = NOW() \
             FROM target t \
             WHERE p.id = t.id AND NOT t.already_present \
         ) \
         SELECT already_present FROM target",
    )
    .bind(product_id)
    .bind(source_url)
    .bind(compressed_url)
    .fetch_optional(pool)
    .await?;

    Ok(match already_present {
        None => AppendOutcome::Moot,
        Some(true) => AppendOutcome::AlreadyPresent,
        Some(false) => AppendOutcome::Appended,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Execute;

    fn filter(
        min_price: Option<f64>,
        max_price: Option<f64>,
        product_name: Option<&str>,
    ) -> ProductFilter {
        ProductFilter {
            user_id: 7,
            min_price,
            max_price,
            product_name: product_name.map(str::to_string),
        }
    }

    #[test]
    fn list_query_without_filters() {
        let mut builder = build_list_query(&filter(None, None, None));
        let query = builder.build();
        assert_eq!(
            query.sql(),
            format!(
                "SELECT {PRODUCT_COLUMNS} FROM products WHERE user_id = $1 \
                 ORDER BY created_at DESC"
            )
        );
    }

    #[test]
    fn list_query_with_all_filters() {
        let mut builder = build_list_query(&filter(Some(1.0), Some(10.0), Some("chair")));
        let query = builder.build();
        assert_eq!(
            query.sql(),
            format!(
                "SELECT {PRODUCT_COLUMNS} FROM products WHERE user_id = $1 \
                 AND price >= $2 AND price <= $3 AND name ILIKE $4 \
                 ORDER BY created_at DESC"
            )
        );
    }

    #[test]
    fn list_query_skipping_a_filter_does_not_shift_bindings() {
        // min_price absent: max_price must take $2, not $3.
        let mut builder = build_list_query(&filter(None, Some(10.0), Some("chair")));
        let query = builder.build();
        assert_eq!(
            query.sql(),
            format!(
                "SELECT {PRODUCT_COLUMNS} FROM products WHERE user_id = $1 \
                 AND price <= $2 AND name ILIKE $3 \
                 ORDER BY created_at DESC"
            )
        );
    }
}
