/// Catalog Service - HTTP Server
///
/// Serves the product CRUD endpoints and enqueues image-ingestion work.
/// Image processing itself runs in the separate ingest-worker binary.
use actix_web::{middleware as actix_middleware, web, App, HttpResponse, HttpServer};
use catalog_service::cache::ProductCache;
use catalog_service::handlers;
use catalog_service::queue::ImageQueue;
use catalog_service::Config;
use sqlx::postgres::PgPoolOptions;
use std::io;

#[actix_web::main]
async fn main() -> io::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    dotenvy::dotenv().ok();

    // Load configuration from environment
    let config = Config::from_env().expect("Failed to load configuration");

    let bind_address = format!("{}:{}", config.app.host, config.app.port);

    // Initialize database connection pool
    let db_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .expect("Failed to connect to database");

    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .expect("Failed to run migrations");

    let cache_client = redis::Client::open(config.cache.redis_url.as_str())
        .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("Invalid REDIS_URL: {e}")))?;
    let product_cache = ProductCache::new(cache_client, Some(config.cache.ttl_seconds))
        .await
        .map_err(|e| {
            io::Error::new(
                io::ErrorKind::Other,
                format!("Failed to initialize cache: {e}"),
            )
        })?;

    let queue_client = redis::Client::open(config.queue.redis_url.as_str())
        .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("Invalid QUEUE_REDIS_URL: {e}")))?;
    let image_queue = ImageQueue::connect(queue_client, &config.queue)
        .await
        .map_err(|e| {
            io::Error::new(
                io::ErrorKind::Other,
                format!("Failed to connect to work queue: {e}"),
            )
        })?;

    tracing::info!(%bind_address, "Catalog service starting HTTP server");

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(config.clone()))
            .app_data(web::Data::new(db_pool.clone()))
            .app_data(web::Data::new(product_cache.clone()))
            .app_data(web::Data::new(image_queue.clone()))
            .wrap(actix_middleware::Logger::default())
            .route(
                "/health",
                web::get()
                    .to(|| async { HttpResponse::Ok().json(serde_json::json!({"status": "ok"})) }),
            )
            .service(
                web::scope("/products")
                    .route("", web::post().to(handlers::create_product))
                    .route("", web::get().to(handlers::list_products))
                    .route("/{id}", web::get().to(handlers::get_product))
                    .route("/{id}", web::put().to(handlers::update_product))
                    .route("/{id}", web::delete().to(handlers::delete_product)),
            )
    })
    .bind(&bind_address)?
    .run()
    .await
}
