//! Catalog Service
//!
//! Product catalog with an asynchronous image-ingestion pipeline: product
//! creation enqueues one work item per source image, and a decoupled worker
//! fetches, compresses, and re-hosts each image before recording the result
//! on the product row.

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod queue;
pub mod services;

// Public re-exports
pub use config::Config;
pub use error::{AppError, Result};
