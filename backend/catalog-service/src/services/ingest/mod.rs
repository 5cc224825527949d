//! Image ingestion pipeline
//!
//! Consumes work items from the image queue and runs each one through
//! fetch → compress → upload → persist, acknowledging the queue entry only
//! once the compressed URL is durably recorded on the product row.

pub mod compressor;
pub mod fetcher;
pub mod storage;
pub mod worker;

pub use compressor::Compressor;
pub use fetcher::{AssetFetcher, FetchError, HttpAssetFetcher};
pub use storage::{object_key, AssetStore, S3AssetStore, UploadError};
pub use worker::{CacheInvalidator, IngestWorker, ItemOutcome, PersistError, ProductWriter, WorkSource};
