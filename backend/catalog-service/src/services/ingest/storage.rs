//! Object-store gateway
//!
//! Uploads compressed images to S3 under a key derived from the source URL
//! and hands back a publicly resolvable URL for the stored object.

use crate::config::S3Config;
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("upload failed: {0}")]
pub struct UploadError(pub String);

#[async_trait]
pub trait AssetStore: Send + Sync {
    async fn put(&self, key: &str, body: Bytes) -> Result<String, UploadError>;
}

/// Derive the object key for a source URL.
///
/// Equal URLs map to equal keys, so reprocessing the same image overwrites
/// the previous object instead of accumulating duplicates.
pub fn object_key(source_url: &str) -> String {
    let digest = Sha256::digest(source_url.as_bytes());
    format!("compressed/{}.gz", hex::encode(digest))
}

#[derive(Clone)]
pub struct S3AssetStore {
    client: Client,
    bucket: String,
    public_base: String,
}

impl S3AssetStore {
    pub async fn new(config: &S3Config) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()));
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let shared = loader.load().await;

        // Path-style addressing for non-AWS endpoints (MinIO and friends).
        let mut s3_config = aws_sdk_s3::config::Builder::from(&shared);
        if config.endpoint.is_some() {
            s3_config = s3_config.force_path_style(true);
        }
        let client = Client::from_conf(s3_config.build());

        let public_base = match &config.endpoint {
            Some(endpoint) => format!("{}/{}", endpoint.trim_end_matches('/'), config.bucket),
            None => format!("https://{}.s3.{}.amazonaws.com", config.bucket, config.region),
        };

        Self {
            client,
            bucket: config.bucket.clone(),
            public_base,
        }
    }

    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base, key)
    }
}

#[async_trait]
impl AssetStore for S3AssetStore {
    async fn put(&self, key: &str, body: Bytes) -> Result<String, UploadError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("application/gzip")
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| UploadError(e.to_string()))?;

        Ok(self.public_url(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_urls_derive_equal_keys() {
        assert_eq!(
            object_key("https://example.com/a.png"),
            object_key("https://example.com/a.png")
        );
    }

    #[test]
    fn distinct_urls_derive_distinct_keys() {
        assert_ne!(
            object_key("https://example.com/a.png"),
            object_key("https://example.com/b.png")
        );
    }

    #[test]
    fn keys_are_namespaced_and_flagged_as_gzip() {
        let key = object_key("https://example.com/a.png");
        assert!(key.starts_with("compressed/"));
        assert!(key.ends_with(".gz"));
        // sha256 hex between prefix and suffix
        assert_eq!(key.len(), "compressed/".len() + 64 + ".gz".len());
    }
}
