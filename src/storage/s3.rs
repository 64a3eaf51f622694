//! S3 storage backend for cloud object storage
//!
//! Works against any S3-compatible service; raw batches are small JSON
//! objects, so the client is tuned for many small puts rather than
//! multipart transfers.

use async_trait::async_trait;
use aws_sdk_s3::{
    config::{BehaviorVersion, Credentials, Region},
    primitives::ByteStream,
    Client,
};
use chrono::{DateTime, Utc};

use super::{ObjectMeta, StorageBackend};
use crate::error::{Error, Result};

/// S3 storage backend configuration
#[derive(Debug, Clone)]
pub struct S3Config {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    /// Optional key namespace inside the bucket
    pub prefix: Option<String>,
}

impl S3Config {
    /// Load S3 configuration from environment variables
    pub fn from_env() -> Result<Self> {
        fn required(name: &str) -> Result<String> {
            std::env::var(name).map_err(|_| Error::Configuration(format!("missing {name}")))
        }

        Ok(Self {
            endpoint: required("S3_ENDPOINT")?,
            bucket: required("S3_BUCKET")?,
            access_key: required("S3_ACCESS_KEY")?,
            secret_key: required("S3_SECRET_KEY")?,
            region: std::env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            prefix: std::env::var("S3_PREFIX").ok().filter(|p| !p.is_empty()),
        })
    }
}

/// S3 storage backend
pub struct S3Storage {
    client: Client,
    bucket: String,
    /// Normalized namespace: no slashes on either end, `None` when unset
    prefix: Option<String>,
}

impl S3Storage {
    /// Create a new S3 storage backend
    pub async fn new(config: S3Config) -> Result<Self> {
        let prefix = config
            .prefix
            .as_deref()
            .map(|p| p.trim_matches('/').to_string())
            .filter(|p| !p.is_empty());

        let sdk_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region))
            .endpoint_url(&config.endpoint)
            .credentials_provider(Credentials::new(
                config.access_key,
                config.secret_key,
                None,
                None,
                "meridian",
            ))
            // MinIO and friends route buckets by path, not virtual host
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(sdk_config),
            bucket: config.bucket,
            prefix,
        })
    }

    /// Logical key to stored key, applying the namespace.
    fn stored_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}/{key}"),
            None => key.to_string(),
        }
    }

    /// Stored key back to the logical key callers see.
    fn logical_key(&self, stored: &str) -> String {
        match &self.prefix {
            Some(prefix) => stored
                .strip_prefix(prefix.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
                .unwrap_or(stored)
                .to_string(),
            None => stored.to_string(),
        }
    }
}

#[async_trait]
impl StorageBackend for S3Storage {
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.stored_key(key))
            .body(ByteStream::from(data))
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| Error::Storage(format!("Failed to upload to S3: {e}")))?;

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.stored_key(key))
            .send()
            .await
            .map_err(|e| Error::Storage(format!("Failed to download from S3: {e}")))?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| Error::Storage(format!("Failed to read S3 body: {e}")))?;

        Ok(data.into_bytes().to_vec())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.stored_key(key))
            .send()
            .await
            .map_err(|e| Error::Storage(format!("Failed to delete from S3: {e}")))?;

        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(self.stored_key(prefix));

            if let Some(token) = &continuation_token {
                request = request.continuation_token(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| Error::Storage(format!("Failed to list S3 objects: {e}")))?;

            for object in response.contents() {
                let Some(key) = object.key() else { continue };
                let last_modified = object
                    .last_modified()
                    .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), 0));
                objects.push(ObjectMeta {
                    key: self.logical_key(key),
                    size_bytes: object.size().unwrap_or(0),
                    last_modified,
                });
            }

            if response.is_truncated() == Some(true) {
                continuation_token = response.next_continuation_token().map(String::from);
            } else {
                break;
            }
        }

        Ok(objects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(prefix: Option<&str>) -> S3Config {
        S3Config {
            endpoint: "http://localhost:9000".into(),
            bucket: "meridian".into(),
            access_key: "test".into(),
            secret_key: "test".into(),
            region: "us-east-1".into(),
            prefix: prefix.map(String::from),
        }
    }

    #[tokio::test]
    async fn test_namespace_applied_and_stripped() {
        let storage = S3Storage::new(config(Some("raw/"))).await.unwrap();
        assert_eq!(storage.stored_key("google/a.json"), "raw/google/a.json");
        assert_eq!(storage.logical_key("raw/google/a.json"), "google/a.json");
        // Keys outside the namespace pass through untouched
        assert_eq!(storage.logical_key("other/a.json"), "other/a.json");
    }

    #[tokio::test]
    async fn test_no_namespace_passthrough() {
        let storage = S3Storage::new(config(None)).await.unwrap();
        assert_eq!(storage.stored_key("google/a.json"), "google/a.json");
        assert_eq!(storage.logical_key("google/a.json"), "google/a.json");
    }

    #[tokio::test]
    async fn test_blank_namespace_normalized_away() {
        let storage = S3Storage::new(config(Some("//"))).await.unwrap();
        assert!(storage.prefix.is_none());
        assert_eq!(storage.stored_key("a.json"), "a.json");
    }
}
