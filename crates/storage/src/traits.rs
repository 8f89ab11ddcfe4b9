//! Storage trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use time::OffsetDateTime;

/// A boxed stream of bytes for streaming reads.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Object store keyed by slash-separated paths.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Check if an object exists.
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Get an object's metadata without fetching content.
    async fn head(&self, key: &str) -> StorageResult<ObjectMeta>;

    /// Get an object's content.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Get an object as a byte stream.
    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream>;

    /// Put an object atomically, replacing any existing object.
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()>;

    /// Delete an object.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// List object keys under a prefix.
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Static identifier for logs and metrics (e.g. "filesystem").
    fn backend_name(&self) -> &'static str;

    /// Verify the backend is reachable. Called once at startup.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Metadata about a stored object.
#[derive(Clone, Debug, Default)]
pub struct ObjectMeta {
    /// Object size in bytes.
    pub size: u64,
    pub last_modified: Option<OffsetDateTime>,
    pub content_type: Option<String>,
    /// Opaque entity tag, already quoted.
    pub etag: Option<String>,
    /// Backend-native cache-control, if the backend has one.
    pub cache_control: Option<String>,
}

impl ObjectMeta {
    /// `last_modified` as an HTTP date.
    pub fn last_modified_http(&self) -> Option<String> {
        let format = time::macros::format_description!(
            "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
        );
        self.last_modified
            .and_then(|t| t.to_offset(time::UtcOffset::UTC).format(&format).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_modified_http_format() {
        let meta = ObjectMeta {
            last_modified: Some(time::macros::datetime!(2024-03-05 07:08:09 UTC)),
            ..ObjectMeta::default()
        };
        assert_eq!(
            meta.last_modified_http().as_deref(),
            Some("Tue, 05 Mar 2024 07:08:09 GMT")
        );
    }
}
