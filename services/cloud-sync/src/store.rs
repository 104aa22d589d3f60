use crate::metadata::ObjectMetadata;
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// One acknowledged part of a multipart upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedPart {
    /// 1-based part number
    pub part_number: i32,
    /// Acknowledgment token returned for the part
    pub e_tag: String,
}

/// Destination object store.
///
/// The transfer executor only talks to the destination through this trait;
/// [`crate::s3_store::S3ObjectStore`] is the production implementation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Whether an object already exists at `key`
    async fn object_exists(&self, key: &str) -> Result<bool>;

    /// Single-shot upload
    async fn put_object(&self, key: &str, body: Bytes, metadata: &ObjectMetadata) -> Result<()>;

    /// Open a multipart session and return its upload ID
    async fn create_multipart_upload(&self, key: &str, metadata: &ObjectMetadata)
        -> Result<String>;

    /// Upload one part and return its ETag
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<String>;

    /// Commit the session from its ordered part list
    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<UploadedPart>,
    ) -> Result<()>;

    /// Discard the session and any parts already uploaded
    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<()>;
}
