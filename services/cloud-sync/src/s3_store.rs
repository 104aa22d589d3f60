use crate::config::S3Config;
use crate::metadata::ObjectMetadata;
use crate::store::{ObjectStore, UploadedPart};
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client as S3Client;
use bytes::Bytes;
use tracing::{debug, info, instrument};

/// Content type used for every uploaded segment
const SEGMENT_CONTENT_TYPE: &str = "video/mp4";

/// S3-backed destination for video segments
pub struct S3ObjectStore {
    client: S3Client,
    bucket: String,
}

impl S3ObjectStore {
    /// Create a new S3 object store
    pub async fn new(config: &S3Config) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 object store initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
        })
    }

    /// Verify the bucket is reachable with the configured credentials
    pub async fn check_bucket(&self) -> Result<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .with_context(|| format!("Bucket {} is not reachable", self.bucket))?;
        Ok(())
    }

    /// Get the bucket name
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn object_exists(&self, key: &str) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    Ok(false)
                } else {
                    Err(e).context("Failed to check object existence")
                }
            }
        }
    }

    #[instrument(skip(self, body, metadata), fields(size_bytes = body.len()))]
    async fn put_object(&self, key: &str, body: Bytes, metadata: &ObjectMetadata) -> Result<()> {
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(SEGMENT_CONTENT_TYPE);

        for (name, value) in metadata {
            request = request.metadata(name, value);
        }

        request
            .send()
            .await
            .context("Failed to upload segment to S3")?;

        debug!(key = %key, "Segment uploaded");
        Ok(())
    }

    async fn create_multipart_upload(
        &self,
        key: &str,
        metadata: &ObjectMetadata,
    ) -> Result<String> {
        let mut request = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(SEGMENT_CONTENT_TYPE);

        for (name, value) in metadata {
            request = request.metadata(name, value);
        }

        let response = request
            .send()
            .await
            .context("Failed to create multipart upload")?;

        let upload_id = response
            .upload_id()
            .context("No upload ID in response")?;

        Ok(upload_id.to_string())
    }

    #[instrument(skip(self, body), fields(size_bytes = body.len()))]
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<String> {
        let response = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .with_context(|| format!("Failed to upload part {part_number}"))?;

        Ok(response.e_tag().unwrap_or_default().to_string())
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<UploadedPart>,
    ) -> Result<()> {
        let completed_parts = parts
            .into_iter()
            .map(|part| {
                CompletedPart::builder()
                    .part_number(part.part_number)
                    .e_tag(part.e_tag)
                    .build()
            })
            .collect();

        let completed_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await
            .context("Failed to complete multipart upload")?;

        Ok(())
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .context("Failed to abort multipart upload")?;

        debug!(key = %key, upload_id = %upload_id, "Multipart upload aborted");
        Ok(())
    }
}
