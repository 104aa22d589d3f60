use crate::config::S3Config;
use crate::error::SyncError;
use crate::metadata::{self, ObjectMetadata};
use crate::store::{ObjectStore, UploadedPart};
use crate::task::{SyncResult, SyncTask};
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, instrument, warn};

/// Size thresholds for choosing between single-shot and multipart uploads
#[derive(Debug, Clone, Copy)]
pub struct TransferSettings {
    /// Sources larger than this use multipart upload
    pub multipart_threshold_bytes: u64,
    /// Size of each multipart part; the last part may be smaller
    pub part_size_bytes: u64,
}

impl From<&S3Config> for TransferSettings {
    fn from(config: &S3Config) -> Self {
        Self {
            multipart_threshold_bytes: config.multipart_threshold_bytes,
            part_size_bytes: config.part_size_bytes,
        }
    }
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self::from(&S3Config::default())
    }
}

/// Number of parts a source of `size` bytes is split into
pub fn part_count(size: u64, part_size: u64) -> u64 {
    size.div_ceil(part_size)
}

enum Outcome {
    Uploaded(u64),
    AlreadyPresent,
}

/// Performs exactly one upload attempt for a task.
///
/// The executor never retries and never touches the bandwidth monitor; both
/// belong to the caller.
pub struct TransferExecutor {
    store: Arc<dyn ObjectStore>,
    settings: TransferSettings,
}

impl TransferExecutor {
    pub fn new(store: Arc<dyn ObjectStore>, settings: TransferSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> TransferSettings {
        self.settings
    }

    /// Upload `task`'s source and report the outcome
    #[instrument(skip(self, task), fields(task_id = %task.id, destination_key = %task.destination_key, attempt = task.retry_count + 1))]
    pub async fn execute(&self, task: SyncTask) -> SyncResult {
        let started = Instant::now();

        match self.transfer(&task).await {
            Ok(Outcome::Uploaded(bytes)) => {
                let duration = started.elapsed();
                info!(
                    source = %task.source_path.display(),
                    bytes,
                    duration_ms = duration.as_millis() as u64,
                    "Segment uploaded"
                );
                SyncResult::succeeded(task, bytes, duration)
            }
            Ok(Outcome::AlreadyPresent) => {
                debug!("Object already present at destination, skipping upload");
                SyncResult::already_present(task)
            }
            Err(e) => {
                warn!(source = %task.source_path.display(), error = %e, "Segment upload failed");
                SyncResult::failed(task, e, started.elapsed())
            }
        }
    }

    async fn transfer(&self, task: &SyncTask) -> Result<Outcome, SyncError> {
        let size = source_size(&task.source_path).await?;

        // Idempotency probe: must run before any data is sent
        let exists = self
            .store
            .object_exists(&task.destination_key)
            .await
            .map_err(|e| SyncError::DestinationUnavailable(format!("{e:#}")))?;
        if exists {
            return Ok(Outcome::AlreadyPresent);
        }

        let metadata =
            metadata::object_metadata_for(&task.source_path, &task.site_id, &task.camera_id).await;

        if size > self.settings.multipart_threshold_bytes {
            self.multipart_upload(task, size, &metadata).await?;
        } else {
            self.simple_upload(task, &metadata).await?;
        }

        Ok(Outcome::Uploaded(size))
    }

    /// Single-part upload for sources at or below the threshold
    async fn simple_upload(&self, task: &SyncTask, metadata: &ObjectMetadata) -> Result<(), SyncError> {
        let body = tokio::fs::read(&task.source_path)
            .await
            .map_err(|e| read_error(&task.source_path, e))?;

        self.store
            .put_object(&task.destination_key, Bytes::from(body), metadata)
            .await
            .map_err(|e| SyncError::TransferInterrupted(format!("{e:#}")))
    }

    /// Multipart upload for large sources.
    ///
    /// Any failure after the session is opened aborts it, so the destination
    /// never holds a partial object or an orphaned session.
    async fn multipart_upload(
        &self,
        task: &SyncTask,
        size: u64,
        metadata: &ObjectMetadata,
    ) -> Result<(), SyncError> {
        let key = &task.destination_key;
        let upload_id = self
            .store
            .create_multipart_upload(key, metadata)
            .await
            .map_err(|e| SyncError::DestinationUnavailable(format!("{e:#}")))?;

        debug!(
            upload_id = %upload_id,
            size_bytes = size,
            parts = part_count(size, self.settings.part_size_bytes),
            "Multipart upload started"
        );

        let committed = match self.upload_parts(task, &upload_id).await {
            Ok(parts) => self
                .store
                .complete_multipart_upload(key, &upload_id, parts)
                .await
                .map_err(|e| SyncError::TransferInterrupted(format!("{e:#}"))),
            Err(e) => Err(e),
        };

        if let Err(e) = committed {
            if let Err(abort_err) = self.store.abort_multipart_upload(key, &upload_id).await {
                warn!(
                    upload_id = %upload_id,
                    error = %abort_err,
                    "Failed to abort multipart upload"
                );
            }
            return Err(e);
        }

        Ok(())
    }

    async fn upload_parts(&self, task: &SyncTask, upload_id: &str) -> Result<Vec<UploadedPart>, SyncError> {
        let mut file = File::open(&task.source_path)
            .await
            .map_err(|e| read_error(&task.source_path, e))?;

        let mut parts = Vec::new();
        let mut part_number = 1;

        loop {
            let mut buffer = Vec::new();
            (&mut file)
                .take(self.settings.part_size_bytes)
                .read_to_end(&mut buffer)
                .await
                .map_err(|e| read_error(&task.source_path, e))?;

            if buffer.is_empty() {
                break;
            }

            let e_tag = self
                .store
                .upload_part(&task.destination_key, upload_id, part_number, Bytes::from(buffer))
                .await
                .map_err(|e| {
                    SyncError::TransferInterrupted(format!("part {part_number}: {e:#}"))
                })?;

            parts.push(UploadedPart { part_number, e_tag });
            part_number += 1;
        }

        Ok(parts)
    }
}

async fn source_size(path: &Path) -> Result<u64, SyncError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(meta.len()),
        Ok(_) => Err(SyncError::SourceMissing(path.to_path_buf())),
        Err(e) => Err(read_error(path, e)),
    }
}

/// A vanished source is not retryable; any other read failure is
fn read_error(path: &Path, error: std::io::Error) -> SyncError {
    if error.kind() == ErrorKind::NotFound {
        SyncError::SourceMissing(path.to_path_buf())
    } else {
        SyncError::TransferInterrupted(format!("failed to read {}: {error}", path.display()))
    }
}
