use crate::error::SyncError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// Upload priority class. Higher values are dequeued first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Priority {
    /// Routine segment
    #[default]
    Normal = 1,
    /// Segment with motion detected
    High = 2,
    /// Must-not-fail content
    Critical = 3,
}

impl Priority {
    pub fn level(self) -> u8 {
        self as u8
    }

    /// Motion footage is promoted to at least `High`
    pub fn with_motion_hint(self, has_motion: bool) -> Self {
        if has_motion {
            self.max(Priority::High)
        } else {
            self
        }
    }
}

impl TryFrom<u8> for Priority {
    type Error = SyncError;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            1 => Ok(Priority::Normal),
            2 => Ok(Priority::High),
            3 => Ok(Priority::Critical),
            other => Err(SyncError::InvalidTask(format!(
                "priority must be 1, 2 or 3, got {other}"
            ))),
        }
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> Self {
        priority.level()
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// One requested upload of a local segment.
///
/// `destination_key` is derived once at construction and never changes, so a
/// retried task probes the same key as its first attempt.
#[derive(Debug, Clone)]
pub struct SyncTask {
    /// Correlation ID for logs
    pub id: Uuid,
    /// Local segment path
    pub source_path: PathBuf,
    /// Object key at the destination
    pub destination_key: String,
    pub camera_id: String,
    pub site_id: String,
    pub priority: Priority,
    /// Failed attempts so far
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
}

impl SyncTask {
    /// Create a task dated now (UTC)
    pub fn new(
        source_path: impl Into<PathBuf>,
        camera_id: impl Into<String>,
        site_id: impl Into<String>,
        priority: Priority,
        key_prefix: &str,
    ) -> Result<Self, SyncError> {
        Self::new_at(source_path, camera_id, site_id, priority, key_prefix, Utc::now())
    }

    /// Create a task with an explicit creation time, which also fixes the
    /// date components of the destination key
    pub fn new_at(
        source_path: impl Into<PathBuf>,
        camera_id: impl Into<String>,
        site_id: impl Into<String>,
        priority: Priority,
        key_prefix: &str,
        created_at: DateTime<Utc>,
    ) -> Result<Self, SyncError> {
        let source_path = source_path.into();
        let camera_id = camera_id.into();
        let site_id = site_id.into();

        validate_key_component("camera_id", &camera_id)?;
        validate_key_component("site_id", &site_id)?;

        let filename = source_filename(&source_path)?;
        let destination_key =
            generate_destination_key(key_prefix, &site_id, &camera_id, created_at, &filename);

        Ok(Self {
            id: Uuid::new_v4(),
            source_path,
            destination_key,
            camera_id,
            site_id,
            priority,
            retry_count: 0,
            created_at,
        })
    }
}

/// Destination key layout parsed by the downstream indexer:
/// `{prefix}/{site_id}/{camera_id}/{YYYY}/{MM}/{DD}/{filename}`
pub fn generate_destination_key(
    prefix: &str,
    site_id: &str,
    camera_id: &str,
    date: DateTime<Utc>,
    filename: &str,
) -> String {
    format!(
        "{prefix}/{site_id}/{camera_id}/{date}/{filename}",
        date = date.format("%Y/%m/%d"),
    )
}

/// Ids become single key segments, so they must be non-empty and slash-free
fn validate_key_component(name: &str, value: &str) -> Result<(), SyncError> {
    if value.trim().is_empty() {
        return Err(SyncError::InvalidTask(format!("{name} must not be empty")));
    }
    if value.contains('/') {
        return Err(SyncError::InvalidTask(format!(
            "{name} must not contain '/', got {value:?}"
        )));
    }
    Ok(())
}

fn source_filename(path: &Path) -> Result<String, SyncError> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| {
            SyncError::InvalidTask(format!("{} has no file name", path.display()))
        })
}

/// Outcome of one execution attempt.
///
/// The task is moved into the result so the retry path can bump
/// `retry_count` and re-enqueue the same task.
#[derive(Debug)]
pub struct SyncResult {
    pub task: SyncTask,
    /// Set iff the attempt failed
    pub error: Option<SyncError>,
    pub bytes_transferred: u64,
    pub duration: Duration,
}

impl SyncResult {
    pub fn succeeded(task: SyncTask, bytes_transferred: u64, duration: Duration) -> Self {
        Self {
            task,
            error: None,
            bytes_transferred,
            duration,
        }
    }

    /// The destination already held the object; nothing was sent
    pub fn already_present(task: SyncTask) -> Self {
        Self::succeeded(task, 0, Duration::ZERO)
    }

    pub fn failed(task: SyncTask, error: SyncError, duration: Duration) -> Self {
        Self {
            task,
            error: Some(error),
            bytes_transferred: 0,
            duration,
        }
    }

    pub fn success(&self) -> bool {
        self.error.is_none()
    }

    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(ToString::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn capture_date() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 7, 23, 59, 59).unwrap()
    }

    #[test]
    fn test_destination_key_layout() {
        let key = generate_destination_key(
            "cctv",
            "site-a",
            "cam-01",
            capture_date(),
            "20240307_235959.mp4",
        );
        assert_eq!(key, "cctv/site-a/cam-01/2024/03/07/20240307_235959.mp4");
    }

    #[test]
    fn test_task_derives_key_from_filename() {
        let task = SyncTask::new_at(
            "/opt/nvr/storage/cam-01/20240307_235959.mp4",
            "cam-01",
            "site-a",
            Priority::Normal,
            "cctv",
            capture_date(),
        )
        .unwrap();

        assert_eq!(task.destination_key, "cctv/site-a/cam-01/2024/03/07/20240307_235959.mp4");
        assert_eq!(task.retry_count, 0);
        assert_eq!(task.created_at, capture_date());
    }

    #[test]
    fn test_task_rejects_empty_identifiers() {
        let err = SyncTask::new("/tmp/a.mp4", "", "site-a", Priority::Normal, "cctv").unwrap_err();
        assert!(matches!(err, SyncError::InvalidTask(_)));

        let err = SyncTask::new("/tmp/a.mp4", "cam", "  ", Priority::Normal, "cctv").unwrap_err();
        assert!(matches!(err, SyncError::InvalidTask(_)));
    }

    #[test]
    fn test_task_rejects_slash_in_identifiers() {
        let err = SyncTask::new("/tmp/a.mp4", "cam/01", "site-a", Priority::Normal, "cctv")
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidTask(ref msg) if msg.contains("camera_id")));

        let err = SyncTask::new("/tmp/a.mp4", "cam-01", "north/site-a", Priority::Normal, "cctv")
            .unwrap_err();
        assert!(matches!(err, SyncError::InvalidTask(ref msg) if msg.contains("site_id")));

        let task = SyncTask::new("/tmp/a.mp4", "cam-01", "site-a", Priority::Normal, "cctv").unwrap();
        assert_eq!(task.destination_key.split('/').count(), 7);
    }

    #[test]
    fn test_task_rejects_path_without_filename() {
        let err = SyncTask::new("/", "cam", "site", Priority::Normal, "cctv").unwrap_err();
        assert!(matches!(err, SyncError::InvalidTask(_)));
    }

    #[test]
    fn test_motion_hint_promotes_to_high() {
        assert_eq!(Priority::Normal.with_motion_hint(true), Priority::High);
        assert_eq!(Priority::Normal.with_motion_hint(false), Priority::Normal);
        assert_eq!(Priority::Critical.with_motion_hint(true), Priority::Critical);
    }

    #[test]
    fn test_priority_ordering_and_levels() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert_eq!(Priority::try_from(3).unwrap(), Priority::Critical);
        assert!(Priority::try_from(0).is_err());
        assert!(Priority::try_from(4).is_err());
    }

    #[test]
    fn test_priority_serializes_as_level() {
        assert_eq!(serde_json::to_string(&Priority::High).unwrap(), "2");
        let parsed: Priority = serde_json::from_str("3").unwrap();
        assert_eq!(parsed, Priority::Critical);
        assert!(serde_json::from_str::<Priority>("9").is_err());
    }

    #[test]
    fn test_result_error_message_only_on_failure() {
        let task = SyncTask::new("/tmp/a.mp4", "cam", "site", Priority::Normal, "cctv").unwrap();
        let ok = SyncResult::already_present(task.clone());
        assert!(ok.success());
        assert_eq!(ok.bytes_transferred, 0);
        assert_eq!(ok.duration, Duration::ZERO);
        assert!(ok.error_message().is_none());

        let failed = SyncResult::failed(
            task,
            SyncError::DestinationUnavailable("timeout".into()),
            Duration::from_millis(10),
        );
        assert!(!failed.success());
        assert_eq!(
            failed.error_message().as_deref(),
            Some("Destination unavailable: timeout")
        );
    }
}
