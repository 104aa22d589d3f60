//! Segment metadata side-channel.
//!
//! The metadata extractor writes `<stem>.metadata.json` next to each segment.
//! It is read into [`SegmentMetadata`] and only flattened into the
//! string-keyed object metadata at the upload boundary. The key names are
//! parsed by the downstream indexer and must not change.

use serde::{Deserialize, Deserializer};
use serde_json::{Number, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// String metadata attached to an uploaded object
pub type ObjectMetadata = BTreeMap<String, String>;

/// Sidecar contents produced by the metadata extractor.
///
/// Numeric fields keep the sidecar's own JSON number so the wire value is the
/// number as written (`25` stays `25`, `25.0` stays `25.0`). A field with the
/// wrong JSON type reads as absent instead of rejecting the whole sidecar.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SegmentMetadata {
    #[serde(default, deserialize_with = "lenient_string")]
    pub start_timestamp: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub end_timestamp: Option<String>,
    /// Segment length in seconds
    #[serde(default, deserialize_with = "lenient_number")]
    pub duration: Option<Number>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub motion_percentage: Option<Number>,
    #[serde(default, deserialize_with = "lenient_array")]
    pub motion_events: Vec<Value>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub width: Option<Number>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub height: Option<Number>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub fps: Option<Number>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub codec: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub bitrate: Option<Number>,
}

impl SegmentMetadata {
    /// Flatten into the indexer's wire format
    pub fn to_object_metadata(&self, site_id: &str, camera_id: &str) -> ObjectMetadata {
        let mut metadata = ObjectMetadata::new();
        metadata.insert("site_id".to_string(), site_id.to_string());
        metadata.insert("camera_id".to_string(), camera_id.to_string());
        metadata.insert(
            "start_ts".to_string(),
            self.start_timestamp.clone().unwrap_or_default(),
        );
        metadata.insert(
            "end_ts".to_string(),
            self.end_timestamp.clone().unwrap_or_default(),
        );
        metadata.insert("duration_sec".to_string(), self.duration_secs().to_string());
        metadata.insert(
            "motion_percentage".to_string(),
            wire_number(&self.motion_percentage),
        );
        metadata.insert(
            "motion_events".to_string(),
            self.motion_events.len().to_string(),
        );
        metadata.insert("width".to_string(), wire_number(&self.width));
        metadata.insert("height".to_string(), wire_number(&self.height));
        metadata.insert("fps".to_string(), wire_number(&self.fps));
        metadata.insert(
            "codec".to_string(),
            self.codec.clone().unwrap_or_else(|| "unknown".to_string()),
        );
        metadata.insert("bitrate".to_string(), wire_number(&self.bitrate));
        metadata
    }

    /// Whole seconds, truncated; negative or missing reads as zero
    pub fn duration_secs(&self) -> u64 {
        self.duration
            .as_ref()
            .and_then(Number::as_f64)
            .map(|secs| secs.max(0.0).trunc() as u64)
            .unwrap_or(0)
    }
}

fn wire_number(value: &Option<Number>) -> String {
    value
        .as_ref()
        .map(Number::to_string)
        .unwrap_or_else(|| "0".to_string())
}

fn lenient_number<'de, D>(deserializer: D) -> Result<Option<Number>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(number) => Some(number),
        _ => None,
    })
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(text) => Some(text),
        _ => None,
    })
}

fn lenient_array<'de, D>(deserializer: D) -> Result<Vec<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items,
        _ => Vec::new(),
    })
}

/// `seg.mp4` -> `seg.metadata.json`
pub fn sidecar_path(source: &Path) -> PathBuf {
    source.with_extension("metadata.json")
}

/// `seg.mp4` -> `seg.synced`
pub fn completion_marker_path(source: &Path) -> PathBuf {
    source.with_extension("synced")
}

/// Read the sidecar for `source`, if there is a usable one.
///
/// A missing sidecar is normal. A malformed one is logged and ignored so the
/// segment still uploads.
pub async fn load_sidecar(source: &Path) -> Option<SegmentMetadata> {
    let path = sidecar_path(source);
    let raw = match tokio::fs::read(&path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No metadata sidecar");
            return None;
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read metadata sidecar");
            return None;
        }
    };

    match serde_json::from_slice(&raw) {
        Ok(metadata) => Some(metadata),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to parse metadata sidecar");
            None
        }
    }
}

/// Object metadata for `source`, empty when there is no sidecar
pub async fn object_metadata_for(source: &Path, site_id: &str, camera_id: &str) -> ObjectMetadata {
    load_sidecar(source)
        .await
        .map(|metadata| metadata.to_object_metadata(site_id, camera_id))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const WIRE_KEYS: [&str; 12] = [
        "site_id",
        "camera_id",
        "start_ts",
        "end_ts",
        "duration_sec",
        "motion_percentage",
        "motion_events",
        "width",
        "height",
        "fps",
        "codec",
        "bitrate",
    ];

    fn sample_json() -> &'static str {
        r#"{
            "start_timestamp": "2024-03-07T10:00:00Z",
            "end_timestamp": "2024-03-07T10:05:00Z",
            "duration": 299.7,
            "motion_percentage": 12.5,
            "motion_events": [{"start": 1.0}, {"start": 40.2}],
            "width": 1920,
            "height": 1080,
            "fps": 25,
            "codec": "h264",
            "bitrate": 4000000,
            "extra_field": "ignored"
        }"#
    }

    #[test]
    fn test_wire_format_key_names() {
        let metadata: SegmentMetadata = serde_json::from_str(sample_json()).unwrap();
        let wire = metadata.to_object_metadata("site-a", "cam-01");

        let keys: Vec<&str> = wire.keys().map(String::as_str).collect();
        let mut expected = WIRE_KEYS.to_vec();
        expected.sort_unstable();
        assert_eq!(keys, expected);
    }

    #[test]
    fn test_wire_format_values() {
        let metadata: SegmentMetadata = serde_json::from_str(sample_json()).unwrap();
        let wire = metadata.to_object_metadata("site-a", "cam-01");

        assert_eq!(wire["site_id"], "site-a");
        assert_eq!(wire["camera_id"], "cam-01");
        assert_eq!(wire["start_ts"], "2024-03-07T10:00:00Z");
        assert_eq!(wire["duration_sec"], "299");
        assert_eq!(wire["motion_percentage"], "12.5");
        assert_eq!(wire["motion_events"], "2");
        assert_eq!(wire["width"], "1920");
        assert_eq!(wire["height"], "1080");
        assert_eq!(wire["fps"], "25");
        assert_eq!(wire["codec"], "h264");
        assert_eq!(wire["bitrate"], "4000000");
    }

    #[test]
    fn test_numbers_keep_their_written_form() {
        let metadata: SegmentMetadata = serde_json::from_str(
            r#"{"duration": 59.9, "fps": 25.0, "width": 1280, "bitrate": 2500000.5, "motion_percentage": 0}"#,
        )
        .unwrap();
        let wire = metadata.to_object_metadata("site-a", "cam-01");

        assert_eq!(wire["fps"], "25.0");
        assert_eq!(wire["width"], "1280");
        assert_eq!(wire["bitrate"], "2500000.5");
        assert_eq!(wire["motion_percentage"], "0");
        assert_eq!(wire["duration_sec"], "59");
    }

    #[test]
    fn test_mistyped_field_only_blanks_its_own_key() {
        let metadata: SegmentMetadata = serde_json::from_str(
            r#"{"width": null, "height": "1080", "fps": 30, "codec": 264, "motion_events": {}}"#,
        )
        .unwrap();
        let wire = metadata.to_object_metadata("site-a", "cam-01");

        assert_eq!(wire.len(), WIRE_KEYS.len());
        assert_eq!(wire["width"], "0");
        assert_eq!(wire["height"], "0");
        assert_eq!(wire["fps"], "30");
        assert_eq!(wire["codec"], "unknown");
        assert_eq!(wire["motion_events"], "0");
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let metadata: SegmentMetadata = serde_json::from_str("{}").unwrap();
        let wire = metadata.to_object_metadata("s", "c");
        assert_eq!(wire["start_ts"], "");
        assert_eq!(wire["duration_sec"], "0");
        assert_eq!(wire["motion_events"], "0");
        assert_eq!(wire["codec"], "unknown");
        assert_eq!(wire.len(), WIRE_KEYS.len());
    }

    #[test]
    fn test_sidecar_and_marker_paths() {
        let source = Path::new("/opt/nvr/storage/cam-01/20240307_100000.mp4");
        assert_eq!(
            sidecar_path(source),
            Path::new("/opt/nvr/storage/cam-01/20240307_100000.metadata.json")
        );
        assert_eq!(
            completion_marker_path(source),
            Path::new("/opt/nvr/storage/cam-01/20240307_100000.synced")
        );
    }

    #[tokio::test]
    async fn test_load_sidecar_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("seg.mp4");
        std::fs::write(sidecar_path(&source), sample_json()).unwrap();

        let metadata = load_sidecar(&source).await.unwrap();
        assert_eq!(metadata.width, Some(Number::from(1920u32)));
        assert_eq!(metadata.codec.as_deref(), Some("h264"));
    }

    #[tokio::test]
    async fn test_malformed_or_missing_sidecar_yields_empty_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("seg.mp4");
        assert!(object_metadata_for(&source, "s", "c").await.is_empty());

        std::fs::write(sidecar_path(&source), "{ not json").unwrap();
        assert!(load_sidecar(&source).await.is_none());
        assert!(object_metadata_for(&source, "s", "c").await.is_empty());
    }
}
