//! Event identifiers, artifact naming and the sidecar metadata record.

use std::fmt;

use chrono::NaiveDate;
use schemars::schema::RootSchema;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::encoding::{BEST_FRAME_EXTENSION, BEST_FRAME_SUFFIX, CLIP_EXTENSION, METADATA_EXTENSION};
use crate::gps::GpsFix;

/// Unique identifier for a recorded event, used for log correlation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct EventId(pub String);

impl EventId {
    /// Generate a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The three files persisted per event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Video,
    BestFrame,
    Metadata,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 3] = [
        ArtifactKind::Video,
        ArtifactKind::BestFrame,
        ArtifactKind::Metadata,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Video => "video",
            ArtifactKind::BestFrame => "best_frame",
            ArtifactKind::Metadata => "metadata",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ArtifactKind::Video => "video/x-msvideo",
            ArtifactKind::BestFrame => "image/jpeg",
            ArtifactKind::Metadata => "application/json",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timestamp-derived identifier shared by all files of one event.
///
/// Files live under `{date}/` locally and remotely:
/// `{prefix}_{ts}.avi`, `{prefix}_{ts}_best.jpg`, `{prefix}_{ts}.json`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey {
    pub prefix: String,
    /// Epoch seconds
    pub ts: i64,
    /// Calendar date the event was closed on
    pub date: NaiveDate,
}

impl EventKey {
    pub fn new(prefix: impl Into<String>, ts: i64, date: NaiveDate) -> Self {
        Self {
            prefix: prefix.into(),
            ts,
            date,
        }
    }

    /// ISO date string used as directory and key prefix.
    pub fn date_dir(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }

    pub fn stem(&self) -> String {
        format!("{}_{}", self.prefix, self.ts)
    }

    pub fn filename(&self, kind: ArtifactKind) -> String {
        match kind {
            ArtifactKind::Video => format!("{}.{}", self.stem(), CLIP_EXTENSION),
            ArtifactKind::BestFrame => {
                format!("{}{}.{}", self.stem(), BEST_FRAME_SUFFIX, BEST_FRAME_EXTENSION)
            }
            ArtifactKind::Metadata => format!("{}.{}", self.stem(), METADATA_EXTENSION),
        }
    }

    /// Remote object key: `{date}/{filename}`.
    pub fn remote_key(&self, kind: ArtifactKind) -> String {
        format!("{}/{}", self.date_dir(), self.filename(kind))
    }
}

/// Nullable coordinates as written to the sidecar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GpsCoordinates {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

impl From<&GpsFix> for GpsCoordinates {
    fn from(fix: &GpsFix) -> Self {
        Self {
            lat: fix.lat,
            lon: fix.lon,
        }
    }
}

/// Sidecar metadata record persisted next to each clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EventMetadata {
    /// Epoch seconds, same value as in the file names
    pub timestamp: i64,
    pub gps: GpsCoordinates,
    pub frame_count: usize,
    pub duration_s: f64,
}

impl EventMetadata {
    pub fn new(timestamp: i64, gps: &GpsFix, frame_count: usize, fps: u32) -> Self {
        let duration_s = if fps == 0 {
            0.0
        } else {
            frame_count as f64 / fps as f64
        };
        Self {
            timestamp,
            gps: GpsCoordinates::from(gps),
            frame_count,
            duration_s,
        }
    }

    /// JSON schema of the sidecar record, for consumers of the uploaded files.
    pub fn schema() -> RootSchema {
        schemars::schema_for!(EventMetadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> EventKey {
        EventKey::new("pothole", 1746148157, NaiveDate::from_ymd_opt(2025, 5, 2).unwrap())
    }

    #[test]
    fn test_filenames_share_identifier() {
        let key = key();
        assert_eq!(key.filename(ArtifactKind::Video), "pothole_1746148157.avi");
        assert_eq!(key.filename(ArtifactKind::BestFrame), "pothole_1746148157_best.jpg");
        assert_eq!(key.filename(ArtifactKind::Metadata), "pothole_1746148157.json");
    }

    #[test]
    fn test_remote_key_uses_iso_date() {
        assert_eq!(
            key().remote_key(ArtifactKind::Metadata),
            "2025-05-02/pothole_1746148157.json"
        );
    }

    #[test]
    fn test_metadata_json_shape() {
        let meta = EventMetadata::new(1746148157, &GpsFix::default(), 45, 30);
        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "timestamp": 1746148157,
                "gps": {"lat": null, "lon": null},
                "frame_count": 45,
                "duration_s": 1.5
            })
        );
    }

    #[test]
    fn test_metadata_carries_fix() {
        let fix = GpsFix::new(40.5, -3.7, "$GPGGA");
        let meta = EventMetadata::new(1, &fix, 0, 30);
        assert_eq!(meta.gps.lat, Some(40.5));
        assert_eq!(meta.gps.lon, Some(-3.7));
        assert_eq!(meta.duration_s, 0.0);
    }

    #[test]
    fn test_metadata_schema_lists_fields() {
        let schema = serde_json::to_value(EventMetadata::schema()).unwrap();
        assert_eq!(schema["title"], "EventMetadata");
        let properties = schema["properties"].as_object().unwrap();
        for field in ["timestamp", "gps", "frame_count", "duration_s"] {
            assert!(properties.contains_key(field), "missing {}", field);
        }
        let required = schema["required"].as_array().unwrap();
        assert_eq!(required.len(), 4);
        assert!(schema["definitions"]["GpsCoordinates"].is_object());
    }
}
