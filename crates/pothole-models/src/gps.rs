//! GPS fix snapshot.

use serde::{Deserialize, Serialize};

/// Latest known position.
///
/// Coordinates are absent until the receiver acquires a fix; that is the
/// normal state right after startup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GpsFix {
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    /// Sentence the fix was derived from
    #[serde(default, rename = "raw")]
    pub raw_sentence: String,
}

impl GpsFix {
    pub fn new(lat: f64, lon: f64, raw_sentence: impl Into<String>) -> Self {
        Self {
            lat: Some(lat),
            lon: Some(lon),
            raw_sentence: raw_sentence.into(),
        }
    }

    pub fn has_fix(&self) -> bool {
        self.lat.is_some() && self.lon.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_has_no_fix() {
        assert!(!GpsFix::default().has_fix());
    }

    #[test]
    fn test_feed_line_parses() {
        let fix: GpsFix =
            serde_json::from_str(r#"{"lat": 52.1, "lon": -1.5, "raw": "$GPRMC,..."}"#).unwrap();
        assert!(fix.has_fix());
        assert_eq!(fix.raw_sentence, "$GPRMC,...");

        let partial: GpsFix = serde_json::from_str(r#"{"raw": "$GPGGA,..."}"#).unwrap();
        assert!(!partial.has_fix());
    }
}
