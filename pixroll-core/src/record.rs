use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ImageError, Result};

/// Serde adapter for the manifest timestamp format: UTC, second precision.
pub mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        let naive =
            NaiveDateTime::parse_from_str(&raw, FORMAT).map_err(serde::de::Error::custom)?;
        Ok(naive.and_utc())
    }
}

/// Descriptive record for a single image, computed from a filesystem entry.
///
/// `path` is always relative to the configured image root, posix-style, with
/// no `..` segments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub name: String,
    pub size: u64,
    #[serde(with = "timestamp")]
    pub mtime: DateTime<Utc>,
    pub path: String,
}

impl ImageRecord {
    /// Stat `relative` under `root` and build its record.
    ///
    /// A missing file maps to [`ImageError::NotFound`] so callers can treat
    /// manifest staleness as an absence rather than a fault.
    pub async fn from_file(root: &Path, relative: &str) -> Result<Self> {
        let absolute = root.join(relative);
        let metadata = match tokio::fs::metadata(&absolute).await {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ImageError::NotFound(relative.to_string()));
            }
            Err(err) => return Err(err.into()),
        };

        if !metadata.is_file() {
            return Err(ImageError::NotFound(relative.to_string()));
        }

        let name = relative
            .rsplit('/')
            .next()
            .unwrap_or(relative)
            .to_string();
        let mtime = metadata
            .modified()
            .map(truncate_to_seconds)
            .unwrap_or_else(|_| truncate_to_seconds(SystemTime::UNIX_EPOCH));

        Ok(Self {
            name,
            size: metadata.len(),
            mtime,
            path: relative.to_string(),
        })
    }

    /// Timestamp formatted the way the manifest stores it.
    pub fn formatted_mtime(&self) -> String {
        self.mtime.format(timestamp::FORMAT).to_string()
    }
}

/// Convert a filesystem timestamp to the manifest's UTC second precision.
pub fn truncate_to_seconds(time: SystemTime) -> DateTime<Utc> {
    let datetime: DateTime<Utc> = time.into();
    datetime.with_nanosecond(0).unwrap_or(datetime)
}

/// Format a filesystem timestamp as the manifest timestamp string.
pub fn format_system_time(time: SystemTime) -> String {
    truncate_to_seconds(time).format(timestamp::FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn record_serializes_with_fixed_timestamp_format() {
        let record = ImageRecord {
            name: "b.png".to_string(),
            size: 42,
            mtime: Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap(),
            path: "pets/b.png".to_string(),
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["name"], "b.png");
        assert_eq!(json["size"], 42);
        assert_eq!(json["mtime"], "2025-01-02 00:00:00");
        assert_eq!(json["path"], "pets/b.png");

        let parsed: ImageRecord = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, record);
    }

    #[tokio::test]
    async fn from_file_maps_missing_files_to_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let err = ImageRecord::from_file(tmp.path(), "gone.png")
            .await
            .unwrap_err();
        assert!(matches!(err, ImageError::NotFound(_)));
    }

    #[tokio::test]
    async fn from_file_stats_an_existing_image() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("pets")).unwrap();
        std::fs::write(tmp.path().join("pets/b.png"), b"png-bytes").unwrap();

        let record = ImageRecord::from_file(tmp.path(), "pets/b.png")
            .await
            .unwrap();
        assert_eq!(record.name, "b.png");
        assert_eq!(record.size, 9);
        assert_eq!(record.path, "pets/b.png");
        assert_eq!(record.mtime.nanosecond(), 0);
    }
}
