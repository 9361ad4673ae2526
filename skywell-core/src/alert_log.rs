//! On-disk alert history
//!
//! Stored as zstd-compressed JSON at `.skywell/alerts.json.zst`. A newer alert
//! for the same (profile, cell, timestamp) supersedes the older record; it is
//! never merged. Only the most recent `limit` records are kept.

use crate::alert::Alert;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Directory holding SkyWell state files
pub fn skywell_dir(root: &Path) -> PathBuf {
    root.join(".skywell")
}

fn log_path(root: &Path) -> PathBuf {
    skywell_dir(root).join("alerts.json.zst")
}

/// Alert history, oldest first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertLog {
    pub alerts: Vec<Alert>,
}

fn same_slot(a: &Alert, b: &Alert) -> bool {
    a.profile_id == b.profile_id
        && a.timestamp == b.timestamp
        && a.latitude.to_bits() == b.latitude.to_bits()
        && a.longitude.to_bits() == b.longitude.to_bits()
}

impl AlertLog {
    /// Append `alerts`, superseding older records for the same slot, then keep
    /// the newest `limit` records
    ///
    /// Returns the number of superseded records.
    pub fn record(&mut self, alerts: &[Alert], limit: usize) -> usize {
        let before = self.alerts.len();
        self.alerts
            .retain(|old| !alerts.iter().any(|new| same_slot(old, new)));
        let superseded = before - self.alerts.len();
        self.alerts.extend_from_slice(alerts);
        if self.alerts.len() > limit {
            let excess = self.alerts.len() - limit;
            self.alerts.drain(..excess);
        }
        superseded
    }

    /// Records for one profile, oldest first
    pub fn for_profile<'a>(&'a self, profile_id: &'a str) -> impl Iterator<Item = &'a Alert> {
        self.alerts.iter().filter(move |a| a.profile_id == profile_id)
    }
}

/// Load the alert history from disk
///
/// Returns an empty log when the file is absent or unreadable (non-fatal).
pub fn read_alert_log(root: &Path) -> AlertLog {
    let path = log_path(root);
    if !path.exists() {
        return AlertLog::default();
    }
    match load_compressed_json(&path) {
        Ok(log) => log,
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %format!("{:#}", e),
                "failed to load alert history, starting empty"
            );
            AlertLog::default()
        }
    }
}

fn load_compressed_json(path: &Path) -> Result<AlertLog> {
    let compressed = std::fs::read(path)
        .with_context(|| format!("failed to read alert history: {}", path.display()))?;
    let bytes = zstd::decode_all(compressed.as_slice())
        .with_context(|| format!("failed to decompress alert history: {}", path.display()))?;
    serde_json::from_slice(&bytes).context("failed to parse alert history JSON")
}

/// Write the alert history to disk (zstd level 3, temp file then rename)
pub fn write_alert_log(root: &Path, log: &AlertLog) -> Result<()> {
    let path = log_path(root);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }
    let json = serde_json::to_string(log).context("failed to serialize alert history")?;
    let compressed =
        zstd::encode_all(json.as_bytes(), 3).context("failed to compress alert history")?;

    let temp_path = path.with_extension("tmp");
    std::fs::write(&temp_path, &compressed)
        .with_context(|| format!("failed to write temp file: {}", temp_path.display()))?;
    std::fs::rename(&temp_path, &path)
        .with_context(|| format!("failed to rename temp file to: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{render_message, Severity};
    use crate::grid::CellIndex;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    fn alert(profile: &str, hour: u32, lat: usize, score: f64) -> Alert {
        Alert {
            profile_id: profile.to_string(),
            timestamp: Utc.with_ymd_and_hms(2025, 5, 1, hour, 0, 0).unwrap(),
            cell: CellIndex { time: hour as usize, lat, lon: 0 },
            latitude: 52.5 + lat as f64 * 0.25,
            longitude: 13.25,
            risk_score: score,
            uv_value: Some(6.0),
            pollen_value: None,
            components: BTreeMap::new(),
            dominant_factor: None,
            severity: Severity::Moderate,
            message: render_message(Severity::Moderate, score, Some(6.0), None),
        }
    }

    #[test]
    fn test_record_supersedes_same_slot() {
        let mut log = AlertLog::default();
        log.record(&[alert("a", 1, 0, 5.0), alert("a", 2, 0, 6.0)], 10);
        let superseded = log.record(&[alert("a", 1, 0, 7.0)], 10);
        assert_eq!(superseded, 1);
        assert_eq!(log.alerts.len(), 2);
        assert_eq!(log.alerts[1].risk_score, 7.0);
        // Another profile at the same cell is a different slot
        log.record(&[alert("b", 1, 0, 5.0)], 10);
        assert_eq!(log.alerts.len(), 3);
        assert_eq!(log.for_profile("a").count(), 2);
    }

    #[test]
    fn test_record_keeps_most_recent() {
        let mut log = AlertLog::default();
        let batch: Vec<Alert> = (0..12).map(|h| alert("a", h, 0, 5.0)).collect();
        log.record(&batch, 10);
        assert_eq!(log.alerts.len(), 10);
        assert_eq!(log.alerts[0].cell.time, 2);
        assert_eq!(log.alerts[9].cell.time, 11);
    }

    #[test]
    fn test_roundtrip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = AlertLog::default();
        log.record(&[alert("a", 3, 1, 8.5)], 10);
        write_alert_log(dir.path(), &log).unwrap();
        assert!(dir.path().join(".skywell/alerts.json.zst").exists());
        assert_eq!(read_alert_log(dir.path()), log);
    }

    #[test]
    fn test_missing_or_corrupt_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_alert_log(dir.path()).alerts.is_empty());

        std::fs::create_dir_all(skywell_dir(dir.path())).unwrap();
        std::fs::write(log_path(dir.path()), b"not zstd").unwrap();
        assert!(read_alert_log(dir.path()).alerts.is_empty());
    }
}
