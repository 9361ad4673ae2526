//! Severity classification and alert records
//!
//! Global invariants enforced:
//! - A cell whose rated score equals the profile threshold emits an alert (inclusive)
//! - "No data" cells never emit alerts; they are listed in the coverage report
//! - Messages are deterministic template substitution

use crate::grid::{CellIndex, GridGeometry};
use crate::profile::UserProfile;
use crate::scoring::{rated_score, RiskGrid, RiskScore};
use crate::variable::Variable;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Severity tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Moderate,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Moderate => "moderate",
            Severity::High => "high",
        }
    }

    /// Capitalized form used at the start of messages
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Low => "Low",
            Severity::Moderate => "Moderate",
            Severity::High => "High",
        }
    }

    pub fn advice(&self) -> &'static str {
        match self {
            Severity::High => "Consider staying indoors or taking extra precautions.",
            Severity::Moderate => "Take normal precautions for your activities.",
            Severity::Low => "Conditions are generally safe for your profile.",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tier boundaries on the 1-10 scale
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeverityThresholds {
    pub moderate: f64,
    pub high: f64,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        SeverityThresholds {
            moderate: 5.0,
            high: 8.0,
        }
    }
}

impl SeverityThresholds {
    pub fn classify(&self, score: f64) -> Severity {
        if score >= self.high {
            Severity::High
        } else if score >= self.moderate {
            Severity::Moderate
        } else {
            Severity::Low
        }
    }
}

/// One emitted alert for a (profile, cell, time)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub profile_id: String,
    pub timestamp: DateTime<Utc>,
    pub cell: CellIndex,
    pub latitude: f64,
    pub longitude: f64,
    pub risk_score: f64,
    pub uv_value: Option<f64>,
    pub pollen_value: Option<f64>,
    #[serde(default)]
    pub components: BTreeMap<Variable, Option<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dominant_factor: Option<Variable>,
    pub severity: Severity,
    pub message: String,
}

fn format_reading(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.1}", v),
        None => "no data".to_string(),
    }
}

/// Plain-text alert message
pub fn render_message(
    severity: Severity,
    score: f64,
    uv_value: Option<f64>,
    pollen_value: Option<f64>,
) -> String {
    format!(
        "{} risk alert: score {:.1}/10, UV index {}, pollen {}. {}",
        severity.label(),
        score,
        format_reading(uv_value),
        format_reading(pollen_value),
        severity.advice()
    )
}

/// Cells that did not produce an alert
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CoverageReport {
    pub total_cells: usize,
    pub scored_cells: usize,
    /// Scored cells below the profile threshold (recorded, not sent)
    pub below_threshold: usize,
    pub highest_below_threshold: Option<f64>,
    /// Cells whose score is "no data"
    pub no_data_cells: Vec<CellIndex>,
}

/// Classification result for one profile
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertReport {
    pub profile_id: String,
    pub alerts: Vec<Alert>,
    pub coverage: CoverageReport,
}

impl AlertReport {
    pub fn highest_severity(&self) -> Option<Severity> {
        self.alerts.iter().map(|a| a.severity).max()
    }

    /// One-line summary for display collaborators
    pub fn status_line(&self) -> String {
        match self.highest_severity() {
            None => "no active alerts".to_string(),
            Some(severity) => format!(
                "{} active alert(s), highest severity {}",
                self.alerts.len(),
                severity
            ),
        }
    }

    /// Alerts for the grid cell at (lat_index, lon_index)
    pub fn at_cell(&self, lat_index: usize, lon_index: usize) -> impl Iterator<Item = &Alert> {
        self.alerts
            .iter()
            .filter(move |a| a.cell.lat == lat_index && a.cell.lon == lon_index)
    }
}

/// Maps scored cells into severity-tagged alerts
#[derive(Debug, Clone, Default)]
pub struct AlertClassifier {
    thresholds: SeverityThresholds,
}

impl AlertClassifier {
    pub fn new(thresholds: SeverityThresholds) -> Self {
        AlertClassifier { thresholds }
    }

    pub fn thresholds(&self) -> &SeverityThresholds {
        &self.thresholds
    }

    /// Emit one alert per cell at or above the profile's threshold
    ///
    /// Thresholds and tiers compare the one-decimal rating of each score;
    /// alerts and the coverage report carry that rating.
    pub fn classify(&self, scores: &RiskGrid, profile: &UserProfile) -> AlertReport {
        let geometry = scores.geometry();
        let threshold = profile.alert_threshold();
        let mut alerts = Vec::new();
        let mut coverage = CoverageReport {
            total_cells: scores.len(),
            ..CoverageReport::default()
        };

        for score in scores.iter() {
            let Some(value) = score.value.map(rated_score) else {
                coverage.no_data_cells.push(score.cell);
                continue;
            };
            coverage.scored_cells += 1;
            if value < threshold {
                coverage.below_threshold += 1;
                coverage.highest_below_threshold = Some(
                    coverage
                        .highest_below_threshold
                        .map_or(value, |h: f64| h.max(value)),
                );
                continue;
            }
            alerts.push(self.build_alert(profile, &score, value, geometry));
        }

        AlertReport {
            profile_id: profile.id().to_string(),
            alerts,
            coverage,
        }
    }

    fn build_alert(
        &self,
        profile: &UserProfile,
        score: &RiskScore,
        value: f64,
        geometry: &GridGeometry,
    ) -> Alert {
        let severity = self.thresholds.classify(value);
        let uv_value = score.component(Variable::UvIndex);
        let pollen_value = score.component(Variable::TotalPollen);
        Alert {
            profile_id: profile.id().to_string(),
            timestamp: geometry.time_axis()[score.cell.time],
            cell: score.cell,
            latitude: geometry.lat_center(score.cell.lat),
            longitude: geometry.lon_center(score.cell.lon),
            risk_score: value,
            uv_value,
            pollen_value,
            components: score.components.clone(),
            dominant_factor: score.dominant_factor,
            severity,
            message: render_message(severity, value, uv_value, pollen_value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{Extent, GridDataset};
    use crate::harmonize::GridHarmonizer;
    use crate::profile::ProfileSpec;
    use crate::scoring::RiskScorer;
    use chrono::TimeZone;

    fn scores_for(uv: [Option<f64>; 4], threshold: f64) -> (RiskGrid, UserProfile) {
        let extent = Extent::new(2.0, 0.0, 2.0, 0.0).unwrap();
        let t0 = Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap();
        let source = GridDataset::new(Variable::UvIndex, extent, 1.0, vec![t0], uv.to_vec()).unwrap();
        let target = source.geometry().clone();
        let grid = GridHarmonizer::default().harmonize(&[source], &target).unwrap();
        let profile = UserProfile::new(ProfileSpec {
            id: "alice".to_string(),
            weights: [(Variable::UvIndex, 1.0)].into_iter().collect(),
            max_overrides: BTreeMap::new(),
            alert_threshold: threshold,
            location: None,
        })
        .unwrap();
        (RiskScorer::default().score(&grid, &profile), profile)
    }

    #[test]
    fn test_severity_tiers() {
        let t = SeverityThresholds::default();
        assert_eq!(t.classify(10.0), Severity::High);
        assert_eq!(t.classify(8.0), Severity::High);
        assert_eq!(t.classify(7.9), Severity::Moderate);
        assert_eq!(t.classify(5.0), Severity::Moderate);
        assert_eq!(t.classify(4.9), Severity::Low);
        assert_eq!(t.classify(1.0), Severity::Low);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        // UV 5.5 of 11 scores exactly 5.0
        let (scores, profile) = scores_for([Some(5.5), Some(4.4), None, Some(11.0)], 5.0);
        let report = AlertClassifier::default().classify(&scores, &profile);
        assert_eq!(report.alerts.len(), 2);
        assert_eq!(report.alerts[0].risk_score, 5.0);
        assert_eq!(report.alerts[0].severity, Severity::Moderate);
        assert_eq!(report.alerts[1].severity, Severity::High);
        assert_eq!(report.coverage.total_cells, 4);
        assert_eq!(report.coverage.scored_cells, 3);
        assert_eq!(report.coverage.below_threshold, 1);
        assert_eq!(report.coverage.highest_below_threshold, Some(4.0));
        assert_eq!(report.coverage.no_data_cells, vec![CellIndex { time: 0, lat: 1, lon: 0 }]);
    }

    #[test]
    fn test_classification_uses_rated_score() {
        // 5.45 of 11 is a composite of 4.954..., rated 5.0
        let (scores, profile) = scores_for([Some(5.45); 4], 5.0);
        assert!(scores.values()[0].is_some_and(|v| v < 5.0));
        let report = AlertClassifier::default().classify(&scores, &profile);
        assert_eq!(report.alerts.len(), 4);
        assert_eq!(report.alerts[0].risk_score, 5.0);
        assert_eq!(report.alerts[0].severity, Severity::Moderate);
    }

    #[test]
    fn test_low_threshold_emits_low_alerts() {
        let (scores, profile) = scores_for([Some(3.3); 4], 2.0);
        let report = AlertClassifier::default().classify(&scores, &profile);
        assert_eq!(report.alerts.len(), 4);
        assert!(report.alerts.iter().all(|a| a.severity == Severity::Low));
    }

    #[test]
    fn test_alert_fields() {
        let (scores, profile) = scores_for([None, None, None, Some(11.0)], 5.0);
        let report = AlertClassifier::default().classify(&scores, &profile);
        let alert = &report.alerts[0];
        assert_eq!(alert.profile_id, "alice");
        assert_eq!(alert.timestamp, Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap());
        assert_eq!(alert.cell, CellIndex { time: 0, lat: 1, lon: 1 });
        assert_eq!(alert.latitude, 1.5);
        assert_eq!(alert.longitude, 1.5);
        assert_eq!(alert.uv_value, Some(11.0));
        assert_eq!(alert.pollen_value, None);
        assert_eq!(alert.dominant_factor, Some(Variable::UvIndex));
        assert_eq!(
            alert.message,
            "High risk alert: score 10.0/10, UV index 11.0, pollen no data. \
             Consider staying indoors or taking extra precautions."
        );
        assert_eq!(report.at_cell(1, 1).count(), 1);
        assert_eq!(report.at_cell(0, 0).count(), 0);
    }

    #[test]
    fn test_status_line() {
        let (scores, profile) = scores_for([Some(1.1); 4], 5.0);
        let report = AlertClassifier::default().classify(&scores, &profile);
        assert_eq!(report.status_line(), "no active alerts");

        let (scores, profile) = scores_for([Some(6.6), Some(11.0), None, None], 5.0);
        let report = AlertClassifier::default().classify(&scores, &profile);
        assert_eq!(report.status_line(), "2 active alert(s), highest severity high");
    }

    #[test]
    fn test_alert_json_field_names() {
        let (scores, profile) = scores_for([Some(11.0); 4], 5.0);
        let report = AlertClassifier::default().classify(&scores, &profile);
        let json = serde_json::to_value(&report.alerts[0]).unwrap();
        for field in ["timestamp", "risk_score", "uv_value", "pollen_value", "message", "severity"] {
            assert!(json.get(field).is_some(), "missing {}", field);
        }
        assert_eq!(json["severity"], "high");
        let back: Alert = serde_json::from_value(json).unwrap();
        assert_eq!(back, report.alerts[0]);
    }
}
