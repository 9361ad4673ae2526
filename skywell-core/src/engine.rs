//! End-to-end forecast cycle
//!
//! Source grids → `GridHarmonizer` → `HarmonizedGridSet` → `RiskScorer` (per
//! profile) → `RiskGrid` → `AlertClassifier` → `AlertReport`. Harmonized grids
//! and per-profile assessments are memoized in `ForecastCache`s keyed by the
//! exact inputs that determine them.

use crate::alert::{Alert, AlertClassifier, AlertReport};
use crate::cache::{CacheKey, Clock, ForecastCache, SystemClock};
use crate::config::ResolvedConfig;
use crate::error::EngineError;
use crate::grid::{Extent, GridDataset, GridGeometry};
use crate::harmonize::{forecast_time_axis, GridHarmonizer, HarmonizedGridSet};
use crate::profile::UserProfile;
use crate::scoring::{RiskGrid, RiskScorer};
use chrono::NaiveDate;
use rayon::prelude::*;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{debug, info};

/// Scores and alerts for one profile
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileAssessment {
    pub profile_id: String,
    pub scores: RiskGrid,
    pub report: AlertReport,
}

/// Output of one forecast cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub grid: Arc<HarmonizedGridSet>,
    /// One assessment per input profile, in input order
    pub assessments: Vec<Arc<ProfileAssessment>>,
}

impl CycleReport {
    pub fn alerts(&self) -> impl Iterator<Item = &Alert> {
        self.assessments.iter().flat_map(|a| a.report.alerts.iter())
    }

    pub fn assessment(&self, profile_id: &str) -> Option<&ProfileAssessment> {
        self.assessments
            .iter()
            .map(|a| a.as_ref())
            .find(|a| a.profile_id == profile_id)
    }
}

/// Orchestrates harmonization, scoring and classification
#[derive(Debug)]
pub struct RiskEngine {
    harmonizer: GridHarmonizer,
    scorer: RiskScorer,
    classifier: AlertClassifier,
    target_extent: Extent,
    target_resolution: f64,
    forecast_days: u32,
    time_step_hours: u32,
    grids: ForecastCache<CacheKey, Arc<HarmonizedGridSet>>,
    assessments: ForecastCache<CacheKey, Arc<ProfileAssessment>>,
}

impl RiskEngine {
    pub fn new(config: &ResolvedConfig) -> Self {
        RiskEngine::with_clock(config, Arc::new(SystemClock))
    }

    /// Engine whose caches read time from `clock`
    pub fn with_clock(config: &ResolvedConfig, clock: Arc<dyn Clock>) -> Self {
        let horizon = config.cache_horizon();
        RiskEngine {
            harmonizer: GridHarmonizer::new(config.pollen_species.clone()),
            scorer: RiskScorer::with_maxima(&config.default_maxima),
            classifier: AlertClassifier::new(config.severity),
            target_extent: config.target_extent,
            target_resolution: config.target_resolution,
            forecast_days: config.forecast_days,
            time_step_hours: config.time_step_hours,
            grids: ForecastCache::with_clock(horizon, Arc::clone(&clock)),
            assessments: ForecastCache::with_clock(horizon, clock),
        }
    }

    pub fn scorer(&self) -> &RiskScorer {
        &self.scorer
    }

    pub fn classifier(&self) -> &AlertClassifier {
        &self.classifier
    }

    /// Configured target grid covering the forecast window starting at `start`
    pub fn forecast_target(&self, start: NaiveDate) -> Result<GridGeometry, EngineError> {
        let axis = forecast_time_axis(start, self.forecast_days, self.time_step_hours)?;
        GridGeometry::new(self.target_extent, self.target_resolution, axis)
    }

    /// Harmonize `sources` onto `target`, reusing a live cached result
    pub fn harmonize(
        &self,
        sources: &[GridDataset],
        target: &GridGeometry,
    ) -> Result<Arc<HarmonizedGridSet>, EngineError> {
        let key = CacheKey::for_target(target, sources.iter().map(|s| s.variable()));
        self.grids.get_or_compute(key, || {
            self.harmonizer.harmonize(sources, target).map(Arc::new)
        })
    }

    /// Score and classify `grid` for one profile, reusing a live cached result
    pub fn assess(&self, grid: &HarmonizedGridSet, profile: &UserProfile) -> Arc<ProfileAssessment> {
        let key = CacheKey::for_grid(grid).with_profile(profile);
        self.assessments
            .get_or_compute(key, || {
                let scores = self.scorer.score(grid, profile);
                let report = self.classifier.classify(&scores, profile);
                debug!(
                    profile = profile.id(),
                    alerts = report.alerts.len(),
                    no_data_cells = report.coverage.no_data_cells.len(),
                    "profile assessed"
                );
                Ok::<_, Infallible>(Arc::new(ProfileAssessment {
                    profile_id: profile.id().to_string(),
                    scores,
                    report,
                }))
            })
            .unwrap_or_else(|never| match never {})
    }

    /// Run one forecast cycle for every profile
    ///
    /// Profiles are scored in parallel; assessments come back in input order.
    pub fn run_cycle(
        &self,
        sources: &[GridDataset],
        target: &GridGeometry,
        profiles: &[UserProfile],
    ) -> Result<CycleReport, EngineError> {
        let grid = self.harmonize(sources, target)?;
        let assessments: Vec<Arc<ProfileAssessment>> = profiles
            .par_iter()
            .map(|profile| self.assess(&grid, profile))
            .collect();

        let report = CycleReport { grid, assessments };
        info!(
            profiles = profiles.len(),
            variables = report.grid.variables().count(),
            issues = report.grid.issues().len(),
            alerts = report.alerts().count(),
            "forecast cycle complete"
        );
        Ok(report)
    }

    /// Drop every cached grid and assessment
    pub fn invalidate_all(&self) {
        self.grids.invalidate_all();
        self.assessments.invalidate_all();
    }

    /// Remove expired cache entries, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        self.grids.purge_expired() + self.assessments.purge_expired()
    }
}
