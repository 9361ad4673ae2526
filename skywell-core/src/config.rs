//! Configuration file support for SkyWell
//!
//! Loads engine configuration from JSON files.
//!
//! Search order:
//! 1. Explicit path (--config CLI flag)
//! 2. `.skywellrc.json` in the working directory
//! 3. `skywell.config.json` in the working directory
//!
//! All fields are optional. Defaults cover the Berlin forecast domain.

use crate::alert::SeverityThresholds;
use crate::grid::{cells_along, Extent};
use crate::variable::{Variable, DEFAULT_POLLEN_SPECIES};
use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Berlin forecast domain
pub const DEFAULT_EXTENT: Extent = Extent {
    north: 53.0,
    south: 52.3,
    east: 14.0,
    west: 13.0,
};
pub const DEFAULT_RESOLUTION: f64 = 0.01;
pub const DEFAULT_FORECAST_DAYS: u32 = 4;
pub const DEFAULT_TIME_STEP_HOURS: u32 = 1;
pub const DEFAULT_ALERT_HISTORY_LIMIT: usize = 10;

/// SkyWell configuration loaded from a JSON config file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SkywellConfig {
    /// Target grid bounding box (default: Berlin)
    #[serde(default)]
    pub target_extent: Option<Extent>,

    /// Target grid resolution in degrees per cell (default: 0.01)
    #[serde(default)]
    pub target_resolution: Option<f64>,

    /// Forecast window and cache horizon in days (default: 4)
    #[serde(default)]
    pub forecast_days: Option<u32>,

    /// Spacing of the target time axis in hours (default: 1)
    #[serde(default)]
    pub time_step_hours: Option<u32>,

    /// Per-variable normalization maxima replacing the built-in defaults
    #[serde(default)]
    pub default_maxima: BTreeMap<Variable, f64>,

    /// Species summed into total_pollen (default: birch, grass, olive, ragweed)
    #[serde(default)]
    pub pollen_species: Option<Vec<Variable>>,

    /// Severity tier boundaries
    #[serde(default)]
    pub severity: Option<SeverityConfig>,

    /// Number of alert records kept in the history store (default: 10)
    #[serde(default)]
    pub alert_history_limit: Option<usize>,
}

/// Severity tier boundaries
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeverityConfig {
    /// Lowest score tagged moderate (default: 5.0)
    pub moderate: Option<f64>,
    /// Lowest score tagged high (default: 8.0)
    pub high: Option<f64>,
}

/// Resolved configuration with defaults applied
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedConfig {
    pub target_extent: Extent,
    pub target_resolution: f64,
    pub forecast_days: u32,
    pub time_step_hours: u32,
    pub default_maxima: BTreeMap<Variable, f64>,
    pub pollen_species: Vec<Variable>,
    pub severity: SeverityThresholds,
    pub alert_history_limit: usize,
    /// Path the config was loaded from (None if defaults)
    pub config_path: Option<PathBuf>,
}

impl SkywellConfig {
    /// Validate the configuration for logical errors
    pub fn validate(&self) -> Result<()> {
        let extent = self.target_extent.unwrap_or(DEFAULT_EXTENT);
        extent.validate().context("target_extent is invalid")?;

        let resolution = self.target_resolution.unwrap_or(DEFAULT_RESOLUTION);
        if !resolution.is_finite() || resolution <= 0.0 {
            anyhow::bail!("target_resolution must be positive (got {})", resolution);
        }
        cells_along(extent.lat_span(), resolution)
            .and_then(|_| cells_along(extent.lon_span(), resolution))
            .context("target_resolution is coarser than target_extent")?;

        if let Some(days) = self.forecast_days {
            if days == 0 {
                anyhow::bail!("forecast_days must be at least 1");
            }
        }

        if let Some(step) = self.time_step_hours {
            if step == 0 || 24 % step != 0 {
                anyhow::bail!(
                    "time_step_hours must be a divisor of 24 (got {})",
                    step
                );
            }
        }

        for (variable, max) in &self.default_maxima {
            if !max.is_finite() || *max <= 0.0 {
                anyhow::bail!(
                    "default_maxima.{} must be positive (got {})",
                    variable,
                    max
                );
            }
        }

        if let Some(ref species) = self.pollen_species {
            if species.is_empty() {
                anyhow::bail!("pollen_species must name at least one species");
            }
            if let Some(bad) = species.iter().find(|v| !v.is_pollen_species()) {
                anyhow::bail!("pollen_species may only list pollen species (got {})", bad);
            }
        }

        if let Some(ref s) = self.severity {
            let moderate = s.moderate.unwrap_or(5.0);
            let high = s.high.unwrap_or(8.0);
            if !(1.0..=10.0).contains(&moderate) {
                anyhow::bail!("severity.moderate must be within [1, 10] (got {})", moderate);
            }
            if !(1.0..=10.0).contains(&high) {
                anyhow::bail!("severity.high must be within [1, 10] (got {})", high);
            }
            if moderate >= high {
                anyhow::bail!(
                    "severity.moderate ({}) must be less than severity.high ({})",
                    moderate,
                    high
                );
            }
        }

        if let Some(limit) = self.alert_history_limit {
            if limit == 0 {
                anyhow::bail!("alert_history_limit must be at least 1");
            }
        }

        Ok(())
    }

    /// Resolve config with defaults applied
    pub fn resolve(&self) -> Result<ResolvedConfig> {
        self.validate()?;

        let severity = match &self.severity {
            Some(s) => SeverityThresholds {
                moderate: s.moderate.unwrap_or(5.0),
                high: s.high.unwrap_or(8.0),
            },
            None => SeverityThresholds::default(),
        };

        Ok(ResolvedConfig {
            target_extent: self.target_extent.unwrap_or(DEFAULT_EXTENT),
            target_resolution: self.target_resolution.unwrap_or(DEFAULT_RESOLUTION),
            forecast_days: self.forecast_days.unwrap_or(DEFAULT_FORECAST_DAYS),
            time_step_hours: self.time_step_hours.unwrap_or(DEFAULT_TIME_STEP_HOURS),
            default_maxima: self.default_maxima.clone(),
            pollen_species: self
                .pollen_species
                .clone()
                .unwrap_or_else(|| DEFAULT_POLLEN_SPECIES.to_vec()),
            severity,
            alert_history_limit: self
                .alert_history_limit
                .unwrap_or(DEFAULT_ALERT_HISTORY_LIMIT),
            config_path: None,
        })
    }
}

impl ResolvedConfig {
    /// Build a ResolvedConfig with all defaults (no config file)
    pub fn defaults() -> Result<Self> {
        SkywellConfig::default().resolve()
    }

    /// Cache horizon: the forecast window length
    pub fn cache_horizon(&self) -> Duration {
        Duration::days(self.forecast_days as i64)
    }
}

/// Discover and load a config file from `dir`
///
/// Search order:
/// 1. `.skywellrc.json`
/// 2. `skywell.config.json`
///
/// Returns `None` if no config file is found (use defaults).
pub fn discover_config(dir: &Path) -> Result<Option<(SkywellConfig, PathBuf)>> {
    for name in [".skywellrc.json", "skywell.config.json"] {
        let path = dir.join(name);
        if path.exists() {
            let config = load_config_file(&path)?;
            return Ok(Some((config, path)));
        }
    }
    Ok(None)
}

/// Load config from an explicit file path
pub fn load_config_file(path: &Path) -> Result<SkywellConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;

    let config: SkywellConfig = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;

    config
        .validate()
        .with_context(|| format!("invalid config in: {}", path.display()))?;

    Ok(config)
}

/// Load and resolve config
///
/// If `config_path` is provided, loads from that file.
/// Otherwise, discovers config in `dir`.
/// Returns default config if nothing is found.
pub fn load_and_resolve(dir: &Path, config_path: Option<&Path>) -> Result<ResolvedConfig> {
    let (config, source_path) = if let Some(path) = config_path {
        let config = load_config_file(path)?;
        (config, Some(path.to_path_buf()))
    } else {
        match discover_config(dir)? {
            Some((config, path)) => (config, Some(path)),
            None => (SkywellConfig::default(), None),
        }
    };

    let mut resolved = config.resolve()?;
    resolved.config_path = source_path;
    Ok(resolved)
}
