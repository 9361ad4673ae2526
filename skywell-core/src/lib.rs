//! SkyWell core library - grid harmonization and personalized UV/pollen risk scoring

#![deny(warnings)]

// Global invariants enforced in this crate:
// - Harmonization and scoring are pure functions of their inputs
// - The forecast cache is the only shared mutable state
// - "No data" is carried as a marker end-to-end, never a numeric default
// - Variables are ordered by declaration, cells by (time, lat, lon)
// - Parallel work collects results in input order
// - Identical input yields byte-for-byte identical output

pub mod alert;
pub mod alert_log;
pub mod cache;
pub mod config;
pub mod dataset_io;
pub mod engine;
pub mod error;
pub mod grid;
pub mod harmonize;
pub mod profile;
pub mod scoring;
pub mod variable;

pub use alert::{Alert, AlertClassifier, AlertReport, CoverageReport, Severity, SeverityThresholds};
pub use cache::{CacheKey, Clock, ForecastCache, ManualClock, SystemClock};
pub use config::ResolvedConfig;
pub use engine::{CycleReport, ProfileAssessment, RiskEngine};
pub use error::EngineError;
pub use grid::{CellIndex, Extent, GridDataset, GridGeometry, GridShape};
pub use harmonize::{GridHarmonizer, HarmonizedGridSet, HarmonizedLayer, LayerQuality};
pub use profile::{Location, ProfilePreset, ProfileSpec, UserProfile};
pub use scoring::{RiskGrid, RiskScore, RiskScorer};
pub use variable::Variable;
