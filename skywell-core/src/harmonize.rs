//! Grid harmonization
//!
//! Resamples heterogeneous source grids onto one target grid and time axis.
//!
//! Global invariants enforced:
//! - Every layer in a `HarmonizedGridSet` has the target's (time, lat, lon) shape
//! - "No data" in a source propagates; it is never coerced to 0
//! - No spatial or temporal extrapolation
//! - Per-variable and per-timestamp failures are isolated and recorded
//! - Output ordering is independent of thread scheduling

use crate::error::EngineError;
use crate::grid::{GridDataset, GridGeometry, GridShape};
use crate::variable::{Variable, DEFAULT_POLLEN_SPECIES};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::hash::{Hash, Hasher};
use tracing::{debug, warn};

/// Below this many native cells along an axis, bilinear interpolation
/// degrades to nearest-neighbour on that axis
pub const MIN_BILINEAR_CELLS: usize = 4;

/// Fractional indices closer than this to a whole cell snap onto it
const SNAP_EPSILON: f64 = 1e-9;

/// Quality flags attached to a harmonized layer
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LayerQuality {
    /// A source axis had fewer than `MIN_BILINEAR_CELLS` cells; nearest-neighbour was used
    pub coarse_source: bool,
    /// Derived layer built from a subset of its expected components
    pub partial: bool,
    /// Expected components that were absent from the input
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_components: Vec<Variable>,
    /// Target timestamps the source could not reach (filled with "no data")
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub gap_timestamps: Vec<DateTime<Utc>>,
}

/// One variable on the target grid
#[derive(Debug, Clone, PartialEq)]
pub struct HarmonizedLayer {
    values: Vec<Option<f64>>,
    quality: LayerQuality,
}

impl HarmonizedLayer {
    pub fn values(&self) -> &[Option<f64>] {
        &self.values
    }

    pub fn quality(&self) -> &LayerQuality {
        &self.quality
    }
}

/// All harmonized variables sharing one target grid
///
/// Only `GridHarmonizer` creates these; they are immutable afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct HarmonizedGridSet {
    target: GridGeometry,
    layers: BTreeMap<Variable, HarmonizedLayer>,
    issues: Vec<EngineError>,
    fingerprint: u64,
}

/// Content hash over every layer's variable and cell values
fn layer_fingerprint(layers: &BTreeMap<Variable, HarmonizedLayer>) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    for (variable, layer) in layers {
        variable.hash(&mut hasher);
        for value in &layer.values {
            value.map(f64::to_bits).hash(&mut hasher);
        }
    }
    hasher.finish()
}

impl HarmonizedGridSet {
    pub fn target(&self) -> &GridGeometry {
        &self.target
    }

    pub fn shape(&self) -> GridShape {
        self.target.shape()
    }

    /// Harmonized variables in canonical order
    pub fn variables(&self) -> impl Iterator<Item = Variable> + '_ {
        self.layers.keys().copied()
    }

    pub fn contains(&self, variable: Variable) -> bool {
        self.layers.contains_key(&variable)
    }

    pub fn layer(&self, variable: Variable) -> Option<&HarmonizedLayer> {
        self.layers.get(&variable)
    }

    /// Isolated failures recorded while harmonizing (dropped variables, temporal gaps)
    pub fn issues(&self) -> &[EngineError] {
        &self.issues
    }

    /// Hash of the harmonized values; grids that differ in any cell differ here
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }
}

/// Interpolation stencil along one axis: up to two source indices with weights
#[derive(Debug, Clone, Copy, PartialEq)]
struct AxisSample {
    lower: usize,
    upper: usize,
    upper_weight: f64,
}

impl AxisSample {
    fn taps(&self) -> [(usize, f64); 2] {
        [
            (self.lower, 1.0 - self.upper_weight),
            (self.upper, self.upper_weight),
        ]
    }
}

/// Map a target coordinate to source indices along one axis
///
/// `origin` is the source's southern/western edge. Returns `None` when the
/// coordinate lies outside the source extent.
fn sample_axis(
    coord: f64,
    origin: f64,
    resolution: f64,
    cells: usize,
    nearest: bool,
) -> Option<AxisSample> {
    let edge = origin + cells as f64 * resolution;
    if coord < origin - SNAP_EPSILON || coord > edge + SNAP_EPSILON {
        return None;
    }
    let last = cells - 1;

    if nearest {
        let index = ((coord - origin) / resolution).floor().max(0.0) as usize;
        let index = index.min(last);
        return Some(AxisSample {
            lower: index,
            upper: index,
            upper_weight: 0.0,
        });
    }

    // Position in cell-centre units; clamp the half cells along the edges
    let mut pos = (coord - origin) / resolution - 0.5;
    let snapped = pos.round();
    if (pos - snapped).abs() < SNAP_EPSILON {
        pos = snapped;
    }
    let pos = pos.clamp(0.0, last as f64);
    let lower = (pos.floor() as usize).min(last);
    let upper = (lower + 1).min(last);
    let upper_weight = if upper == lower { 0.0 } else { pos - lower as f64 };
    Some(AxisSample {
        lower,
        upper,
        upper_weight,
    })
}

/// Precomputed spatial resampling from one source geometry to the target
struct SpatialPlan {
    lat: Vec<Option<AxisSample>>,
    lon: Vec<Option<AxisSample>>,
    source_lon_cells: usize,
    coarse: bool,
}

impl SpatialPlan {
    fn new(source: &GridGeometry, target: &GridGeometry) -> Self {
        let src_shape = source.shape();
        let tgt_shape = target.shape();
        let nearest_lat = src_shape.lat_cells < MIN_BILINEAR_CELLS;
        let nearest_lon = src_shape.lon_cells < MIN_BILINEAR_CELLS;
        let src_extent = source.extent();

        let lat = (0..tgt_shape.lat_cells)
            .map(|i| {
                sample_axis(
                    target.lat_center(i),
                    src_extent.south,
                    source.resolution(),
                    src_shape.lat_cells,
                    nearest_lat,
                )
            })
            .collect();
        let lon = (0..tgt_shape.lon_cells)
            .map(|j| {
                sample_axis(
                    target.lon_center(j),
                    src_extent.west,
                    source.resolution(),
                    src_shape.lon_cells,
                    nearest_lon,
                )
            })
            .collect();

        SpatialPlan {
            lat,
            lon,
            source_lon_cells: src_shape.lon_cells,
            coarse: nearest_lat || nearest_lon,
        }
    }

    /// Resample one (lat, lon) plane
    ///
    /// A corner with non-zero weight that is "no data" makes the target cell "no data".
    fn resample(&self, plane: &[Option<f64>]) -> Vec<Option<f64>> {
        let mut out = Vec::with_capacity(self.lat.len() * self.lon.len());
        for lat in &self.lat {
            for lon in &self.lon {
                out.push(match (lat, lon) {
                    (Some(lat), Some(lon)) => self.interpolate(plane, lat, lon),
                    _ => None,
                });
            }
        }
        out
    }

    fn interpolate(&self, plane: &[Option<f64>], lat: &AxisSample, lon: &AxisSample) -> Option<f64> {
        let mut acc = 0.0;
        for (row, wy) in lat.taps() {
            if wy == 0.0 {
                continue;
            }
            for (col, wx) in lon.taps() {
                let weight = wy * wx;
                if weight == 0.0 {
                    continue;
                }
                let value = plane.get(row * self.source_lon_cells + col).copied().flatten()?;
                acc += value * weight;
            }
        }
        Some(acc)
    }
}

/// Where a target timestamp falls on a source time axis
#[derive(Debug, Clone, Copy, PartialEq)]
enum TimeSample {
    Exact(usize),
    Between {
        lower: usize,
        upper: usize,
        upper_weight: f64,
    },
}

fn sample_time(axis: &[DateTime<Utc>], t: DateTime<Utc>) -> Option<TimeSample> {
    let first = *axis.first()?;
    let last = *axis.last()?;
    if t < first || t > last {
        return None;
    }
    let upper = axis.partition_point(|s| *s <= t);
    let lower = upper - 1;
    if axis[lower] == t {
        return Some(TimeSample::Exact(lower));
    }
    let span = (axis[upper] - axis[lower]).num_milliseconds() as f64;
    let offset = (t - axis[lower]).num_milliseconds() as f64;
    Some(TimeSample::Between {
        lower,
        upper,
        upper_weight: offset / span,
    })
}

/// A single source resampled onto the target, with its isolated timestamp gaps
#[derive(Debug, Clone, PartialEq)]
pub struct ResampledSource {
    pub variable: Variable,
    pub layer: HarmonizedLayer,
    pub gaps: Vec<EngineError>,
}

/// Resamples source grids onto a common target
#[derive(Debug, Clone)]
pub struct GridHarmonizer {
    pollen_species: Vec<Variable>,
}

impl Default for GridHarmonizer {
    fn default() -> Self {
        GridHarmonizer::new(DEFAULT_POLLEN_SPECIES.to_vec())
    }
}

impl GridHarmonizer {
    /// `pollen_species` are the declared components of `total_pollen`
    pub fn new(pollen_species: Vec<Variable>) -> Self {
        let mut seen = BTreeSet::new();
        let pollen_species = pollen_species
            .into_iter()
            .filter(|v| v.is_pollen_species() && seen.insert(*v))
            .collect();
        GridHarmonizer { pollen_species }
    }

    pub fn pollen_species(&self) -> &[Variable] {
        &self.pollen_species
    }

    /// Resample a single source onto the target grid and time axis
    ///
    /// Fails with `GridCoverage` when the extents do not overlap and with the
    /// first `TemporalGap` when no target timestamp is reachable. Individual
    /// unreachable timestamps are returned in `gaps` and left as "no data".
    pub fn resample_source(
        &self,
        source: &GridDataset,
        target: &GridGeometry,
    ) -> Result<ResampledSource, EngineError> {
        let variable = source.variable();
        if !source.extent().intersects(target.extent()) {
            return Err(EngineError::GridCoverage {
                variable,
                source_extent: *source.extent(),
                target_extent: *target.extent(),
            });
        }

        let axis = source.time_axis();
        let samples: Vec<Option<TimeSample>> = target
            .time_axis()
            .iter()
            .map(|t| sample_time(axis, *t))
            .collect();

        let mut gaps = Vec::new();
        let mut gap_timestamps = Vec::new();
        for (t, sample) in target.time_axis().iter().zip(&samples) {
            if sample.is_none() {
                gaps.push(EngineError::TemporalGap {
                    variable,
                    timestamp: *t,
                    covered_from: axis[0],
                    covered_to: axis[axis.len() - 1],
                });
                gap_timestamps.push(*t);
            }
        }
        if gaps.len() == samples.len() {
            return Err(gaps.swap_remove(0));
        }

        // Resample only the source slices some target timestamp needs
        let plan = SpatialPlan::new(source.geometry(), target);
        let mut needed = BTreeSet::new();
        for sample in samples.iter().flatten() {
            match sample {
                TimeSample::Exact(i) => {
                    needed.insert(*i);
                }
                TimeSample::Between { lower, upper, .. } => {
                    needed.insert(*lower);
                    needed.insert(*upper);
                }
            }
        }
        let planes: BTreeMap<usize, Vec<Option<f64>>> = needed
            .into_iter()
            .map(|i| (i, plan.resample(source.slice(i))))
            .collect();

        let plane_len = target.shape().plane_len();
        let mut values = Vec::with_capacity(target.shape().len());
        for sample in &samples {
            match sample {
                None => values.extend(std::iter::repeat(None).take(plane_len)),
                Some(TimeSample::Exact(i)) => values.extend_from_slice(&planes[i]),
                Some(TimeSample::Between {
                    lower,
                    upper,
                    upper_weight,
                }) => {
                    let a = &planes[lower];
                    let b = &planes[upper];
                    values.extend(a.iter().zip(b).map(|(a, b)| match (a, b) {
                        (Some(a), Some(b)) => Some(a * (1.0 - upper_weight) + b * upper_weight),
                        _ => None,
                    }));
                }
            }
        }

        if plan.coarse {
            warn!(
                variable = %variable,
                lat_cells = source.shape().lat_cells,
                lon_cells = source.shape().lon_cells,
                "coarse source grid, using nearest-neighbour resampling"
            );
        }

        Ok(ResampledSource {
            variable,
            layer: HarmonizedLayer {
                values,
                quality: LayerQuality {
                    coarse_source: plan.coarse,
                    partial: false,
                    missing_components: Vec::new(),
                    gap_timestamps,
                },
            },
            gaps,
        })
    }

    /// Harmonize all sources onto `target`
    ///
    /// Failing variables are dropped and recorded in `issues`. When every
    /// source fails, the single failure (one source) or `NoUsableSources`
    /// (several) is returned.
    pub fn harmonize(
        &self,
        sources: &[GridDataset],
        target: &GridGeometry,
    ) -> Result<HarmonizedGridSet, EngineError> {
        let results: Vec<(Variable, Result<ResampledSource, EngineError>)> = sources
            .par_iter()
            .map(|source| (source.variable(), self.resample_source(source, target)))
            .collect();

        let mut layers = BTreeMap::new();
        let mut issues = Vec::new();
        let mut failures = Vec::new();

        for (variable, result) in results {
            match result {
                Ok(resampled) => {
                    if layers.contains_key(&variable) {
                        warn!(variable = %variable, "duplicate source grid ignored");
                        issues.push(EngineError::invalid_grid(format!(
                            "duplicate source for {}; keeping the first",
                            variable
                        )));
                        continue;
                    }
                    for gap in &resampled.gaps {
                        warn!(error = %gap, "timestamp unreachable, filled with no data");
                    }
                    debug!(
                        variable = %variable,
                        coarse = resampled.layer.quality.coarse_source,
                        gaps = resampled.gaps.len(),
                        "harmonized source"
                    );
                    issues.extend(resampled.gaps);
                    layers.insert(variable, resampled.layer);
                }
                Err(e) => {
                    warn!(variable = %variable, error = %e, "source dropped from harmonization");
                    issues.push(e.clone());
                    failures.push(e);
                }
            }
        }

        if layers.is_empty() {
            return Err(if failures.len() == 1 {
                failures.swap_remove(0)
            } else {
                EngineError::NoUsableSources { failures }
            });
        }

        if !layers.contains_key(&Variable::TotalPollen) {
            if let Some(total) = self.aggregate_pollen(&layers, target.shape().len()) {
                if total.quality.partial {
                    warn!(
                        missing = ?total.quality.missing_components,
                        "total pollen aggregated from a partial species set"
                    );
                }
                layers.insert(Variable::TotalPollen, total);
            }
        }

        let fingerprint = layer_fingerprint(&layers);
        Ok(HarmonizedGridSet {
            target: target.clone(),
            layers,
            issues,
            fingerprint,
        })
    }

    /// Sum the declared pollen species into `total_pollen`
    ///
    /// Absent species contribute nothing and mark the result partial. A cell
    /// is "no data" when any available species is "no data" there.
    fn aggregate_pollen(
        &self,
        layers: &BTreeMap<Variable, HarmonizedLayer>,
        len: usize,
    ) -> Option<HarmonizedLayer> {
        let (present, missing): (Vec<Variable>, Vec<Variable>) = self
            .pollen_species
            .iter()
            .copied()
            .partition(|species| layers.contains_key(species));
        if present.is_empty() {
            return None;
        }
        let components: Vec<&HarmonizedLayer> = present.iter().map(|s| &layers[s]).collect();

        let values: Vec<Option<f64>> = (0..len)
            .map(|i| {
                components
                    .iter()
                    .try_fold(0.0, |acc, layer| layer.values[i].map(|v| acc + v))
            })
            .collect();

        let mut gap_timestamps: Vec<DateTime<Utc>> = components
            .iter()
            .flat_map(|layer| layer.quality.gap_timestamps.iter().copied())
            .collect();
        gap_timestamps.sort();
        gap_timestamps.dedup();

        Some(HarmonizedLayer {
            values,
            quality: LayerQuality {
                coarse_source: components.iter().any(|l| l.quality.coarse_source),
                partial: !missing.is_empty(),
                missing_components: missing,
                gap_timestamps,
            },
        })
    }
}

/// Hourly-step target time axis covering `days` days from midnight UTC of `start`
///
/// The last timestamp is the final step before the window closes, so a
/// 4-day window at 1-hour steps has 96 timestamps.
pub fn forecast_time_axis(
    start: NaiveDate,
    days: u32,
    step_hours: u32,
) -> Result<Vec<DateTime<Utc>>, EngineError> {
    if days == 0 {
        return Err(EngineError::invalid_grid("forecast window must span at least one day"));
    }
    if step_hours == 0 || 24 % step_hours != 0 {
        return Err(EngineError::invalid_grid(format!(
            "time step must divide a day evenly (got {} hours)",
            step_hours
        )));
    }
    let origin = start.and_time(NaiveTime::MIN).and_utc();
    let steps = days * 24 / step_hours;
    Ok((0..steps)
        .map(|i| origin + Duration::hours(i as i64 * step_hours as i64))
        .collect())
}
