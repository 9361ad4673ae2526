//! Personalized composite risk scoring
//!
//! Global invariants enforced:
//! - Every score lies in [1, 10] or is "no data"
//! - Scoring is a pure function of (grid, profile)
//! - A cell where every weighted variable is "no data" scores "no data"
//!
//! Composite formula, per (time, lat, lon) cell over the weighted variables
//! that have data there:
//!
//! `score = clamp(Σ wᵢ·(xᵢ / maxᵢ) / Σ wᵢ × 10, 1, 10)`
//!
//! where `maxᵢ = max(profile override, default maximum)`. Scores are kept
//! exact; `rated_score` gives the one-decimal rating used for thresholds,
//! severity tiers and display.

use crate::grid::{CellIndex, GridGeometry};
use crate::harmonize::HarmonizedGridSet;
use crate::profile::{UserProfile, SCORE_CEILING, SCORE_FLOOR};
use crate::variable::Variable;
use serde::Serialize;
use std::collections::BTreeMap;

/// Clamp a raw composite into the score range
pub fn finalize_score(raw: f64) -> f64 {
    raw.clamp(SCORE_FLOOR, SCORE_CEILING)
}

/// One-decimal rating of a score
pub fn rated_score(score: f64) -> f64 {
    ((score * 10.0).round() / 10.0).clamp(SCORE_FLOOR, SCORE_CEILING)
}

/// One scored cell
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskScore {
    pub cell: CellIndex,
    /// Composite score, `None` when no weighted variable had data
    pub value: Option<f64>,
    /// Raw harmonized values of the weighted variables plus UV and total pollen
    pub components: BTreeMap<Variable, Option<f64>>,
    /// Variable with the largest weighted normalized contribution
    pub dominant_factor: Option<Variable>,
}

impl RiskScore {
    pub fn component(&self, variable: Variable) -> Option<f64> {
        self.components.get(&variable).copied().flatten()
    }
}

/// Scores for every cell of a harmonized grid under one profile
#[derive(Debug, Clone, PartialEq)]
pub struct RiskGrid {
    profile_id: String,
    geometry: GridGeometry,
    values: Vec<Option<f64>>,
    dominant: Vec<Option<Variable>>,
    components: BTreeMap<Variable, Vec<Option<f64>>>,
    maxima: BTreeMap<Variable, f64>,
}

impl RiskGrid {
    pub fn profile_id(&self) -> &str {
        &self.profile_id
    }

    pub fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Composite scores in (time, lat, lon) order
    pub fn values(&self) -> &[Option<f64>] {
        &self.values
    }

    /// Normalization maximum applied to each weighted variable
    pub fn maxima(&self) -> &BTreeMap<Variable, f64> {
        &self.maxima
    }

    pub fn get(&self, cell: CellIndex) -> Option<RiskScore> {
        let shape = self.geometry.shape();
        if cell.time >= shape.times || cell.lat >= shape.lat_cells || cell.lon >= shape.lon_cells {
            return None;
        }
        Some(self.score_at(shape.offset(cell)))
    }

    fn score_at(&self, offset: usize) -> RiskScore {
        RiskScore {
            cell: self.geometry.shape().cell_at(offset),
            value: self.values[offset],
            components: self
                .components
                .iter()
                .map(|(variable, values)| (*variable, values[offset]))
                .collect(),
            dominant_factor: self.dominant[offset],
        }
    }

    /// Every cell in (time, lat, lon) order
    pub fn iter(&self) -> impl Iterator<Item = RiskScore> + '_ {
        (0..self.values.len()).map(move |offset| self.score_at(offset))
    }

    /// Cells of the grid column containing (lat, lon), one per timestamp
    pub fn nearest(&self, lat: f64, lon: f64) -> Option<Vec<RiskScore>> {
        let (lat_index, lon_index) = self.geometry.locate(lat, lon)?;
        let times = self.geometry.shape().times;
        Some(
            (0..times)
                .filter_map(|time| {
                    self.get(CellIndex {
                        time,
                        lat: lat_index,
                        lon: lon_index,
                    })
                })
                .collect(),
        )
    }
}

/// Converts harmonized grids into per-profile composite scores
#[derive(Debug, Clone)]
pub struct RiskScorer {
    default_maxima: BTreeMap<Variable, f64>,
}

impl Default for RiskScorer {
    fn default() -> Self {
        RiskScorer {
            default_maxima: Variable::ALL
                .into_iter()
                .map(|v| (v, v.default_max()))
                .collect(),
        }
    }
}

impl RiskScorer {
    /// Scorer whose built-in maxima are replaced by `overrides` where given
    pub fn with_maxima(overrides: &BTreeMap<Variable, f64>) -> Self {
        let mut scorer = RiskScorer::default();
        for (variable, max) in overrides {
            scorer.default_maxima.insert(*variable, *max);
        }
        scorer
    }

    pub fn default_max(&self, variable: Variable) -> f64 {
        self.default_maxima
            .get(&variable)
            .copied()
            .unwrap_or_else(|| variable.default_max())
    }

    /// `max(profile override, default maximum)`
    pub fn normalization_max(&self, profile: &UserProfile, variable: Variable) -> f64 {
        let default = self.default_max(variable);
        profile
            .max_override(variable)
            .map_or(default, |o| o.max(default))
    }

    /// Score every cell of `grid` for `profile`
    ///
    /// Weighted variables absent from the grid are left out of the composite;
    /// per cell, variables with "no data" are left out of both numerator and
    /// denominator.
    pub fn score(&self, grid: &HarmonizedGridSet, profile: &UserProfile) -> RiskGrid {
        let factors: Vec<(Variable, f64, f64, &[Option<f64>])> = profile
            .weighted_variables()
            .filter_map(|variable| {
                grid.layer(variable).map(|layer| {
                    (
                        variable,
                        profile.weight(variable),
                        self.normalization_max(profile, variable),
                        layer.values(),
                    )
                })
            })
            .collect();

        let len = grid.shape().len();
        let mut values = Vec::with_capacity(len);
        let mut dominant = Vec::with_capacity(len);
        for offset in 0..len {
            let mut numerator = 0.0;
            let mut denominator = 0.0;
            let mut top: Option<(Variable, f64)> = None;
            for (variable, weight, max, layer) in &factors {
                let Some(raw) = layer[offset] else {
                    continue;
                };
                let contribution = (raw / max) * weight;
                numerator += contribution;
                denominator += weight;
                if top.map_or(true, |(_, best)| contribution > best) {
                    top = Some((*variable, contribution));
                }
            }
            if denominator > 0.0 {
                values.push(Some(finalize_score(numerator / denominator * 10.0)));
                dominant.push(top.map(|(v, _)| v));
            } else {
                values.push(None);
                dominant.push(None);
            }
        }

        let mut reported: Vec<Variable> = factors.iter().map(|f| f.0).collect();
        for always in [Variable::UvIndex, Variable::TotalPollen] {
            if grid.contains(always) && !reported.contains(&always) {
                reported.push(always);
            }
        }
        let components = reported
            .into_iter()
            .filter_map(|v| grid.layer(v).map(|layer| (v, layer.values().to_vec())))
            .collect();
        let maxima = factors.iter().map(|f| (f.0, f.2)).collect();

        RiskGrid {
            profile_id: profile.id().to_string(),
            geometry: grid.target().clone(),
            values,
            dominant,
            components,
            maxima,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{Extent, GridDataset};
    use crate::harmonize::GridHarmonizer;
    use crate::profile::ProfileSpec;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, hour, 0, 0).unwrap()
    }

    fn extent() -> Extent {
        Extent::new(2.0, 0.0, 2.0, 0.0).unwrap()
    }

    fn layer(variable: Variable, values: [Option<f64>; 4]) -> GridDataset {
        GridDataset::new(variable, extent(), 1.0, vec![at(0)], values.to_vec()).unwrap()
    }

    fn harmonized(sources: Vec<GridDataset>) -> HarmonizedGridSet {
        let target = sources[0].geometry().clone();
        GridHarmonizer::default().harmonize(&sources, &target).unwrap()
    }

    fn profile(weights: &[(Variable, f64)]) -> UserProfile {
        UserProfile::new(ProfileSpec {
            id: "p".to_string(),
            weights: weights.iter().copied().collect(),
            max_overrides: BTreeMap::new(),
            alert_threshold: 5.0,
            location: None,
        })
        .unwrap()
    }

    #[test]
    fn test_finalize_and_rated_score() {
        assert_eq!(finalize_score(0.0), 1.0);
        assert_eq!(finalize_score(4.9697), 4.9697);
        assert_eq!(finalize_score(12.0), 10.0);
        assert_eq!(rated_score(4.9697), 5.0);
        assert_eq!(rated_score(7.04), 7.0);
        assert_eq!(rated_score(10.0), 10.0);
    }

    #[test]
    fn test_composite_formula() {
        let grid = harmonized(vec![
            layer(Variable::UvIndex, [Some(6.0), Some(11.0), Some(0.0), None]),
            layer(Variable::TotalPollen, [Some(40.0), Some(100.0), Some(0.0), Some(50.0)]),
        ]);
        let p = profile(&[(Variable::UvIndex, 4.0), (Variable::TotalPollen, 2.0)]);
        let scores = RiskScorer::default().score(&grid, &p);
        let exact = ((6.0 / 11.0) * 4.0 + (40.0 / 100.0) * 2.0) / 6.0 * 10.0;
        assert_eq!(scores.values(), &[Some(exact), Some(10.0), Some(1.0), Some(5.0)]);
        assert_eq!(rated_score(exact), 5.0);
    }

    #[test]
    fn test_single_factor_score_is_not_quantized() {
        let grid = harmonized(vec![layer(Variable::UvIndex, [Some(6.0); 4])]);
        let scores = RiskScorer::default().score(&grid, &profile(&[(Variable::UvIndex, 1.0)]));
        assert_eq!(scores.values()[0], Some(6.0 / 11.0 * 10.0));
        assert_eq!(rated_score(6.0 / 11.0 * 10.0), 5.5);
    }

    #[test]
    fn test_all_no_data_cell_is_no_data() {
        let grid = harmonized(vec![
            layer(Variable::UvIndex, [None, Some(3.0), None, None]),
            layer(Variable::TotalPollen, [None, None, Some(20.0), None]),
        ]);
        let p = profile(&[(Variable::UvIndex, 1.0), (Variable::TotalPollen, 1.0)]);
        let scores = RiskScorer::default().score(&grid, &p);
        assert_eq!(scores.values()[0], None);
        assert_eq!(scores.values()[3], None);
        assert!(scores.values()[1].is_some());
        let cell = scores.get(CellIndex { time: 0, lat: 0, lon: 0 }).unwrap();
        assert_eq!(cell.dominant_factor, None);
    }

    #[test]
    fn test_override_uses_larger_maximum() {
        let grid = harmonized(vec![layer(
            Variable::UvIndex,
            [Some(11.0), Some(11.0), Some(11.0), Some(11.0)],
        )]);
        let mut spec = ProfileSpec {
            id: "p".to_string(),
            weights: [(Variable::UvIndex, 1.0)].into_iter().collect(),
            max_overrides: BTreeMap::new(),
            alert_threshold: 5.0,
            location: None,
        };
        spec.max_overrides.insert(Variable::UvIndex, 22.0);
        let larger = UserProfile::new(spec.clone()).unwrap();
        spec.max_overrides.insert(Variable::UvIndex, 5.0);
        let smaller = UserProfile::new(spec).unwrap();

        let scorer = RiskScorer::default();
        assert_eq!(scorer.normalization_max(&larger, Variable::UvIndex), 22.0);
        assert_eq!(scorer.normalization_max(&smaller, Variable::UvIndex), 11.0);
        assert_eq!(scorer.score(&grid, &larger).values()[0], Some(5.0));
        assert_eq!(scorer.score(&grid, &smaller).values()[0], Some(10.0));
    }

    #[test]
    fn test_configured_default_maxima() {
        let scorer = RiskScorer::with_maxima(&[(Variable::GrassPollen, 50.0)].into_iter().collect());
        assert_eq!(scorer.default_max(Variable::GrassPollen), 50.0);
        assert_eq!(scorer.default_max(Variable::UvIndex), 11.0);
    }

    #[test]
    fn test_dominant_factor_and_components() {
        let grid = harmonized(vec![
            layer(Variable::UvIndex, [Some(2.0), Some(10.0), Some(2.0), Some(2.0)]),
            layer(Variable::GrassPollen, [Some(90.0), Some(10.0), Some(5.0), Some(5.0)]),
        ]);
        let p = profile(&[(Variable::UvIndex, 1.0), (Variable::GrassPollen, 1.0)]);
        let scores = RiskScorer::default().score(&grid, &p);
        let first = scores.get(CellIndex { time: 0, lat: 0, lon: 0 }).unwrap();
        assert_eq!(first.dominant_factor, Some(Variable::GrassPollen));
        assert_eq!(first.component(Variable::UvIndex), Some(2.0));
        assert_eq!(first.component(Variable::TotalPollen), Some(90.0));
        let second = scores.get(CellIndex { time: 0, lat: 0, lon: 1 }).unwrap();
        assert_eq!(second.dominant_factor, Some(Variable::UvIndex));
    }

    #[test]
    fn test_unweighted_variables_do_not_contribute() {
        let grid = harmonized(vec![
            layer(Variable::UvIndex, [Some(5.5); 4]),
            layer(Variable::GrassPollen, [Some(100.0); 4]),
        ]);
        let p = profile(&[(Variable::UvIndex, 1.0), (Variable::GrassPollen, 0.0)]);
        let scores = RiskScorer::default().score(&grid, &p);
        assert!(scores.values().iter().all(|v| *v == Some(5.0)));
        assert!(!scores.maxima().contains_key(&Variable::GrassPollen));
    }

    #[test]
    fn test_nearest_column() {
        let grid = harmonized(vec![layer(
            Variable::UvIndex,
            [Some(1.1), Some(2.2), Some(3.3), Some(4.4)],
        )]);
        let p = profile(&[(Variable::UvIndex, 1.0)]);
        let scores = RiskScorer::default().score(&grid, &p);
        let column = scores.nearest(1.5, 0.5).unwrap();
        assert_eq!(column.len(), 1);
        assert_eq!(column[0].cell, CellIndex { time: 0, lat: 1, lon: 0 });
        assert_eq!(column[0].component(Variable::UvIndex), Some(3.3));
        assert!(scores.nearest(45.0, 0.5).is_none());
    }
}
