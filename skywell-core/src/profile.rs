//! User health profiles
//!
//! A profile is an explicit, validated configuration record: per-variable
//! weights, optional normalization maxima overrides, an alert threshold and an
//! optional home location. Construction fails eagerly with
//! `EngineError::InvalidProfile`, so every `UserProfile` in circulation is
//! structurally valid.

use crate::error::EngineError;
use crate::variable::Variable;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lowest and highest value a composite score can take
pub const SCORE_FLOOR: f64 = 1.0;
pub const SCORE_CEILING: f64 = 10.0;

/// Geographic point in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

/// Raw profile record as supplied by the profile store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileSpec {
    pub id: String,
    pub weights: BTreeMap<Variable, f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub max_overrides: BTreeMap<Variable, f64>,
    pub alert_threshold: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

/// Validated user profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ProfileSpec", into = "ProfileSpec")]
pub struct UserProfile {
    id: String,
    weights: BTreeMap<Variable, f64>,
    max_overrides: BTreeMap<Variable, f64>,
    alert_threshold: f64,
    location: Option<Location>,
}

impl TryFrom<ProfileSpec> for UserProfile {
    type Error = EngineError;

    fn try_from(spec: ProfileSpec) -> Result<Self, Self::Error> {
        UserProfile::new(spec)
    }
}

impl From<UserProfile> for ProfileSpec {
    fn from(profile: UserProfile) -> Self {
        ProfileSpec {
            id: profile.id,
            weights: profile.weights,
            max_overrides: profile.max_overrides,
            alert_threshold: profile.alert_threshold,
            location: profile.location,
        }
    }
}

impl UserProfile {
    /// Validate a raw profile record
    pub fn new(spec: ProfileSpec) -> Result<Self, EngineError> {
        let id = spec.id.trim().to_string();
        if id.is_empty() {
            return Err(EngineError::invalid_profile("", "profile id is empty"));
        }

        for (variable, weight) in &spec.weights {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(EngineError::invalid_profile(
                    &id,
                    format!("weight for {} must be non-negative (got {})", variable, weight),
                ));
            }
        }
        if !spec.weights.values().any(|w| *w > 0.0) {
            return Err(EngineError::invalid_profile(
                &id,
                "at least one weight must be positive",
            ));
        }

        for (variable, max) in &spec.max_overrides {
            if !max.is_finite() || *max <= 0.0 {
                return Err(EngineError::invalid_profile(
                    &id,
                    format!("maximum override for {} must be positive (got {})", variable, max),
                ));
            }
        }

        if !spec.alert_threshold.is_finite()
            || spec.alert_threshold < SCORE_FLOOR
            || spec.alert_threshold > SCORE_CEILING
        {
            return Err(EngineError::invalid_profile(
                &id,
                format!(
                    "alert_threshold must be within [{}, {}] (got {})",
                    SCORE_FLOOR, SCORE_CEILING, spec.alert_threshold
                ),
            ));
        }

        if let Some(loc) = spec.location {
            if !(-90.0..=90.0).contains(&loc.lat) || !(-180.0..=360.0).contains(&loc.lon) {
                return Err(EngineError::invalid_profile(
                    &id,
                    format!("location ({}, {}) is not a valid coordinate", loc.lat, loc.lon),
                ));
            }
        }

        Ok(UserProfile {
            id,
            weights: spec.weights,
            max_overrides: spec.max_overrides,
            alert_threshold: spec.alert_threshold,
            location: spec.location,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Weight for a variable (0 when the profile does not mention it)
    pub fn weight(&self, variable: Variable) -> f64 {
        self.weights.get(&variable).copied().unwrap_or(0.0)
    }

    pub fn weights(&self) -> &BTreeMap<Variable, f64> {
        &self.weights
    }

    /// Variables with a positive weight, in canonical order
    pub fn weighted_variables(&self) -> impl Iterator<Item = Variable> + '_ {
        self.weights
            .iter()
            .filter(|(_, w)| **w > 0.0)
            .map(|(v, _)| *v)
    }

    pub fn max_override(&self, variable: Variable) -> Option<f64> {
        self.max_overrides.get(&variable).copied()
    }

    pub fn alert_threshold(&self) -> f64 {
        self.alert_threshold
    }

    pub fn location(&self) -> Option<Location> {
        self.location
    }

    /// Identity used for caching: any change to weights, overrides or
    /// threshold yields a different key
    pub fn cache_key(&self) -> ProfileKey {
        ProfileKey {
            id: self.id.clone(),
            weights: self
                .weights
                .iter()
                .map(|(v, w)| (*v, w.to_bits()))
                .collect(),
            max_overrides: self
                .max_overrides
                .iter()
                .map(|(v, m)| (*v, m.to_bits()))
                .collect(),
            alert_threshold: self.alert_threshold.to_bits(),
        }
    }
}

/// Hashable fingerprint of a profile
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProfileKey {
    id: String,
    weights: Vec<(Variable, u64)>,
    max_overrides: Vec<(Variable, u64)>,
    alert_threshold: u64,
}

/// Built-in profiles restricted to UV and pollen factors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfilePreset {
    SkinCancerSurvivor,
    Vitiligo,
    Lupus,
    SeasonalAllergicRhinitis,
    AllergicConjunctivitis,
    /// UV weight 4, total pollen weight 2, alert at 5
    UvPollenDefault,
}

impl ProfilePreset {
    pub const ALL: [ProfilePreset; 6] = [
        ProfilePreset::SkinCancerSurvivor,
        ProfilePreset::Vitiligo,
        ProfilePreset::Lupus,
        ProfilePreset::SeasonalAllergicRhinitis,
        ProfilePreset::AllergicConjunctivitis,
        ProfilePreset::UvPollenDefault,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProfilePreset::SkinCancerSurvivor => "skin_cancer_survivor",
            ProfilePreset::Vitiligo => "vitiligo",
            ProfilePreset::Lupus => "lupus",
            ProfilePreset::SeasonalAllergicRhinitis => "seasonal_allergic_rhinitis",
            ProfilePreset::AllergicConjunctivitis => "allergic_conjunctivitis",
            ProfilePreset::UvPollenDefault => "uv_pollen_default",
        }
    }

    pub fn parse(name: &str) -> Option<ProfilePreset> {
        ProfilePreset::ALL.into_iter().find(|p| p.as_str() == name)
    }

    fn weights(&self) -> Vec<(Variable, f64)> {
        match self {
            ProfilePreset::SkinCancerSurvivor | ProfilePreset::Vitiligo | ProfilePreset::Lupus => {
                vec![(Variable::UvIndex, 1.0)]
            }
            ProfilePreset::SeasonalAllergicRhinitis => vec![
                (Variable::BirchPollen, 0.4),
                (Variable::GrassPollen, 0.4),
            ],
            ProfilePreset::AllergicConjunctivitis => vec![
                (Variable::BirchPollen, 0.15),
                (Variable::GrassPollen, 0.15),
            ],
            ProfilePreset::UvPollenDefault => vec![
                (Variable::UvIndex, 4.0),
                (Variable::TotalPollen, 2.0),
            ],
        }
    }

    /// Instantiate the preset under the given profile id
    pub fn build(&self, id: &str) -> Result<UserProfile, EngineError> {
        UserProfile::new(ProfileSpec {
            id: id.to_string(),
            weights: self.weights().into_iter().collect(),
            max_overrides: BTreeMap::new(),
            alert_threshold: 5.0,
            location: None,
        })
    }
}
