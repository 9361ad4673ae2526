//! Forecast variable catalogue
//!
//! Declaration order is the canonical order for every map, report and cache
//! key in this crate.

use serde::{Deserialize, Serialize};

/// Forecast variable carried by a grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variable {
    UvIndex,
    AlderPollen,
    BirchPollen,
    GrassPollen,
    MugwortPollen,
    OlivePollen,
    RagweedPollen,
    /// Sum of the declared pollen species (derived during harmonization)
    TotalPollen,
}

/// Species summed into `total_pollen` when no configuration overrides them
pub const DEFAULT_POLLEN_SPECIES: &[Variable] = &[
    Variable::BirchPollen,
    Variable::GrassPollen,
    Variable::OlivePollen,
    Variable::RagweedPollen,
];

impl Variable {
    pub const ALL: [Variable; 8] = [
        Variable::UvIndex,
        Variable::AlderPollen,
        Variable::BirchPollen,
        Variable::GrassPollen,
        Variable::MugwortPollen,
        Variable::OlivePollen,
        Variable::RagweedPollen,
        Variable::TotalPollen,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Variable::UvIndex => "uv_index",
            Variable::AlderPollen => "alder_pollen",
            Variable::BirchPollen => "birch_pollen",
            Variable::GrassPollen => "grass_pollen",
            Variable::MugwortPollen => "mugwort_pollen",
            Variable::OlivePollen => "olive_pollen",
            Variable::RagweedPollen => "ragweed_pollen",
            Variable::TotalPollen => "total_pollen",
        }
    }

    pub fn parse(name: &str) -> Option<Variable> {
        Variable::ALL.into_iter().find(|v| v.as_str() == name)
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Variable::UvIndex => "index",
            _ => "grains m⁻³",
        }
    }

    /// Built-in normalization maximum
    ///
    /// UV index tops out at 11 ("extreme"); pollen counts are normalized against 100.
    pub fn default_max(&self) -> f64 {
        match self {
            Variable::UvIndex => 11.0,
            _ => 100.0,
        }
    }

    /// True for individual species (not the derived total)
    pub fn is_pollen_species(&self) -> bool {
        !matches!(self, Variable::UvIndex | Variable::TotalPollen)
    }

    pub fn is_pollen(&self) -> bool {
        !matches!(self, Variable::UvIndex)
    }
}

impl std::fmt::Display for Variable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
