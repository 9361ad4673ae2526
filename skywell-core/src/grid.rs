//! Grid geometry and the per-variable forecast field
//!
//! Grids are cell-centred: an extent of `span` degrees at `resolution` degrees
//! per cell has `round(span / resolution)` cells along that axis, and cell `i`
//! is centred at `south + (i + 0.5) * resolution` (likewise `west` for
//! longitude). Values are stored row-major in (time, lat, lon) order with
//! latitude index 0 at the southern edge.

use crate::error::EngineError;
use crate::variable::Variable;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tolerance for geographic comparisons, in degrees
pub(crate) const GEO_EPSILON: f64 = 1e-9;

/// Geographic bounding box in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Extent {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl Extent {
    pub fn new(north: f64, south: f64, east: f64, west: f64) -> Result<Self, EngineError> {
        let extent = Extent {
            north,
            south,
            east,
            west,
        };
        extent.validate()?;
        Ok(extent)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let corners = [self.north, self.south, self.east, self.west];
        if corners.iter().any(|c| !c.is_finite()) {
            return Err(EngineError::invalid_grid(format!(
                "extent {} has non-finite bounds",
                self
            )));
        }
        if self.north <= self.south {
            return Err(EngineError::invalid_grid(format!(
                "extent north ({}) must be greater than south ({})",
                self.north, self.south
            )));
        }
        if self.east <= self.west {
            return Err(EngineError::invalid_grid(format!(
                "extent east ({}) must be greater than west ({})",
                self.east, self.west
            )));
        }
        Ok(())
    }

    pub fn lat_span(&self) -> f64 {
        self.north - self.south
    }

    pub fn lon_span(&self) -> f64 {
        self.east - self.west
    }

    /// True when the two boxes share a region of positive area
    ///
    /// Boxes that only touch along an edge do not intersect.
    pub fn intersects(&self, other: &Extent) -> bool {
        self.south < other.north
            && other.south < self.north
            && self.west < other.east
            && other.west < self.east
    }

    pub fn contains_point(&self, lat: f64, lon: f64) -> bool {
        lat >= self.south - GEO_EPSILON
            && lat <= self.north + GEO_EPSILON
            && lon >= self.west - GEO_EPSILON
            && lon <= self.east + GEO_EPSILON
    }
}

impl std::fmt::Display for Extent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[N {:.4}, S {:.4}, E {:.4}, W {:.4}]",
            self.north, self.south, self.east, self.west
        )
    }
}

/// Number of cells along one axis
pub(crate) fn cells_along(span: f64, resolution: f64) -> Result<usize, EngineError> {
    if !resolution.is_finite() || resolution <= 0.0 {
        return Err(EngineError::invalid_grid(format!(
            "resolution must be a positive number of degrees (got {})",
            resolution
        )));
    }
    let cells = (span / resolution).round();
    if cells < 1.0 {
        return Err(EngineError::invalid_grid(format!(
            "extent span {} is narrower than one {}° cell",
            span, resolution
        )));
    }
    Ok(cells as usize)
}

/// Position of one cell in a (time, lat, lon) array
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellIndex {
    pub time: usize,
    pub lat: usize,
    pub lon: usize,
}

/// Dimensions of a (time, lat, lon) array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridShape {
    pub times: usize,
    pub lat_cells: usize,
    pub lon_cells: usize,
}

impl GridShape {
    pub fn plane_len(&self) -> usize {
        self.lat_cells * self.lon_cells
    }

    pub fn len(&self) -> usize {
        self.times * self.plane_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn offset(&self, cell: CellIndex) -> usize {
        cell.time * self.plane_len() + cell.lat * self.lon_cells + cell.lon
    }

    pub fn cell_at(&self, offset: usize) -> CellIndex {
        let plane = self.plane_len();
        let within = offset % plane;
        CellIndex {
            time: offset / plane,
            lat: within / self.lon_cells,
            lon: within % self.lon_cells,
        }
    }
}

fn validate_time_axis(time_axis: &[DateTime<Utc>]) -> Result<(), EngineError> {
    if time_axis.is_empty() {
        return Err(EngineError::invalid_grid("time axis is empty"));
    }
    if let Some(pair) = time_axis.windows(2).find(|w| w[0] >= w[1]) {
        return Err(EngineError::invalid_grid(format!(
            "time axis must be strictly increasing ({} is followed by {})",
            pair[0], pair[1]
        )));
    }
    Ok(())
}

/// Regular lat/lon grid with a time axis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GeometrySpec")]
pub struct GridGeometry {
    extent: Extent,
    resolution: f64,
    time_axis: Vec<DateTime<Utc>>,
    #[serde(skip_serializing)]
    shape: GridShape,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct GeometrySpec {
    extent: Extent,
    resolution: f64,
    time_axis: Vec<DateTime<Utc>>,
}

impl TryFrom<GeometrySpec> for GridGeometry {
    type Error = EngineError;

    fn try_from(spec: GeometrySpec) -> Result<Self, Self::Error> {
        GridGeometry::new(spec.extent, spec.resolution, spec.time_axis)
    }
}

impl GridGeometry {
    pub fn new(
        extent: Extent,
        resolution: f64,
        time_axis: Vec<DateTime<Utc>>,
    ) -> Result<Self, EngineError> {
        extent.validate()?;
        validate_time_axis(&time_axis)?;
        let lat_cells = cells_along(extent.lat_span(), resolution)?;
        let lon_cells = cells_along(extent.lon_span(), resolution)?;
        let shape = GridShape {
            times: time_axis.len(),
            lat_cells,
            lon_cells,
        };
        Ok(GridGeometry {
            extent,
            resolution,
            time_axis,
            shape,
        })
    }

    pub fn extent(&self) -> &Extent {
        &self.extent
    }

    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    pub fn time_axis(&self) -> &[DateTime<Utc>] {
        &self.time_axis
    }

    pub fn shape(&self) -> GridShape {
        self.shape
    }

    pub fn lat_center(&self, lat_index: usize) -> f64 {
        self.extent.south + (lat_index as f64 + 0.5) * self.resolution
    }

    pub fn lon_center(&self, lon_index: usize) -> f64 {
        self.extent.west + (lon_index as f64 + 0.5) * self.resolution
    }

    /// Cell containing the given point, or `None` outside the extent
    pub fn locate(&self, lat: f64, lon: f64) -> Option<(usize, usize)> {
        if !self.extent.contains_point(lat, lon) {
            return None;
        }
        let lat_index = ((lat - self.extent.south) / self.resolution).floor().max(0.0) as usize;
        let lon_index = ((lon - self.extent.west) / self.resolution).floor().max(0.0) as usize;
        Some((
            lat_index.min(self.shape.lat_cells - 1),
            lon_index.min(self.shape.lon_cells - 1),
        ))
    }
}

/// One variable's forecast field at its native resolution
///
/// `None` marks "no data". Non-finite inputs (the NaN fill value used by
/// NetCDF/GRIB decoders) are converted to `None` on construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "DatasetSpec")]
pub struct GridDataset {
    variable: Variable,
    #[serde(flatten)]
    geometry: GridGeometry,
    values: Vec<Option<f64>>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct DatasetSpec {
    variable: Variable,
    extent: Extent,
    resolution: f64,
    time_axis: Vec<DateTime<Utc>>,
    values: Vec<Option<f64>>,
}

impl TryFrom<DatasetSpec> for GridDataset {
    type Error = EngineError;

    fn try_from(spec: DatasetSpec) -> Result<Self, Self::Error> {
        GridDataset::new(
            spec.variable,
            spec.extent,
            spec.resolution,
            spec.time_axis,
            spec.values,
        )
    }
}

impl GridDataset {
    pub fn new(
        variable: Variable,
        extent: Extent,
        resolution: f64,
        time_axis: Vec<DateTime<Utc>>,
        values: Vec<Option<f64>>,
    ) -> Result<Self, EngineError> {
        let geometry = GridGeometry::new(extent, resolution, time_axis)?;
        let expected = geometry.shape().len();
        if values.len() != expected {
            return Err(EngineError::ShapeMismatch {
                variable,
                expected,
                actual: values.len(),
            });
        }
        let values = values
            .into_iter()
            .map(|v| v.filter(|x| x.is_finite()))
            .collect();
        Ok(GridDataset {
            variable,
            geometry,
            values,
        })
    }

    /// Build a dataset by evaluating `f` for every cell in (time, lat, lon) order
    pub fn from_fn(
        variable: Variable,
        extent: Extent,
        resolution: f64,
        time_axis: Vec<DateTime<Utc>>,
        f: impl Fn(CellIndex) -> Option<f64>,
    ) -> Result<Self, EngineError> {
        let geometry = GridGeometry::new(extent, resolution, time_axis)?;
        let shape = geometry.shape();
        let values = (0..shape.len()).map(|i| f(shape.cell_at(i))).collect();
        GridDataset::new(
            variable,
            extent,
            resolution,
            geometry.time_axis().to_vec(),
            values,
        )
    }

    pub fn variable(&self) -> Variable {
        self.variable
    }

    pub fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    pub fn extent(&self) -> &Extent {
        self.geometry.extent()
    }

    pub fn resolution(&self) -> f64 {
        self.geometry.resolution()
    }

    pub fn time_axis(&self) -> &[DateTime<Utc>] {
        self.geometry.time_axis()
    }

    pub fn shape(&self) -> GridShape {
        self.geometry.shape()
    }

    pub fn values(&self) -> &[Option<f64>] {
        &self.values
    }

    pub fn value(&self, cell: CellIndex) -> Option<f64> {
        self.values
            .get(self.shape().offset(cell))
            .copied()
            .flatten()
    }

    /// The (lat, lon) plane at one time index
    pub fn slice(&self, time: usize) -> &[Option<f64>] {
        let plane = self.shape().plane_len();
        &self.values[time * plane..(time + 1) * plane]
    }
}
