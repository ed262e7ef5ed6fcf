use crate::enums::PatientPosition;
use crate::error::{DoseError, Result};

/// Fraction of a lattice step by which a query may lie outside an axis and
/// still be snapped onto its edge.
pub const INDEX_TOLERANCE: f64 = 1e-6;

/// Sample coordinates along one axis of a grid.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Axis {
    /// Evenly spaced samples. `spacing` may be negative for reversed axes.
    Regular { origin: f64, spacing: f64, len: usize },
    /// Strictly monotone (increasing or decreasing) sample coordinates.
    Irregular(Vec<f64>),
}

impl Axis {
    /// Builds an axis from explicit coordinates, collapsing to a regular axis
    /// when the coordinates are evenly spaced.
    pub fn from_coordinates(coords: &[f64]) -> Result<Self> {
        if coords.iter().any(|c| !c.is_finite()) {
            return Err(DoseError::geometry("axis", "non-finite coordinate"));
        }
        if coords.len() < 2 {
            return Ok(Axis::Irregular(coords.to_vec()));
        }
        let step = coords[1] - coords[0];
        let mut regular = step != 0.0;
        for pair in coords.windows(2) {
            let delta = pair[1] - pair[0];
            if delta == 0.0 || delta.signum() != step.signum() {
                return Err(DoseError::geometry(
                    "axis",
                    format!("coordinates are not strictly monotone near {}", pair[0]),
                ));
            }
            if (delta - step).abs() > step.abs() * INDEX_TOLERANCE {
                regular = false;
            }
        }
        if regular {
            Ok(Axis::Regular {
                origin: coords[0],
                spacing: step,
                len: coords.len(),
            })
        } else {
            Ok(Axis::Irregular(coords.to_vec()))
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Axis::Regular { len, .. } => *len,
            Axis::Irregular(coords) => coords.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn coordinate(&self, index: usize) -> f64 {
        match self {
            Axis::Regular {
                origin, spacing, ..
            } => origin + spacing * index as f64,
            Axis::Irregular(coords) => coords[index],
        }
    }

    pub fn coordinates(&self) -> Vec<f64> {
        (0..self.len()).map(|i| self.coordinate(i)).collect()
    }

    /// Converts a physical coordinate into a fractional index in
    /// `[0, len - 1]`, or `None` when it lies outside the axis.
    pub fn fractional_index(&self, coord: f64) -> Option<f64> {
        if !coord.is_finite() {
            return None;
        }
        match self {
            Axis::Regular {
                origin,
                spacing,
                len,
            } => {
                if *len == 0 || !spacing.is_normal() {
                    return None;
                }
                let last = (*len - 1) as f64;
                let index = (coord - origin) / spacing;
                if index < -INDEX_TOLERANCE || index > last + INDEX_TOLERANCE {
                    return None;
                }
                Some(index.clamp(0.0, last))
            }
            Axis::Irregular(coords) => irregular_index(coords, coord),
        }
    }
}

fn irregular_index(coords: &[f64], coord: f64) -> Option<f64> {
    let n = coords.len();
    match n {
        0 => None,
        1 => ((coord - coords[0]).abs() <= INDEX_TOLERANCE).then_some(0.0),
        _ => {
            // Work on an ascending view of the coordinates.
            let sign = if coords[n - 1] >= coords[0] { 1.0 } else { -1.0 };
            let key = |v: f64| v * sign;
            let target = key(coord);
            let (lo, hi) = (key(coords[0]), key(coords[n - 1]));
            let lo_tol = (key(coords[1]) - lo) * INDEX_TOLERANCE;
            let hi_tol = (hi - key(coords[n - 2])) * INDEX_TOLERANCE;
            if target < lo - lo_tol || target > hi + hi_tol {
                return None;
            }
            let target = target.clamp(lo, hi);
            let upper = coords.partition_point(|&v| key(v) <= target);
            let i0 = upper.saturating_sub(1).min(n - 2);
            let (a, b) = (key(coords[i0]), key(coords[i0 + 1]));
            Some(i0 as f64 + (target - a) / (b - a))
        }
    }
}

/// Axes of a 3D scalar field stored as `[z][y][x]`.
#[derive(Clone, Debug, PartialEq)]
pub struct GridGeometry {
    pub x: Axis,
    pub y: Axis,
    pub z: Axis,
}

impl GridGeometry {
    /// Shape of a field with this geometry, as (depth, height, width).
    pub fn dim(&self) -> (usize, usize, usize) {
        (self.z.len(), self.y.len(), self.x.len())
    }
}

/// In-plane lattice of sampling points. Rows run along `y`, columns along
/// `x`.
#[derive(Clone, Debug, PartialEq)]
pub struct SamplingLattice {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub column_spacing: f64,
    pub row_spacing: f64,
}

impl SamplingLattice {
    pub fn new(x: Vec<f64>, y: Vec<f64>, column_spacing: f64, row_spacing: f64) -> Self {
        Self {
            x,
            y,
            column_spacing,
            row_spacing,
        }
    }

    /// Lattice with nodes at `floor(min) + k * spacing` covering the given
    /// bounds, extended to `ceil(max)`.
    pub fn covering(bounds: Bounds, spacing: f64) -> Self {
        let axis = |min: f64, max: f64| -> Vec<f64> {
            let start = min.floor();
            let count = (1.0 + (max.ceil() - start) / spacing).ceil() as usize;
            (0..count).map(|k| start + k as f64 * spacing).collect()
        };
        Self::new(
            axis(bounds.min_x, bounds.max_x),
            axis(bounds.min_y, bounds.max_y),
            spacing,
            spacing,
        )
    }

    /// Shape of masks over this lattice, as (rows, columns).
    pub fn dim(&self) -> (usize, usize) {
        (self.y.len(), self.x.len())
    }

    pub fn len(&self) -> usize {
        self.x.len() * self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Area represented by one lattice node, in mm².
    pub fn cell_area(&self) -> f64 {
        (self.column_spacing * self.row_spacing).abs()
    }

    /// Lattice point at (row, column).
    #[inline]
    pub fn point(&self, row: usize, column: usize) -> [f64; 2] {
        [self.x[column], self.y[row]]
    }
}

/// Axis-aligned bounding box of a set of in-plane points.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bounds {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl Bounds {
    pub fn of_points<'a>(points: impl IntoIterator<Item = &'a [f64; 2]>) -> Option<Self> {
        points.into_iter().fold(None, |acc, &[x, y]| {
            Some(match acc {
                None => Bounds {
                    min_x: x,
                    max_x: x,
                    min_y: y,
                    max_y: y,
                },
                Some(b) => Bounds {
                    min_x: b.min_x.min(x),
                    max_x: b.max_x.max(x),
                    min_y: b.min_y.min(y),
                    max_y: b.max_y.max(y),
                },
            })
        })
    }

    pub fn union(self, other: Bounds) -> Bounds {
        Bounds {
            min_x: self.min_x.min(other.min_x),
            max_x: self.max_x.max(other.max_x),
            min_y: self.min_y.min(other.min_y),
            max_y: self.max_y.max(other.max_y),
        }
    }
}

/// Geometry of the clinical image series a dose grid is aligned to.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ImageGeometry {
    pub rows: usize,
    pub columns: usize,
    /// (row spacing, column spacing) in mm, as DICOM `PixelSpacing`.
    pub pixel_spacing: (f64, f64),
    /// Patient coordinates of the first voxel of the first slice.
    pub image_position: [f64; 3],
    pub slice_spacing: f64,
    /// DICOM `PatientPosition` code, e.g. "HFS".
    pub patient_position: String,
}

impl ImageGeometry {
    pub fn position(&self) -> Result<PatientPosition> {
        self.patient_position.parse()
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.rows == 0 || self.columns == 0 {
            return Err(DoseError::geometry(
                "image_dimensions",
                format!("{}x{}", self.rows, self.columns),
            ));
        }
        let (row_spacing, column_spacing) = self.pixel_spacing;
        for (field, value) in [
            ("pixel_spacing", row_spacing),
            ("pixel_spacing", column_spacing),
            ("slice_spacing", self.slice_spacing),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(DoseError::geometry(field, value));
            }
        }
        if self.image_position.iter().any(|c| !c.is_finite()) {
            return Err(DoseError::geometry(
                "image_position",
                format!("{:?}", self.image_position),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn regular_axis_index_and_bounds() {
        let axis = Axis::Regular {
            origin: -5.0,
            spacing: 2.5,
            len: 5,
        };
        assert_relative_eq!(axis.fractional_index(-5.0).unwrap(), 0.0);
        assert_relative_eq!(axis.fractional_index(1.25).unwrap(), 2.5);
        assert_relative_eq!(axis.fractional_index(5.0).unwrap(), 4.0);
        assert!(axis.fractional_index(5.1).is_none());
        assert!(axis.fractional_index(-5.1).is_none());
    }

    #[test]
    fn reversed_regular_axis() {
        let axis = Axis::Regular {
            origin: 10.0,
            spacing: -2.0,
            len: 6,
        };
        assert_relative_eq!(axis.fractional_index(7.0).unwrap(), 1.5);
        assert!(axis.fractional_index(11.0).is_none());
    }

    #[test]
    fn irregular_axis_interpolates_between_samples() {
        let axis = Axis::from_coordinates(&[0.0, -2.0, -6.0, -7.0]).unwrap();
        assert!(matches!(axis, Axis::Irregular(_)));
        assert_relative_eq!(axis.fractional_index(-1.0).unwrap(), 0.5);
        assert_relative_eq!(axis.fractional_index(-5.0).unwrap(), 1.75);
        assert_relative_eq!(axis.fractional_index(-7.0).unwrap(), 3.0);
        assert!(axis.fractional_index(0.5).is_none());
    }

    #[test]
    fn evenly_spaced_coordinates_collapse_to_regular() {
        let axis = Axis::from_coordinates(&[1.0, 3.0, 5.0]).unwrap();
        assert_eq!(
            axis,
            Axis::Regular {
                origin: 1.0,
                spacing: 2.0,
                len: 3
            }
        );
    }

    #[test]
    fn non_monotone_coordinates_are_rejected() {
        assert!(Axis::from_coordinates(&[0.0, 1.0, 1.0]).is_err());
        assert!(Axis::from_coordinates(&[0.0, 1.0, 0.5]).is_err());
    }

    #[test]
    fn covering_lattice_spans_integer_bounds() {
        let bounds = Bounds {
            min_x: 0.4,
            max_x: 2.6,
            min_y: -1.5,
            max_y: 0.0,
        };
        let lattice = SamplingLattice::covering(bounds, 1.0);
        assert_eq!(lattice.x, vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(lattice.y, vec![-2.0, -1.0, 0.0]);
        assert_eq!(lattice.dim(), (3, 4));
    }
}
