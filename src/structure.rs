use std::collections::BTreeMap;

use log::debug;
use ordered_float::OrderedFloat;

use crate::error::{DoseError, Location, Result};
use crate::geometry::{Bounds, SamplingLattice};
use crate::rasterizer::{contour_area, rasterize};

/// Closed polygon on a structure plane, in patient coordinates (mm). The
/// last point connects back to the first.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Contour {
    pub points: Vec<[f64; 2]>,
}

impl Contour {
    pub fn new(points: Vec<[f64; 2]>) -> Self {
        Self { points }
    }

    /// Drops the z coordinate of points given as (x, y, z).
    pub fn from_xyz(points: &[[f64; 3]]) -> Self {
        Self::new(points.iter().map(|&[x, y, _]| [x, y]).collect())
    }

    pub fn area(&self) -> f64 {
        contour_area(&self.points)
    }

    pub fn bounds(&self) -> Option<Bounds> {
        Bounds::of_points(&self.points)
    }
}

/// Contours of a structure keyed by plane z (mm), in ascending order.
pub type Planes = BTreeMap<OrderedFloat<f64>, Vec<Contour>>;

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Structure {
    pub id: u32,
    pub name: String,
    pub planes: Planes,
    /// Thickness of every plane, in mm.
    pub thickness: f64,
}

impl Structure {
    pub fn new(id: u32, name: impl Into<String>, thickness: f64) -> Self {
        Self {
            id,
            name: name.into(),
            planes: Planes::new(),
            thickness,
        }
    }

    /// Builds a structure whose plane thickness is the smallest spacing
    /// between consecutive planes.
    pub fn from_planes(id: u32, name: impl Into<String>, planes: Planes) -> Result<Self> {
        let thickness = planes
            .keys()
            .zip(planes.keys().skip(1))
            .map(|(a, b)| b.0 - a.0)
            .fold(f64::INFINITY, f64::min);
        if !thickness.is_finite() {
            return Err(DoseError::DegenerateInput(
                "plane thickness cannot be inferred from fewer than two planes".into(),
            ));
        }
        Ok(Self {
            id,
            name: name.into(),
            planes,
            thickness,
        })
    }

    pub fn with_plane(mut self, z: f64, contours: Vec<Contour>) -> Self {
        self.planes.entry(OrderedFloat(z)).or_default().extend(contours);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.planes.values().all(|contours| contours.is_empty())
    }

    /// Planes as (z, contours), in ascending z.
    pub fn iter_planes(&self) -> impl Iterator<Item = (f64, &[Contour])> {
        self.planes
            .iter()
            .map(|(z, contours)| (z.0, contours.as_slice()))
    }

    /// Bounding box of the contours of one plane.
    pub fn plane_bounds(contours: &[Contour]) -> Option<Bounds> {
        contours
            .iter()
            .filter_map(Contour::bounds)
            .reduce(Bounds::union)
    }

    /// Plane thickness must be finite and positive for volumes to be.
    pub(crate) fn validate_thickness(&self) -> Result<()> {
        if !self.thickness.is_finite() || self.thickness <= 0.0 {
            return Err(DoseError::DataRange {
                location: Location::Field("thickness"),
                value: self.thickness,
            });
        }
        Ok(())
    }

    /// Total volume in cm³: each plane is rasterized over its contours'
    /// bounding box at `resolution` mm and the covered area is multiplied by
    /// the plane thickness.
    pub fn volume(&self, resolution: f64) -> f64 {
        let mut volume = 0.0;
        for (z, contours) in self.iter_planes() {
            let Some(bounds) = Self::plane_bounds(contours) else {
                continue;
            };
            let lattice = SamplingLattice::covering(bounds, resolution);
            let mask = rasterize(contours, &lattice);
            let count = mask.iter().filter(|&&inside| inside).count();
            debug!("{}: plane z={z} covers {count} lattice points", self.name);
            volume += count as f64 * lattice.cell_area() * self.thickness;
        }
        volume / 1000.0
    }
}
