//! Paddick conformity scoring of a target against a reference isodose.
//!
//! See I. Paddick, "A simple scoring ratio to index the conformity of
//! radiosurgical treatment plans", J Neurosurg 93 (Suppl 3), 2000.

use log::{debug, info};
use rayon::prelude::*;

use crate::config::AnalysisConfig;
use crate::dose_grid::DoseGrid;
use crate::error::{DoseError, Location, Result};
use crate::rasterizer::rasterize;
use crate::structure::{Contour, Structure};

/// A ratio that is undefined when its denominator is zero.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Metric {
    /// Value in percent.
    Percent(f64),
    Undefined,
}

impl Metric {
    fn ratio(numerator: f64, denominator: f64) -> Self {
        if denominator > 0.0 {
            Metric::Percent(numerator / denominator * 100.0)
        } else {
            Metric::Undefined
        }
    }

    pub fn percent(self) -> Option<f64> {
        match self {
            Metric::Percent(value) => Some(value),
            Metric::Undefined => None,
        }
    }

    /// The ratio as a fraction, so a perfect score is 1.0.
    pub fn as_fraction(self) -> Option<f64> {
        self.percent().map(|value| value / 100.0)
    }

    pub fn is_undefined(self) -> bool {
        matches!(self, Metric::Undefined)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConformalityMetrics {
    /// Target volume (cm³).
    pub tv: f64,
    /// Prescription isodose volume: all tissue above the threshold (cm³).
    pub pitv: f64,
    /// Coverage volume: target tissue above the threshold (cm³).
    pub cv: f64,
    /// CV² / (TV × PITV).
    pub conformality_index: Metric,
    /// CV / TV.
    pub underdose_ratio: Metric,
    /// CV / PITV.
    pub overdose_ratio: Metric,
}

/// Absolute lower limit (cGy) of an isodose given as a percentage of the
/// prescription.
pub fn isodose_threshold(prescription_cgy: f64, isodose_percent: f64) -> f64 {
    isodose_percent * prescription_cgy / 100.0
}

#[derive(Clone, Debug, Default)]
pub struct ConformalityEvaluator {
    config: AnalysisConfig,
}

impl ConformalityEvaluator {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    /// Scores `structure` against the isodose surface at `lower_limit_cgy`.
    /// Voxels count when their dose is strictly above the limit.
    pub fn evaluate(
        &self,
        structure: &Structure,
        grid: &DoseGrid,
        lower_limit_cgy: f64,
    ) -> Result<ConformalityMetrics> {
        self.config.validate()?;
        structure.validate_thickness()?;
        if !lower_limit_cgy.is_finite() || lower_limit_cgy < 0.0 {
            return Err(DoseError::DataRange {
                location: Location::Field("lower_limit_cgy"),
                value: lower_limit_cgy,
            });
        }
        let tv = structure.volume(self.config.volume_resolution_mm);

        let planes: Vec<(f64, &[Contour])> = structure.iter_planes().collect();
        let volumes: Vec<(f64, f64)> = planes
            .par_iter()
            .map(|&(z, contours)| plane_volumes(structure, z, contours, grid, lower_limit_cgy))
            .collect();
        let (pitv, cv) = volumes
            .iter()
            .fold((0.0, 0.0), |(pitv, cv), (p, c)| (pitv + p, cv + c));
        let (pitv, cv) = (pitv / 1000.0, cv / 1000.0);

        info!(
            "{}: TV {tv:.3} cm3, PITV {pitv:.3} cm3, CV {cv:.3} cm3 at {lower_limit_cgy} cGy",
            structure.name
        );
        Ok(ConformalityMetrics {
            tv,
            pitv,
            cv,
            conformality_index: Metric::ratio(cv * cv, tv * pitv),
            underdose_ratio: Metric::ratio(cv, tv),
            overdose_ratio: Metric::ratio(cv, pitv),
        })
    }
}

/// PITV and CV contributions of one plane, in mm³.
fn plane_volumes(
    structure: &Structure,
    z: f64,
    contours: &[Contour],
    grid: &DoseGrid,
    lower_limit_cgy: f64,
) -> (f64, f64) {
    let lattice = grid.native_lattice();
    let Some(dose) = grid.dose_plane_cgy(&lattice, z) else {
        debug!("{}: plane z={z} has no dose", structure.name);
        return (0.0, 0.0);
    };
    let mask = rasterize(contours, &lattice);
    let above = |value: &Option<f64>| value.is_some_and(|d| d > lower_limit_cgy);

    let isodose_count = dose.iter().filter(|value| above(value)).count();
    let coverage_count = dose
        .iter()
        .zip(mask.iter())
        .filter(|(value, inside)| **inside && above(value))
        .count();

    let voxel = lattice.cell_area() * structure.thickness;
    (
        isodose_count as f64 * voxel,
        coverage_count as f64 * voxel,
    )
}
