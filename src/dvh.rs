use log::{debug, info};
use rayon::prelude::*;

use crate::config::AnalysisConfig;
use crate::dose_grid::DoseGrid;
use crate::enums::DvhSampling;
use crate::error::{DoseError, Location, Result};
use crate::geometry::SamplingLattice;
use crate::rasterizer::rasterize;
use crate::structure::{Contour, Structure};

/// Summary of the doses received by a structure, in cGy.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DoseStatistics {
    pub min: f64,
    pub mean: f64,
    pub max: f64,
}

/// Cumulative dose-volume histogram over 1 cGy bins. Entry `i` is the
/// volume (cm³) receiving at least `i` cGy.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Dvh {
    cumulative: Vec<f64>,
    total_volume: f64,
    statistics: DoseStatistics,
}

impl Dvh {
    /// Histogram of a structure that received no dose samples.
    pub fn empty(total_volume: f64) -> Self {
        Self {
            cumulative: vec![0.0],
            total_volume,
            statistics: DoseStatistics::default(),
        }
    }

    /// Wraps an existing cumulative histogram, e.g. one stored with a plan.
    /// Volumes must be finite, non-negative and non-increasing.
    pub fn from_cumulative(cumulative: Vec<f64>, total_volume: f64) -> Result<Self> {
        if cumulative.is_empty() {
            return Err(DoseError::DegenerateInput("DVH has no bins".into()));
        }
        if !total_volume.is_finite() || total_volume < 0.0 {
            return Err(DoseError::DataRange {
                location: Location::Field("total_volume"),
                value: total_volume,
            });
        }
        let mut previous = f64::INFINITY;
        for (bin, &volume) in cumulative.iter().enumerate() {
            if !volume.is_finite() || volume < 0.0 || volume > previous {
                return Err(DoseError::DataRange {
                    location: Location::TableEntry(bin),
                    value: volume,
                });
            }
            previous = volume;
        }
        let statistics = histogram_statistics(&cumulative);
        Ok(Self {
            cumulative,
            total_volume,
            statistics,
        })
    }

    /// (dose bin in cGy, cumulative volume in cm³), in ascending dose.
    pub fn bins(&self) -> impl Iterator<Item = (u32, f64)> + '_ {
        self.cumulative
            .iter()
            .enumerate()
            .map(|(bin, &volume)| (bin as u32, volume))
    }

    pub fn cumulative(&self) -> &[f64] {
        &self.cumulative
    }

    /// Volume per bin, recovered from the cumulative histogram.
    pub fn differential(&self) -> Vec<f64> {
        differential(&self.cumulative)
    }

    pub fn len(&self) -> usize {
        self.cumulative.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cumulative.is_empty()
    }

    /// Highest dose bin of the table.
    pub fn last_bin(&self) -> u32 {
        self.cumulative.len().saturating_sub(1) as u32
    }

    /// Structure volume used for percentage conversions (cm³).
    pub fn total_volume(&self) -> f64 {
        self.total_volume
    }

    /// Volume that received any dose sample (cm³).
    pub fn sampled_volume(&self) -> f64 {
        self.cumulative[0]
    }

    pub fn statistics(&self) -> DoseStatistics {
        self.statistics
    }
}

fn differential(cumulative: &[f64]) -> Vec<f64> {
    let mut differential: Vec<f64> = cumulative
        .windows(2)
        .map(|pair| pair[0] - pair[1])
        .collect();
    differential.extend(cumulative.last());
    differential
}

fn histogram_statistics(cumulative: &[f64]) -> DoseStatistics {
    let differential = differential(cumulative);
    let total: f64 = differential.iter().sum();
    if total <= 0.0 {
        return DoseStatistics::default();
    }
    let occupied = || differential.iter().enumerate().filter(|(_, v)| **v > 0.0);
    let min = occupied().next().map_or(0.0, |(bin, _)| bin as f64);
    let max = occupied().last().map_or(0.0, |(bin, _)| bin as f64);
    let mean = occupied()
        .map(|(bin, volume)| bin as f64 * volume)
        .sum::<f64>()
        / total;
    DoseStatistics { min, mean, max }
}

/// Dose observations of one plane, each standing for `voxel_volume` cm³.
struct PlaneSamples {
    doses: Vec<f64>,
    voxel_volume: f64,
}

/// Builds cumulative DVHs from structures and dose grids.
#[derive(Clone, Debug, Default)]
pub struct DvhBuilder {
    config: AnalysisConfig,
}

impl DvhBuilder {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    /// Builds the DVH of `structure` in `grid`.
    ///
    /// Planes are sampled in parallel and reduced in plane order. Planes
    /// outside the dose grid are skipped; a negative or non-finite dose
    /// sample aborts the build.
    pub fn build(&self, structure: &Structure, grid: &DoseGrid) -> Result<Dvh> {
        self.config.validate()?;
        structure.validate_thickness()?;
        let total_volume = structure.volume(self.config.volume_resolution_mm);
        if structure.is_empty() {
            debug!("{}: no contours, empty DVH", structure.name);
            return Ok(Dvh::empty(total_volume));
        }

        let planes: Vec<(f64, &[Contour])> = structure.iter_planes().collect();
        let samples = planes
            .par_iter()
            .map(|&(z, contours)| self.sample_plane(structure, z, contours, grid))
            .collect::<Result<Vec<_>>>()?;
        let samples: Vec<PlaneSamples> = samples.into_iter().flatten().collect();

        let Some(max_dose) = samples
            .iter()
            .flat_map(|plane| plane.doses.iter().copied())
            .reduce(f64::max)
        else {
            debug!("{}: no dose samples on any plane", structure.name);
            return Ok(Dvh::empty(total_volume));
        };

        let bins = (max_dose.ceil() as usize).max(1);
        let mut differential = vec![0.0; bins];
        let mut min_dose = f64::INFINITY;
        let mut weighted_dose = 0.0;
        let mut sampled_volume = 0.0;
        for plane in &samples {
            for &dose in &plane.doses {
                let bin = (dose.floor() as usize).min(bins - 1);
                differential[bin] += plane.voxel_volume;
                min_dose = min_dose.min(dose);
                weighted_dose += dose * plane.voxel_volume;
                sampled_volume += plane.voxel_volume;
            }
        }

        let mut cumulative = differential;
        for i in (0..bins - 1).rev() {
            cumulative[i] += cumulative[i + 1];
        }

        info!(
            "{}: DVH from {} planes, {:.3} cm3 sampled, max {:.1} cGy",
            structure.name,
            samples.len(),
            sampled_volume,
            max_dose
        );
        Ok(Dvh {
            cumulative,
            total_volume,
            statistics: DoseStatistics {
                min: min_dose,
                mean: weighted_dose / sampled_volume,
                max: max_dose,
            },
        })
    }

    fn sample_plane(
        &self,
        structure: &Structure,
        z: f64,
        contours: &[Contour],
        grid: &DoseGrid,
    ) -> Result<Option<PlaneSamples>> {
        let lattice = match self.config.dvh_sampling {
            DvhSampling::DoseGrid => grid.native_lattice(),
            DvhSampling::Resampled { spacing_mm } => match Structure::plane_bounds(contours) {
                Some(bounds) => SamplingLattice::covering(bounds, spacing_mm),
                None => return Ok(None),
            },
        };
        let mask = rasterize(contours, &lattice);
        let (nodes, points): (Vec<(usize, usize)>, Vec<[f64; 3]>) = mask
            .indexed_iter()
            .filter(|(_, inside)| **inside)
            .map(|((row, column), _)| {
                let [x, y] = lattice.point(row, column);
                ((row, column), [x, y, z])
            })
            .unzip();

        let mut doses = Vec::with_capacity(points.len());
        for ((row, column), dose) in nodes.into_iter().zip(grid.sample_cgy(&points)) {
            let Some(dose) = dose else { continue };
            if !dose.is_finite() || dose < 0.0 {
                return Err(DoseError::DataRange {
                    location: Location::Plane { z, row, column },
                    value: dose,
                });
            }
            doses.push(dose);
        }

        if doses.is_empty() {
            debug!("{}: plane z={z} has no dose samples", structure.name);
            return Ok(None);
        }
        Ok(Some(PlaneSamples {
            doses,
            voxel_volume: lattice.cell_area() * structure.thickness / 1000.0,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dose_grid::DoseGridMetadata;
    use crate::enums::{DoseType, DoseUnits, PatientPosition, SummationType};
    use approx::assert_relative_eq;
    use ndarray::Array3;

    fn square(x0: f64, y0: f64, side: f64) -> Contour {
        Contour::new(vec![
            [x0, y0],
            [x0 + side, y0],
            [x0 + side, y0 + side],
            [x0, y0 + side],
        ])
    }

    fn metadata(position: PatientPosition, spacing: f64, frame_offsets: Vec<f64>) -> DoseGridMetadata {
        DoseGridMetadata {
            dose_grid_scaling: 0.01,
            units: DoseUnits::Gray,
            dose_type: DoseType::Physical,
            summation: SummationType::Plan,
            origin: [0.0, 0.0, 0.0],
            pixel_spacing: (spacing, spacing),
            frame_offsets,
            position,
        }
    }

    /// 20 × 20 grid at 1 mm with frames at z = 0, 2, 4. Column `i` receives
    /// `10 * i` cGy.
    fn ramp_grid(position: PatientPosition) -> DoseGrid {
        let values = Array3::from_shape_fn((3, 20, 20), |(_, _, i)| 10.0 * i as f64);
        DoseGrid::new(values, metadata(position, 1.0, vec![0.0, 2.0, 4.0])).unwrap()
    }

    fn prism(x0: f64) -> Structure {
        Structure::new(7, "Box", 2.0)
            .with_plane(0.0, vec![square(x0, 2.0, 10.0)])
            .with_plane(2.0, vec![square(x0, 2.0, 10.0)])
    }

    #[test]
    fn empty_structure_gives_all_zero_dvh() {
        let structure = Structure::new(1, "Empty", 2.0);
        let grid = ramp_grid(PatientPosition::HeadFirstSupine);
        let dvh = DvhBuilder::default().build(&structure, &grid).unwrap();
        assert!(dvh.bins().all(|(_, volume)| volume == 0.0));
    }

    #[test]
    fn prism_histogram_matches_column_doses() {
        let grid = ramp_grid(PatientPosition::HeadFirstSupine);
        let dvh = DvhBuilder::default().build(&prism(2.0), &grid).unwrap();

        // 2 planes × 100 voxels × 1 mm² × 2 mm = 0.4 cm³.
        assert_relative_eq!(dvh.sampled_volume(), 0.4, epsilon = 1e-12);
        assert_relative_eq!(dvh.total_volume(), 0.4, epsilon = 1e-12);
        // Columns x = 2 ..= 11 receive 20 ..= 110 cGy, 0.04 cm³ each.
        let stats = dvh.statistics();
        assert_relative_eq!(stats.min, 20.0);
        assert_relative_eq!(stats.max, 110.0);
        assert_relative_eq!(stats.mean, 65.0, epsilon = 1e-9);
        assert_eq!(dvh.len(), 110);
        assert_relative_eq!(dvh.cumulative()[0], 0.4, epsilon = 1e-12);
        assert_relative_eq!(dvh.cumulative()[20], 0.4, epsilon = 1e-12);
        assert_relative_eq!(dvh.cumulative()[21], 0.36, epsilon = 1e-12);
        assert_relative_eq!(dvh.cumulative()[109], 0.04, epsilon = 1e-12);
        assert!(dvh.cumulative().windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn feet_first_grid_reverses_columns() {
        // Feet-first supine runs x = 0, -1, ..., -19 along the columns.
        let grid = ramp_grid(PatientPosition::FeetFirstSupine);
        let dvh = DvhBuilder::default().build(&prism(-12.0), &grid).unwrap();
        let stats = dvh.statistics();
        assert_relative_eq!(stats.min, 30.0);
        assert_relative_eq!(stats.max, 120.0);
        assert_relative_eq!(dvh.sampled_volume(), 0.4, epsilon = 1e-12);
    }

    #[test]
    fn planes_outside_the_grid_are_skipped() {
        let grid = ramp_grid(PatientPosition::HeadFirstSupine);
        let structure = prism(2.0).with_plane(50.0, vec![square(2.0, 2.0, 10.0)]);
        let with_outside = DvhBuilder::default().build(&structure, &grid).unwrap();
        let without = DvhBuilder::default().build(&prism(2.0), &grid).unwrap();
        assert_eq!(with_outside.cumulative(), without.cumulative());
    }

    #[test]
    fn structure_outside_the_grid_has_empty_dvh() {
        let grid = ramp_grid(PatientPosition::HeadFirstSupine);
        let structure = Structure::new(3, "Far", 2.0).with_plane(100.0, vec![square(0.0, 0.0, 5.0)]);
        let dvh = DvhBuilder::default().build(&structure, &grid).unwrap();
        assert_eq!(dvh.cumulative(), &[0.0]);
        assert!(dvh.total_volume() > 0.0);
    }

    #[test]
    fn resampled_lattice_uses_its_own_voxel_volume() {
        // Prone grid: y runs 0, -2, ..., -58.
        let grid = DoseGrid::new(
            Array3::from_elem((2, 30, 30), 500.0),
            metadata(PatientPosition::FeetFirstProne, 2.0, vec![0.0, 3.0]),
        )
        .unwrap();
        let structure = Structure::new(1, "Box", 1.0).with_plane(1.0, vec![square(2.0, -20.0, 10.0)]);
        let config = AnalysisConfig::default()
            .with_dvh_sampling(DvhSampling::Resampled { spacing_mm: 0.5 });
        let dvh = DvhBuilder::new(config).build(&structure, &grid).unwrap();
        // 20 × 20 nodes at 0.25 mm² × 1 mm.
        assert_relative_eq!(dvh.sampled_volume(), 0.1, epsilon = 1e-12);
        assert_eq!(dvh.len(), 500);
        assert_relative_eq!(dvh.cumulative()[499], 0.1, epsilon = 1e-12);
    }

    #[test]
    fn non_positive_thickness_is_rejected() {
        let grid = ramp_grid(PatientPosition::HeadFirstSupine);
        for thickness in [-2.0, 0.0, f64::NAN] {
            let structure = Structure::new(1, "Box", thickness)
                .with_plane(0.0, vec![square(2.0, 2.0, 10.0)]);
            assert!(matches!(
                DvhBuilder::default().build(&structure, &grid),
                Err(DoseError::DataRange {
                    location: Location::Field("thickness"),
                    ..
                })
            ));
        }
    }

    #[test]
    fn from_cumulative_rejects_increasing_volumes() {
        assert!(Dvh::from_cumulative(vec![5.0, 4.0, 4.5], 5.0).is_err());
        assert!(Dvh::from_cumulative(Vec::new(), 5.0).is_err());
        let dvh = Dvh::from_cumulative(vec![5.0, 4.0, 1.0, 0.0], 5.0).unwrap();
        assert_eq!(dvh.differential(), vec![1.0, 3.0, 1.0, 0.0]);
        let stats = dvh.statistics();
        assert_eq!((stats.min, stats.max), (0.0, 2.0));
        assert_relative_eq!(stats.mean, 1.0);
    }
}
