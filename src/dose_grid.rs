use ndarray::{Array2, Array3, ArrayView3, Axis as ArrayAxis};
use rayon::prelude::*;

use crate::dose_loader::ExternalDoseTable;
use crate::enums::{DoseType, DoseUnits, PatientPosition, SummationType};
use crate::error::{DoseError, Location, Result};
use crate::geometry::{Axis, GridGeometry, ImageGeometry, SamplingLattice};
use crate::interpolator::Interpolator;

/// Geometry and scaling attributes of a dose grid, mirroring the RT Dose
/// attributes needed to re-ingest it.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DoseGridMetadata {
    /// Stored value × scaling = dose in `units`.
    pub dose_grid_scaling: f64,
    pub units: DoseUnits,
    pub dose_type: DoseType,
    pub summation: SummationType,
    /// Patient coordinates of voxel (0, 0, 0).
    pub origin: [f64; 3],
    /// (row spacing, column spacing) in mm.
    pub pixel_spacing: (f64, f64),
    /// z of each frame relative to `origin`, in mm.
    pub frame_offsets: Vec<f64>,
    pub position: PatientPosition,
}

/// Volumetric dose stored as (frame, row, column).
#[derive(Clone, Debug)]
pub struct DoseGrid {
    values: Array3<f64>,
    metadata: DoseGridMetadata,
    geometry: GridGeometry,
    cgy_per_stored_value: f64,
}

impl DoseGrid {
    /// Validates and wraps a dose array. Every stored value must be finite
    /// and non-negative.
    pub fn new(values: Array3<f64>, metadata: DoseGridMetadata) -> Result<Self> {
        let (frames, rows, columns) = values.dim();
        if frames == 0 || rows == 0 || columns == 0 {
            return Err(DoseError::DegenerateInput(format!(
                "dose grid has shape {frames}x{rows}x{columns}"
            )));
        }
        if metadata.frame_offsets.len() != frames {
            return Err(DoseError::geometry(
                "frame_offsets",
                format!(
                    "{} offsets for {frames} frames",
                    metadata.frame_offsets.len()
                ),
            ));
        }
        let (row_spacing, column_spacing) = metadata.pixel_spacing;
        for spacing in [row_spacing, column_spacing] {
            if !spacing.is_finite() || spacing <= 0.0 {
                return Err(DoseError::geometry("pixel_spacing", spacing));
            }
        }
        if metadata.origin.iter().any(|c| !c.is_finite()) {
            return Err(DoseError::geometry(
                "origin",
                format!("{:?}", metadata.origin),
            ));
        }
        let scaling = metadata.dose_grid_scaling;
        if !scaling.is_finite() || scaling <= 0.0 {
            return Err(DoseError::DataRange {
                location: Location::Field("dose_grid_scaling"),
                value: scaling,
            });
        }
        Self::check_values(&values.view())?;
        let cgy_per_unit = metadata.units.to_cgy().ok_or_else(|| {
            DoseError::geometry("units", "relative dose has no cGy conversion")
        })?;

        let (x_sign, y_sign) = metadata.position.in_plane_signs();
        let z_coordinates: Vec<f64> = metadata
            .frame_offsets
            .iter()
            .map(|offset| metadata.origin[2] + offset)
            .collect();
        let geometry = GridGeometry {
            x: Axis::Regular {
                origin: metadata.origin[0],
                spacing: column_spacing * x_sign,
                len: columns,
            },
            y: Axis::Regular {
                origin: metadata.origin[1],
                spacing: row_spacing * y_sign,
                len: rows,
            },
            z: Axis::from_coordinates(&z_coordinates)?,
        };

        Ok(Self {
            values,
            cgy_per_stored_value: scaling * cgy_per_unit,
            metadata,
            geometry,
        })
    }

    fn check_values(values: &ArrayView3<f64>) -> Result<()> {
        let offending = values
            .axis_iter(ArrayAxis(0))
            .into_par_iter()
            .enumerate()
            .find_map_first(|(frame, plane)| {
                plane
                    .indexed_iter()
                    .find(|(_, value)| !value.is_finite() || **value < 0.0)
                    .map(|((row, column), &value)| (frame, row, column, value))
            });
        match offending {
            Some((frame, row, column, value)) => Err(DoseError::DataRange {
                location: Location::Voxel { frame, row, column },
                value,
            }),
            None => Ok(()),
        }
    }

    /// Dimensions of the grid (frames, rows, columns).
    pub fn dim(&self) -> (usize, usize, usize) {
        self.values.dim()
    }

    /// Stored values, before scaling.
    pub fn values(&self) -> &Array3<f64> {
        &self.values
    }

    pub fn metadata(&self) -> &DoseGridMetadata {
        &self.metadata
    }

    pub fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    /// Factor converting a stored value into cGy.
    pub fn cgy_per_stored_value(&self) -> f64 {
        self.cgy_per_stored_value
    }

    /// Patient-to-pixel lookup table: x of every column and y of every row.
    pub fn patient_to_pixel_lut(&self) -> (Vec<f64>, Vec<f64>) {
        (self.geometry.x.coordinates(), self.geometry.y.coordinates())
    }

    /// The grid's own in-plane lattice.
    pub fn native_lattice(&self) -> SamplingLattice {
        let (x, y) = self.patient_to_pixel_lut();
        let (row_spacing, column_spacing) = self.metadata.pixel_spacing;
        SamplingLattice::new(x, y, column_spacing, row_spacing)
    }

    /// Patient z of every frame.
    pub fn frame_positions(&self) -> Vec<f64> {
        self.geometry.z.coordinates()
    }

    /// Maximum dose in cGy.
    pub fn max_dose_cgy(&self) -> f64 {
        let max = self.values.iter().copied().fold(0.0, f64::max);
        max * self.cgy_per_stored_value()
    }

    /// Dose in cGy at physical points; `None` outside the grid.
    pub fn sample_cgy(&self, points: &[[f64; 3]]) -> Vec<Option<f64>> {
        let scale = self.cgy_per_stored_value();
        Interpolator::resample(&self.values.view(), &self.geometry, points)
            .into_iter()
            .map(|value| value.map(|v| v * scale))
            .collect()
    }

    /// Dose in cGy over `lattice` at height `z`, interpolating between
    /// frames. `None` when `z` lies outside the grid.
    pub fn dose_plane_cgy(&self, lattice: &SamplingLattice, z: f64) -> Option<Array2<Option<f64>>> {
        let scale = self.cgy_per_stored_value();
        Interpolator::resample_plane(&self.values.view(), &self.geometry, lattice, z)
            .map(|plane| plane.mapv(|value| value.map(|v| v * scale)))
    }

    /// Physical dose (stored × scaling) as a dense table on the grid's own
    /// axes, ready to be ingested again with a compression factor of 1.
    pub fn to_dense_table(&self) -> ExternalDoseTable {
        let scaling = self.metadata.dose_grid_scaling;
        ExternalDoseTable::Dense {
            x: self.geometry.x.coordinates(),
            y: self.geometry.y.coordinates(),
            z: self.geometry.z.coordinates(),
            values: self.values.mapv(|value| value * scaling),
        }
    }

    /// Image geometry this grid is aligned to. A single-frame grid reports a
    /// slice spacing of 1 mm, which has no effect on its one frame.
    pub fn image_geometry(&self) -> Result<ImageGeometry> {
        let offsets = &self.metadata.frame_offsets;
        let slice_spacing = match offsets.as_slice() {
            [] | [_] => 1.0,
            [first, second, ..] => {
                let step = second - first;
                let uniform = offsets
                    .windows(2)
                    .all(|pair| ((pair[1] - pair[0]) - step).abs() <= step.abs() * 1e-6);
                if !uniform {
                    return Err(DoseError::geometry(
                        "frame_offsets",
                        "non-uniform frame spacing has no image geometry",
                    ));
                }
                if step.signum() != self.metadata.position.slice_direction() {
                    return Err(DoseError::geometry(
                        "frame_offsets",
                        format!(
                            "frames step by {step} mm, against the {} slice direction",
                            self.metadata.position
                        ),
                    ));
                }
                step.abs()
            }
        };
        let (_, rows, columns) = self.dim();
        Ok(ImageGeometry {
            rows,
            columns,
            pixel_spacing: self.metadata.pixel_spacing,
            image_position: self.metadata.origin,
            slice_spacing,
            patient_position: self.metadata.position.code().to_string(),
        })
    }
}
