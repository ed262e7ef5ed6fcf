use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use image::{ImageBuffer, Luma, imageops::FilterType};
use log::{debug, info};
use ndarray::{Array2, Array3, Axis as ArrayAxis};
use rayon::prelude::*;

use crate::config::{AnalysisConfig, DEFAULT_PRESCRIPTION_FRACTION};
use crate::dose_grid::{DoseGrid, DoseGridMetadata};
use crate::enums::{DoseType, DoseUnits, PatientPosition, SummationType};
use crate::error::{DoseError, Location, Result};
use crate::geometry::{INDEX_TOLERANCE, ImageGeometry};

/// Simulation settings file of a Geant4 DICOM project.
pub const SIMULATION_SETTINGS_FILE: &str = "Data.dat";
/// Scored dose table of a Geant4 DICOM project.
pub const SIMULATION_DOSE_FILE: &str = "dicom.out";

/// Largest value of the 16-bit store dose values are quantized into.
const STORE_MAX: f64 = u16::MAX as f64;

/// Dose table produced by an external simulation, before alignment with the
/// image series.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ExternalDoseTable {
    /// Values stored as (slice, row, column) with the patient coordinate of
    /// every column (`x`), row (`y`) and slice (`z`).
    Dense {
        x: Vec<f64>,
        y: Vec<f64>,
        z: Vec<f64>,
        values: Array3<f64>,
    },
    /// `(linear index, intensity)` pairs over a compressed grid of shape
    /// (slices, rows, columns). Indices are row-major; voxels without an
    /// entry receive no dose.
    Sparse {
        shape: (usize, usize, usize),
        entries: Vec<(u64, f64)>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct IngestOptions {
    /// Share of the maximum dose taken as the nominal prescription.
    pub prescription_fraction: f64,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            prescription_fraction: DEFAULT_PRESCRIPTION_FRACTION,
        }
    }
}

impl From<&AnalysisConfig> for IngestOptions {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            prescription_fraction: config.prescription_fraction,
        }
    }
}

/// Reported once per upsampled slice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IngestProgress {
    pub completed: usize,
    pub total: usize,
}

#[derive(Clone, Debug)]
pub struct IngestedDose {
    pub grid: DoseGrid,
    /// Nominal prescription dose in cGy.
    pub prescription_dose_cgy: f64,
}

pub struct DoseLoader;

impl DoseLoader {
    /// Aligns an external dose table with an image series.
    ///
    /// # Arguments
    ///
    /// * `table` - Dense or sparse dose table
    /// * `geometry` - Geometry of the target image series
    /// * `compression_factor` - Number of image pixels per table cell along
    ///   each in-plane axis
    /// * `options` - Prescription convention
    ///
    /// # Errors
    ///
    /// Returns [`DoseError::GeometryMismatch`] when the table does not fit the
    /// image series or the patient position is unsupported,
    /// [`DoseError::DegenerateInput`] for a table without dose, and
    /// [`DoseError::DataRange`] for negative or non-finite intensities.
    pub fn ingest(
        table: &ExternalDoseTable,
        geometry: &ImageGeometry,
        compression_factor: u32,
        options: &IngestOptions,
    ) -> Result<IngestedDose> {
        Self::ingest_with_progress(table, geometry, compression_factor, options, |_| {})
    }

    /// Same as [`DoseLoader::ingest`], calling `progress` from the worker
    /// that finishes each slice.
    pub fn ingest_with_progress(
        table: &ExternalDoseTable,
        geometry: &ImageGeometry,
        compression_factor: u32,
        options: &IngestOptions,
        progress: impl Fn(IngestProgress) + Sync,
    ) -> Result<IngestedDose> {
        geometry.validate()?;
        let position = geometry.position()?;
        let fraction = options.prescription_fraction;
        if !fraction.is_finite() || fraction <= 0.0 {
            return Err(DoseError::DataRange {
                location: Location::Field("prescription_fraction"),
                value: fraction,
            });
        }
        let factor = Self::compressed_dims(geometry, compression_factor)?;

        let raw = match table {
            ExternalDoseTable::Dense { x, y, z, values } => {
                Self::validate_dense(x, y, z, values, geometry, position, factor)?;
                values.clone()
            }
            ExternalDoseTable::Sparse { shape, entries } => {
                Self::unravel(*shape, entries, geometry, factor)?
            }
        };

        let max = raw.iter().copied().fold(0.0, f64::max);
        if max <= 0.0 {
            return Err(DoseError::DegenerateInput(
                "dose table has no positive intensity".to_string(),
            ));
        }
        let quantized = raw.mapv(|value| (value / max * STORE_MAX).round() as u16);
        let values = Self::upsample(&quantized, geometry, &progress)?;

        let step = position.slice_direction() * geometry.slice_spacing;
        let metadata = DoseGridMetadata {
            dose_grid_scaling: max / STORE_MAX,
            units: DoseUnits::Gray,
            dose_type: DoseType::Physical,
            summation: SummationType::Fraction,
            origin: geometry.image_position,
            pixel_spacing: geometry.pixel_spacing,
            frame_offsets: (0..values.dim().0).map(|k| k as f64 * step).collect(),
            position,
        };
        let grid = DoseGrid::new(values, metadata)?;
        let prescription_dose_cgy = fraction * max * 100.0;

        info!(
            "Ingested {:?} dose grid, max {max:.4} Gy, prescription {prescription_dose_cgy:.1} cGy",
            grid.dim()
        );
        Ok(IngestedDose {
            grid,
            prescription_dose_cgy,
        })
    }

    /// Reads the sparse dose table of a Geant4 DICOM project directory along
    /// with its compression factor.
    pub fn load_simulation_directory(
        path: impl AsRef<Path>,
        geometry: &ImageGeometry,
    ) -> Result<(ExternalDoseTable, u32)> {
        let path = path.as_ref();
        let settings = fs::read_to_string(path.join(SIMULATION_SETTINGS_FILE))?;
        let (compression_factor, slices) = Self::parse_settings(&settings)?;
        let factor = Self::compressed_dims(geometry, compression_factor)?;

        let dose = fs::read_to_string(path.join(SIMULATION_DOSE_FILE))?;
        let entries = Self::parse_dose_entries(&dose)?;
        debug!(
            "Read {} dose entries from {}",
            entries.len(),
            path.display()
        );

        let shape = (slices, geometry.rows / factor, geometry.columns / factor);
        Ok((ExternalDoseTable::Sparse { shape, entries }, compression_factor))
    }

    /// Compression factor on the first line, slice count on the second.
    fn parse_settings(settings: &str) -> Result<(u32, usize)> {
        let mut lines = settings.lines().map(str::trim);
        let compression = lines.next().unwrap_or_default();
        let compression = compression.parse::<u32>().map_err(|e| DoseError::Parse {
            line: 1,
            reason: format!("compression factor {compression:?}: {e}"),
        })?;
        let slices = lines.next().unwrap_or_default();
        let slices = slices.parse::<usize>().map_err(|e| DoseError::Parse {
            line: 2,
            reason: format!("slice count {slices:?}: {e}"),
        })?;
        Ok((compression, slices))
    }

    fn parse_dose_entries(dose: &str) -> Result<Vec<(u64, f64)>> {
        dose.lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(number, line)| -> Result<(u64, f64)> {
                let line_number = number + 1;
                let parse_error = |reason: String| DoseError::Parse {
                    line: line_number,
                    reason,
                };
                let mut fields = line.split_whitespace();
                let (Some(index), Some(intensity), None) =
                    (fields.next(), fields.next(), fields.next())
                else {
                    return Err(parse_error(format!(
                        "expected `index intensity`, found {line:?}"
                    )));
                };
                let index = index
                    .parse::<u64>()
                    .map_err(|e| parse_error(format!("index {index:?}: {e}")))?;
                let intensity = intensity
                    .parse::<f64>()
                    .map_err(|e| parse_error(format!("intensity {intensity:?}: {e}")))?;
                Ok((index, intensity))
            })
            .collect()
    }

    /// Checks that `compression_factor` divides the image dimensions and
    /// returns it as a usize.
    fn compressed_dims(geometry: &ImageGeometry, compression_factor: u32) -> Result<usize> {
        let factor = compression_factor as usize;
        if factor == 0 {
            return Err(DoseError::geometry("compression_factor", compression_factor));
        }
        if geometry.rows % factor != 0 || geometry.columns % factor != 0 {
            return Err(DoseError::geometry(
                "compression_factor",
                format!(
                    "{compression_factor} does not divide image dimensions {}x{}",
                    geometry.rows, geometry.columns
                ),
            ));
        }
        Ok(factor)
    }

    fn check_in_plane_shape(
        rows: usize,
        columns: usize,
        geometry: &ImageGeometry,
        factor: usize,
    ) -> Result<()> {
        if rows * factor != geometry.rows || columns * factor != geometry.columns {
            return Err(DoseError::geometry(
                "dose_table_shape",
                format!(
                    "{rows}x{columns} at compression {factor} does not cover {}x{}",
                    geometry.rows, geometry.columns
                ),
            ));
        }
        Ok(())
    }

    fn check_intensity(index: usize, value: f64) -> Result<()> {
        if !value.is_finite() || value < 0.0 {
            return Err(DoseError::DataRange {
                location: Location::TableEntry(index),
                value,
            });
        }
        Ok(())
    }

    fn validate_dense(
        x: &[f64],
        y: &[f64],
        z: &[f64],
        values: &Array3<f64>,
        geometry: &ImageGeometry,
        position: PatientPosition,
        factor: usize,
    ) -> Result<()> {
        if values.is_empty() {
            return Err(DoseError::DegenerateInput("dense dose table is empty".to_string()));
        }
        let (slices, rows, columns) = values.dim();
        if (z.len(), y.len(), x.len()) != (slices, rows, columns) {
            return Err(DoseError::geometry(
                "dose_table_axes",
                format!(
                    "axes of length {}x{}x{} for values of shape {slices}x{rows}x{columns}",
                    z.len(),
                    y.len(),
                    x.len()
                ),
            ));
        }
        Self::check_in_plane_shape(rows, columns, geometry, factor)?;

        // Each axis must start at the image position and step the way the
        // patient position orders columns, rows and slices.
        let (row_spacing, column_spacing) = geometry.pixel_spacing;
        let (x_sign, y_sign) = position.in_plane_signs();
        let [x0, y0, z0] = geometry.image_position;
        for (field, axis, origin, expected) in [
            ("dose_table_x", x, x0, column_spacing * factor as f64 * x_sign),
            ("dose_table_y", y, y0, row_spacing * factor as f64 * y_sign),
            ("dose_table_z", z, z0, geometry.slice_spacing * position.slice_direction()),
        ] {
            if let Some(first) = axis.first() {
                if (first - origin).abs() > expected.abs() * INDEX_TOLERANCE {
                    return Err(DoseError::geometry(
                        field,
                        format!("axis starts at {first} mm, image starts at {origin} mm"),
                    ));
                }
            }
            if let [first, second, ..] = axis {
                let step = second - first;
                if (step - expected).abs() > expected.abs() * INDEX_TOLERANCE {
                    return Err(DoseError::geometry(
                        field,
                        format!("step {step} mm, expected {expected} mm"),
                    ));
                }
            }
        }

        values
            .iter()
            .enumerate()
            .try_for_each(|(index, &value)| Self::check_intensity(index, value))
    }

    fn unravel(
        shape: (usize, usize, usize),
        entries: &[(u64, f64)],
        geometry: &ImageGeometry,
        factor: usize,
    ) -> Result<Array3<f64>> {
        if entries.is_empty() {
            return Err(DoseError::DegenerateInput("sparse dose table is empty".to_string()));
        }
        let (slices, rows, columns) = shape;
        Self::check_in_plane_shape(rows, columns, geometry, factor)?;
        let plane = (rows * columns) as u64;
        let volume = plane * slices as u64;

        if let Some(&(max_index, _)) = entries.iter().max_by_key(|(index, _)| *index) {
            if max_index >= volume {
                return Err(DoseError::geometry(
                    "linear_index",
                    format!(
                        "{max_index} exceeds compressed grid of {volume} voxels \
                         ({slices}x{rows}x{columns})"
                    ),
                ));
            }
        }

        let mut raw = Array3::zeros(shape);
        for (entry, &(index, intensity)) in entries.iter().enumerate() {
            Self::check_intensity(entry, intensity)?;
            let slice = (index / plane) as usize;
            let within = index % plane;
            let row = (within / columns as u64) as usize;
            let column = (within % columns as u64) as usize;
            raw[[slice, row, column]] = intensity;
        }
        Ok(raw)
    }

    /// Nearest-neighbour resize of every slice to the image dimensions.
    fn upsample(
        quantized: &Array3<u16>,
        geometry: &ImageGeometry,
        progress: &(impl Fn(IngestProgress) + Sync),
    ) -> Result<Array3<f64>> {
        let (slices, rows, columns) = quantized.dim();
        let completed = AtomicUsize::new(0);

        let planes: Vec<Array2<f64>> = quantized
            .axis_iter(ArrayAxis(0))
            .into_par_iter()
            .map(|slice| -> Result<Array2<f64>> {
                let buffer = ImageBuffer::<Luma<u16>, Vec<u16>>::from_raw(
                    columns as u32,
                    rows as u32,
                    slice.iter().copied().collect(),
                )
                .ok_or_else(|| DoseError::geometry("dose_table_shape", "slice buffer too small"))?;
                let resized = image::imageops::resize(
                    &buffer,
                    geometry.columns as u32,
                    geometry.rows as u32,
                    FilterType::Nearest,
                );
                let plane = Array2::from_shape_vec(
                    (geometry.rows, geometry.columns),
                    resized.into_raw().into_iter().map(f64::from).collect(),
                )
                .map_err(|e| DoseError::geometry("dose_table_shape", e))?;

                let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                progress(IngestProgress {
                    completed: done,
                    total: slices,
                });
                Ok(plane)
            })
            .collect::<Result<_>>()?;

        let mut values = Array3::zeros((slices, geometry.rows, geometry.columns));
        for (mut frame, plane) in values.axis_iter_mut(ArrayAxis(0)).zip(planes) {
            frame.assign(&plane);
        }
        Ok(values)
    }
}
