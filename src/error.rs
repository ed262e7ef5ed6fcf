use std::fmt;

use thiserror::Error;

/// Where an offending dose or intensity value was found.
#[derive(Debug, Clone, PartialEq)]
pub enum Location {
    /// A voxel of a dose grid, as (frame, row, column).
    Voxel {
        frame: usize,
        row: usize,
        column: usize,
    },
    /// A lattice point on a structure plane.
    Plane { z: f64, row: usize, column: usize },
    /// An entry of an external dose table.
    TableEntry(usize),
    /// A scalar argument or attribute.
    Field(&'static str),
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Voxel { frame, row, column } => {
                write!(f, "voxel (frame {frame}, row {row}, column {column})")
            }
            Location::Plane { z, row, column } => {
                write!(f, "plane z={z} mm at (row {row}, column {column})")
            }
            Location::TableEntry(index) => write!(f, "table entry {index}"),
            Location::Field(name) => write!(f, "{name}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum DoseError {
    #[error("Geometry mismatch in {field}: {value}")]
    GeometryMismatch { field: &'static str, value: String },

    #[error("Degenerate input: {0}")]
    DegenerateInput(String),

    #[error("Value {value} out of range at {location}")]
    DataRange { location: Location, value: f64 },

    #[error("Parse error on line {line}: {reason}")]
    Parse { line: usize, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DoseError {
    pub(crate) fn geometry(field: &'static str, value: impl fmt::Display) -> Self {
        DoseError::GeometryMismatch {
            field,
            value: value.to_string(),
        }
    }
}

pub type Result<T, E = DoseError> = std::result::Result<T, E>;
