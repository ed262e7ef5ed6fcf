//! # Dose-volume library
//!
//! This crate evaluates radiotherapy dose distributions against contoured
//! anatomical structures. It works on already-parsed inputs: structures as
//! planar contours, dose grids as scaled 3D arrays and image series as their
//! geometry.
//!
//! Contours are rasterized onto sampling lattices with the even-odd rule, so
//! nested contours form holes. Dose is sampled from the grid with trilinear
//! interpolation and accumulated into cumulative dose-volume histograms in
//! 1 cGy bins. Per-plane work runs in parallel using rayon. On top of the
//! histograms the crate answers dose/volume constraint queries, evaluates the
//! TG-101 organ tolerances and scores target conformality (Paddick).
//!
//! Dose tables produced by an external simulation (dense, or sparse over a
//! compressed grid such as a Geant4 DICOM project) can be ingested into the
//! geometry of an image series:
//!  - Sparse indices are unraveled row-major against the compressed shape
//!  - Compressed slices are upsampled with nearest-neighbour resizing
//!  - Values are quantized into a 16-bit store with a dose grid scaling
//!
//! Supported patient positions are HFS, HFP, FFS and FFP.
//!
//! # Examples
//!
//! ## Building a DVH and checking a constraint
//!
//! ```no_run
//! # use dose_volume::{DoseLoader, DvhBuilder, ImageGeometry, IngestOptions, Structure, Contour};
//! # use dose_volume::constraint::dose_at_volume;
//! let geometry = ImageGeometry {
//!     rows: 512,
//!     columns: 512,
//!     pixel_spacing: (0.9766, 0.9766),
//!     image_position: [-250.0, -250.0, 0.0],
//!     slice_spacing: 2.5,
//!     patient_position: "HFS".to_string(),
//! };
//! let (table, compression) = DoseLoader::load_simulation_directory("g4-project", &geometry)
//!     .expect("should have read the simulation output");
//! let dose = DoseLoader::ingest(&table, &geometry, compression, &IngestOptions::default())
//!     .expect("should have aligned the dose with the images");
//!
//! let target = Structure::new(1, "PTV", 2.5).with_plane(
//!     -5.0,
//!     vec![Contour::new(vec![[-10.0, -10.0], [10.0, -10.0], [10.0, 10.0], [-10.0, 10.0]])],
//! );
//! let dvh = DvhBuilder::default()
//!     .build(&target, &dose.grid)
//!     .expect("should have built the histogram");
//! let d95 = dose_at_volume(&dvh, 95.0).expect("should have found D95");
//! println!("D95 = {d95} cGy");
//! ```

pub mod config;
pub mod conformality;
pub mod constraint;
pub mod dose_grid;
pub mod dose_loader;
pub mod dvh;
pub mod enums;
pub mod error;
pub mod geometry;
mod interpolator;
pub mod rasterizer;
pub mod structure;
pub mod tolerance;

pub use config::AnalysisConfig;
pub use conformality::{ConformalityEvaluator, ConformalityMetrics, Metric};
pub use constraint::{ConstraintOutcome, ConstraintVolume, OrganConstraint};
pub use dose_grid::{DoseGrid, DoseGridMetadata};
pub use dose_loader::{DoseLoader, ExternalDoseTable, IngestOptions, IngestProgress, IngestedDose};
pub use dvh::{DoseStatistics, Dvh, DvhBuilder};
pub use enums::{DoseType, DoseUnits, DvhSampling, PatientPosition, SummationType};
pub use error::{DoseError, Location, Result};
pub use geometry::{ImageGeometry, SamplingLattice};
pub use interpolator::Interpolator;
pub use structure::{Contour, Structure};
pub use tolerance::{Fractionation, Organ};
