use crate::enums::DvhSampling;
use crate::error::{DoseError, Location, Result};

/// Fraction of the maximum simulated dose used as the default nominal
/// prescription. A simulation tool convention, not a clinical standard.
pub const DEFAULT_PRESCRIPTION_FRACTION: f64 = 0.9;

/// Settings shared by the analysis operations.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct AnalysisConfig {
    /// Lattice spacing (mm) used to rasterize planes for structure volumes.
    pub volume_resolution_mm: f64,
    /// Lattice on which DVH doses are sampled.
    pub dvh_sampling: DvhSampling,
    /// Fraction of the maximum ingested dose reported as the prescription.
    pub prescription_fraction: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            volume_resolution_mm: 1.0,
            dvh_sampling: DvhSampling::default(),
            prescription_fraction: DEFAULT_PRESCRIPTION_FRACTION,
        }
    }
}

impl AnalysisConfig {
    pub fn with_volume_resolution(mut self, resolution_mm: f64) -> Self {
        self.volume_resolution_mm = resolution_mm;
        self
    }

    pub fn with_dvh_sampling(mut self, sampling: DvhSampling) -> Self {
        self.dvh_sampling = sampling;
        self
    }

    pub fn with_prescription_fraction(mut self, fraction: f64) -> Self {
        self.prescription_fraction = fraction;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        let spacing = match self.dvh_sampling {
            DvhSampling::DoseGrid => None,
            DvhSampling::Resampled { spacing_mm } => Some(spacing_mm),
        };
        let checks = [
            ("volume_resolution_mm", Some(self.volume_resolution_mm)),
            ("dvh_sampling.spacing_mm", spacing),
            ("prescription_fraction", Some(self.prescription_fraction)),
        ];
        for (field, value) in checks {
            if let Some(value) = value {
                if !value.is_finite() || value <= 0.0 {
                    return Err(DoseError::DataRange {
                        location: Location::Field(field),
                        value,
                    });
                }
            }
        }
        Ok(())
    }
}
