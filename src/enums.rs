use std::fmt;
use std::str::FromStr;

use crate::error::DoseError;

/// Patient position of the image series, as the DICOM `PatientPosition`
/// code. Only positions whose in-plane axes are aligned with the patient x/y
/// axes are supported; decubitus positions are rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PatientPosition {
    HeadFirstSupine,
    HeadFirstProne,
    FeetFirstSupine,
    FeetFirstProne,
}

impl PatientPosition {
    pub fn code(self) -> &'static str {
        match self {
            PatientPosition::HeadFirstSupine => "HFS",
            PatientPosition::HeadFirstProne => "HFP",
            PatientPosition::FeetFirstSupine => "FFS",
            PatientPosition::FeetFirstProne => "FFP",
        }
    }

    pub fn is_head_first(self) -> bool {
        matches!(
            self,
            PatientPosition::HeadFirstSupine | PatientPosition::HeadFirstProne
        )
    }

    /// Image orientation (row cosines followed by column cosines) of an
    /// axial series acquired in this position.
    pub fn direction_cosines(self) -> [f64; 6] {
        match self {
            PatientPosition::HeadFirstSupine => [1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            PatientPosition::HeadFirstProne => [-1.0, 0.0, 0.0, 0.0, -1.0, 0.0],
            PatientPosition::FeetFirstSupine => [-1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            PatientPosition::FeetFirstProne => [1.0, 0.0, 0.0, 0.0, -1.0, 0.0],
        }
    }

    /// Sign of the x step between columns and the y step between rows.
    pub(crate) fn in_plane_signs(self) -> (f64, f64) {
        let cosines = self.direction_cosines();
        (cosines[0], cosines[4])
    }

    /// Sign of the z step between consecutive slices. Head-first series run
    /// from the head towards the feet, so z decreases.
    pub fn slice_direction(self) -> f64 {
        if self.is_head_first() { -1.0 } else { 1.0 }
    }
}

impl FromStr for PatientPosition {
    type Err = DoseError;

    fn from_str(code: &str) -> Result<Self, Self::Err> {
        match code.trim().to_ascii_uppercase().as_str() {
            "HFS" => Ok(PatientPosition::HeadFirstSupine),
            "HFP" => Ok(PatientPosition::HeadFirstProne),
            "FFS" => Ok(PatientPosition::FeetFirstSupine),
            "FFP" => Ok(PatientPosition::FeetFirstProne),
            "HFDR" | "HFDL" | "FFDR" | "FFDL" => Err(DoseError::geometry(
                "patient_position",
                format!("decubitus position {code} is not supported"),
            )),
            _ => Err(DoseError::geometry(
                "patient_position",
                format!("unrecognized position code {code:?}"),
            )),
        }
    }
}

impl fmt::Display for PatientPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DoseUnits {
    #[default]
    Gray,
    Relative,
}

impl DoseUnits {
    /// Factor converting one unit of this dose into cGy, when defined.
    pub fn to_cgy(self) -> Option<f64> {
        match self {
            DoseUnits::Gray => Some(100.0),
            DoseUnits::Relative => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DoseType {
    #[default]
    Physical,
    Effective,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SummationType {
    #[default]
    Plan,
    Fraction,
    Beam,
}

/// Lattice used when sampling a structure plane for a DVH.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DvhSampling {
    /// Sample at the dose grid's own in-plane lattice.
    #[default]
    DoseGrid,
    /// Sample a lattice of the given spacing over each plane's contours,
    /// interpolating the dose trilinearly.
    Resampled { spacing_mm: f64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_supported_positions() {
        assert_eq!(
            "hfs".parse::<PatientPosition>().unwrap(),
            PatientPosition::HeadFirstSupine
        );
        assert_eq!(
            " FFP ".parse::<PatientPosition>().unwrap(),
            PatientPosition::FeetFirstProne
        );
    }

    #[test]
    fn rejects_unknown_and_decubitus_positions() {
        for code in ["XYZ", "", "HFDL"] {
            let err = code.parse::<PatientPosition>().unwrap_err();
            assert!(matches!(
                err,
                DoseError::GeometryMismatch {
                    field: "patient_position",
                    ..
                }
            ));
        }
    }

    #[test]
    fn slice_direction_follows_head_or_feet_first() {
        assert_eq!(PatientPosition::HeadFirstProne.slice_direction(), -1.0);
        assert_eq!(PatientPosition::FeetFirstSupine.slice_direction(), 1.0);
    }
}
