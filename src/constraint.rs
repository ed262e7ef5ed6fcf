use crate::dvh::Dvh;
use crate::error::{DoseError, Location, Result};

fn finite(field: &'static str, value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(DoseError::DataRange {
            location: Location::Field(field),
            value,
        })
    }
}

/// Minimum dose (cGy bin) received by the hottest `volume_percent` of the
/// structure: the first bin whose cumulative volume drops to or below that
/// share of the structure's total volume. Requests beyond the table clamp to
/// its boundary bins, so 0 % yields the maximum dose bin.
pub fn dose_at_volume(dvh: &Dvh, volume_percent: f64) -> Result<u32> {
    let volume_percent = finite("volume_percent", volume_percent)?;
    let target = volume_percent / 100.0 * dvh.total_volume();
    let bin = dvh
        .cumulative()
        .iter()
        .position(|&volume| volume <= target)
        .unwrap_or(dvh.len() - 1);
    Ok(bin as u32)
}

/// Highest bin (cGy) that still holds volume, or 0 for an empty histogram.
pub fn max_dose(dvh: &Dvh) -> u32 {
    dvh.cumulative()
        .iter()
        .rposition(|&volume| volume > 0.0)
        .map_or(0, |bin| bin as u32)
}

/// Same as [`dose_at_volume`] for an absolute volume in cm³.
pub fn dose_at_absolute_volume(dvh: &Dvh, volume_cm3: f64) -> Result<u32> {
    let volume_cm3 = finite("volume_cm3", volume_cm3)?;
    if dvh.total_volume() <= 0.0 {
        return Ok(dvh.last_bin());
    }
    dose_at_volume(dvh, volume_cm3 * 100.0 / dvh.total_volume())
}

/// Cumulative volume (cm³) at the bin nearest to `dose_cgy`, clamped to the
/// table's dose range.
pub fn volume_at_dose(dvh: &Dvh, dose_cgy: f64) -> Result<f64> {
    let dose_cgy = finite("dose_cgy", dose_cgy)?;
    let bin = (dose_cgy.round().max(0.0) as usize).min(dvh.len() - 1);
    Ok(dvh.cumulative()[bin])
}

/// Volume at dose as a percentage of the structure's total volume.
pub fn volume_percent_at_dose(dvh: &Dvh, dose_cgy: f64) -> Result<f64> {
    let volume = volume_at_dose(dvh, dose_cgy)?;
    if dvh.total_volume() <= 0.0 {
        return Ok(0.0);
    }
    Ok(volume * 100.0 / dvh.total_volume())
}

/// Volume a serial-organ limit applies to.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConstraintVolume {
    /// Absolute volume in cm³. Zero constrains the maximum point dose.
    Absolute(f64),
    /// Share of the structure volume, in percent.
    Percent(f64),
}

/// Dose-volume limit of an organ at risk.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OrganConstraint {
    /// The dose received by `volume` must stay below `dose_limit_gy`.
    Serial {
        volume: ConstraintVolume,
        dose_limit_gy: f64,
    },
    /// At least `critical_volume_cm3` must receive less than
    /// `dose_threshold_gy`.
    Parallel {
        dose_threshold_gy: f64,
        critical_volume_cm3: f64,
    },
}

/// Planned value of a constraint next to its limit. Serial constraints
/// report a dose in Gy, parallel ones a spared volume in cm³.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConstraintOutcome {
    pub planned: f64,
    pub limit: f64,
    pub passed: bool,
}

/// Evaluates any organ constraint against a structure's DVH.
pub fn evaluate_constraint(constraint: &OrganConstraint, dvh: &Dvh) -> Result<ConstraintOutcome> {
    match *constraint {
        OrganConstraint::Serial {
            volume,
            dose_limit_gy,
        } => {
            let bin = match volume {
                ConstraintVolume::Absolute(cm3) => dose_at_absolute_volume(dvh, cm3)?,
                ConstraintVolume::Percent(percent) => dose_at_volume(dvh, percent)?,
            };
            let planned = bin as f64 / 100.0;
            Ok(ConstraintOutcome {
                planned,
                limit: dose_limit_gy,
                passed: planned < dose_limit_gy,
            })
        }
        OrganConstraint::Parallel {
            dose_threshold_gy,
            critical_volume_cm3,
        } => {
            let irradiated = volume_at_dose(dvh, dose_threshold_gy * 100.0)?;
            let spared = dvh.total_volume() - irradiated;
            Ok(ConstraintOutcome {
                planned: spared,
                limit: critical_volume_cm3,
                passed: spared > critical_volume_cm3,
            })
        }
    }
}
