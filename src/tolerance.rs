//! Stereotactic organ-at-risk tolerances (AAPM TG-101, table III) for one
//! to five fractions.

use std::fmt;

use crate::constraint::{ConstraintOutcome, ConstraintVolume, OrganConstraint, evaluate_constraint};
use crate::dvh::Dvh;
use crate::error::{DoseError, Location, Result};

use ToleranceKind::{PercentVolume, SparedVolume, Volume};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Organ {
    OpticPathway,
    Cochlea,
    Brainstem,
    SpinalCord,
    CaudaEquina,
    SacralPlexus,
    Esophagus,
    BrachialPlexus,
    Heart,
    GreatVessels,
    Trachea,
    SmallBronchus,
    Rib,
    Skin,
    Stomach,
    Bowel,
    RenalHilum,
    Lung,
    Liver,
    RenalCortex,
}

/// Number of treatment fractions, 1 to 5.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Fractionation(u8);

impl Fractionation {
    pub fn new(fractions: u8) -> Result<Self> {
        if (1..=5).contains(&fractions) {
            Ok(Self(fractions))
        } else {
            Err(DoseError::DataRange {
                location: Location::Field("fractions"),
                value: fractions as f64,
            })
        }
    }

    pub fn fractions(self) -> u8 {
        self.0
    }
}

/// What a tolerance row limits.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ToleranceKind {
    /// Dose to an absolute volume (cm³); zero is the maximum point dose.
    Volume(f64),
    /// Dose to a share of the organ, in percent.
    PercentVolume(f64),
    /// Volume (cm³) that must stay below the fraction's threshold dose.
    SparedVolume(f64),
}

/// One row of the tolerance table: a limit in Gy per fractionation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ToleranceRow {
    pub label: &'static str,
    pub kind: ToleranceKind,
    pub limits_gy: [f64; 5],
}

impl ToleranceRow {
    pub fn limit_gy(&self, fractionation: Fractionation) -> f64 {
        self.limits_gy[usize::from(fractionation.0) - 1]
    }

    pub fn constraint(&self, fractionation: Fractionation) -> OrganConstraint {
        let limit = self.limit_gy(fractionation);
        match self.kind {
            ToleranceKind::Volume(cm3) => OrganConstraint::Serial {
                volume: ConstraintVolume::Absolute(cm3),
                dose_limit_gy: limit,
            },
            ToleranceKind::PercentVolume(percent) => OrganConstraint::Serial {
                volume: ConstraintVolume::Percent(percent),
                dose_limit_gy: limit,
            },
            ToleranceKind::SparedVolume(cm3) => OrganConstraint::Parallel {
                dose_threshold_gy: limit,
                critical_volume_cm3: cm3,
            },
        }
    }
}

const fn row(label: &'static str, kind: ToleranceKind, limits_gy: [f64; 5]) -> ToleranceRow {
    ToleranceRow {
        label,
        kind,
        limits_gy,
    }
}

const MAX: ToleranceKind = Volume(0.0);

const OPTIC_PATHWAY: &[ToleranceRow] = &[
    row("Optic pathway", Volume(0.2), [8.0, 11.7, 15.3, 19.2, 23.0]),
    row("Optic pathway max", MAX, [10.0, 13.7, 17.4, 21.2, 25.0]),
];
const COCHLEA: &[ToleranceRow] = &[row("Cochlea max", MAX, [9.0, 13.1, 17.1, 21.1, 25.0])];
const BRAINSTEM: &[ToleranceRow] = &[
    row("Brainstem", Volume(0.5), [10.0, 14.0, 18.0, 20.5, 23.0]),
    row("Brainstem max", MAX, [15.0, 19.1, 23.1, 27.1, 31.0]),
];
const SPINAL_CORD: &[ToleranceRow] = &[
    row("Spinal cord", Volume(0.35), [10.0, 14.0, 18.0, 20.5, 23.0]),
    row("Spinal cord", Volume(1.2), [7.0, 9.7, 12.3, 13.4, 14.5]),
    row("Spinal cord max", MAX, [14.0, 18.0, 21.9, 26.0, 30.0]),
];
const CAUDA_EQUINA: &[ToleranceRow] = &[
    row("Cauda equina", Volume(5.0), [14.0, 18.0, 21.9, 26.0, 30.0]),
    row("Cauda equina max", MAX, [16.0, 20.0, 24.0, 28.0, 32.0]),
];
const SACRAL_PLEXUS: &[ToleranceRow] = &[
    row("Sacral plexus", Volume(5.0), [14.4, 18.5, 22.5, 26.3, 30.0]),
    row("Sacral plexus max", MAX, [16.0, 20.0, 24.0, 28.0, 32.0]),
];
const ESOPHAGUS: &[ToleranceRow] = &[
    row("Esophagus", Volume(5.0), [11.9, 14.8, 17.7, 18.6, 19.5]),
    row("Esophagus max", MAX, [15.4, 20.3, 25.2, 30.1, 35.0]),
];
const BRACHIAL_PLEXUS: &[ToleranceRow] = &[
    row("Brachial plexus", Volume(3.0), [14.0, 17.2, 20.4, 23.7, 27.0]),
    row("Brachial plexus max", MAX, [17.5, 20.8, 24.0, 27.3, 30.5]),
];
const HEART: &[ToleranceRow] = &[
    row("Heart", Volume(15.0), [16.0, 20.0, 24.0, 28.0, 32.0]),
    row("Heart max", MAX, [22.0, 26.0, 30.0, 34.0, 38.0]),
];
const GREAT_VESSELS: &[ToleranceRow] = &[
    row("Great vessels", Volume(10.0), [31.0, 35.0, 39.0, 43.0, 47.0]),
    row("Great vessels max", MAX, [37.0, 41.0, 45.0, 49.0, 53.0]),
];
const TRACHEA: &[ToleranceRow] = &[
    row("Trachea", Volume(4.0), [10.5, 12.8, 15.0, 15.8, 16.5]),
    row("Trachea max", MAX, [20.2, 25.1, 30.0, 35.0, 40.0]),
];
const SMALL_BRONCHUS: &[ToleranceRow] = &[
    row("Small bronchus", Volume(0.5), [12.4, 15.7, 18.9, 20.0, 21.0]),
    row("Small bronchus max", MAX, [13.3, 18.2, 23.1, 28.1, 33.0]),
];
const RIB: &[ToleranceRow] = &[
    row("Rib", Volume(1.0), [22.0, 25.4, 28.8, 31.9, 35.0]),
    row("Rib max", MAX, [30.0, 33.5, 36.9, 40.0, 43.0]),
];
const SKIN: &[ToleranceRow] = &[
    row("Skin", Volume(10.0), [23.0, 26.5, 30.0, 33.3, 36.5]),
    row("Skin max", MAX, [26.0, 29.5, 33.0, 36.3, 39.5]),
];
const STOMACH: &[ToleranceRow] = &[
    row("Stomach", Volume(10.0), [11.2, 13.9, 16.5, 17.3, 18.0]),
    row("Stomach max", MAX, [12.4, 17.3, 22.2, 27.1, 32.0]),
];
const BOWEL: &[ToleranceRow] = &[
    row("Bowel", Volume(5.0), [11.9, 14.8, 17.7, 18.6, 19.5]),
    row("Bowel max", MAX, [15.4, 20.3, 25.2, 30.1, 35.0]),
];
const RENAL_HILUM: &[ToleranceRow] = &[row(
    "Renal hilum",
    PercentVolume(66.6),
    [10.6, 14.6, 18.6, 20.8, 23.0],
)];
const LUNG: &[ToleranceRow] = &[
    row("Lung", SparedVolume(1500.0), [7.0, 9.3, 11.6, 12.1, 12.5]),
    row("Lung", SparedVolume(1000.0), [7.4, 9.9, 12.4, 13.0, 13.5]),
];
const LIVER: &[ToleranceRow] = &[row("Liver", SparedVolume(700.0), [9.1, 14.2, 19.2, 20.1, 21.0])];
const RENAL_CORTEX: &[ToleranceRow] = &[row(
    "Renal cortex",
    SparedVolume(200.0),
    [8.4, 12.2, 16.0, 16.8, 17.5],
)];

impl Organ {
    pub const ALL: [Organ; 20] = [
        Organ::OpticPathway,
        Organ::Cochlea,
        Organ::Brainstem,
        Organ::SpinalCord,
        Organ::CaudaEquina,
        Organ::SacralPlexus,
        Organ::Esophagus,
        Organ::BrachialPlexus,
        Organ::Heart,
        Organ::GreatVessels,
        Organ::Trachea,
        Organ::SmallBronchus,
        Organ::Rib,
        Organ::Skin,
        Organ::Stomach,
        Organ::Bowel,
        Organ::RenalHilum,
        Organ::Lung,
        Organ::Liver,
        Organ::RenalCortex,
    ];

    pub fn tolerances(self) -> &'static [ToleranceRow] {
        match self {
            Organ::OpticPathway => OPTIC_PATHWAY,
            Organ::Cochlea => COCHLEA,
            Organ::Brainstem => BRAINSTEM,
            Organ::SpinalCord => SPINAL_CORD,
            Organ::CaudaEquina => CAUDA_EQUINA,
            Organ::SacralPlexus => SACRAL_PLEXUS,
            Organ::Esophagus => ESOPHAGUS,
            Organ::BrachialPlexus => BRACHIAL_PLEXUS,
            Organ::Heart => HEART,
            Organ::GreatVessels => GREAT_VESSELS,
            Organ::Trachea => TRACHEA,
            Organ::SmallBronchus => SMALL_BRONCHUS,
            Organ::Rib => RIB,
            Organ::Skin => SKIN,
            Organ::Stomach => STOMACH,
            Organ::Bowel => BOWEL,
            Organ::RenalHilum => RENAL_HILUM,
            Organ::Lung => LUNG,
            Organ::Liver => LIVER,
            Organ::RenalCortex => RENAL_CORTEX,
        }
    }

    /// Constraints of this organ for a fractionation, with their labels.
    pub fn constraints(self, fractionation: Fractionation) -> Vec<(&'static str, OrganConstraint)> {
        self.tolerances()
            .iter()
            .map(|row| (row.label, row.constraint(fractionation)))
            .collect()
    }

    /// Evaluates every tolerance of this organ against its DVH.
    pub fn evaluate(
        self,
        fractionation: Fractionation,
        dvh: &Dvh,
    ) -> Result<Vec<(&'static str, ConstraintOutcome)>> {
        self.constraints(fractionation)
            .into_iter()
            .map(|(label, constraint)| {
                evaluate_constraint(&constraint, dvh).map(|outcome| (label, outcome))
            })
            .collect()
    }
}

impl fmt::Display for Organ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tolerances()[0].label)
    }
}
