use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub const KCAL_TO_KJ: f64 = 4.184; // Thermochemical calorie
pub const ANGSTROM_TO_NM: f64 = 0.1;

/// Physical dimension of a unit, used to reject nonsensical conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dimension {
    Length,
    Energy,
    SpringConstantLength,
    SpringConstantAngle,
    Angle,
    Charge,
    Mass,
    Dimensionless,
}

/// The unit vocabulary of the collection model.
///
/// Bonded and nonbonded parameters arrive from the assigning engine in
/// chemistry units (kcal/mol, Angstrom, degree) and leave for each MD engine
/// in that engine's canonical units (e.g. kJ/mol and nm for OpenMM and
/// GROMACS). Only conversions within one [`Dimension`] are defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Unit {
    Angstrom,
    Nanometer,
    KilocaloriePerMole,
    KilojoulePerMole,
    KcalPerMolPerAngstromSquared,
    KjPerMolPerNmSquared,
    KcalPerMolPerRadianSquared,
    KjPerMolPerRadianSquared,
    Degree,
    Radian,
    ElementaryCharge,
    Dalton,
    Dimensionless,
}

impl Unit {
    pub fn dimension(&self) -> Dimension {
        match self {
            Unit::Angstrom | Unit::Nanometer => Dimension::Length,
            Unit::KilocaloriePerMole | Unit::KilojoulePerMole => Dimension::Energy,
            Unit::KcalPerMolPerAngstromSquared | Unit::KjPerMolPerNmSquared => {
                Dimension::SpringConstantLength
            }
            Unit::KcalPerMolPerRadianSquared | Unit::KjPerMolPerRadianSquared => {
                Dimension::SpringConstantAngle
            }
            Unit::Degree | Unit::Radian => Dimension::Angle,
            Unit::ElementaryCharge => Dimension::Charge,
            Unit::Dalton => Dimension::Mass,
            Unit::Dimensionless => Dimension::Dimensionless,
        }
    }

    /// Multiplier from this unit to the base unit of its dimension.
    ///
    /// Base units: nm, kJ/mol, kJ/mol/nm^2, kJ/mol/rad^2, radian, e, Da.
    fn to_base_factor(&self) -> f64 {
        match self {
            Unit::Angstrom => ANGSTROM_TO_NM,
            Unit::Nanometer => 1.0,
            Unit::KilocaloriePerMole => KCAL_TO_KJ,
            Unit::KilojoulePerMole => 1.0,
            Unit::KcalPerMolPerAngstromSquared => {
                KCAL_TO_KJ / (ANGSTROM_TO_NM * ANGSTROM_TO_NM)
            }
            Unit::KjPerMolPerNmSquared => 1.0,
            Unit::KcalPerMolPerRadianSquared => KCAL_TO_KJ,
            Unit::KjPerMolPerRadianSquared => 1.0,
            Unit::Degree => std::f64::consts::PI / 180.0,
            Unit::Radian => 1.0,
            Unit::ElementaryCharge => 1.0,
            Unit::Dalton => 1.0,
            Unit::Dimensionless => 1.0,
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Unit::Angstrom => "angstrom",
            Unit::Nanometer => "nanometer",
            Unit::KilocaloriePerMole => "kcal/mol",
            Unit::KilojoulePerMole => "kJ/mol",
            Unit::KcalPerMolPerAngstromSquared => "kcal/mol/angstrom^2",
            Unit::KjPerMolPerNmSquared => "kJ/mol/nm^2",
            Unit::KcalPerMolPerRadianSquared => "kcal/mol/radian^2",
            Unit::KjPerMolPerRadianSquared => "kJ/mol/radian^2",
            Unit::Degree => "degree",
            Unit::Radian => "radian",
            Unit::ElementaryCharge => "elementary_charge",
            Unit::Dalton => "dalton",
            Unit::Dimensionless => "dimensionless",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum UnitError {
    #[error("Cannot convert from '{from}' ({from_dim:?}) to '{to}' ({to_dim:?})")]
    IncompatibleUnits {
        from: Unit,
        from_dim: Dimension,
        to: Unit,
        to_dim: Dimension,
    },
}

/// A unit-carrying numeric value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    pub value: f64,
    pub unit: Unit,
}

impl Quantity {
    pub fn new(value: f64, unit: Unit) -> Self {
        Self { value, unit }
    }

    pub fn dimensionless(value: f64) -> Self {
        Self {
            value,
            unit: Unit::Dimensionless,
        }
    }

    /// Converts into `target`, failing across dimensions.
    pub fn to(&self, target: Unit) -> Result<Quantity, UnitError> {
        if self.unit.dimension() != target.dimension() {
            return Err(UnitError::IncompatibleUnits {
                from: self.unit,
                from_dim: self.unit.dimension(),
                to: target,
                to_dim: target.dimension(),
            });
        }
        let value = self.value * self.unit.to_base_factor() / target.to_base_factor();
        Ok(Quantity {
            value,
            unit: target,
        })
    }

    /// The numeric value expressed in `target`, for exporter hot paths.
    pub fn value_in(&self, target: Unit) -> Result<f64, UnitError> {
        Ok(self.to(target)?.value)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.value, self.unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-12;

    fn f64_approx_equal(a: f64, b: f64) -> bool {
        (a - b).abs() < TOLERANCE
    }

    #[test]
    fn angstrom_to_nanometer_scales_by_one_tenth() {
        let q = Quantity::new(9.0, Unit::Angstrom).to(Unit::Nanometer).unwrap();
        assert!(f64_approx_equal(q.value, 0.9));
        assert_eq!(q.unit, Unit::Nanometer);
    }

    #[test]
    fn kcal_to_kj_uses_thermochemical_calorie() {
        let q = Quantity::new(1.0, Unit::KilocaloriePerMole)
            .to(Unit::KilojoulePerMole)
            .unwrap();
        assert!(f64_approx_equal(q.value, 4.184));
    }

    #[test]
    fn bond_spring_constant_conversion_combines_energy_and_length() {
        // 1 kcal/mol/A^2 = 4.184 kJ/mol / (0.1 nm)^2 = 418.4 kJ/mol/nm^2
        let q = Quantity::new(1.0, Unit::KcalPerMolPerAngstromSquared)
            .to(Unit::KjPerMolPerNmSquared)
            .unwrap();
        assert!(f64_approx_equal(q.value, 418.4));
    }

    #[test]
    fn degree_to_radian_roundtrips() {
        let q = Quantity::new(180.0, Unit::Degree).to(Unit::Radian).unwrap();
        assert!(f64_approx_equal(q.value, std::f64::consts::PI));
        let back = q.to(Unit::Degree).unwrap();
        assert!(f64_approx_equal(back.value, 180.0));
    }

    #[test]
    fn conversion_to_same_unit_is_identity() {
        let q = Quantity::new(2.5, Unit::Angstrom).to(Unit::Angstrom).unwrap();
        assert!(f64_approx_equal(q.value, 2.5));
    }

    #[test]
    fn cross_dimension_conversion_fails() {
        let result = Quantity::new(1.0, Unit::Angstrom).to(Unit::KilojoulePerMole);
        assert!(matches!(
            result,
            Err(UnitError::IncompatibleUnits {
                from: Unit::Angstrom,
                to: Unit::KilojoulePerMole,
                ..
            })
        ));
    }

    #[test]
    fn quantity_serde_roundtrip_preserves_value_and_unit() {
        let q = Quantity::new(0.5, Unit::KilocaloriePerMole);
        let json = serde_json::to_string(&q).unwrap();
        let back: Quantity = serde_json::from_str(&json).unwrap();
        assert_eq!(q, back);
    }
}
