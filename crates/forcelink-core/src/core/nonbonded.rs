use super::collections::{Collection, CollectionKind};
use super::keys::{LibraryChargeKey, ParticleKey, TopologyKey};
use super::units::{Quantity, Unit};
use super::virtual_sites::VirtualSiteCollection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Scaling factors applied to bonded-neighbor nonbonded interactions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NonbondedScales {
    pub scale_12: f64,
    pub scale_13: f64,
    pub scale_14: f64,
    pub scale_15: f64,
}

impl Default for NonbondedScales {
    fn default() -> Self {
        Self {
            scale_12: 0.0,
            scale_13: 0.0,
            scale_14: 0.5,
            scale_15: 1.0,
        }
    }
}

/// Combination rule for pairwise Lennard-Jones parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MixingRule {
    #[default]
    LorentzBerthelot,
    Geometric,
}

impl MixingRule {
    /// Pairwise sigma and epsilon for two particles under this rule.
    pub fn combine(&self, sigma1: f64, epsilon1: f64, sigma2: f64, epsilon2: f64) -> (f64, f64) {
        let epsilon = (epsilon1 * epsilon2).sqrt();
        let sigma = match self {
            MixingRule::LorentzBerthelot => 0.5 * (sigma1 + sigma2),
            MixingRule::Geometric => (sigma1 * sigma2).sqrt(),
        };
        (sigma, epsilon)
    }
}

/// vdW treatment under periodic boundary conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PeriodicVdwMethod {
    #[default]
    Cutoff,
    NoCutoff,
    Pme,
}

/// vdW treatment without a periodic box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NonperiodicVdwMethod {
    #[default]
    NoCutoff,
    Cutoff,
}

/// Electrostatics treatment under periodic boundary conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PeriodicElectrostaticsMethod {
    /// Ewald-class mesh summation (PME).
    #[default]
    Pme,
    Cutoff,
    NoCutoff,
}

/// Electrostatics treatment without a periodic box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NonperiodicElectrostaticsMethod {
    /// Plain Coulomb with no truncation.
    #[default]
    Coulomb,
    Cutoff,
    NoCutoff,
}

/// The vdW force category: per-atom LJ potentials plus the cutoff scheme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VdwCollection {
    pub cutoff: Quantity,
    pub switch_width: Quantity,
    pub mixing_rule: MixingRule,
    pub scales: NonbondedScales,
    pub periodic_method: PeriodicVdwMethod,
    pub nonperiodic_method: NonperiodicVdwMethod,
    pub terms: Collection,
}

impl Default for VdwCollection {
    fn default() -> Self {
        Self {
            cutoff: Quantity::new(9.0, Unit::Angstrom),
            switch_width: Quantity::new(1.0, Unit::Angstrom),
            mixing_rule: MixingRule::default(),
            scales: NonbondedScales::default(),
            periodic_method: PeriodicVdwMethod::default(),
            nonperiodic_method: NonperiodicVdwMethod::default(),
            terms: Collection::new(CollectionKind::Vdw),
        }
    }
}

impl VdwCollection {
    /// Per-atom (sigma, epsilon) rows in atom-index order, in the stored
    /// (angstrom, kcal/mol) units.
    pub fn system_parameters(
        &self,
    ) -> Result<Vec<Vec<f64>>, super::collections::ParameterLookupError> {
        self.terms.get_system_parameters(&["sigma", "epsilon"])
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ChargeError {
    #[error(
        "No charge sources registered on the Electrostatics collection; charges cannot be computed from nothing"
    )]
    MissingChargeSources,
    #[error("Library charge for atoms {key:?} lists {provided} values for {expected} atoms")]
    LibraryChargeArityMismatch {
        key: Vec<usize>,
        provided: usize,
        expected: usize,
    },
}

/// A library-charge assignment: one charge per spanned atom.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LibraryChargeCollection {
    #[serde(with = "crate::core::map_serde")]
    pub charges: BTreeMap<LibraryChargeKey, Vec<Quantity>>,
}

impl LibraryChargeCollection {
    pub fn is_empty(&self) -> bool {
        self.charges.is_empty()
    }
}

/// The electrostatics force category.
///
/// The total charge on a particle is an aggregate of contributions (direct
/// partial charges, library charges, virtual-site increments) rather than a
/// single potential lookup, so [`ElectrostaticsCollection::charges`] derives
/// it on every call instead of caching it; the contributing sources remain
/// the single source of truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectrostaticsCollection {
    pub cutoff: Quantity,
    pub scales: NonbondedScales,
    pub periodic_method: PeriodicElectrostaticsMethod,
    pub nonperiodic_method: NonperiodicElectrostaticsMethod,
    /// Direct per-atom partial charges, keyed by single-atom topology key.
    #[serde(with = "crate::core::map_serde")]
    pub partial_charges: BTreeMap<TopologyKey, Quantity>,
}

impl Default for ElectrostaticsCollection {
    fn default() -> Self {
        Self {
            cutoff: Quantity::new(9.0, Unit::Angstrom),
            scales: NonbondedScales::default(),
            periodic_method: PeriodicElectrostaticsMethod::default(),
            nonperiodic_method: NonperiodicElectrostaticsMethod::default(),
            partial_charges: BTreeMap::new(),
        }
    }
}

impl ElectrostaticsCollection {
    pub fn set_partial_charge(&mut self, atom_index: usize, charge: Quantity) {
        self.partial_charges
            .insert(TopologyKey::atom(atom_index), charge);
    }

    /// Shifts every direct partial-charge key by `offset`.
    pub fn offset_atoms(&mut self, offset: usize) {
        self.partial_charges = self
            .partial_charges
            .iter()
            .map(|(key, charge)| (key.offset_by(offset), *charge))
            .collect();
    }

    /// Aggregates the total charge per particle from every contributing
    /// source: direct partial charges, library charges spanning several
    /// atoms, and virtual-site charge increments (each increment is moved
    /// from its orientation atom onto the site).
    ///
    /// Fails when no source has been registered at all: "no charge assigned"
    /// is a parameterization bug, not a valid physical state.
    pub fn charges(
        &self,
        library_charges: Option<&LibraryChargeCollection>,
        virtual_sites: Option<&VirtualSiteCollection>,
    ) -> Result<BTreeMap<ParticleKey, f64>, ChargeError> {
        let has_library = library_charges.is_some_and(|lc| !lc.is_empty());
        let has_sites = virtual_sites.is_some_and(|vs| !vs.charge_increments.is_empty());
        if self.partial_charges.is_empty() && !has_library && !has_sites {
            return Err(ChargeError::MissingChargeSources);
        }

        let mut totals: BTreeMap<ParticleKey, f64> = BTreeMap::new();

        for (key, charge) in &self.partial_charges {
            if let Some(&index) = key.atom_indices.first() {
                *totals.entry(ParticleKey::Atom(index)).or_insert(0.0) += charge.value;
            }
        }

        if let Some(library) = library_charges {
            for (key, values) in &library.charges {
                if values.len() != key.atom_indices.len() {
                    return Err(ChargeError::LibraryChargeArityMismatch {
                        key: key.atom_indices.clone(),
                        provided: values.len(),
                        expected: key.atom_indices.len(),
                    });
                }
                for (&index, value) in key.atom_indices.iter().zip(values) {
                    *totals.entry(ParticleKey::Atom(index)).or_insert(0.0) += value.value;
                }
            }
        }

        if let Some(sites) = virtual_sites {
            for (site_key, increments) in &sites.charge_increments {
                let mut site_charge = 0.0;
                for (&index, increment) in
                    site_key.orientation_atom_indices.iter().zip(increments)
                {
                    // The increment moves charge from the atom onto the site
                    *totals.entry(ParticleKey::Atom(index)).or_insert(0.0) -= increment.value;
                    site_charge += increment.value;
                }
                *totals
                    .entry(ParticleKey::VirtualSite(site_key.clone()))
                    .or_insert(0.0) += site_charge;
            }
        }

        Ok(totals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::keys::{VirtualSiteKey, VirtualSiteKind};
    use crate::core::virtual_sites::{VirtualSite, VirtualSiteCollection};

    const TOLERANCE: f64 = 1e-12;

    fn charge(value: f64) -> Quantity {
        Quantity::new(value, Unit::ElementaryCharge)
    }

    #[test]
    fn defaults_match_the_documented_convention() {
        let vdw = VdwCollection::default();
        assert_eq!(vdw.cutoff, Quantity::new(9.0, Unit::Angstrom));
        assert_eq!(vdw.switch_width, Quantity::new(1.0, Unit::Angstrom));
        assert_eq!(vdw.scales.scale_14, 0.5);
        assert_eq!(vdw.scales.scale_12, 0.0);
        assert_eq!(vdw.mixing_rule, MixingRule::LorentzBerthelot);

        let electrostatics = ElectrostaticsCollection::default();
        assert_eq!(
            electrostatics.periodic_method,
            PeriodicElectrostaticsMethod::Pme
        );
        assert_eq!(
            electrostatics.nonperiodic_method,
            NonperiodicElectrostaticsMethod::Coulomb
        );
    }

    #[test]
    fn mixing_rules_combine_as_documented() {
        let (sigma, epsilon) = MixingRule::LorentzBerthelot.combine(2.0, 0.25, 4.0, 1.0);
        assert!((sigma - 3.0).abs() < TOLERANCE);
        assert!((epsilon - 0.5).abs() < TOLERANCE);

        let (sigma, _) = MixingRule::Geometric.combine(2.0, 0.25, 8.0, 1.0);
        assert!((sigma - 4.0).abs() < TOLERANCE);
    }

    #[test]
    fn charges_fail_without_any_source() {
        let electrostatics = ElectrostaticsCollection::default();
        assert_eq!(
            electrostatics.charges(None, None),
            Err(ChargeError::MissingChargeSources)
        );
    }

    #[test]
    fn direct_charges_aggregate_per_atom() {
        let mut electrostatics = ElectrostaticsCollection::default();
        electrostatics.set_partial_charge(0, charge(-0.8));
        electrostatics.set_partial_charge(1, charge(0.4));
        electrostatics.set_partial_charge(2, charge(0.4));

        let totals = electrostatics.charges(None, None).unwrap();
        assert_eq!(totals.len(), 3);
        assert!((totals[&ParticleKey::Atom(0)] + 0.8).abs() < TOLERANCE);
        let sum: f64 = totals.values().sum();
        assert!(sum.abs() < TOLERANCE);
    }

    #[test]
    fn library_charges_add_onto_direct_charges() {
        let mut electrostatics = ElectrostaticsCollection::default();
        electrostatics.set_partial_charge(0, charge(0.1));

        let mut library = LibraryChargeCollection::default();
        library.charges.insert(
            LibraryChargeKey::new(vec![0, 1]),
            vec![charge(-0.3), charge(0.3)],
        );

        let totals = electrostatics.charges(Some(&library), None).unwrap();
        assert!((totals[&ParticleKey::Atom(0)] - (0.1 - 0.3)).abs() < TOLERANCE);
        assert!((totals[&ParticleKey::Atom(1)] - 0.3).abs() < TOLERANCE);
    }

    #[test]
    fn library_charge_arity_mismatch_is_rejected() {
        let electrostatics = ElectrostaticsCollection::default();
        let mut library = LibraryChargeCollection::default();
        library
            .charges
            .insert(LibraryChargeKey::new(vec![0, 1]), vec![charge(-0.3)]);

        assert!(matches!(
            electrostatics.charges(Some(&library), None),
            Err(ChargeError::LibraryChargeArityMismatch {
                provided: 1,
                expected: 2,
                ..
            })
        ));
    }

    #[test]
    fn virtual_site_increments_move_charge_onto_the_site() {
        let mut electrostatics = ElectrostaticsCollection::default();
        electrostatics.set_partial_charge(0, charge(-0.8));
        electrostatics.set_partial_charge(1, charge(0.4));
        electrostatics.set_partial_charge(2, charge(0.4));

        let mut sites = VirtualSiteCollection::default();
        let site_key = VirtualSiteKey {
            orientation_atom_indices: vec![0, 1, 2],
            kind: VirtualSiteKind::DivalentLonePair,
            name: "EP".to_string(),
        };
        sites.insert(
            site_key.clone(),
            VirtualSite::divalent_lone_pair(
                vec![0, 1, 2],
                Quantity::new(-0.15, Unit::Angstrom),
                Quantity::new(0.0, Unit::Degree),
            ),
            vec![charge(0.52), charge(0.0), charge(0.0)],
        );

        let totals = electrostatics.charges(None, Some(&sites)).unwrap();
        assert!((totals[&ParticleKey::Atom(0)] - (-0.8 - 0.52)).abs() < TOLERANCE);
        assert!(
            (totals[&ParticleKey::VirtualSite(site_key)] - 0.52).abs() < TOLERANCE
        );
        // Total charge is conserved by the move
        let sum: f64 = totals.values().sum();
        assert!(sum.abs() < TOLERANCE);
    }
}
