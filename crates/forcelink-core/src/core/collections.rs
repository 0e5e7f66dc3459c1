pub use super::keys::{PotentialKey, TopologyKey};

use super::units::Quantity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// The force categories a container can hold.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum CollectionKind {
    Bonds,
    Angles,
    ProperTorsions,
    ImproperTorsions,
    Vdw,
    Electrostatics,
    Constraints,
    LibraryCharges,
    VirtualSites,
}

impl CollectionKind {
    /// Canonical name used for container lookup and serialization.
    pub fn name(&self) -> &'static str {
        match self {
            CollectionKind::Bonds => "Bonds",
            CollectionKind::Angles => "Angles",
            CollectionKind::ProperTorsions => "ProperTorsions",
            CollectionKind::ImproperTorsions => "ImproperTorsions",
            CollectionKind::Vdw => "vdW",
            CollectionKind::Electrostatics => "Electrostatics",
            CollectionKind::Constraints => "Constraints",
            CollectionKind::LibraryCharges => "LibraryCharges",
            CollectionKind::VirtualSites => "VirtualSites",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Bonds" => Some(CollectionKind::Bonds),
            "Angles" => Some(CollectionKind::Angles),
            "ProperTorsions" => Some(CollectionKind::ProperTorsions),
            "ImproperTorsions" => Some(CollectionKind::ImproperTorsions),
            "vdW" => Some(CollectionKind::Vdw),
            "Electrostatics" => Some(CollectionKind::Electrostatics),
            "Constraints" => Some(CollectionKind::Constraints),
            "LibraryCharges" => Some(CollectionKind::LibraryCharges),
            "VirtualSites" => Some(CollectionKind::VirtualSites),
        _ => None,
        }
    }

    /// Whether the category keys one slot per atom rather than per tuple.
    pub fn is_per_particle(&self) -> bool {
        matches!(self, CollectionKind::Vdw | CollectionKind::LibraryCharges)
    }
}

impl fmt::Display for CollectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An immutable bag of named, unit-carrying parameters for one distinct
/// parameter set (e.g. one bond type's k and length).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Potential {
    parameters: BTreeMap<String, Quantity>,
}

impl Potential {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style parameter insertion, used when translating from the
    /// assigning engine's output.
    pub fn with(mut self, name: &str, value: Quantity) -> Self {
        self.parameters.insert(name.to_string(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Quantity> {
        self.parameters.get(name)
    }

    pub fn parameters(&self) -> &BTreeMap<String, Quantity> {
        &self.parameters
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ParameterLookupError {
    #[error("No parameters found for atoms {key} in the '{kind}' collection")]
    MissingParameters { kind: CollectionKind, key: TopologyKey },
    #[error(
        "Slot {key} in the '{kind}' collection references potential '{potential}' which is absent from the potential store"
    )]
    MissingPotential {
        kind: CollectionKind,
        key: TopologyKey,
        potential: PotentialKey,
    },
    #[error("Potential '{potential}' in the '{kind}' collection has no parameter named '{name}'")]
    MissingParameterField {
        kind: CollectionKind,
        potential: PotentialKey,
        name: String,
    },
}

/// One force category's data: a slot map from interaction site to potential
/// identity, plus a deduplicated potential store.
///
/// Both maps are ordered; their iteration order is the canonical term order
/// every exporter and the combination operator rely on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    kind: CollectionKind,
    #[serde(with = "crate::core::map_serde")]
    slot_map: BTreeMap<TopologyKey, PotentialKey>,
    #[serde(with = "crate::core::map_serde")]
    potentials: BTreeMap<PotentialKey, Potential>,
}

impl Collection {
    pub fn new(kind: CollectionKind) -> Self {
        Self {
            kind,
            slot_map: BTreeMap::new(),
            potentials: BTreeMap::new(),
        }
    }

    pub fn kind(&self) -> CollectionKind {
        self.kind
    }

    pub fn slot_map(&self) -> &BTreeMap<TopologyKey, PotentialKey> {
        &self.slot_map
    }

    pub fn potentials(&self) -> &BTreeMap<PotentialKey, Potential> {
        &self.potentials
    }

    pub fn is_empty(&self) -> bool {
        self.slot_map.is_empty()
    }

    pub fn len(&self) -> usize {
        self.slot_map.len()
    }

    /// Resolves a topology key through the slot map and potential store.
    ///
    /// A dangling slot-map entry is an invariant violation and fails loudly
    /// rather than being skipped.
    pub fn get_parameters(&self, key: &TopologyKey) -> Result<&Potential, ParameterLookupError> {
        let potential_key =
            self.slot_map
                .get(key)
                .ok_or_else(|| ParameterLookupError::MissingParameters {
                    kind: self.kind,
                    key: key.clone(),
                })?;
        self.potentials
            .get(potential_key)
            .ok_or_else(|| ParameterLookupError::MissingPotential {
                kind: self.kind,
                key: key.clone(),
                potential: potential_key.clone(),
            })
    }

    /// Inserts a slot with an externally assigned potential identity.
    ///
    /// This is the path used by the parameterization input boundary, where
    /// the assigning engine owns the identity scheme.
    pub fn insert_assigned(
        &mut self,
        key: TopologyKey,
        potential_key: PotentialKey,
        potential: Potential,
    ) {
        self.slot_map.insert(key, potential_key.clone());
        self.potentials.insert(potential_key, potential);
    }

    /// Inserts a slot, reusing the identity of a value-equal stored
    /// potential instead of duplicating storage.
    ///
    /// Returns the identity the slot ended up mapped to.
    pub fn add_or_update(&mut self, key: TopologyKey, potential: Potential) -> PotentialKey {
        if let Some((existing, _)) = self.potentials.iter().find(|(_, p)| **p == potential) {
            let existing = existing.clone();
            self.slot_map.insert(key, existing.clone());
            return existing;
        }
        let potential_key = self.next_generated_key();
        self.slot_map.insert(key, potential_key.clone());
        self.potentials.insert(potential_key.clone(), potential);
        potential_key
    }

    fn next_generated_key(&self) -> PotentialKey {
        let mut n = self.potentials.len();
        loop {
            let candidate = PotentialKey::new(&format!("{}-{n}", self.kind.name()));
            if !self.potentials.contains_key(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    /// Binds a slot to an already-stored potential identity. Used by the
    /// combination operator after collision resolution.
    pub fn insert_slot(&mut self, key: TopologyKey, potential_key: PotentialKey) {
        self.slot_map.insert(key, potential_key);
    }

    pub fn insert_potential(&mut self, key: PotentialKey, potential: Potential) {
        self.potentials.insert(key, potential);
    }

    /// Shifts every slot's atom indices by `offset`, leaving the potential
    /// store untouched.
    pub fn offset_slots(&mut self, offset: usize) {
        self.slot_map = self
            .slot_map
            .iter()
            .map(|(key, potential_key)| (key.offset_by(offset), potential_key.clone()))
            .collect();
    }

    /// Verifies referential integrity: every slot-map value resolves.
    pub fn check_integrity(&self) -> Result<(), ParameterLookupError> {
        for (key, potential_key) in &self.slot_map {
            if !self.potentials.contains_key(potential_key) {
                return Err(ParameterLookupError::MissingPotential {
                    kind: self.kind,
                    key: key.clone(),
                    potential: potential_key.clone(),
                });
            }
        }
        Ok(())
    }

    /// Produces the canonical numeric parameter table.
    ///
    /// Per-particle categories order rows by atom index; per-interaction
    /// categories follow slot-map iteration order. Each row lists the
    /// requested parameter names' raw values in their stored units.
    pub fn get_system_parameters(
        &self,
        parameter_names: &[&str],
    ) -> Result<Vec<Vec<f64>>, ParameterLookupError> {
        let mut entries: Vec<(&TopologyKey, &PotentialKey)> = self.slot_map.iter().collect();
        if self.kind.is_per_particle() {
            entries.sort_by_key(|(key, _)| key.atom_indices.first().copied().unwrap_or(0));
        }

        let mut rows = Vec::with_capacity(entries.len());
        for (key, potential_key) in entries {
            let potential = self.potentials.get(potential_key).ok_or_else(|| {
                ParameterLookupError::MissingPotential {
                    kind: self.kind,
                    key: key.clone(),
                    potential: potential_key.clone(),
                }
            })?;
            let mut row = Vec::with_capacity(parameter_names.len());
            for name in parameter_names {
                let value = potential.get(name).ok_or_else(|| {
                    ParameterLookupError::MissingParameterField {
                        kind: self.kind,
                        potential: potential_key.clone(),
                        name: name.to_string(),
                    }
                })?;
                row.push(value.value);
            }
            rows.push(row);
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::units::Unit;

    fn lj(sigma: f64, epsilon: f64) -> Potential {
        Potential::new()
            .with("sigma", Quantity::new(sigma, Unit::Angstrom))
            .with("epsilon", Quantity::new(epsilon, Unit::KilocaloriePerMole))
    }

    #[test]
    fn get_parameters_resolves_assigned_slot() {
        let mut bonds = Collection::new(CollectionKind::Bonds);
        let potential = Potential::new()
            .with("k", Quantity::new(500.0, Unit::KcalPerMolPerAngstromSquared))
            .with("length", Quantity::new(1.09, Unit::Angstrom));
        bonds.insert_assigned(
            TopologyKey::bond(0, 1),
            PotentialKey::new("b1"),
            potential.clone(),
        );

        let found = bonds.get_parameters(&TopologyKey::bond(1, 0)).unwrap();
        assert_eq!(found, &potential);
        assert_eq!(found.get("length").unwrap().value, 1.09);
    }

    #[test]
    fn missing_key_fails_with_missing_parameters() {
        let bonds = Collection::new(CollectionKind::Bonds);
        let err = bonds.get_parameters(&TopologyKey::bond(0, 100)).unwrap_err();
        assert!(matches!(
            err,
            ParameterLookupError::MissingParameters { kind: CollectionKind::Bonds, .. }
        ));
        assert!(err.to_string().contains("[0, 100]"));
    }

    #[test]
    fn dangling_slot_fails_at_access_not_silently() {
        let mut bonds = Collection::new(CollectionKind::Bonds);
        bonds
            .slot_map
            .insert(TopologyKey::bond(0, 1), PotentialKey::new("ghost"));

        assert!(matches!(
            bonds.get_parameters(&TopologyKey::bond(0, 1)),
            Err(ParameterLookupError::MissingPotential { .. })
        ));
        assert!(bonds.check_integrity().is_err());
        assert!(matches!(
            bonds.get_system_parameters(&[]),
            Err(ParameterLookupError::MissingPotential { .. })
        ));
    }

    #[test]
    fn add_or_update_deduplicates_value_equal_potentials() {
        let mut vdw = Collection::new(CollectionKind::Vdw);
        let key_a = vdw.add_or_update(TopologyKey::atom(0), lj(3.4, 0.1));
        let key_b = vdw.add_or_update(TopologyKey::atom(1), lj(3.4, 0.1));
        let key_c = vdw.add_or_update(TopologyKey::atom(2), lj(2.5, 0.05));

        assert_eq!(key_a, key_b);
        assert_ne!(key_a, key_c);
        assert_eq!(vdw.potentials().len(), 2);
        assert_eq!(vdw.len(), 3);
    }

    #[test]
    fn system_parameters_follow_atom_index_order_for_per_particle_kinds() {
        let mut vdw = Collection::new(CollectionKind::Vdw);
        // Insert out of order; atom index order must win
        vdw.add_or_update(TopologyKey::atom(2), lj(3.0, 0.3));
        vdw.add_or_update(TopologyKey::atom(0), lj(1.0, 0.1));
        vdw.add_or_update(TopologyKey::atom(1), lj(2.0, 0.2));

        let table = vdw.get_system_parameters(&["sigma", "epsilon"]).unwrap();
        assert_eq!(
            table,
            vec![vec![1.0, 0.1], vec![2.0, 0.2], vec![3.0, 0.3]]
        );
    }

    #[test]
    fn system_parameters_follow_slot_order_for_interaction_kinds() {
        let mut bonds = Collection::new(CollectionKind::Bonds);
        let potential = Potential::new().with("k", Quantity::new(400.0, Unit::KcalPerMolPerAngstromSquared));
        bonds.insert_assigned(TopologyKey::bond(2, 3), PotentialKey::new("b2"), potential.clone());
        bonds.insert_assigned(TopologyKey::bond(0, 1), PotentialKey::new("b1"), potential);

        let table = bonds.get_system_parameters(&["k"]).unwrap();
        assert_eq!(table.len(), 2);
        // BTreeMap order puts (0,1) first regardless of insertion order
        let first_key = bonds.slot_map().keys().next().unwrap();
        assert_eq!(first_key, &TopologyKey::bond(0, 1));
    }

    #[test]
    fn missing_parameter_field_is_reported_by_name() {
        let mut vdw = Collection::new(CollectionKind::Vdw);
        vdw.add_or_update(TopologyKey::atom(0), lj(3.4, 0.1));
        let err = vdw.get_system_parameters(&["rmin_half"]).unwrap_err();
        assert!(matches!(
            err,
            ParameterLookupError::MissingParameterField { ref name, .. } if name == "rmin_half"
        ));
    }

    #[test]
    fn collection_serde_roundtrip() {
        let mut vdw = Collection::new(CollectionKind::Vdw);
        vdw.add_or_update(TopologyKey::atom(0), lj(3.4, 0.1));
        let json = serde_json::to_string(&vdw).unwrap();
        let back: Collection = serde_json::from_str(&json).unwrap();
        assert_eq!(back, vdw);

        // Struct-keyed maps persist as pair sequences, not JSON objects
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value["slot_map"].is_array());
        assert!(value["potentials"].is_array());
    }
}
