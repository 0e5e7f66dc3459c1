//! Container combination: merging two parameterized systems into one.

use super::{CollectionData, Interchange, SystemError, require_experimental};
use crate::core::collections::{Collection, Potential, PotentialKey};
use std::collections::BTreeMap;
use tracing::warn;

const BOX_TOLERANCE: f64 = 1e-10;

/// Merges `other` into a copy of `left`, offsetting every atom index in
/// `other` by `left`'s atom count.
///
/// Positions survive only when both sides carry them; box vectors must be
/// elementwise equal (or absent on both sides) or the operation fails with
/// [`SystemError::IncompatibleBox`]. Requires the experimental opt-in.
pub fn combine(left: &Interchange, other: &Interchange) -> Result<Interchange, SystemError> {
    require_experimental("Interchange.combine")?;
    warn!(
        "Interchange object combination is experimental and likely to produce strange results. \
         Any workflow using this method is not guaranteed to be suitable for production. \
         Use with extreme caution and thoroughly validate results!"
    );

    check_boxes_compatible(left, other)?;

    let mut result = left.clone();
    let offset = result.topology.extend(other.topology());

    for (name, data) in other.collections() {
        if name == "Electrostatics" {
            merge_electrostatics(&mut result, data, offset)?;
            continue;
        }
        match result.collections.get_mut(name) {
            Some(existing) => merge_collection(existing, data, offset, name)?,
            None => {
                let mut shifted = data.clone();
                offset_collection(&mut shifted, offset);
                result.collections.insert(name.clone(), shifted);
            }
        }
    }

    result.positions = match (left.positions(), other.positions()) {
        (Some(a), Some(b)) => {
            let mut all = a.to_vec();
            all.extend_from_slice(b);
            Some(all)
        }
        _ => {
            if left.positions().is_some() != other.positions().is_some() {
                warn!("One, but not both, containers has positions; the result has no positions");
            }
            None
        }
    };

    Ok(result)
}

fn check_boxes_compatible(left: &Interchange, other: &Interchange) -> Result<(), SystemError> {
    match (left.box_vectors(), other.box_vectors()) {
        (None, None) => Ok(()),
        (Some(a), Some(b)) => {
            let equal = a
                .iter()
                .zip(b.iter())
                .all(|(x, y)| (x - y).abs() < BOX_TOLERANCE);
            if equal { Ok(()) } else { Err(SystemError::IncompatibleBox) }
        }
        _ => Err(SystemError::IncompatibleBox),
    }
}

fn merge_electrostatics(
    result: &mut Interchange,
    incoming: &CollectionData,
    offset: usize,
) -> Result<(), SystemError> {
    let CollectionData::Electrostatics(incoming) = incoming else {
        return Err(SystemError::InternalInconsistency(
            "'Electrostatics' entry does not hold an electrostatics collection".to_string(),
        ));
    };
    match result.collections.get_mut("Electrostatics") {
        Some(CollectionData::Electrostatics(existing)) => {
            if existing.scales != incoming.scales
                || existing.cutoff != incoming.cutoff
                || existing.periodic_method != incoming.periodic_method
                || existing.nonperiodic_method != incoming.nonperiodic_method
            {
                warn!(
                    "Combining electrostatics collections with differing scale factors, cutoffs \
                     or methods; the left-hand settings win"
                );
            }
            for (key, charge) in &incoming.partial_charges {
                existing.partial_charges.insert(key.offset_by(offset), *charge);
            }
            Ok(())
        }
        Some(_) => Err(SystemError::InternalInconsistency(
            "'Electrostatics' entry does not hold an electrostatics collection".to_string(),
        )),
        None => {
            let mut shifted = CollectionData::Electrostatics(incoming.clone());
            offset_collection(&mut shifted, offset);
            result
                .collections
                .insert("Electrostatics".to_string(), shifted);
            Ok(())
        }
    }
}

fn merge_collection(
    existing: &mut CollectionData,
    incoming: &CollectionData,
    offset: usize,
    name: &str,
) -> Result<(), SystemError> {
    match (existing, incoming) {
        (CollectionData::Valence(a), CollectionData::Valence(b)) => {
            merge_terms(a, b, offset);
            Ok(())
        }
        (CollectionData::Vdw(a), CollectionData::Vdw(b)) => {
            if a.scales != b.scales || a.mixing_rule != b.mixing_rule {
                warn!(
                    "Combining vdW collections with differing scale factors or mixing rules; \
                     the left-hand settings win"
                );
            }
            merge_terms(&mut a.terms, &b.terms, offset);
            Ok(())
        }
        (CollectionData::LibraryCharges(a), CollectionData::LibraryCharges(b)) => {
            for (key, values) in &b.charges {
                a.charges.insert(key.offset_by(offset), values.clone());
            }
            Ok(())
        }
        (CollectionData::VirtualSites(a), CollectionData::VirtualSites(b)) => {
            for (key, site) in b.iter() {
                let mut site = site.clone();
                site.offset_orientations(offset);
                let increments = b.charge_increments_for(key).to_vec();
                a.insert(key.offset_by(offset), site, increments);
            }
            Ok(())
        }
        _ => Err(SystemError::InternalInconsistency(format!(
            "collection '{name}' has different shapes in the two containers"
        ))),
    }
}

/// Copies `incoming`'s slots and potentials into `existing`, renaming a
/// potential key only when the same key maps to different parameter values
/// on the two sides.
fn merge_terms(existing: &mut Collection, incoming: &Collection, offset: usize) {
    let mut renames: BTreeMap<PotentialKey, PotentialKey> = BTreeMap::new();
    for (key, potential) in incoming.potentials() {
        let target = resolve_key(existing.potentials(), key, potential);
        if target != *key {
            renames.insert(key.clone(), target.clone());
        }
        existing.insert_potential(target, potential.clone());
    }
    for (topology_key, potential_key) in incoming.slot_map() {
        let mapped = renames
            .get(potential_key)
            .cloned()
            .unwrap_or_else(|| potential_key.clone());
        existing.insert_slot(topology_key.offset_by(offset), mapped);
    }
}

/// Deterministic collision resolution: a key already bound to an equal
/// potential is reused, a key bound to a different potential gets the first
/// free `<id>#<n>` rename.
fn resolve_key(
    potentials: &BTreeMap<PotentialKey, Potential>,
    key: &PotentialKey,
    potential: &Potential,
) -> PotentialKey {
    match potentials.get(key) {
        None => key.clone(),
        Some(existing) if existing == potential => key.clone(),
        Some(_) => {
            let mut n = 1usize;
            loop {
                let candidate = PotentialKey {
                    id: format!("{}#{}", key.id, n),
                    mult: key.mult,
                };
                match potentials.get(&candidate) {
                    None => return candidate,
                    Some(existing) if existing == potential => return candidate,
                    Some(_) => n += 1,
                }
            }
        }
    }
}

fn offset_collection(data: &mut CollectionData, offset: usize) {
    match data {
        CollectionData::Valence(c) => c.offset_slots(offset),
        CollectionData::Vdw(c) => c.terms.offset_slots(offset),
        CollectionData::Electrostatics(c) => c.offset_atoms(offset),
        CollectionData::LibraryCharges(c) => {
            let shifted: BTreeMap<_, _> = c
                .charges
                .iter()
                .map(|(k, v)| (k.offset_by(offset), v.clone()))
                .collect();
            c.charges = shifted;
        }
        CollectionData::VirtualSites(c) => c.offset_atoms(offset),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::keys::{ParticleKey, TopologyKey};
    use crate::core::units::{Quantity, Unit};
    use crate::test_fixtures::{water_interchange, with_experimental, without_experimental};

    #[test]
    fn combine_requires_the_experimental_opt_in() {
        let a = water_interchange();
        let b = water_interchange();
        let result = without_experimental(|| a.combine(&b));
        assert!(matches!(
            result,
            Err(SystemError::ExperimentalDisabled { .. })
        ));
    }

    #[test]
    fn combining_two_waters_offsets_the_right_hand_indices() {
        let a = water_interchange();
        let b = water_interchange();
        let combined = with_experimental(|| a.combine(&b)).unwrap();

        assert_eq!(combined.topology().n_atoms(), 6);
        assert_eq!(combined.positions().unwrap().len(), 6);

        // Identical parameters deduplicate under the original keys
        let bonds = combined.collection("Bonds").unwrap().as_valence().unwrap();
        assert_eq!(bonds.slot_map().len(), 4);
        assert_eq!(bonds.potentials().len(), 1);
        assert!(bonds.slot_map().contains_key(&TopologyKey::bond(3, 4)));
        assert!(bonds.slot_map().contains_key(&TopologyKey::bond(3, 5)));

        let charges = combined.charges().unwrap();
        assert_eq!(charges.len(), 6);
        assert!((charges[&ParticleKey::Atom(3)] + 0.834).abs() < 1e-12);
    }

    #[test]
    fn combined_vdw_rows_stack_left_then_right() {
        let a = water_interchange();
        let b = water_interchange();
        let combined = with_experimental(|| a.combine(&b)).unwrap();

        let left_rows = a.vdw().unwrap().system_parameters().unwrap();
        let combined_rows = combined.vdw().unwrap().system_parameters().unwrap();
        assert_eq!(combined_rows.len(), left_rows.len() * 2);
        assert_eq!(&combined_rows[..3], &left_rows[..]);
        assert_eq!(&combined_rows[3..], &left_rows[..]);
    }

    #[test]
    fn conflicting_potential_keys_are_renamed_deterministically() {
        let a = water_interchange();
        let mut b = water_interchange();
        if let Some(CollectionData::Valence(bonds)) = b.collection_mut("Bonds") {
            let weakened = Potential::new()
                .with(
                    "k",
                    Quantity::new(400.0, Unit::KcalPerMolPerAngstromSquared),
                )
                .with("length", Quantity::new(1.0, Unit::Angstrom));
            bonds.insert_potential(PotentialKey::new("b-OH"), weakened);
        }

        let combined = with_experimental(|| a.combine(&b)).unwrap();
        let bonds = combined.collection("Bonds").unwrap().as_valence().unwrap();
        assert_eq!(bonds.potentials().len(), 2);
        assert!(bonds.potentials().contains_key(&PotentialKey::new("b-OH")));
        assert!(bonds.potentials().contains_key(&PotentialKey::new("b-OH#1")));
        assert_eq!(
            bonds.slot_map()[&TopologyKey::bond(3, 4)],
            PotentialKey::new("b-OH#1")
        );
        // Left-hand slots keep their original binding
        assert_eq!(
            bonds.slot_map()[&TopologyKey::bond(0, 1)],
            PotentialKey::new("b-OH")
        );
    }

    #[test]
    fn mismatched_electrostatics_settings_keep_the_left_hand_side() {
        let a = water_interchange();
        let mut b = water_interchange();
        if let Some(CollectionData::Electrostatics(incoming)) = b.collection_mut("Electrostatics")
        {
            incoming.cutoff = Quantity::new(12.0, Unit::Angstrom);
            incoming.scales.scale_14 = 1.0 / 1.2;
        }

        let combined = with_experimental(|| a.combine(&b)).unwrap();
        let electrostatics = combined.electrostatics().unwrap();
        assert_eq!(electrostatics.cutoff, Quantity::new(9.0, Unit::Angstrom));
        assert_eq!(electrostatics.scales.scale_14, 0.5);
        // Charges from both sides still land in the merged collection
        assert_eq!(combined.charges().unwrap().len(), 6);
    }

    #[test]
    fn positions_survive_only_when_both_sides_have_them() {
        let a = water_interchange();
        let mut b = water_interchange();
        b.set_positions(None);
        let combined = with_experimental(|| a.combine(&b)).unwrap();
        assert!(combined.positions().is_none());
    }

    #[test]
    fn unequal_boxes_refuse_to_combine() {
        let mut a = water_interchange();
        let mut b = water_interchange();
        a.set_box(&[20.0, 20.0, 20.0]).unwrap();
        b.set_box(&[25.0, 25.0, 25.0]).unwrap();
        let result = with_experimental(|| a.combine(&b));
        assert!(matches!(result, Err(SystemError::IncompatibleBox)));

        b.clear_box();
        let result = with_experimental(|| a.combine(&b));
        assert!(matches!(result, Err(SystemError::IncompatibleBox)));
    }

    #[test]
    fn equal_boxes_carry_through() {
        let mut a = water_interchange();
        let mut b = water_interchange();
        a.set_box(&[20.0, 20.0, 20.0]).unwrap();
        b.set_box(&[20.0, 20.0, 20.0]).unwrap();
        let combined = with_experimental(|| a.combine(&b)).unwrap();
        assert_eq!(combined.box_vectors(), a.box_vectors());
    }

    #[test]
    fn combination_is_deterministic() {
        let a = water_interchange();
        let b = water_interchange();
        let first = with_experimental(|| a.combine(&b)).unwrap();
        let second = with_experimental(|| a.combine(&b)).unwrap();
        assert_eq!(first.to_json().unwrap(), second.to_json().unwrap());
    }
}
