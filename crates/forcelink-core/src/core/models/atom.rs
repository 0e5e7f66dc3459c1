use super::ids::{AtomId, MoleculeId};
use phf::{Map, phf_map};
use serde::{Deserialize, Serialize};

/// Standard atomic masses in Daltons, keyed by element symbol.
///
/// Covers the elements that appear in biomolecular and small-molecule
/// force fields; exotic elements fall back to zero mass at lookup sites.
static ELEMENT_MASSES: Map<&'static str, f64> = phf_map! {
    "H" => 1.007947,
    "He" => 4.002602,
    "Li" => 6.9412,
    "B" => 10.8117,
    "C" => 12.01078,
    "N" => 14.00672,
    "O" => 15.99943,
    "F" => 18.99840325,
    "Na" => 22.989769282,
    "Mg" => 24.30506,
    "Si" => 28.08553,
    "P" => 30.9737622,
    "S" => 32.0655,
    "Cl" => 35.4532,
    "K" => 39.09831,
    "Ca" => 40.0784,
    "Fe" => 55.8452,
    "Zn" => 65.4094,
    "Br" => 79.9041,
    "I" => 126.904473,
};

/// Atomic numbers for the same element set.
static ELEMENT_NUMBERS: Map<&'static str, u8> = phf_map! {
    "H" => 1,
    "He" => 2,
    "Li" => 3,
    "B" => 5,
    "C" => 6,
    "N" => 7,
    "O" => 8,
    "F" => 9,
    "Na" => 11,
    "Mg" => 12,
    "Si" => 14,
    "P" => 15,
    "S" => 16,
    "Cl" => 17,
    "K" => 19,
    "Ca" => 20,
    "Fe" => 26,
    "Zn" => 30,
    "Br" => 35,
    "I" => 53,
};

/// Looks up the standard atomic mass for an element symbol.
pub fn element_mass(symbol: &str) -> Option<f64> {
    ELEMENT_MASSES.get(symbol).copied()
}

/// Looks up the atomic number for an element symbol.
pub fn element_number(symbol: &str) -> Option<u8> {
    ELEMENT_NUMBERS.get(symbol).copied()
}

/// Covalent bond order, as provided by the external topology source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BondOrder {
    #[default]
    Single,
    Double,
    Triple,
    Aromatic,
}

/// A chemical atom as consumed from the external topology.
///
/// Positions are deliberately absent: coordinates live on the container,
/// keyed by topology index, so that a container without positions is a
/// valid state for most operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Atom {
    /// Atom name from the source topology (e.g. "CA", "O1").
    pub name: String,
    /// Element symbol (e.g. "C", "Cl").
    pub element: String,
    /// Atomic mass in Daltons; filled from the element table when the
    /// source does not provide one.
    pub mass: f64,
    /// Formal charge in elementary charge units.
    pub formal_charge: i8,
    /// The molecule this atom belongs to.
    pub molecule_id: MoleculeId,
}

impl Atom {
    /// Creates a new atom, resolving mass from the element table.
    pub fn new(name: &str, element: &str, molecule_id: MoleculeId) -> Self {
        Self {
            name: name.to_string(),
            element: element.to_string(),
            mass: element_mass(element).unwrap_or(0.0),
            formal_charge: 0,
            molecule_id,
        }
    }
}

/// A covalent bond between two atoms, stored by ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bond {
    pub atom1: AtomId,
    pub atom2: AtomId,
    pub order: BondOrder,
}

impl Bond {
    pub fn new(atom1: AtomId, atom2: AtomId, order: BondOrder) -> Self {
        Self {
            atom1,
            atom2,
            order,
        }
    }

    pub fn contains(&self, id: AtomId) -> bool {
        self.atom1 == id || self.atom2 == id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_atom_resolves_mass_from_element_table() {
        let atom = Atom::new("CA", "C", MoleculeId::default());
        assert_eq!(atom.name, "CA");
        assert_eq!(atom.element, "C");
        assert!((atom.mass - 12.01078).abs() < 1e-9);
        assert_eq!(atom.formal_charge, 0);
    }

    #[test]
    fn unknown_element_falls_back_to_zero_mass() {
        let atom = Atom::new("X1", "Xx", MoleculeId::default());
        assert_eq!(atom.mass, 0.0);
    }

    #[test]
    fn element_mass_lookup_covers_common_elements() {
        for symbol in ["H", "C", "N", "O", "P", "S", "Cl"] {
            assert!(element_mass(symbol).is_some(), "missing {symbol}");
        }
        assert!(element_mass("Uuo").is_none());
    }

    #[test]
    fn bond_contains_checks_both_endpoints() {
        let a = AtomId::default();
        let bond = Bond::new(a, a, BondOrder::Single);
        assert!(bond.contains(a));
    }
}
