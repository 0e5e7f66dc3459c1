use super::atom::{Atom, Bond, BondOrder};
use super::ids::{AtomId, MoleculeId};
use serde::{Deserialize, Serialize};
use slotmap::{SecondaryMap, SlotMap};
use std::collections::BTreeSet;

/// A molecule: an ordered group of atoms within the topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Molecule {
    pub name: String,
    pub atoms: Vec<AtomId>,
}

/// The chemical topology consumed from the external parameterization source.
///
/// Atoms are stored in a slot map for stable identity, with a separate
/// insertion-order vector defining each atom's *topology index* - the integer
/// the collection model keys interactions by. Exporters and the combination
/// operator only ever speak in topology indices; slot-map IDs never cross the
/// crate boundary of the collection model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Topology {
    atoms: SlotMap<AtomId, Atom>,
    /// Insertion order; position in this vector is the topology index.
    order: Vec<AtomId>,
    molecules: SlotMap<MoleculeId, Molecule>,
    molecule_order: Vec<MoleculeId>,
    bonds: Vec<Bond>,
    /// Cached adjacency, indexed by atom ID.
    adjacency: SecondaryMap<AtomId, Vec<AtomId>>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn n_atoms(&self) -> usize {
        self.order.len()
    }

    pub fn n_molecules(&self) -> usize {
        self.molecule_order.len()
    }

    pub fn atom(&self, id: AtomId) -> Option<&Atom> {
        self.atoms.get(id)
    }

    /// Resolves a topology index to its atom.
    pub fn atom_by_index(&self, index: usize) -> Option<&Atom> {
        self.order.get(index).and_then(|id| self.atoms.get(*id))
    }

    /// Resolves an atom ID to its topology index.
    pub fn index_of(&self, id: AtomId) -> Option<usize> {
        self.order.iter().position(|&a| a == id)
    }

    /// Iterates atoms in topology-index order.
    pub fn atoms_iter(&self) -> impl Iterator<Item = (usize, &Atom)> {
        self.order
            .iter()
            .enumerate()
            .filter_map(|(i, id)| self.atoms.get(*id).map(|a| (i, a)))
    }

    pub fn molecules_iter(&self) -> impl Iterator<Item = (MoleculeId, &Molecule)> {
        self.molecule_order
            .iter()
            .filter_map(|id| self.molecules.get(*id).map(|m| (*id, m)))
    }

    pub fn bonds(&self) -> &[Bond] {
        &self.bonds
    }

    pub fn add_molecule(&mut self, name: &str) -> MoleculeId {
        let id = self.molecules.insert(Molecule {
            name: name.to_string(),
            atoms: Vec::new(),
        });
        self.molecule_order.push(id);
        id
    }

    /// Adds an atom to a molecule, assigning it the next topology index.
    ///
    /// Returns `None` if the molecule does not exist.
    pub fn add_atom(&mut self, molecule_id: MoleculeId, atom: Atom) -> Option<AtomId> {
        if !self.molecules.contains_key(molecule_id) {
            return None;
        }
        let mut atom = atom;
        atom.molecule_id = molecule_id;
        let id = self.atoms.insert(atom);
        self.order.push(id);
        self.adjacency.insert(id, Vec::new());
        self.molecules[molecule_id].atoms.push(id);
        Some(id)
    }

    /// Adds a bond; idempotent, like the rest of the construction API.
    pub fn add_bond(&mut self, atom1: AtomId, atom2: AtomId, order: BondOrder) -> Option<()> {
        if !self.atoms.contains_key(atom1) || !self.atoms.contains_key(atom2) {
            return None;
        }
        if let Some(neighbors) = self.adjacency.get(atom1) {
            if neighbors.contains(&atom2) {
                return Some(());
            }
        }
        self.bonds.push(Bond::new(atom1, atom2, order));
        self.adjacency[atom1].push(atom2);
        self.adjacency[atom2].push(atom1);
        Some(())
    }

    pub fn bonded_neighbors(&self, id: AtomId) -> Option<&[AtomId]> {
        self.adjacency.get(id).map(|v| v.as_slice())
    }

    /// Neighbor lists in topology-index space.
    fn index_adjacency(&self) -> Vec<Vec<usize>> {
        let mut lookup = SecondaryMap::new();
        for (i, id) in self.order.iter().enumerate() {
            lookup.insert(*id, i);
        }
        self.order
            .iter()
            .map(|id| {
                self.adjacency
                    .get(*id)
                    .map(|ns| ns.iter().filter_map(|n| lookup.get(*n).copied()).collect())
                    .unwrap_or_default()
            })
            .collect()
    }

    /// Directly bonded (1-2) index pairs, each reported once with i < j.
    pub fn pairs_12(&self) -> Vec<(usize, usize)> {
        let adjacency = self.index_adjacency();
        let mut pairs = BTreeSet::new();
        for (i, neighbors) in adjacency.iter().enumerate() {
            for &j in neighbors {
                pairs.insert((i.min(j), i.max(j)));
            }
        }
        pairs.into_iter().collect()
    }

    /// 1-3 index pairs: atoms separated by exactly two bonds.
    pub fn pairs_13(&self) -> Vec<(usize, usize)> {
        self.pairs_at_separation(2)
    }

    /// 1-4 index pairs: atoms separated by exactly three bonds.
    pub fn pairs_14(&self) -> Vec<(usize, usize)> {
        self.pairs_at_separation(3)
    }

    fn pairs_at_separation(&self, separation: usize) -> Vec<(usize, usize)> {
        let adjacency = self.index_adjacency();
        let n = adjacency.len();
        let mut pairs = BTreeSet::new();
        for start in 0..n {
            // BFS truncated at the requested depth; the shortest path decides.
            let mut dist = vec![usize::MAX; n];
            dist[start] = 0;
            let mut frontier = vec![start];
            for depth in 1..=separation {
                let mut next = Vec::new();
                for &u in &frontier {
                    for &v in &adjacency[u] {
                        if dist[v] == usize::MAX {
                            dist[v] = depth;
                            next.push(v);
                        }
                    }
                }
                frontier = next;
            }
            for (other, &d) in dist.iter().enumerate() {
                if d == separation && other > start {
                    pairs.insert((start, other));
                }
            }
        }
        pairs.into_iter().collect()
    }

    /// Appends another topology's molecules, atoms, and bonds.
    ///
    /// Returns the atom-index offset that was applied to the appended atoms,
    /// i.e. this topology's atom count before the merge.
    pub fn extend(&mut self, other: &Topology) -> usize {
        let offset = self.n_atoms();
        let mut id_map: SecondaryMap<AtomId, AtomId> = SecondaryMap::new();
        for (_, molecule) in other.molecules_iter() {
            let new_mol = self.add_molecule(&molecule.name);
            for &atom_id in &molecule.atoms {
                if let Some(atom) = other.atoms.get(atom_id) {
                    let mut copied = atom.clone();
                    copied.molecule_id = new_mol;
                    // add_atom cannot fail here: the molecule was just created
                    if let Some(new_id) = self.add_atom(new_mol, copied) {
                        id_map.insert(atom_id, new_id);
                    }
                }
            }
        }
        for bond in other.bonds() {
            if let (Some(&a), Some(&b)) = (id_map.get(bond.atom1), id_map.get(bond.atom2)) {
                self.add_bond(a, b, bond.order);
            }
        }
        offset
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Ethane-like skeleton: C-C with three hydrogens on each carbon.
    pub(crate) fn ethane_topology() -> Topology {
        let mut top = Topology::new();
        let mol = top.add_molecule("ethane");
        let c1 = top.add_atom(mol, Atom::new("C1", "C", mol)).unwrap();
        let c2 = top.add_atom(mol, Atom::new("C2", "C", mol)).unwrap();
        let mut hydrogens = Vec::new();
        for i in 0..6 {
            let h = top
                .add_atom(mol, Atom::new(&format!("H{}", i + 1), "H", mol))
                .unwrap();
            hydrogens.push(h);
        }
        top.add_bond(c1, c2, BondOrder::Single).unwrap();
        for &h in &hydrogens[..3] {
            top.add_bond(c1, h, BondOrder::Single).unwrap();
        }
        for &h in &hydrogens[3..] {
            top.add_bond(c2, h, BondOrder::Single).unwrap();
        }
        top
    }

    /// Three-site water: O-H1, O-H2.
    pub(crate) fn water_topology() -> Topology {
        let mut top = Topology::new();
        let mol = top.add_molecule("water");
        let o = top.add_atom(mol, Atom::new("O", "O", mol)).unwrap();
        let h1 = top.add_atom(mol, Atom::new("H1", "H", mol)).unwrap();
        let h2 = top.add_atom(mol, Atom::new("H2", "H", mol)).unwrap();
        top.add_bond(o, h1, BondOrder::Single).unwrap();
        top.add_bond(o, h2, BondOrder::Single).unwrap();
        top
    }

    #[test]
    fn topology_indices_follow_insertion_order() {
        let top = ethane_topology();
        assert_eq!(top.n_atoms(), 8);
        assert_eq!(top.atom_by_index(0).unwrap().name, "C1");
        assert_eq!(top.atom_by_index(1).unwrap().name, "C2");
        assert_eq!(top.atom_by_index(7).unwrap().name, "H6");
        assert!(top.atom_by_index(8).is_none());
    }

    #[test]
    fn add_atom_to_missing_molecule_returns_none() {
        let mut top = Topology::new();
        let missing = MoleculeId::default();
        assert!(top.add_atom(missing, Atom::new("C", "C", missing)).is_none());
    }

    #[test]
    fn add_bond_is_idempotent() {
        let mut top = Topology::new();
        let mol = top.add_molecule("m");
        let a = top.add_atom(mol, Atom::new("A", "C", mol)).unwrap();
        let b = top.add_atom(mol, Atom::new("B", "C", mol)).unwrap();
        top.add_bond(a, b, BondOrder::Single).unwrap();
        top.add_bond(b, a, BondOrder::Single).unwrap();
        assert_eq!(top.bonds().len(), 1);
        assert_eq!(top.bonded_neighbors(a).unwrap().len(), 1);
    }

    #[test]
    fn water_pair_classification() {
        let top = water_topology();
        assert_eq!(top.pairs_12(), vec![(0, 1), (0, 2)]);
        assert_eq!(top.pairs_13(), vec![(1, 2)]);
        assert!(top.pairs_14().is_empty());
    }

    #[test]
    fn ethane_pair_classification_counts() {
        let top = ethane_topology();
        // 7 bonds, H-C-H and H-C-C angles give 3+3+3+3 = 12 1-3 pairs,
        // H-C-C-H torsions give 9 1-4 pairs
        assert_eq!(top.pairs_12().len(), 7);
        assert_eq!(top.pairs_13().len(), 12);
        assert_eq!(top.pairs_14().len(), 9);
    }

    #[test]
    fn extend_offsets_appended_atoms_and_preserves_bonds() {
        let mut left = water_topology();
        let right = ethane_topology();
        let offset = left.extend(&right);

        assert_eq!(offset, 3);
        assert_eq!(left.n_atoms(), 11);
        assert_eq!(left.n_molecules(), 2);
        assert_eq!(left.atom_by_index(3).unwrap().name, "C1");
        // Water's two bonds plus ethane's seven
        assert_eq!(left.bonds().len(), 9);
        // The appended C1-C2 bond shows up as an offset 1-2 pair
        assert!(left.pairs_12().contains(&(3, 4)));
    }

    #[test]
    fn extend_twice_is_deterministic() {
        let base = water_topology();
        let other = water_topology();
        let mut a = base.clone();
        let mut b = base.clone();
        a.extend(&other);
        b.extend(&other);
        assert_eq!(a.n_atoms(), b.n_atoms());
        let names_a: Vec<_> = a.atoms_iter().map(|(_, at)| at.name.clone()).collect();
        let names_b: Vec<_> = b.atoms_iter().map(|(_, at)| at.name.clone()).collect();
        assert_eq!(names_a, names_b);
    }

    #[test]
    fn serde_roundtrip_preserves_index_order() {
        let top = ethane_topology();
        let json = serde_json::to_string(&top).unwrap();
        let back: Topology = serde_json::from_str(&json).unwrap();
        assert_eq!(back.n_atoms(), top.n_atoms());
        for i in 0..top.n_atoms() {
            assert_eq!(
                back.atom_by_index(i).unwrap().name,
                top.atom_by_index(i).unwrap().name
            );
        }
        assert_eq!(back.pairs_13(), top.pairs_13());
    }
}
