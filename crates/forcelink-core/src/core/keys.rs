use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Identifier of a physical interaction site within one force category.
///
/// Carries the ordered tuple of topology atom indices plus an optional
/// multiplicity discriminating several terms on the same tuple (torsion
/// periodicities). Constructors canonicalize orientations that are
/// physically equivalent, so `(j, i)` and `(i, j)` bond keys collide.
///
/// Keys order by arity first, then indices, then multiplicity, so
/// single-atom keys always precede pair keys regardless of index values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopologyKey {
    pub atom_indices: Vec<usize>,
    pub mult: Option<u32>,
}

impl Ord for TopologyKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.atom_indices
            .len()
            .cmp(&other.atom_indices.len())
            .then_with(|| self.atom_indices.cmp(&other.atom_indices))
            .then_with(|| self.mult.cmp(&other.mult))
    }
}

impl PartialOrd for TopologyKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl TopologyKey {
    /// A single-atom key, used by per-particle categories (vdW, charges).
    pub fn atom(index: usize) -> Self {
        Self {
            atom_indices: vec![index],
            mult: None,
        }
    }

    /// A bond key; stored with the smaller index first.
    pub fn bond(i: usize, j: usize) -> Self {
        Self {
            atom_indices: vec![i.min(j), i.max(j)],
            mult: None,
        }
    }

    /// An angle key; the orientation with the smaller outer index wins.
    pub fn angle(i: usize, j: usize, k: usize) -> Self {
        let indices = if k < i { vec![k, j, i] } else { vec![i, j, k] };
        Self {
            atom_indices: indices,
            mult: None,
        }
    }

    /// A torsion key; the tuple is reversed when that puts the smaller
    /// terminal index first. `mult` separates periodicity contributions.
    pub fn torsion(i: usize, j: usize, k: usize, l: usize, mult: Option<u32>) -> Self {
        let indices = if l < i {
            vec![l, k, j, i]
        } else {
            vec![i, j, k, l]
        };
        Self {
            atom_indices: indices,
            mult,
        }
    }

    /// Returns a copy with every atom index shifted by `offset`.
    pub fn offset_by(&self, offset: usize) -> Self {
        Self {
            atom_indices: self.atom_indices.iter().map(|i| i + offset).collect(),
            mult: self.mult,
        }
    }
}

impl fmt::Display for TopologyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.atom_indices)?;
        if let Some(mult) = self.mult {
            write!(f, " mult={mult}")?;
        }
        Ok(())
    }
}

/// Opaque identity of one distinct parameter set in a potential store.
///
/// The `id` comes from the assigning engine (typically a pattern identifier)
/// and is treated as unique across containers; the combination operator
/// verifies that assumption instead of trusting it.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct PotentialKey {
    pub id: String,
    pub mult: Option<u32>,
}

impl PotentialKey {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            mult: None,
        }
    }

    pub fn with_mult(id: &str, mult: u32) -> Self {
        Self {
            id: id.to_string(),
            mult: Some(mult),
        }
    }
}

impl fmt::Display for PotentialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mult {
            Some(mult) => write!(f, "{} mult={mult}", self.id),
            None => f.write_str(&self.id),
        }
    }
}

/// Key for a library charge spanning one or more atoms.
///
/// Unlike [`TopologyKey`], no canonicalization is applied: the charge list
/// is positional with respect to the matched atoms.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct LibraryChargeKey {
    pub atom_indices: Vec<usize>,
}

impl LibraryChargeKey {
    pub fn new(atom_indices: Vec<usize>) -> Self {
        Self { atom_indices }
    }

    pub fn offset_by(&self, offset: usize) -> Self {
        Self {
            atom_indices: self.atom_indices.iter().map(|i| i + offset).collect(),
        }
    }
}

/// Geometric placement rule of a virtual site.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum VirtualSiteKind {
    BondCharge,
    MonovalentLonePair,
    DivalentLonePair,
    TrivalentLonePair,
}

/// Identity of a virtual site: its orientation atoms, placement rule, and
/// the name given by the assigning engine.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct VirtualSiteKey {
    pub orientation_atom_indices: Vec<usize>,
    pub kind: VirtualSiteKind,
    pub name: String,
}

impl VirtualSiteKey {
    pub fn offset_by(&self, offset: usize) -> Self {
        Self {
            orientation_atom_indices: self
                .orientation_atom_indices
                .iter()
                .map(|i| i + offset)
                .collect(),
            kind: self.kind,
            name: self.name.clone(),
        }
    }
}

/// A particle in the export index space: a real atom or a virtual site.
///
/// Real atoms sort before virtual sites, matching the particle layout every
/// exporter uses (atoms first, then sites).
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum ParticleKey {
    Atom(usize),
    VirtualSite(VirtualSiteKey),
}
