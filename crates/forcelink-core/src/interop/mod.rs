//! Engine boundary: exporters and importers for external simulation
//! engines.
//!
//! Everything in this module converts between the container's internal
//! conventions (Angstrom, kcal/mol) and each engine's native units at the
//! boundary; nothing inside the container ever holds engine units.

pub mod amber;
pub mod gromacs;
pub mod lammps;
pub mod openmm;
pub mod pdb;

use crate::core::collections::ParameterLookupError;
use crate::core::keys::{ParticleKey, TopologyKey, VirtualSiteKey};
use crate::core::nonbonded::ChargeError;
use crate::core::units::UnitError;
use crate::core::virtual_sites::VirtualSiteCollection;
use crate::system::{Interchange, SystemError};
use nalgebra::Point3;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::warn;

pub const ANGSTROM_TO_NM: f64 = 0.1;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Positions are required for this export but are not set")]
    MissingPositions,
    #[error("Asked to write virtual sites but the container has none")]
    MissingVirtualSites,
    #[error("Unsupported cutoff treatment: {reason}")]
    UnsupportedCutoff { reason: String },
    #[error(transparent)]
    System(#[from] SystemError),
    #[error(transparent)]
    Charges(#[from] ChargeError),
    #[error(transparent)]
    Parameters(#[from] ParameterLookupError),
    #[error(transparent)]
    Units(#[from] UnitError),
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Internal inconsistency during export: {0}")]
    Internal(String),
}

impl ExportError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_string_lossy().to_string(),
            source,
        }
    }
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Parse error in '{path}' at line {line}: {message}")]
    Parse {
        path: String,
        line: usize,
        message: String,
    },
    #[error("Unsupported input: {0}")]
    Unsupported(String),
    #[error(transparent)]
    System(#[from] SystemError),
}

impl ImportError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_string_lossy().to_string(),
            source,
        }
    }
}

/// The particle layout every exporter uses: real atoms first, in topology
/// order, then virtual sites in their collection's deterministic order.
#[derive(Debug, Clone)]
pub struct ParticleIndexMap {
    index: BTreeMap<ParticleKey, usize>,
    site_keys: Vec<VirtualSiteKey>,
    n_atoms: usize,
}

impl ParticleIndexMap {
    pub fn build(n_atoms: usize, virtual_sites: Option<&VirtualSiteCollection>) -> Self {
        let mut index = BTreeMap::new();
        for i in 0..n_atoms {
            index.insert(ParticleKey::Atom(i), i);
        }
        let mut site_keys = Vec::new();
        if let Some(sites) = virtual_sites {
            for (key, _) in sites.iter() {
                index.insert(ParticleKey::VirtualSite(key.clone()), n_atoms + site_keys.len());
                site_keys.push(key.clone());
            }
        }
        Self {
            index,
            site_keys,
            n_atoms,
        }
    }

    pub fn index_of(&self, key: &ParticleKey) -> Option<usize> {
        self.index.get(key).copied()
    }

    /// Atoms map to their own topology index.
    pub fn atom(&self, topology_index: usize) -> usize {
        topology_index
    }

    pub fn n_atoms(&self) -> usize {
        self.n_atoms
    }

    pub fn n_particles(&self) -> usize {
        self.n_atoms + self.site_keys.len()
    }

    pub fn site_keys(&self) -> &[VirtualSiteKey] {
        &self.site_keys
    }
}

/// Positions are mandatory for coordinate-bearing outputs. A coordinate
/// array of all zeroes almost always means positions were never set, so it
/// gets an advisory but is not an error.
pub(crate) fn require_positions(
    interchange: &Interchange,
) -> Result<&[Point3<f64>], ExportError> {
    let positions = interchange
        .positions()
        .ok_or(ExportError::MissingPositions)?;
    if !positions.is_empty()
        && positions
            .iter()
            .all(|p| p.x == 0.0 && p.y == 0.0 && p.z == 0.0)
    {
        warn!("Positions are all zero; this likely means they were never set to real values");
    }
    Ok(positions)
}

/// Equilibrium separation of a bonded atom pair in Angstroms, preferring a
/// constraint distance over the harmonic bond length.
pub(crate) fn separation_by_atom_indices(
    interchange: &Interchange,
    i: usize,
    j: usize,
) -> Result<f64, ExportError> {
    let key = TopologyKey::bond(i, j);
    for (collection_name, parameter) in [("Constraints", "distance"), ("Bonds", "length")] {
        if let Ok(data) = interchange.collection(collection_name) {
            if let Some(collection) = data.as_valence() {
                if let Ok(potential) = collection.get_parameters(&key) {
                    if let Some(value) = potential.get(parameter) {
                        return Ok(value.value_in(crate::core::units::Unit::Angstrom)?);
                    }
                }
            }
        }
    }
    Err(ExportError::Internal(format!(
        "no constraint or bond length available for atom pair ({i}, {j})"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::keys::VirtualSiteKind;
    use crate::core::units::{Quantity, Unit};
    use crate::core::virtual_sites::VirtualSite;
    use crate::test_fixtures::water_interchange;

    #[test]
    fn particle_map_places_atoms_before_sites() {
        let mut sites = VirtualSiteCollection::default();
        let key = VirtualSiteKey {
            orientation_atom_indices: vec![0, 1, 2],
            kind: VirtualSiteKind::DivalentLonePair,
            name: "EP".to_string(),
        };
        sites.insert(
            key.clone(),
            VirtualSite::divalent_lone_pair(
                vec![0, 1, 2],
                Quantity::new(-0.15, Unit::Angstrom),
                Quantity::new(0.0, Unit::Degree),
            ),
            vec![],
        );

        let map = ParticleIndexMap::build(3, Some(&sites));
        assert_eq!(map.n_particles(), 4);
        assert_eq!(map.index_of(&ParticleKey::Atom(2)), Some(2));
        assert_eq!(map.index_of(&ParticleKey::VirtualSite(key)), Some(3));
    }

    #[test]
    fn separation_prefers_constraints_over_bonds() {
        let out = water_interchange();
        // The fixture has no constraints, so the bond length is used
        let separation = separation_by_atom_indices(&out, 0, 1).unwrap();
        assert!((separation - 0.9572).abs() < 1e-12);
        assert!(separation_by_atom_indices(&out, 1, 2).is_err());
    }

    #[test]
    fn missing_positions_fail_up_front() {
        let mut out = water_interchange();
        out.set_positions(None);
        assert!(matches!(
            require_positions(&out),
            Err(ExportError::MissingPositions)
        ));
    }
}
