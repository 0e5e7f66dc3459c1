pub mod combine;
pub mod registry;

use crate::core::collections::{
    Collection, CollectionKind, ParameterLookupError, Potential,
};
use crate::core::keys::{ParticleKey, TopologyKey};
use crate::core::nonbonded::{
    ChargeError, ElectrostaticsCollection, LibraryChargeCollection, VdwCollection,
};
use crate::core::models::topology::Topology;
use crate::core::virtual_sites::VirtualSiteCollection;
use crate::interop::ExportError;
use nalgebra::{Matrix3, Point3};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use registry::{Assignment, CollectionRegistry};

/// Environment variable that opts into experimental code paths
/// (container combination and the engine importers).
pub const EXPERIMENTAL_ENV_VAR: &str = "FORCELINK_EXPERIMENTAL";

pub(crate) fn experimental_enabled() -> bool {
    std::env::var(EXPERIMENTAL_ENV_VAR).is_ok_and(|v| v == "1")
}

pub(crate) fn require_experimental(feature: &'static str) -> Result<(), SystemError> {
    if experimental_enabled() {
        Ok(())
    } else {
        Err(SystemError::ExperimentalDisabled { feature })
    }
}

#[derive(Debug, Error)]
pub enum SystemError {
    #[error(
        "Could not find collection '{name}'. This container has the following collections registered: {registered:?}"
    )]
    MissingHandler {
        name: String,
        registered: Vec<String>,
    },
    #[error("Box vectors must be a 3-vector or a 3x3 matrix; got {len} values")]
    InvalidBox { len: usize },
    #[error("Invalid topology: {0}")]
    InvalidTopology(String),
    #[error("Parameter handler types not supported by any collection: {tags:?}")]
    UnsupportedHandler { tags: Vec<String> },
    #[error(
        "'{feature}' is experimental; set {EXPERIMENTAL_ENV_VAR}=1 in the environment to opt in"
    )]
    ExperimentalDisabled { feature: &'static str },
    #[error("Cannot combine containers with unequal box vectors")]
    IncompatibleBox,
    #[error("Internal inconsistency: {0}")]
    InternalInconsistency(String),
    #[error(transparent)]
    Parameters(#[from] ParameterLookupError),
    #[error(transparent)]
    Charges(#[from] ChargeError),
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One registered collection, in whichever concrete shape its category
/// requires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CollectionData {
    /// Bonds, Angles, ProperTorsions, ImproperTorsions, Constraints.
    Valence(Collection),
    Vdw(VdwCollection),
    Electrostatics(ElectrostaticsCollection),
    LibraryCharges(LibraryChargeCollection),
    VirtualSites(VirtualSiteCollection),
}

impl CollectionData {
    pub fn kind(&self) -> CollectionKind {
        match self {
            CollectionData::Valence(c) => c.kind(),
            CollectionData::Vdw(_) => CollectionKind::Vdw,
            CollectionData::Electrostatics(_) => CollectionKind::Electrostatics,
            CollectionData::LibraryCharges(_) => CollectionKind::LibraryCharges,
            CollectionData::VirtualSites(_) => CollectionKind::VirtualSites,
        }
    }

    pub fn as_valence(&self) -> Option<&Collection> {
        match self {
            CollectionData::Valence(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_vdw(&self) -> Option<&VdwCollection> {
        match self {
            CollectionData::Vdw(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_electrostatics(&self) -> Option<&ElectrostaticsCollection> {
        match self {
            CollectionData::Electrostatics(c) => Some(c),
            _ => None,
        }
    }
}

/// Result of a by-name component lookup on the container.
#[derive(Debug)]
pub enum Component<'a> {
    Box(Option<&'a Matrix3<f64>>),
    Positions(Option<&'a [Point3<f64>]>),
    Collection(&'a CollectionData),
}

/// The aggregate of one chemical system: topology, positions, box, and all
/// force-category collections. The unit of export and of combination.
///
/// Internal unit conventions: positions and box vectors in Angstroms,
/// energies in kcal/mol. Exporters convert to each engine's units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interchange {
    collections: BTreeMap<String, CollectionData>,
    topology: Topology,
    positions: Option<Vec<Point3<f64>>>,
    box_vectors: Option<Matrix3<f64>>,
}

impl Interchange {
    pub fn new(topology: Topology) -> Self {
        Self {
            collections: BTreeMap::new(),
            topology,
            positions: None,
            box_vectors: None,
        }
    }

    /// The parameterization input boundary: builds a container from the
    /// external engine's per-category assignments.
    ///
    /// Fails with [`SystemError::UnsupportedHandler`] when any assignment
    /// carries a tag the registry does not know, and with
    /// [`SystemError::InvalidTopology`] when an assignment references an
    /// atom index outside the topology.
    pub fn from_assignments(
        topology: Topology,
        assignments: Vec<Assignment>,
        registry: &CollectionRegistry,
    ) -> Result<Self, SystemError> {
        let unsupported: Vec<String> = assignments
            .iter()
            .filter(|a| !registry.supports(a.tag()))
            .map(|a| a.tag().to_string())
            .collect();
        if !unsupported.is_empty() {
            return Err(SystemError::UnsupportedHandler { tags: unsupported });
        }

        let n_atoms = topology.n_atoms();
        for assignment in &assignments {
            if let Some(&bad) = assignment
                .referenced_atom_indices()
                .iter()
                .find(|&&i| i >= n_atoms)
            {
                return Err(SystemError::InvalidTopology(format!(
                    "'{}' assignment references atom index {bad} but the topology has {n_atoms} atoms",
                    assignment.tag()
                )));
            }
        }

        let mut out = Self::new(topology);
        for assignment in assignments {
            let tag = assignment.tag().to_string();
            let mut data = registry
                .construct(&tag)
                .ok_or_else(|| SystemError::UnsupportedHandler { tags: vec![tag.clone()] })?;
            fill_collection(&mut data, assignment);
            out.collections.insert(tag, data);
        }
        Ok(out)
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn positions(&self) -> Option<&[Point3<f64>]> {
        self.positions.as_deref()
    }

    pub fn set_positions(&mut self, positions: Option<Vec<Point3<f64>>>) {
        self.positions = positions;
    }

    pub fn box_vectors(&self) -> Option<&Matrix3<f64>> {
        self.box_vectors.as_ref()
    }

    /// Whether the system is periodic; true iff box vectors are present.
    pub fn is_periodic(&self) -> bool {
        self.box_vectors.is_some()
    }

    /// Sets the box from a flat value list: a 3-vector becomes a diagonal
    /// matrix, nine values a row-major 3x3 matrix; any other shape fails.
    pub fn set_box(&mut self, values: &[f64]) -> Result<(), SystemError> {
        self.box_vectors = Some(box_from_slice(values)?);
        Ok(())
    }

    pub fn set_box_matrix(&mut self, matrix: Matrix3<f64>) {
        self.box_vectors = Some(matrix);
    }

    pub fn clear_box(&mut self) {
        self.box_vectors = None;
    }

    pub fn collections(&self) -> &BTreeMap<String, CollectionData> {
        &self.collections
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.collections.keys().cloned().collect()
    }

    pub fn add_collection(&mut self, data: CollectionData) {
        self.collections
            .insert(data.kind().name().to_string(), data);
    }

    pub fn remove_collection(&mut self, name: &str) -> Option<CollectionData> {
        self.collections.remove(name)
    }

    /// Looks up a collection by name, failing with the list of registered
    /// names on a miss.
    pub fn collection(&self, name: &str) -> Result<&CollectionData, SystemError> {
        self.collections
            .get(name)
            .ok_or_else(|| SystemError::MissingHandler {
                name: name.to_string(),
                registered: self.collection_names(),
            })
    }

    pub(crate) fn collection_mut(&mut self, name: &str) -> Option<&mut CollectionData> {
        self.collections.get_mut(name)
    }

    /// By-name component access with the fixed alias set: `"box"` and
    /// `"box_vectors"` resolve to the box, `"positions"` to positions, and
    /// any other name to a collection lookup.
    pub fn component(&self, name: &str) -> Result<Component<'_>, SystemError> {
        match name {
            "box" | "box_vectors" => Ok(Component::Box(self.box_vectors())),
            "positions" => Ok(Component::Positions(self.positions())),
            other => self.collection(other).map(Component::Collection),
        }
    }

    /// Two-level parameter lookup: collection by name, then atom tuple.
    ///
    /// The two failure modes stay distinct: a missing collection surfaces as
    /// [`SystemError::MissingHandler`], a missing atom tuple as
    /// [`SystemError::Parameters`].
    pub fn get_parameters(
        &self,
        collection_name: &str,
        atom_indices: &[usize],
    ) -> Result<&Potential, SystemError> {
        let data = self.collection(collection_name)?;
        let kind = data.kind();
        let key = canonical_key(kind, atom_indices);
        let collection = match data {
            CollectionData::Valence(c) => c,
            CollectionData::Vdw(c) => &c.terms,
            _ => {
                return Err(SystemError::Parameters(
                    ParameterLookupError::MissingParameters { kind, key },
                ));
            }
        };
        collection.get_parameters(&key).map_err(SystemError::from)
    }

    /// Aggregated particle charges from every registered charge source.
    pub fn charges(&self) -> Result<BTreeMap<ParticleKey, f64>, SystemError> {
        let electrostatics = self
            .collection("Electrostatics")?
            .as_electrostatics()
            .ok_or_else(|| {
                SystemError::InternalInconsistency(
                    "'Electrostatics' entry does not hold an electrostatics collection".to_string(),
                )
            })?;
        let library = self
            .collections
            .get("LibraryCharges")
            .and_then(|d| match d {
                CollectionData::LibraryCharges(lc) => Some(lc),
                _ => None,
            });
        let sites = self.virtual_sites();
        Ok(electrostatics.charges(library, sites)?)
    }

    pub fn virtual_sites(&self) -> Option<&VirtualSiteCollection> {
        self.collections.get("VirtualSites").and_then(|d| match d {
            CollectionData::VirtualSites(vs) => Some(vs),
            _ => None,
        })
    }

    /// The vdW collection, or the internal-inconsistency error: a container
    /// without any nonbonded handler cannot be exported.
    pub fn vdw(&self) -> Result<&VdwCollection, SystemError> {
        self.collections
            .get("vdW")
            .and_then(CollectionData::as_vdw)
            .ok_or_else(|| {
                SystemError::InternalInconsistency("Found no non-bonded collections".to_string())
            })
    }

    pub fn electrostatics(&self) -> Result<&ElectrostaticsCollection, SystemError> {
        self.collection("Electrostatics")?
            .as_electrostatics()
            .ok_or_else(|| {
                SystemError::InternalInconsistency(
                    "'Electrostatics' entry does not hold an electrostatics collection".to_string(),
                )
            })
    }

    /// The structured serialized form: everything needed for an exact
    /// round-trip of topology, collections, positions, and box.
    pub fn to_json(&self) -> Result<String, SystemError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, SystemError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Merges another container into a copy of this one. Experimental.
    pub fn combine(&self, other: &Interchange) -> Result<Interchange, SystemError> {
        combine::combine(self, other)
    }

    // Convenience front doors to the exporters in `crate::interop`.

    pub fn to_openmm(&self) -> Result<crate::interop::openmm::OpenMmSystem, ExportError> {
        crate::interop::openmm::to_openmm(self)
    }

    pub fn to_top(&self, path: &std::path::Path) -> Result<(), ExportError> {
        crate::interop::gromacs::to_top(self, path)
    }

    pub fn to_gro(&self, path: &std::path::Path, decimals: usize) -> Result<(), ExportError> {
        crate::interop::gromacs::to_gro(self, path, decimals)
    }

    pub fn to_lammps(&self, path: &std::path::Path) -> Result<(), ExportError> {
        crate::interop::lammps::to_lammps(self, path)
    }

    pub fn to_prmtop(&self, path: &std::path::Path) -> Result<(), ExportError> {
        crate::interop::amber::to_prmtop(self, path)
    }

    pub fn to_inpcrd(&self, path: &std::path::Path) -> Result<(), ExportError> {
        crate::interop::amber::to_inpcrd(self, path)
    }

    pub fn to_pdb(
        &self,
        path: &std::path::Path,
        include_virtual_sites: bool,
    ) -> Result<(), ExportError> {
        crate::interop::pdb::to_pdb(self, path, include_virtual_sites)
    }
}

/// Builds the canonical topology key for a category from raw atom indices.
pub(crate) fn canonical_key(kind: CollectionKind, atom_indices: &[usize]) -> TopologyKey {
    match (kind, atom_indices) {
        (CollectionKind::Bonds | CollectionKind::Constraints, &[i, j]) => TopologyKey::bond(i, j),
        (CollectionKind::Angles, &[i, j, k]) => TopologyKey::angle(i, j, k),
        (
            CollectionKind::ProperTorsions | CollectionKind::ImproperTorsions,
            &[i, j, k, l],
        ) => TopologyKey::torsion(i, j, k, l, None),
        _ => TopologyKey {
            atom_indices: atom_indices.to_vec(),
            mult: None,
        },
    }
}

fn box_from_slice(values: &[f64]) -> Result<Matrix3<f64>, SystemError> {
    match values.len() {
        3 => Ok(Matrix3::from_diagonal(&nalgebra::Vector3::new(
            values[0], values[1], values[2],
        ))),
        9 => Ok(Matrix3::from_row_slice(values)),
        len => Err(SystemError::InvalidBox { len }),
    }
}

fn fill_collection(data: &mut CollectionData, assignment: Assignment) {
    match (data, assignment) {
        (
            CollectionData::Valence(collection),
            Assignment::Bonds(slots)
            | Assignment::Angles(slots)
            | Assignment::ProperTorsions(slots)
            | Assignment::ImproperTorsions(slots)
            | Assignment::Constraints(slots),
        ) => {
            for (key, potential_key, potential) in slots {
                collection.insert_assigned(key, potential_key, potential);
            }
        }
        (CollectionData::Vdw(vdw), Assignment::Vdw { settings, slots }) => {
            if let Some(settings) = settings {
                vdw.cutoff = crate::core::units::Quantity::new(
                    settings.cutoff,
                    crate::core::units::Unit::Angstrom,
                );
                vdw.switch_width = crate::core::units::Quantity::new(
                    settings.switch_width,
                    crate::core::units::Unit::Angstrom,
                );
                vdw.mixing_rule = settings.mixing_rule;
                vdw.scales = settings.scales();
                vdw.periodic_method = settings.periodic_vdw_method;
                vdw.nonperiodic_method = settings.nonperiodic_vdw_method;
            }
            for (key, potential_key, potential) in slots {
                vdw.terms.insert_assigned(key, potential_key, potential);
            }
        }
        (
            CollectionData::Electrostatics(electrostatics),
            Assignment::Electrostatics {
                settings,
                partial_charges,
            },
        ) => {
            if let Some(settings) = settings {
                electrostatics.cutoff = crate::core::units::Quantity::new(
                    settings.cutoff,
                    crate::core::units::Unit::Angstrom,
                );
                electrostatics.scales = settings.scales();
                electrostatics.periodic_method = settings.periodic_electrostatics_method;
                electrostatics.nonperiodic_method = settings.nonperiodic_electrostatics_method;
            }
            for (index, charge) in partial_charges {
                electrostatics.set_partial_charge(index, charge);
            }
        }
        (CollectionData::LibraryCharges(library), Assignment::LibraryCharges(entries)) => {
            for (key, values) in entries {
                library.charges.insert(key, values);
            }
        }
        (CollectionData::VirtualSites(collection), Assignment::VirtualSites(entries)) => {
            for (key, site, increments) in entries {
                collection.insert(key, site, increments);
            }
        }
        // Registry construction and assignment tags agree by construction;
        // a mismatch means a registry was populated with the wrong ctor.
        (data, assignment) => {
            debug_assert!(
                false,
                "collection shape {:?} does not accept assignment '{}'",
                data.kind(),
                assignment.tag()
            );
        }
    }
}
