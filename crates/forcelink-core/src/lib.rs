//! # Forcelink Core Library
//!
//! A library for holding a parameterized molecular mechanics system in one
//! typed container and exporting it, losslessly, to multiple simulation
//! engines.
//!
//! ## Architectural Philosophy
//!
//! The library is designed with a strict three-layer architecture to ensure a
//! clear separation of concerns, making it modular, testable, and extensible.
//!
//! - **[`core`]: The Foundation.** Contains the topology data model
//!   (`Topology`, `Atom`, `Bond`), the key types that bind topology slots to
//!   force-field parameters (`TopologyKey`, `PotentialKey`), the per-category
//!   parameter collections, and the unit-carrying `Quantity` type.
//!
//! - **[`system`]: The Container.** The `Interchange` aggregate ties one
//!   topology, its positions and box, and every force-category collection
//!   into a single self-consistent object. It owns cross-collection
//!   operations: charge aggregation, parameter lookup, serialization, and
//!   container combination.
//!
//! - **[`interop`]: The Engine Boundary.** Exporters that translate the
//!   container into each engine's native representation (OpenMM, GROMACS,
//!   LAMMPS, Amber, PDB), converting from the internal Angstrom/kcal·mol⁻¹
//!   conventions to each engine's units, plus the experimental importers
//!   that read engine files back into a container.

pub mod core;
pub mod interop;
pub mod system;

pub use crate::core::collections::{Collection, CollectionKind, Potential, PotentialKey};
pub use crate::core::keys::{ParticleKey, TopologyKey};
pub use crate::core::models::atom::{Atom, Bond, BondOrder};
pub use crate::core::models::topology::Topology;
pub use crate::core::units::{Quantity, Unit};
pub use crate::interop::{ExportError, ImportError};
pub use crate::system::{CollectionData, Interchange, SystemError};

#[cfg(test)]
pub(crate) mod test_fixtures;
