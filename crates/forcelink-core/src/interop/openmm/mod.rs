//! OpenMM export and (experimental) import.

pub mod export;
pub mod import;
pub mod system;
mod virtual_sites;

pub use export::to_openmm;
pub use import::from_openmm;
pub use system::OpenMmSystem;
