//! GROMACS topology/coordinate export and (experimental) import.

pub mod reader;
pub mod writer;

pub use reader::from_gromacs;
pub use writer::{to_gro, to_top};
