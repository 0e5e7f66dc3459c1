pub mod collections;
pub mod keys;
pub mod map_serde;
pub mod models;
pub mod nonbonded;
pub mod settings;
pub mod units;
pub mod virtual_sites;
