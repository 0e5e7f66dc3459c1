pub mod atom;
pub mod ids;
pub mod topology;
