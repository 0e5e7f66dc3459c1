//! In-memory model of an OpenMM `System`.
//!
//! The engine object lives out of process, so the export target is a typed
//! description carrying everything a serializer or a binding layer needs:
//! particles with masses, the four force objects, constraints, virtual
//! sites, and the periodic box. All values are in OpenMM units (nm, kJ/mol,
//! radians, elementary charge, dalton).

use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BondTerm {
    pub particle1: usize,
    pub particle2: usize,
    /// Equilibrium length in nm.
    pub length: f64,
    /// Force constant in kJ/mol/nm^2.
    pub k: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AngleTerm {
    pub particle1: usize,
    pub particle2: usize,
    pub particle3: usize,
    /// Equilibrium angle in radians.
    pub angle: f64,
    /// Force constant in kJ/mol/rad^2.
    pub k: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TorsionTerm {
    pub particle1: usize,
    pub particle2: usize,
    pub particle3: usize,
    pub particle4: usize,
    pub periodicity: u32,
    /// Phase offset in radians.
    pub phase: f64,
    /// Barrier height in kJ/mol.
    pub k: f64,
}

/// One particle's row in the NonbondedForce.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NonbondedParticle {
    pub charge: f64,
    /// LJ sigma in nm.
    pub sigma: f64,
    /// LJ epsilon in kJ/mol.
    pub epsilon: f64,
}

/// An exception overriding the default interaction of one particle pair.
/// A fully excluded pair has all three values zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NonbondedException {
    pub particle1: usize,
    pub particle2: usize,
    pub charge_product: f64,
    pub sigma: f64,
    pub epsilon: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NonbondedMethod {
    NoCutoff,
    CutoffNonPeriodic,
    CutoffPeriodic,
    Pme,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NonbondedForce {
    pub method: NonbondedMethod,
    /// Cutoff distance in nm; meaningless under `NoCutoff`.
    pub cutoff: f64,
    pub use_switching_function: bool,
    /// Switching onset in nm; meaningful only when switching is on.
    pub switching_distance: f64,
    pub use_dispersion_correction: bool,
    pub particles: Vec<NonbondedParticle>,
    pub exceptions: Vec<NonbondedException>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub particle1: usize,
    pub particle2: usize,
    /// Constrained distance in nm.
    pub distance: f64,
}

/// Geometric placement of a massless particle, mirroring OpenMM's
/// virtual-site class hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OpenMmVirtualSite {
    TwoParticleAverage {
        particles: [usize; 2],
        weights: [f64; 2],
    },
    ThreeParticleAverage {
        particles: [usize; 3],
        weights: [f64; 3],
    },
    LocalCoordinates {
        particles: Vec<usize>,
        origin_weights: Vec<f64>,
        x_weights: Vec<f64>,
        y_weights: Vec<f64>,
        /// Displacement from the local frame origin, in nm.
        local_position: [f64; 3],
    },
}

/// The exported system: a faithful, serializable mirror of
/// `openmm.System`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OpenMmSystem {
    /// Particle masses in dalton; virtual sites carry zero.
    masses: Vec<f64>,
    virtual_sites: BTreeMap<usize, OpenMmVirtualSite>,
    pub constraints: Vec<Constraint>,
    pub bond_force: Option<Vec<BondTerm>>,
    pub angle_force: Option<Vec<AngleTerm>>,
    pub torsion_force: Option<Vec<TorsionTerm>>,
    pub nonbonded_force: Option<NonbondedForce>,
    /// Box vectors in nm, row per vector.
    pub periodic_box_vectors: Option<Matrix3<f64>>,
}

impl OpenMmSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_particle(&mut self, mass: f64) -> usize {
        self.masses.push(mass);
        self.masses.len() - 1
    }

    pub fn n_particles(&self) -> usize {
        self.masses.len()
    }

    pub fn particle_mass(&self, index: usize) -> Option<f64> {
        self.masses.get(index).copied()
    }

    pub fn set_virtual_site(&mut self, particle: usize, site: OpenMmVirtualSite) {
        self.virtual_sites.insert(particle, site);
    }

    pub fn virtual_site(&self, particle: usize) -> Option<&OpenMmVirtualSite> {
        self.virtual_sites.get(&particle)
    }

    pub fn is_virtual_site(&self, particle: usize) -> bool {
        self.virtual_sites.contains_key(&particle)
    }

    pub fn n_virtual_sites(&self) -> usize {
        self.virtual_sites.len()
    }

    pub fn add_constraint(&mut self, particle1: usize, particle2: usize, distance: f64) {
        self.constraints.push(Constraint {
            particle1,
            particle2,
            distance,
        });
    }

    pub fn n_constraints(&self) -> usize {
        self.constraints.len()
    }
}
