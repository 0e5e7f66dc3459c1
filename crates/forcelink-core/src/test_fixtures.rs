//! Shared fixture constructors for tests across the crate.

use crate::core::collections::{Potential, PotentialKey};
use crate::core::keys::TopologyKey;
use crate::core::models::atom::{Atom, BondOrder};
use crate::core::models::topology::tests::water_topology;
use crate::core::models::topology::Topology;
use crate::core::units::{Quantity, Unit};
use crate::system::registry::{Assignment, CollectionRegistry};
use crate::system::Interchange;
use nalgebra::Point3;

/// A fully parameterized rigid-water container: harmonic bonds and angle,
/// Lennard-Jones terms on every atom, per-atom partial charges, and
/// positions. No box.
pub(crate) fn water_interchange() -> Interchange {
    let mut out = water_interchange_without_positions();
    out.set_positions(Some(water_positions()));
    out
}

pub(crate) fn water_interchange_without_positions() -> Interchange {
    let topology = water_topology();

    let bond_potential = Potential::new()
        .with(
            "k",
            Quantity::new(450.0, Unit::KcalPerMolPerAngstromSquared),
        )
        .with("length", Quantity::new(0.9572, Unit::Angstrom));
    let bonds = Assignment::Bonds(vec![
        (
            TopologyKey::bond(0, 1),
            PotentialKey::new("b-OH"),
            bond_potential.clone(),
        ),
        (
            TopologyKey::bond(0, 2),
            PotentialKey::new("b-OH"),
            bond_potential,
        ),
    ]);

    let angles = Assignment::Angles(vec![(
        TopologyKey::angle(1, 0, 2),
        PotentialKey::new("a-HOH"),
        Potential::new()
            .with("k", Quantity::new(55.0, Unit::KcalPerMolPerRadianSquared))
            .with("angle", Quantity::new(104.52, Unit::Degree)),
    )]);

    let oxygen_lj = Potential::new()
        .with("sigma", Quantity::new(3.1507, Unit::Angstrom))
        .with("epsilon", Quantity::new(0.1521, Unit::KilocaloriePerMole));
    let hydrogen_lj = Potential::new()
        .with("sigma", Quantity::new(1.0, Unit::Angstrom))
        .with("epsilon", Quantity::new(0.0, Unit::KilocaloriePerMole));
    let vdw = Assignment::Vdw {
        settings: None,
        slots: vec![
            (TopologyKey::atom(0), PotentialKey::new("n-O"), oxygen_lj),
            (
                TopologyKey::atom(1),
                PotentialKey::new("n-H"),
                hydrogen_lj.clone(),
            ),
            (TopologyKey::atom(2), PotentialKey::new("n-H"), hydrogen_lj),
        ],
    };

    let electrostatics = Assignment::Electrostatics {
        settings: None,
        partial_charges: vec![
            (0, Quantity::new(-0.834, Unit::ElementaryCharge)),
            (1, Quantity::new(0.417, Unit::ElementaryCharge)),
            (2, Quantity::new(0.417, Unit::ElementaryCharge)),
        ],
    };

    Interchange::from_assignments(
        topology,
        vec![bonds, angles, vdw, electrostatics],
        &CollectionRegistry::standard(),
    )
    .expect("water fixture assignments are well formed")
}

/// Runs `f` with the experimental opt-in set, serialized across the whole
/// test binary since the environment is process-global.
pub(crate) fn with_experimental<T>(f: impl FnOnce() -> T) -> T {
    let _guard = experimental_lock();
    unsafe { std::env::set_var(crate::system::EXPERIMENTAL_ENV_VAR, "1") };
    let out = f();
    unsafe { std::env::remove_var(crate::system::EXPERIMENTAL_ENV_VAR) };
    out
}

/// Runs `f` with the experimental opt-in guaranteed absent.
pub(crate) fn without_experimental<T>(f: impl FnOnce() -> T) -> T {
    let _guard = experimental_lock();
    unsafe { std::env::remove_var(crate::system::EXPERIMENTAL_ENV_VAR) };
    f()
}

fn experimental_lock() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A planar formaldehyde container with an improper torsion centered on the
/// carbon. Atom order O, H1, H2, C keeps the improper's central atom away
/// from index zero, which the Amber dihedral coding cannot negate.
pub(crate) fn formaldehyde_interchange() -> Interchange {
    let mut top = Topology::new();
    let mol = top.add_molecule("formaldehyde");
    let o = top.add_atom(mol, Atom::new("O", "O", mol)).unwrap();
    let h1 = top.add_atom(mol, Atom::new("H1", "H", mol)).unwrap();
    let h2 = top.add_atom(mol, Atom::new("H2", "H", mol)).unwrap();
    let c = top.add_atom(mol, Atom::new("C", "C", mol)).unwrap();
    top.add_bond(c, o, BondOrder::Double).unwrap();
    top.add_bond(c, h1, BondOrder::Single).unwrap();
    top.add_bond(c, h2, BondOrder::Single).unwrap();

    let co = Potential::new()
        .with(
            "k",
            Quantity::new(570.0, Unit::KcalPerMolPerAngstromSquared),
        )
        .with("length", Quantity::new(1.229, Unit::Angstrom));
    let ch = Potential::new()
        .with(
            "k",
            Quantity::new(340.0, Unit::KcalPerMolPerAngstromSquared),
        )
        .with("length", Quantity::new(1.09, Unit::Angstrom));
    let bonds = Assignment::Bonds(vec![
        (TopologyKey::bond(0, 3), PotentialKey::new("b-CO"), co),
        (TopologyKey::bond(1, 3), PotentialKey::new("b-CH"), ch.clone()),
        (TopologyKey::bond(2, 3), PotentialKey::new("b-CH"), ch),
    ]);

    let och = Potential::new()
        .with("k", Quantity::new(80.0, Unit::KcalPerMolPerRadianSquared))
        .with("angle", Quantity::new(122.0, Unit::Degree));
    let hch = Potential::new()
        .with("k", Quantity::new(35.0, Unit::KcalPerMolPerRadianSquared))
        .with("angle", Quantity::new(116.0, Unit::Degree));
    let angles = Assignment::Angles(vec![
        (TopologyKey::angle(0, 3, 1), PotentialKey::new("a-OCH"), och.clone()),
        (TopologyKey::angle(0, 3, 2), PotentialKey::new("a-OCH"), och),
        (TopologyKey::angle(1, 3, 2), PotentialKey::new("a-HCH"), hch),
    ]);

    // O-H1-C-H2 with the central carbon third, the Amber improper layout
    let impropers = Assignment::ImproperTorsions(vec![(
        TopologyKey::torsion(0, 1, 3, 2, None),
        PotentialKey::new("i-CO"),
        Potential::new()
            .with("k", Quantity::new(1.1, Unit::KilocaloriePerMole))
            .with("periodicity", Quantity::dimensionless(2.0))
            .with("phase", Quantity::new(180.0, Unit::Degree)),
    )]);

    let lj = |sigma: f64, epsilon: f64| {
        Potential::new()
            .with("sigma", Quantity::new(sigma, Unit::Angstrom))
            .with("epsilon", Quantity::new(epsilon, Unit::KilocaloriePerMole))
    };
    let vdw = Assignment::Vdw {
        settings: None,
        slots: vec![
            (TopologyKey::atom(0), PotentialKey::new("n-O"), lj(2.96, 0.21)),
            (TopologyKey::atom(1), PotentialKey::new("n-H"), lj(2.29, 0.0157)),
            (TopologyKey::atom(2), PotentialKey::new("n-H"), lj(2.29, 0.0157)),
            (TopologyKey::atom(3), PotentialKey::new("n-C"), lj(3.39, 0.086)),
        ],
    };

    let electrostatics = Assignment::Electrostatics {
        settings: None,
        partial_charges: vec![
            (0, Quantity::new(-0.45, Unit::ElementaryCharge)),
            (1, Quantity::new(0.1, Unit::ElementaryCharge)),
            (2, Quantity::new(0.1, Unit::ElementaryCharge)),
            (3, Quantity::new(0.25, Unit::ElementaryCharge)),
        ],
    };

    let mut out = Interchange::from_assignments(
        top,
        vec![bonds, angles, impropers, vdw, electrostatics],
        &CollectionRegistry::standard(),
    )
    .expect("formaldehyde fixture assignments are well formed");
    out.set_positions(Some(vec![
        Point3::new(1.229, 0.0, 0.0),
        Point3::new(-0.55, 0.943, 0.0),
        Point3::new(-0.55, -0.943, 0.0),
        Point3::new(0.0, 0.0, 0.0),
    ]));
    out
}

pub(crate) fn water_positions() -> Vec<Point3<f64>> {
    vec![
        Point3::new(0.0, 0.0, 0.0),
        Point3::new(0.9572, 0.0, 0.0),
        Point3::new(-0.23999, 0.92663, 0.0),
    ]
}
