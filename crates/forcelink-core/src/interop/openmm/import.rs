//! Experimental import of an OpenMM system into a container.
//!
//! The OpenMM system carries no chemistry, so the caller supplies the
//! matching topology; the importer validates that the two agree before
//! building collections.

use super::system::{NonbondedMethod, OpenMmSystem};
use crate::core::collections::{Collection, CollectionKind, Potential};
use crate::core::keys::TopologyKey;
use crate::core::models::topology::Topology;
use crate::core::nonbonded::{
    ElectrostaticsCollection, NonperiodicElectrostaticsMethod, NonperiodicVdwMethod,
    PeriodicElectrostaticsMethod, PeriodicVdwMethod, VdwCollection,
};
use crate::core::units::{Quantity, Unit};
use crate::interop::ImportError;
use crate::system::{CollectionData, Interchange, require_experimental};
use nalgebra::Point3;

/// Rebuilds a container from an OpenMM system and its matching topology.
///
/// `positions` are optional and in Angstroms; the box is taken from the
/// system's periodic box vectors.
pub fn from_openmm(
    topology: Topology,
    system: &OpenMmSystem,
    positions: Option<Vec<Point3<f64>>>,
) -> Result<Interchange, ImportError> {
    require_experimental("Interchange.from_openmm").map_err(ImportError::System)?;

    if system.n_virtual_sites() > 0 {
        return Err(ImportError::Unsupported(
            "importing systems with virtual sites is not supported".to_string(),
        ));
    }
    if system.n_particles() != topology.n_atoms() {
        return Err(ImportError::Unsupported(format!(
            "system has {} particles but the topology has {} atoms",
            system.n_particles(),
            topology.n_atoms()
        )));
    }
    if let Some(positions) = &positions {
        if positions.len() != topology.n_atoms() {
            return Err(ImportError::Unsupported(format!(
                "{} positions were provided for {} atoms",
                positions.len(),
                topology.n_atoms()
            )));
        }
    }
    for constraint in &system.constraints {
        if constraint.particle1 >= topology.n_atoms() || constraint.particle2 >= topology.n_atoms()
        {
            return Err(ImportError::Unsupported(format!(
                "constraint references particle {} outside the topology",
                constraint.particle1.max(constraint.particle2)
            )));
        }
    }

    let mut out = Interchange::new(topology);

    if let Some(terms) = &system.bond_force {
        let mut bonds = Collection::new(CollectionKind::Bonds);
        for term in terms {
            bonds.add_or_update(
                TopologyKey::bond(term.particle1, term.particle2),
                Potential::new()
                    .with("k", Quantity::new(term.k, Unit::KjPerMolPerNmSquared))
                    .with("length", Quantity::new(term.length, Unit::Nanometer)),
            );
        }
        out.add_collection(CollectionData::Valence(bonds));
    }

    if let Some(terms) = &system.angle_force {
        let mut angles = Collection::new(CollectionKind::Angles);
        for term in terms {
            angles.add_or_update(
                TopologyKey::angle(term.particle1, term.particle2, term.particle3),
                Potential::new()
                    .with("k", Quantity::new(term.k, Unit::KjPerMolPerRadianSquared))
                    .with("angle", Quantity::new(term.angle, Unit::Radian)),
            );
        }
        out.add_collection(CollectionData::Valence(angles));
    }

    if let Some(terms) = &system.torsion_force {
        let mut torsions = Collection::new(CollectionKind::ProperTorsions);
        for term in terms {
            torsions.add_or_update(
                TopologyKey::torsion(
                    term.particle1,
                    term.particle2,
                    term.particle3,
                    term.particle4,
                    Some(term.periodicity),
                ),
                Potential::new()
                    .with(
                        "periodicity",
                        Quantity::dimensionless(f64::from(term.periodicity)),
                    )
                    .with("phase", Quantity::new(term.phase, Unit::Radian))
                    .with("k", Quantity::new(term.k, Unit::KilojoulePerMole)),
            );
        }
        out.add_collection(CollectionData::Valence(torsions));
    }

    if !system.constraints.is_empty() {
        let mut constraints = Collection::new(CollectionKind::Constraints);
        for constraint in &system.constraints {
            constraints.add_or_update(
                TopologyKey::bond(constraint.particle1, constraint.particle2),
                Potential::new().with(
                    "distance",
                    Quantity::new(constraint.distance, Unit::Nanometer),
                ),
            );
        }
        out.add_collection(CollectionData::Valence(constraints));
    }

    if let Some(nonbonded) = &system.nonbonded_force {
        let mut vdw = VdwCollection::default();
        let mut electrostatics = ElectrostaticsCollection::default();
        vdw.cutoff = Quantity::new(nonbonded.cutoff, Unit::Nanometer);
        electrostatics.cutoff = Quantity::new(nonbonded.cutoff, Unit::Nanometer);
        vdw.switch_width = if nonbonded.use_switching_function {
            Quantity::new(
                nonbonded.cutoff - nonbonded.switching_distance,
                Unit::Nanometer,
            )
        } else {
            Quantity::new(0.0, Unit::Angstrom)
        };
        match nonbonded.method {
            NonbondedMethod::Pme => {
                vdw.periodic_method = PeriodicVdwMethod::Cutoff;
                electrostatics.periodic_method = PeriodicElectrostaticsMethod::Pme;
            }
            NonbondedMethod::CutoffPeriodic => {
                vdw.periodic_method = PeriodicVdwMethod::Cutoff;
                electrostatics.periodic_method = PeriodicElectrostaticsMethod::Cutoff;
            }
            NonbondedMethod::CutoffNonPeriodic => {
                vdw.nonperiodic_method = NonperiodicVdwMethod::Cutoff;
                electrostatics.nonperiodic_method = NonperiodicElectrostaticsMethod::Cutoff;
            }
            NonbondedMethod::NoCutoff => {
                vdw.nonperiodic_method = NonperiodicVdwMethod::NoCutoff;
                electrostatics.nonperiodic_method = NonperiodicElectrostaticsMethod::Coulomb;
            }
        }
        for (index, particle) in nonbonded.particles.iter().enumerate() {
            vdw.terms.add_or_update(
                TopologyKey::atom(index),
                Potential::new()
                    .with("sigma", Quantity::new(particle.sigma, Unit::Nanometer))
                    .with(
                        "epsilon",
                        Quantity::new(particle.epsilon, Unit::KilojoulePerMole),
                    ),
            );
            electrostatics.set_partial_charge(
                index,
                Quantity::new(particle.charge, Unit::ElementaryCharge),
            );
        }
        out.add_collection(CollectionData::Vdw(vdw));
        out.add_collection(CollectionData::Electrostatics(electrostatics));
    }

    if let Some(box_vectors) = system.periodic_box_vectors {
        out.set_box_matrix(box_vectors / crate::interop::ANGSTROM_TO_NM);
    }
    out.set_positions(positions);

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::keys::ParticleKey;
    use crate::interop::openmm::to_openmm;
    use crate::test_fixtures::{water_interchange, with_experimental, without_experimental};

    const TOLERANCE: f64 = 1e-10;

    #[test]
    fn import_requires_the_experimental_opt_in() {
        let original = water_interchange();
        let system = to_openmm(&original).unwrap();
        let result =
            without_experimental(|| from_openmm(original.topology().clone(), &system, None));
        assert!(matches!(
            result,
            Err(ImportError::System(
                crate::system::SystemError::ExperimentalDisabled { .. }
            ))
        ));
    }

    #[test]
    fn export_then_import_preserves_physics() {
        let original = water_interchange();
        let system = to_openmm(&original).unwrap();
        let imported =
            with_experimental(|| from_openmm(original.topology().clone(), &system, None)).unwrap();

        let bonds = imported.get_parameters("Bonds", &[0, 1]).unwrap();
        let length = bonds
            .get("length")
            .unwrap()
            .value_in(Unit::Angstrom)
            .unwrap();
        assert!((length - 0.9572).abs() < TOLERANCE);
        let k = bonds
            .get("k")
            .unwrap()
            .value_in(Unit::KcalPerMolPerAngstromSquared)
            .unwrap();
        assert!((k - 450.0).abs() < TOLERANCE);

        let charges = imported.charges().unwrap();
        assert!((charges[&ParticleKey::Atom(0)] + 0.834).abs() < TOLERANCE);
    }

    #[test]
    fn particle_count_mismatch_is_rejected() {
        let original = water_interchange();
        let mut system = to_openmm(&original).unwrap();
        system.add_particle(1.008);
        let result =
            with_experimental(|| from_openmm(original.topology().clone(), &system, None));
        assert!(matches!(result, Err(ImportError::Unsupported(_))));
    }

    #[test]
    fn provided_positions_land_on_the_container() {
        let original = water_interchange();
        let system = to_openmm(&original).unwrap();
        let positions = original.positions().unwrap().to_vec();
        let imported = with_experimental(|| {
            from_openmm(original.topology().clone(), &system, Some(positions))
        })
        .unwrap();
        assert_eq!(imported.positions(), original.positions());

        let result = with_experimental(|| {
            from_openmm(
                original.topology().clone(),
                &system,
                Some(vec![nalgebra::Point3::new(0.0, 0.0, 0.0)]),
            )
        });
        assert!(matches!(result, Err(ImportError::Unsupported(_))));
    }
}
