//! Conversion of a container into the in-memory OpenMM system model.

use super::system::{
    AngleTerm, BondTerm, NonbondedException, NonbondedForce, NonbondedMethod, NonbondedParticle,
    OpenMmSystem, TorsionTerm,
};
use super::virtual_sites::create_openmm_virtual_site;
use crate::core::collections::Collection;
use crate::core::keys::{ParticleKey, TopologyKey};
use crate::core::nonbonded::{
    NonperiodicElectrostaticsMethod, NonperiodicVdwMethod, PeriodicElectrostaticsMethod,
    PeriodicVdwMethod,
};
use crate::core::units::Unit;
use crate::interop::{ANGSTROM_TO_NM, ExportError, ParticleIndexMap};
use crate::system::Interchange;
use std::collections::{BTreeMap, BTreeSet};

/// Fallback LJ row for particles with no vdW term of their own (virtual
/// sites); epsilon of zero makes sigma inert.
const INERT_SIGMA_NM: f64 = 0.1;

pub fn to_openmm(interchange: &Interchange) -> Result<OpenMmSystem, ExportError> {
    let topology = interchange.topology();
    let particle_map = ParticleIndexMap::build(topology.n_atoms(), interchange.virtual_sites());

    let mut system = OpenMmSystem::new();
    for (_, atom) in topology.atoms_iter() {
        system.add_particle(atom.mass);
    }
    for _ in particle_map.site_keys() {
        system.add_particle(0.0);
    }

    if let Some(box_vectors) = interchange.box_vectors() {
        system.periodic_box_vectors = Some(box_vectors * ANGSTROM_TO_NM);
    }

    process_bonds(interchange, &mut system)?;
    process_angles(interchange, &mut system)?;
    process_torsions(interchange, &mut system)?;
    process_constraints(interchange, &mut system)?;
    process_nonbonded(interchange, &mut system, &particle_map)?;
    process_virtual_sites(interchange, &mut system, &particle_map)?;

    Ok(system)
}

fn valence_terms<'a>(
    interchange: &'a Interchange,
    name: &str,
) -> Option<&'a Collection> {
    interchange
        .collections()
        .get(name)
        .and_then(|data| data.as_valence())
}

fn process_bonds(
    interchange: &Interchange,
    system: &mut OpenMmSystem,
) -> Result<(), ExportError> {
    let Some(bonds) = valence_terms(interchange, "Bonds") else {
        return Ok(());
    };
    let mut terms = Vec::with_capacity(bonds.len());
    for (key, _) in bonds.slot_map() {
        let potential = bonds.get_parameters(key)?;
        let k = required(bonds, key, potential, "k")?.value_in(Unit::KjPerMolPerNmSquared)?;
        let length = required(bonds, key, potential, "length")?.value_in(Unit::Nanometer)?;
        terms.push(BondTerm {
            particle1: key.atom_indices[0],
            particle2: key.atom_indices[1],
            length,
            k,
        });
    }
    system.bond_force = Some(terms);
    Ok(())
}

fn process_angles(
    interchange: &Interchange,
    system: &mut OpenMmSystem,
) -> Result<(), ExportError> {
    let Some(angles) = valence_terms(interchange, "Angles") else {
        return Ok(());
    };
    let mut terms = Vec::with_capacity(angles.len());
    for (key, _) in angles.slot_map() {
        let potential = angles.get_parameters(key)?;
        let k = required(angles, key, potential, "k")?.value_in(Unit::KjPerMolPerRadianSquared)?;
        let angle = required(angles, key, potential, "angle")?.value_in(Unit::Radian)?;
        terms.push(AngleTerm {
            particle1: key.atom_indices[0],
            particle2: key.atom_indices[1],
            particle3: key.atom_indices[2],
            angle,
            k,
        });
    }
    system.angle_force = Some(terms);
    Ok(())
}

fn process_torsions(
    interchange: &Interchange,
    system: &mut OpenMmSystem,
) -> Result<(), ExportError> {
    let mut terms = Vec::new();
    for name in ["ProperTorsions", "ImproperTorsions"] {
        let Some(torsions) = valence_terms(interchange, name) else {
            continue;
        };
        for (key, _) in torsions.slot_map() {
            let potential = torsions.get_parameters(key)?;
            let periodicity = match potential.get("periodicity") {
                Some(value) => value.value as u32,
                None => key.mult.unwrap_or(1),
            };
            let phase = required(torsions, key, potential, "phase")?.value_in(Unit::Radian)?;
            let k = required(torsions, key, potential, "k")?.value_in(Unit::KilojoulePerMole)?;
            terms.push(TorsionTerm {
                particle1: key.atom_indices[0],
                particle2: key.atom_indices[1],
                particle3: key.atom_indices[2],
                particle4: key.atom_indices[3],
                periodicity,
                phase,
                k,
            });
        }
    }
    if !terms.is_empty() {
        system.torsion_force = Some(terms);
    }
    Ok(())
}

fn process_constraints(
    interchange: &Interchange,
    system: &mut OpenMmSystem,
) -> Result<(), ExportError> {
    let Some(constraints) = valence_terms(interchange, "Constraints") else {
        return Ok(());
    };
    for (key, _) in constraints.slot_map() {
        let potential = constraints.get_parameters(key)?;
        let distance =
            required(constraints, key, potential, "distance")?.value_in(Unit::Nanometer)?;
        system.add_constraint(key.atom_indices[0], key.atom_indices[1], distance);
    }
    Ok(())
}

fn resolve_method(interchange: &Interchange) -> Result<NonbondedMethod, ExportError> {
    let vdw = interchange.vdw()?;
    let electrostatics = interchange.electrostatics()?;

    if interchange.is_periodic() {
        match (vdw.periodic_method, electrostatics.periodic_method) {
            (PeriodicVdwMethod::Cutoff, PeriodicElectrostaticsMethod::Pme) => {
                Ok(NonbondedMethod::Pme)
            }
            (PeriodicVdwMethod::Cutoff, PeriodicElectrostaticsMethod::Cutoff) => {
                Ok(NonbondedMethod::CutoffPeriodic)
            }
            (vdw_method, electrostatics_method) => Err(ExportError::UnsupportedCutoff {
                reason: format!(
                    "periodic system with vdW method {vdw_method:?} and electrostatics method {electrostatics_method:?}"
                ),
            }),
        }
    } else {
        match (vdw.nonperiodic_method, electrostatics.nonperiodic_method) {
            (
                NonperiodicVdwMethod::NoCutoff,
                NonperiodicElectrostaticsMethod::Coulomb | NonperiodicElectrostaticsMethod::NoCutoff,
            ) => Ok(NonbondedMethod::NoCutoff),
            (NonperiodicVdwMethod::Cutoff, NonperiodicElectrostaticsMethod::Cutoff) => {
                Ok(NonbondedMethod::CutoffNonPeriodic)
            }
            (vdw_method, electrostatics_method) => Err(ExportError::UnsupportedCutoff {
                reason: format!(
                    "non-periodic system with vdW method {vdw_method:?} and electrostatics method {electrostatics_method:?}"
                ),
            }),
        }
    }
}

fn process_nonbonded(
    interchange: &Interchange,
    system: &mut OpenMmSystem,
    particle_map: &ParticleIndexMap,
) -> Result<(), ExportError> {
    let vdw = interchange.vdw()?;
    let electrostatics = interchange.electrostatics()?;
    let method = resolve_method(interchange)?;
    let charges = interchange.charges()?;

    let cutoff = vdw.cutoff.value_in(Unit::Nanometer)?;
    let switch_width = vdw.switch_width.value_in(Unit::Nanometer)?;
    let use_switching = switch_width > 0.0 && method != NonbondedMethod::NoCutoff;

    // Per-particle rows, atoms first then sites
    let mut lj: BTreeMap<usize, (f64, f64)> = BTreeMap::new();
    for (key, _) in vdw.terms.slot_map() {
        let potential = vdw.terms.get_parameters(key)?;
        let sigma = required(&vdw.terms, key, potential, "sigma")?.value_in(Unit::Nanometer)?;
        let epsilon =
            required(&vdw.terms, key, potential, "epsilon")?.value_in(Unit::KilojoulePerMole)?;
        lj.insert(key.atom_indices[0], (sigma, epsilon));
    }

    let mut particles = Vec::with_capacity(particle_map.n_particles());
    for i in 0..particle_map.n_atoms() {
        let (sigma, epsilon) = lj.get(&i).copied().ok_or_else(|| {
            ExportError::Internal(format!("atom {i} has no vdW parameters"))
        })?;
        let charge = charges.get(&ParticleKey::Atom(i)).copied().unwrap_or(0.0);
        particles.push(NonbondedParticle {
            charge,
            sigma,
            epsilon,
        });
    }
    for key in particle_map.site_keys() {
        let charge = charges
            .get(&ParticleKey::VirtualSite(key.clone()))
            .copied()
            .unwrap_or(0.0);
        particles.push(NonbondedParticle {
            charge,
            sigma: INERT_SIGMA_NM,
            epsilon: 0.0,
        });
    }

    // Exceptions: 1-2 and 1-3 fully excluded, 1-4 scaled
    let topology = interchange.topology();
    let mut seen: BTreeSet<(usize, usize)> = BTreeSet::new();
    let mut exceptions = Vec::new();
    let excluded: Vec<(usize, usize)> = topology
        .pairs_12()
        .into_iter()
        .chain(topology.pairs_13())
        .collect();
    for (i, j) in &excluded {
        if seen.insert((*i, *j)) {
            exceptions.push(NonbondedException {
                particle1: *i,
                particle2: *j,
                charge_product: 0.0,
                sigma: INERT_SIGMA_NM,
                epsilon: 0.0,
            });
        }
    }
    for (i, j) in topology.pairs_14() {
        if !seen.insert((i, j)) {
            continue;
        }
        let (sigma_i, epsilon_i) = lj[&i];
        let (sigma_j, epsilon_j) = lj[&j];
        let (sigma, epsilon) = vdw
            .mixing_rule
            .combine(sigma_i, epsilon_i, sigma_j, epsilon_j);
        exceptions.push(NonbondedException {
            particle1: i,
            particle2: j,
            charge_product: particles[i].charge
                * particles[j].charge
                * electrostatics.scales.scale_14,
            sigma,
            epsilon: epsilon * vdw.scales.scale_14,
        });
    }

    // Each virtual site inherits its parent's exclusion neighborhood
    for key in particle_map.site_keys() {
        let site_particle = particle_map
            .index_of(&ParticleKey::VirtualSite(key.clone()))
            .ok_or_else(|| {
                ExportError::Internal("virtual site missing from its own particle map".to_string())
            })?;
        let parent = key.orientation_atom_indices[0];
        let mut neighborhood: BTreeSet<usize> =
            key.orientation_atom_indices.iter().copied().collect();
        for (i, j) in &excluded {
            if *i == parent {
                neighborhood.insert(*j);
            } else if *j == parent {
                neighborhood.insert(*i);
            }
        }
        for atom in neighborhood {
            let pair = (atom.min(site_particle), atom.max(site_particle));
            if seen.insert(pair) {
                exceptions.push(NonbondedException {
                    particle1: pair.0,
                    particle2: pair.1,
                    charge_product: 0.0,
                    sigma: INERT_SIGMA_NM,
                    epsilon: 0.0,
                });
            }
        }
    }

    system.nonbonded_force = Some(NonbondedForce {
        method,
        cutoff,
        use_switching_function: use_switching,
        switching_distance: cutoff - switch_width,
        use_dispersion_correction: matches!(
            method,
            NonbondedMethod::Pme | NonbondedMethod::CutoffPeriodic
        ),
        particles,
        exceptions,
    });
    Ok(())
}

fn process_virtual_sites(
    interchange: &Interchange,
    system: &mut OpenMmSystem,
    particle_map: &ParticleIndexMap,
) -> Result<(), ExportError> {
    let Some(sites) = interchange.virtual_sites() else {
        return Ok(());
    };
    for (key, site) in sites.iter() {
        let particle = particle_map
            .index_of(&ParticleKey::VirtualSite(key.clone()))
            .ok_or_else(|| {
                ExportError::Internal("virtual site missing from its own particle map".to_string())
            })?;
        let converted = create_openmm_virtual_site(interchange, site, particle_map)?;
        system.set_virtual_site(particle, converted);
    }
    Ok(())
}

fn required<'a>(
    collection: &Collection,
    key: &TopologyKey,
    potential: &'a crate::core::collections::Potential,
    name: &str,
) -> Result<&'a crate::core::units::Quantity, ExportError> {
    potential.get(name).ok_or_else(|| {
        ExportError::Parameters(crate::core::collections::ParameterLookupError::MissingParameterField {
            kind: collection.kind(),
            potential: collection
                .slot_map()
                .get(key)
                .cloned()
                .unwrap_or_else(|| crate::core::collections::PotentialKey::new("unknown")),
            name: name.to_string(),
        })
    })
}
