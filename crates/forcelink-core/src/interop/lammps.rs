//! LAMMPS data-file writer (`units real`: Angstrom, kcal/mol).
//!
//! Emits the header counts, box bounds, Masses, the per-type Coeffs
//! sections (pair, bond, angle, dihedral, improper), and the Atoms (full
//! style) and connectivity sections. Harmonic
//! force constants are halved on the way out: LAMMPS defines
//! `E = K (r - r0)^2` where the container stores `k` for
//! `E = k/2 (r - r0)^2`.

use crate::core::collections::{Collection, PotentialKey};
use crate::core::keys::ParticleKey;
use crate::core::units::Unit;
use crate::interop::{ExportError, require_positions};
use crate::system::Interchange;
use std::collections::BTreeMap;
use std::io::{BufWriter, Write};
use std::path::Path;

pub fn to_lammps(interchange: &Interchange, path: &Path) -> Result<(), ExportError> {
    if interchange.virtual_sites().is_some_and(|v| !v.is_empty()) {
        return Err(ExportError::Internal(
            "the LAMMPS writer does not support virtual sites".to_string(),
        ));
    }

    let topology = interchange.topology();
    let positions = require_positions(interchange)?;
    let vdw = interchange.vdw()?;
    let charges = interchange.charges()?;

    let atom_types = type_table(&vdw.terms);
    let bonds = valence(interchange, "Bonds");
    let angles = valence(interchange, "Angles");
    let dihedrals = valence(interchange, "ProperTorsions");
    let impropers = valence(interchange, "ImproperTorsions");
    let bond_types = bonds.map(type_table).unwrap_or_default();
    let angle_types = angles.map(type_table).unwrap_or_default();
    let dihedral_types = dihedrals.map(type_table).unwrap_or_default();
    let improper_types = impropers.map(type_table).unwrap_or_default();

    let file = std::fs::File::create(path).map_err(|e| ExportError::io(path, e))?;
    let mut w = BufWriter::new(file);
    let io_err = |e: std::io::Error| ExportError::io(path, e);

    writeln!(w, "generated by forcelink").map_err(io_err)?;
    writeln!(w).map_err(io_err)?;
    writeln!(w, "{} atoms", topology.n_atoms()).map_err(io_err)?;
    writeln!(w, "{} bonds", bonds.map(Collection::len).unwrap_or(0)).map_err(io_err)?;
    writeln!(w, "{} angles", angles.map(Collection::len).unwrap_or(0)).map_err(io_err)?;
    writeln!(w, "{} dihedrals", dihedrals.map(Collection::len).unwrap_or(0)).map_err(io_err)?;
    writeln!(w, "{} impropers", impropers.map(Collection::len).unwrap_or(0)).map_err(io_err)?;
    writeln!(w).map_err(io_err)?;
    writeln!(w, "{} atom types", atom_types.len()).map_err(io_err)?;
    writeln!(w, "{} bond types", bond_types.len()).map_err(io_err)?;
    writeln!(w, "{} angle types", angle_types.len()).map_err(io_err)?;
    writeln!(w, "{} dihedral types", dihedral_types.len()).map_err(io_err)?;
    writeln!(w, "{} improper types", improper_types.len()).map_err(io_err)?;
    writeln!(w).map_err(io_err)?;

    let (lo, hi) = bounds(interchange, positions)?;
    writeln!(w, "{:.6} {:.6} xlo xhi", lo[0], hi[0]).map_err(io_err)?;
    writeln!(w, "{:.6} {:.6} ylo yhi", lo[1], hi[1]).map_err(io_err)?;
    writeln!(w, "{:.6} {:.6} zlo zhi", lo[2], hi[2]).map_err(io_err)?;
    writeln!(w).map_err(io_err)?;

    writeln!(w, "Masses").map_err(io_err)?;
    writeln!(w).map_err(io_err)?;
    for (key, type_id) in &atom_types {
        // Mass of the first atom carrying this type
        let mass = vdw
            .terms
            .slot_map()
            .iter()
            .find(|(_, pk)| *pk == key)
            .and_then(|(tk, _)| topology.atom_by_index(tk.atom_indices[0]))
            .map(|a| a.mass)
            .unwrap_or(0.0);
        writeln!(w, "{type_id} {mass:.6}").map_err(io_err)?;
    }
    writeln!(w).map_err(io_err)?;

    writeln!(w, "Pair Coeffs").map_err(io_err)?;
    writeln!(w).map_err(io_err)?;
    for (key, type_id) in &atom_types {
        let potential = vdw.terms.potentials().get(key).ok_or_else(|| {
            ExportError::Internal(format!("dangling vdW potential '{key}'"))
        })?;
        let epsilon = value(potential, "epsilon", Unit::KilocaloriePerMole)?;
        let sigma = value(potential, "sigma", Unit::Angstrom)?;
        writeln!(w, "{type_id} {epsilon:.8} {sigma:.8}").map_err(io_err)?;
    }
    writeln!(w).map_err(io_err)?;

    if let Some(bonds) = bonds {
        writeln!(w, "Bond Coeffs").map_err(io_err)?;
        writeln!(w).map_err(io_err)?;
        for (key, type_id) in &bond_types {
            let potential = &bonds.potentials()[key];
            let k = value(potential, "k", Unit::KcalPerMolPerAngstromSquared)? / 2.0;
            let length = value(potential, "length", Unit::Angstrom)?;
            writeln!(w, "{type_id} {k:.8} {length:.8}").map_err(io_err)?;
        }
        writeln!(w).map_err(io_err)?;
    }

    if let Some(angles) = angles {
        writeln!(w, "Angle Coeffs").map_err(io_err)?;
        writeln!(w).map_err(io_err)?;
        for (key, type_id) in &angle_types {
            let potential = &angles.potentials()[key];
            let k = value(potential, "k", Unit::KcalPerMolPerRadianSquared)? / 2.0;
            let angle = value(potential, "angle", Unit::Degree)?;
            writeln!(w, "{type_id} {k:.8} {angle:.8}").map_err(io_err)?;
        }
        writeln!(w).map_err(io_err)?;
    }

    if let Some(dihedrals) = dihedrals {
        writeln!(w, "Dihedral Coeffs").map_err(io_err)?;
        writeln!(w).map_err(io_err)?;
        for (key, type_id) in &dihedral_types {
            let potential = &dihedrals.potentials()[key];
            let k = value(potential, "k", Unit::KilocaloriePerMole)?;
            let periodicity = potential
                .get("periodicity")
                .map(|v| v.value as i64)
                .or_else(|| key.mult.map(i64::from))
                .unwrap_or(1);
            let phase = value(potential, "phase", Unit::Degree)?;
            // charmm style: K n d weighting
            writeln!(w, "{type_id} {k:.8} {periodicity} {} 0.0", phase.round() as i64)
                .map_err(io_err)?;
        }
        writeln!(w).map_err(io_err)?;
    }

    if let Some(impropers) = impropers {
        writeln!(w, "Improper Coeffs").map_err(io_err)?;
        writeln!(w).map_err(io_err)?;
        for (key, type_id) in &improper_types {
            let potential = &impropers.potentials()[key];
            let k = value(potential, "k", Unit::KilocaloriePerMole)?;
            let periodicity = potential
                .get("periodicity")
                .map(|v| v.value as i64)
                .or_else(|| key.mult.map(i64::from))
                .unwrap_or(2);
            let phase = value(potential, "phase", Unit::Degree)?;
            // cvff style: K d n, d = -1 for a 180 degree phase
            let d = if (phase - 180.0).abs() < 1.0 { -1 } else { 1 };
            writeln!(w, "{type_id} {k:.8} {d} {periodicity}").map_err(io_err)?;
        }
        writeln!(w).map_err(io_err)?;
    }

    writeln!(w, "Atoms").map_err(io_err)?;
    writeln!(w).map_err(io_err)?;
    let molecule_numbers = molecule_numbers(topology);
    for (index, atom) in topology.atoms_iter() {
        let type_id = vdw
            .terms
            .slot_map()
            .get(&crate::core::keys::TopologyKey::atom(index))
            .and_then(|pk| atom_types.get(pk))
            .ok_or_else(|| ExportError::Internal(format!("atom {index} has no vdW parameters")))?;
        let charge = charges.get(&ParticleKey::Atom(index)).copied().unwrap_or(0.0);
        let molecule = molecule_numbers.get(&atom.molecule_id).copied().unwrap_or(1);
        let position = positions.get(index).ok_or(ExportError::MissingPositions)?;
        writeln!(
            w,
            "{} {molecule} {type_id} {charge:.8} {:.8} {:.8} {:.8}",
            index + 1,
            position.x,
            position.y,
            position.z
        )
        .map_err(io_err)?;
    }
    writeln!(w).map_err(io_err)?;

    if let Some(bonds) = bonds {
        writeln!(w, "Bonds").map_err(io_err)?;
        writeln!(w).map_err(io_err)?;
        for (n, (key, potential_key)) in bonds.slot_map().iter().enumerate() {
            writeln!(
                w,
                "{} {} {} {}",
                n + 1,
                bond_types[potential_key],
                key.atom_indices[0] + 1,
                key.atom_indices[1] + 1
            )
            .map_err(io_err)?;
        }
        writeln!(w).map_err(io_err)?;
    }

    if let Some(angles) = angles {
        writeln!(w, "Angles").map_err(io_err)?;
        writeln!(w).map_err(io_err)?;
        for (n, (key, potential_key)) in angles.slot_map().iter().enumerate() {
            writeln!(
                w,
                "{} {} {} {} {}",
                n + 1,
                angle_types[potential_key],
                key.atom_indices[0] + 1,
                key.atom_indices[1] + 1,
                key.atom_indices[2] + 1
            )
            .map_err(io_err)?;
        }
        writeln!(w).map_err(io_err)?;
    }

    if let Some(dihedrals) = dihedrals {
        writeln!(w, "Dihedrals").map_err(io_err)?;
        writeln!(w).map_err(io_err)?;
        for (n, (key, potential_key)) in dihedrals.slot_map().iter().enumerate() {
            writeln!(
                w,
                "{} {} {} {} {} {}",
                n + 1,
                dihedral_types[potential_key],
                key.atom_indices[0] + 1,
                key.atom_indices[1] + 1,
                key.atom_indices[2] + 1,
                key.atom_indices[3] + 1
            )
            .map_err(io_err)?;
        }
        writeln!(w).map_err(io_err)?;
    }

    if let Some(impropers) = impropers {
        writeln!(w, "Impropers").map_err(io_err)?;
        writeln!(w).map_err(io_err)?;
        for (n, (key, potential_key)) in impropers.slot_map().iter().enumerate() {
            writeln!(
                w,
                "{} {} {} {} {} {}",
                n + 1,
                improper_types[potential_key],
                key.atom_indices[0] + 1,
                key.atom_indices[1] + 1,
                key.atom_indices[2] + 1,
                key.atom_indices[3] + 1
            )
            .map_err(io_err)?;
        }
        writeln!(w).map_err(io_err)?;
    }

    w.flush().map_err(io_err)
}

/// Numbers a collection's distinct potentials from one, in deterministic
/// store order.
fn type_table(collection: &Collection) -> BTreeMap<PotentialKey, usize> {
    collection
        .potentials()
        .keys()
        .enumerate()
        .map(|(n, key)| (key.clone(), n + 1))
        .collect()
}

fn bounds(
    interchange: &Interchange,
    positions: &[nalgebra::Point3<f64>],
) -> Result<([f64; 3], [f64; 3]), ExportError> {
    if let Some(matrix) = interchange.box_vectors() {
        let diagonal = matrix[(0, 1)] == 0.0
            && matrix[(0, 2)] == 0.0
            && matrix[(1, 0)] == 0.0
            && matrix[(1, 2)] == 0.0
            && matrix[(2, 0)] == 0.0
            && matrix[(2, 1)] == 0.0;
        if !diagonal {
            return Err(ExportError::Internal(
                "the LAMMPS writer supports orthogonal boxes only".to_string(),
            ));
        }
        return Ok((
            [0.0, 0.0, 0.0],
            [matrix[(0, 0)], matrix[(1, 1)], matrix[(2, 2)]],
        ));
    }
    // No box: bound the coordinates with padding so nothing sits on an edge
    const PADDING: f64 = 10.0;
    let mut lo = [f64::INFINITY; 3];
    let mut hi = [f64::NEG_INFINITY; 3];
    for p in positions {
        for (axis, value) in [p.x, p.y, p.z].into_iter().enumerate() {
            lo[axis] = lo[axis].min(value - PADDING);
            hi[axis] = hi[axis].max(value + PADDING);
        }
    }
    Ok((lo, hi))
}

fn molecule_numbers(
    topology: &crate::core::models::topology::Topology,
) -> std::collections::HashMap<crate::core::models::ids::MoleculeId, usize> {
    topology
        .molecules_iter()
        .enumerate()
        .map(|(n, (id, _))| (id, n + 1))
        .collect()
}

fn valence<'a>(interchange: &'a Interchange, name: &str) -> Option<&'a Collection> {
    interchange
        .collections()
        .get(name)
        .and_then(|data| data.as_valence())
}

fn value(
    potential: &crate::core::collections::Potential,
    name: &str,
    unit: Unit,
) -> Result<f64, ExportError> {
    let quantity = potential.get(name).ok_or_else(|| {
        ExportError::Internal(format!("potential is missing required parameter '{name}'"))
    })?;
    Ok(quantity.value_in(unit)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{formaldehyde_interchange, water_interchange};
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn data_file_header_counts_match_the_system() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("water.data");
        let mut out = water_interchange();
        out.set_box(&[20.0, 20.0, 20.0]).unwrap();
        to_lammps(&out, &path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("3 atoms"));
        assert!(content.contains("2 bonds"));
        assert!(content.contains("1 angles"));
        assert!(content.contains("2 atom types"));
        assert!(content.contains("0.000000 20.000000 xlo xhi"));
        for section in ["Masses", "Pair Coeffs", "Bond Coeffs", "Atoms", "Bonds", "Angles"] {
            assert!(content.contains(section), "missing {section}");
        }
    }

    #[test]
    fn harmonic_constants_are_halved() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("water.data");
        to_lammps(&water_interchange(), &path).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        // 450 kcal/mol/A^2 stored -> 225 written
        assert!(content.contains("225.00000000"));
        // 55 kcal/mol/rad^2 stored -> 27.5 written
        assert!(content.contains("27.50000000"));
    }

    #[test]
    fn impropers_get_their_own_sections() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("formaldehyde.data");
        to_lammps(&formaldehyde_interchange(), &path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("1 impropers"));
        assert!(content.contains("1 improper types"));
        assert!(content.contains("Improper Coeffs"));
        assert!(content.contains("Impropers"));
        // cvff coefficients: K, d = -1 for the 180 degree phase, n
        assert!(content.contains("1 1.10000000 -1 2"));
        // O-H1-C-H2 with one-based atom ids
        assert!(content.contains("1 1 1 2 4 3"));
    }

    #[test]
    fn positions_are_required() {
        let dir = tempdir().unwrap();
        let mut out = water_interchange();
        out.set_positions(None);
        assert!(matches!(
            to_lammps(&out, &dir.path().join("water.data")),
            Err(ExportError::MissingPositions)
        ));
    }
}
