//! GROMACS `.top` and `.gro` writers.
//!
//! The whole container is written as a single `[ moleculetype ]`; GROMACS
//! units throughout (nm, kJ/mol, degrees for equilibrium angles).

use crate::core::collections::Collection;
use crate::core::keys::ParticleKey;
use crate::core::nonbonded::MixingRule;
use crate::core::units::Unit;
use crate::interop::{ExportError, require_positions};
use crate::system::Interchange;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::{BufWriter, Write};
use std::path::Path;

const MOLECULE_NAME: &str = "MOL";

/// Writes the force-field topology (`.top`).
pub fn to_top(interchange: &Interchange, path: &Path) -> Result<(), ExportError> {
    if interchange.virtual_sites().is_some_and(|v| !v.is_empty()) {
        return Err(ExportError::Internal(
            "the GROMACS writer does not support virtual sites".to_string(),
        ));
    }

    let vdw = interchange.vdw()?;
    let electrostatics = interchange.electrostatics()?;
    let charges = interchange.charges()?;
    let topology = interchange.topology();

    let file = std::fs::File::create(path).map_err(|e| ExportError::io(path, e))?;
    let mut w = BufWriter::new(file);
    let io_err = |e: std::io::Error| ExportError::io(path, e);

    writeln!(w, "; generated by forcelink").map_err(io_err)?;
    writeln!(w).map_err(io_err)?;

    let comb_rule = match vdw.mixing_rule {
        MixingRule::LorentzBerthelot => 2,
        MixingRule::Geometric => 3,
    };
    writeln!(w, "[ defaults ]").map_err(io_err)?;
    writeln!(w, "; nbfunc  comb-rule  gen-pairs  fudgeLJ  fudgeQQ").map_err(io_err)?;
    writeln!(
        w,
        "1  {comb_rule}  no  {:.6}  {:.6}",
        vdw.scales.scale_14, electrostatics.scales.scale_14
    )
    .map_err(io_err)?;
    writeln!(w).map_err(io_err)?;

    // One atom type per distinct vdW potential identity
    writeln!(w, "[ atomtypes ]").map_err(io_err)?;
    writeln!(w, "; name  mass  charge  ptype  sigma  epsilon").map_err(io_err)?;
    let mut type_of_atom: HashMap<usize, String> = HashMap::new();
    for (key, potential_key) in vdw.terms.slot_map() {
        type_of_atom.insert(key.atom_indices[0], potential_key.id.clone());
    }
    let mut written_types: Vec<&str> = Vec::new();
    for (key, potential_key) in vdw.terms.slot_map() {
        if written_types.contains(&potential_key.id.as_str()) {
            continue;
        }
        written_types.push(&potential_key.id);
        let potential = vdw.terms.get_parameters(key)?;
        let sigma = required_value(potential, "sigma", Unit::Nanometer)?;
        let epsilon = required_value(potential, "epsilon", Unit::KilojoulePerMole)?;
        let mass = topology
            .atom_by_index(key.atom_indices[0])
            .map(|a| a.mass)
            .unwrap_or(0.0);
        writeln!(
            w,
            "{}  {mass:.6}  0.000000  A  {sigma:.10}  {epsilon:.10}",
            potential_key.id
        )
        .map_err(io_err)?;
    }
    writeln!(w).map_err(io_err)?;

    writeln!(w, "[ moleculetype ]").map_err(io_err)?;
    writeln!(w, "; name  nrexcl").map_err(io_err)?;
    writeln!(w, "{MOLECULE_NAME}  3").map_err(io_err)?;
    writeln!(w).map_err(io_err)?;

    let residues = residue_map(topology);
    writeln!(w, "[ atoms ]").map_err(io_err)?;
    writeln!(w, "; nr  type  resnr  residue  atom  cgnr  charge  mass").map_err(io_err)?;
    for (index, atom) in topology.atoms_iter() {
        let atom_type = type_of_atom.get(&index).map(String::as_str).ok_or_else(|| {
            ExportError::Internal(format!("atom {index} has no vdW parameters"))
        })?;
        let charge = charges.get(&ParticleKey::Atom(index)).copied().unwrap_or(0.0);
        let (resnr, resname) = residues
            .get(&index)
            .cloned()
            .unwrap_or((1, MOLECULE_NAME.to_string()));
        writeln!(
            w,
            "{}  {atom_type}  {resnr}  {resname}  {}  {}  {charge:.6}  {:.6}",
            index + 1,
            atom.name,
            index + 1,
            atom.mass
        )
        .map_err(io_err)?;
    }
    writeln!(w).map_err(io_err)?;

    if let Some(bonds) = valence(interchange, "Bonds") {
        writeln!(w, "[ bonds ]").map_err(io_err)?;
        writeln!(w, "; ai  aj  funct  b0  kb").map_err(io_err)?;
        for (key, _) in bonds.slot_map() {
            let potential = bonds.get_parameters(key)?;
            let length = required_value(potential, "length", Unit::Nanometer)?;
            let k = required_value(potential, "k", Unit::KjPerMolPerNmSquared)?;
            writeln!(
                w,
                "{}  {}  1  {length:.10}  {k:.10}",
                key.atom_indices[0] + 1,
                key.atom_indices[1] + 1
            )
            .map_err(io_err)?;
        }
        writeln!(w).map_err(io_err)?;
    }

    let pairs_14 = topology.pairs_14();
    if !pairs_14.is_empty() {
        writeln!(w, "[ pairs ]").map_err(io_err)?;
        writeln!(w, "; ai  aj  funct").map_err(io_err)?;
        for (i, j) in &pairs_14 {
            writeln!(w, "{}  {}  1", i + 1, j + 1).map_err(io_err)?;
        }
        writeln!(w).map_err(io_err)?;
    }

    // Explicit per-atom exclusion lists over the 1-2, 1-3 and 1-4 pairs
    let mut excluded: BTreeMap<usize, BTreeSet<usize>> = BTreeMap::new();
    for (i, j) in topology
        .pairs_12()
        .into_iter()
        .chain(topology.pairs_13())
        .chain(pairs_14.iter().copied())
    {
        excluded.entry(i).or_default().insert(j);
        excluded.entry(j).or_default().insert(i);
    }
    if !excluded.is_empty() {
        writeln!(w, "[ exclusions ]").map_err(io_err)?;
        writeln!(w, "; ai  excluded").map_err(io_err)?;
        for (atom, partners) in &excluded {
            write!(w, "{}", atom + 1).map_err(io_err)?;
            for partner in partners {
                write!(w, "  {}", partner + 1).map_err(io_err)?;
            }
            writeln!(w).map_err(io_err)?;
        }
        writeln!(w).map_err(io_err)?;
    }

    if let Some(angles) = valence(interchange, "Angles") {
        writeln!(w, "[ angles ]").map_err(io_err)?;
        writeln!(w, "; ai  aj  ak  funct  th0  cth").map_err(io_err)?;
        for (key, _) in angles.slot_map() {
            let potential = angles.get_parameters(key)?;
            let angle = required_value(potential, "angle", Unit::Degree)?;
            let k = required_value(potential, "k", Unit::KjPerMolPerRadianSquared)?;
            writeln!(
                w,
                "{}  {}  {}  1  {angle:.10}  {k:.10}",
                key.atom_indices[0] + 1,
                key.atom_indices[1] + 1,
                key.atom_indices[2] + 1
            )
            .map_err(io_err)?;
        }
        writeln!(w).map_err(io_err)?;
    }

    for (name, funct) in [("ProperTorsions", 1), ("ImproperTorsions", 4)] {
        let Some(torsions) = valence(interchange, name) else {
            continue;
        };
        if torsions.is_empty() {
            continue;
        }
        writeln!(w, "[ dihedrals ]").map_err(io_err)?;
        writeln!(w, "; ai  aj  ak  al  funct  phase  k  mult").map_err(io_err)?;
        for (key, _) in torsions.slot_map() {
            let potential = torsions.get_parameters(key)?;
            let phase = required_value(potential, "phase", Unit::Degree)?;
            let k = required_value(potential, "k", Unit::KilojoulePerMole)?;
            let periodicity = match potential.get("periodicity") {
                Some(value) => value.value as u32,
                None => key.mult.unwrap_or(1),
            };
            writeln!(
                w,
                "{}  {}  {}  {}  {funct}  {phase:.6}  {k:.10}  {periodicity}",
                key.atom_indices[0] + 1,
                key.atom_indices[1] + 1,
                key.atom_indices[2] + 1,
                key.atom_indices[3] + 1
            )
            .map_err(io_err)?;
        }
        writeln!(w).map_err(io_err)?;
    }

    if let Some(constraints) = valence(interchange, "Constraints") {
        if !constraints.is_empty() {
            writeln!(w, "[ constraints ]").map_err(io_err)?;
            writeln!(w, "; ai  aj  funct  b0").map_err(io_err)?;
            for (key, _) in constraints.slot_map() {
                let potential = constraints.get_parameters(key)?;
                let distance = required_value(potential, "distance", Unit::Nanometer)?;
                writeln!(
                    w,
                    "{}  {}  1  {distance:.10}",
                    key.atom_indices[0] + 1,
                    key.atom_indices[1] + 1
                )
                .map_err(io_err)?;
            }
            writeln!(w).map_err(io_err)?;
        }
    }

    writeln!(w, "[ system ]").map_err(io_err)?;
    writeln!(w, "forcelink system").map_err(io_err)?;
    writeln!(w).map_err(io_err)?;
    writeln!(w, "[ molecules ]").map_err(io_err)?;
    writeln!(w, "{MOLECULE_NAME}  1").map_err(io_err)?;

    w.flush().map_err(io_err)
}

/// Writes the coordinate file (`.gro`), positions in nm with the given
/// number of decimals.
pub fn to_gro(interchange: &Interchange, path: &Path, decimals: usize) -> Result<(), ExportError> {
    let positions = require_positions(interchange)?;
    let topology = interchange.topology();

    let file = std::fs::File::create(path).map_err(|e| ExportError::io(path, e))?;
    let mut w = BufWriter::new(file);
    let io_err = |e: std::io::Error| ExportError::io(path, e);

    writeln!(w, "generated by forcelink").map_err(io_err)?;
    writeln!(w, "{:>5}", topology.n_atoms()).map_err(io_err)?;

    let width = decimals + 5;
    let residues = residue_map(topology);
    for (index, atom) in topology.atoms_iter() {
        let position = positions.get(index).ok_or(ExportError::MissingPositions)?;
        let (resnr, resname) = residues
            .get(&index)
            .cloned()
            .unwrap_or((1, MOLECULE_NAME.to_string()));
        writeln!(
            w,
            "{resnr:>5}{:<5}{:>5}{:>5}{:>width$.decimals$}{:>width$.decimals$}{:>width$.decimals$}",
            truncate(&resname, 5),
            truncate(&atom.name, 5),
            (index + 1) % 100_000,
            position.x * crate::interop::ANGSTROM_TO_NM,
            position.y * crate::interop::ANGSTROM_TO_NM,
            position.z * crate::interop::ANGSTROM_TO_NM,
        )
        .map_err(io_err)?;
    }

    match interchange.box_vectors() {
        Some(matrix) => {
            let m = matrix * crate::interop::ANGSTROM_TO_NM;
            let off_diagonal_zero = m[(0, 1)] == 0.0
                && m[(0, 2)] == 0.0
                && m[(1, 0)] == 0.0
                && m[(1, 2)] == 0.0
                && m[(2, 0)] == 0.0
                && m[(2, 1)] == 0.0;
            if off_diagonal_zero {
                writeln!(w, "{:.5} {:.5} {:.5}", m[(0, 0)], m[(1, 1)], m[(2, 2)])
                    .map_err(io_err)?;
            } else {
                writeln!(
                    w,
                    "{:.5} {:.5} {:.5} {:.5} {:.5} {:.5} {:.5} {:.5} {:.5}",
                    m[(0, 0)],
                    m[(1, 1)],
                    m[(2, 2)],
                    m[(0, 1)],
                    m[(0, 2)],
                    m[(1, 0)],
                    m[(1, 2)],
                    m[(2, 0)],
                    m[(2, 1)]
                )
                .map_err(io_err)?;
            }
        }
        // A box line is mandatory in the format; a zero box means "none"
        None => writeln!(w, "0.00000 0.00000 0.00000").map_err(io_err)?,
    }

    w.flush().map_err(io_err)
}

fn valence<'a>(interchange: &'a Interchange, name: &str) -> Option<&'a Collection> {
    interchange
        .collections()
        .get(name)
        .and_then(|data| data.as_valence())
}

fn residue_map(
    topology: &crate::core::models::topology::Topology,
) -> HashMap<usize, (usize, String)> {
    let mut molecule_numbers = HashMap::new();
    for (number, (id, molecule)) in topology.molecules_iter().enumerate() {
        molecule_numbers.insert(id, (number + 1, molecule.name.clone()));
    }
    let mut out = HashMap::new();
    for (index, atom) in topology.atoms_iter() {
        if let Some(entry) = molecule_numbers.get(&atom.molecule_id) {
            out.insert(index, entry.clone());
        }
    }
    out
}

/// Truncates to at most `max_chars` characters, never splitting a
/// multi-byte character.
fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &s[..byte_index],
        None => s,
    }
}

fn required_value(
    potential: &crate::core::collections::Potential,
    name: &str,
    unit: Unit,
) -> Result<f64, ExportError> {
    let value = potential.get(name).ok_or_else(|| {
        ExportError::Internal(format!("potential is missing required parameter '{name}'"))
    })?;
    Ok(value.value_in(unit)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::water_interchange;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn top_file_declares_every_section() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("water.top");
        to_top(&water_interchange(), &path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        for section in [
            "[ defaults ]",
            "[ atomtypes ]",
            "[ moleculetype ]",
            "[ atoms ]",
            "[ bonds ]",
            "[ angles ]",
            "[ exclusions ]",
            "[ system ]",
            "[ molecules ]",
        ] {
            assert!(content.contains(section), "missing {section}");
        }
        // The central oxygen excludes both hydrogens; each hydrogen
        // excludes the oxygen (1-2) and the other hydrogen (1-3).
        assert!(content.contains("1  2  3"));
        assert!(content.contains("2  1  3"));
        assert!(content.contains("3  1  2"));
        // Lorentz-Berthelot maps to comb-rule 2, scale_14 defaults to 0.5
        assert!(content.contains("1  2  no  0.500000  0.500000"));
        // Bond length in nm
        assert!(content.contains("0.0957200000"));
    }

    #[test]
    fn gro_file_counts_atoms_and_converts_to_nm() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("water.gro");
        let mut out = water_interchange();
        out.set_box(&[20.0, 20.0, 20.0]).unwrap();
        to_gro(&out, &path, 3).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[1].trim(), "3");
        // 0.9572 A = 0.096 nm at three decimals
        assert!(lines[3].contains("0.096"));
        // 20 A box = 2 nm
        assert_eq!(lines.last().unwrap().trim(), "2.00000 2.00000 2.00000");
    }

    #[test]
    fn name_truncation_respects_character_boundaries() {
        assert_eq!(truncate("Cα12", 4), "Cα12");
        assert_eq!(truncate("Cα123", 4), "Cα12");
        assert_eq!(truncate("αβγδε", 3), "αβγ");
    }

    #[test]
    fn gro_requires_positions() {
        let dir = tempdir().unwrap();
        let mut out = water_interchange();
        out.set_positions(None);
        assert!(matches!(
            to_gro(&out, &dir.path().join("water.gro"), 3),
            Err(ExportError::MissingPositions)
        ));
    }
}
