//! Amber `.prmtop` and `.inpcrd` writers.
//!
//! The prmtop follows the `%VERSION` / `%FLAG` / `%FORMAT` layout with the
//! standard Fortran field widths (20a4, 10I8, 5E16.8). Charges are written
//! in Amber's internal units, elementary charge scaled by 18.2223; harmonic
//! force constants are halved per the Amber convention.

use crate::core::collections::{Collection, PotentialKey};
use crate::core::keys::{ParticleKey, TopologyKey};
use crate::core::models::atom::element_number;
use crate::core::units::Unit;
use crate::interop::{ExportError, require_positions};
use crate::system::Interchange;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{BufWriter, Write};
use std::path::Path;

/// Amber's internal charge scaling (sqrt of the Coulomb constant in
/// kcal*A/mol/e^2).
pub const AMBER_CHARGE_SCALE: f64 = 18.2223;

pub fn to_prmtop(interchange: &Interchange, path: &Path) -> Result<(), ExportError> {
    if interchange.virtual_sites().is_some_and(|v| !v.is_empty()) {
        return Err(ExportError::Internal(
            "the Amber writer does not support virtual sites".to_string(),
        ));
    }

    let topology = interchange.topology();
    let vdw = interchange.vdw()?;
    let charges = interchange.charges()?;
    let n_atoms = topology.n_atoms();

    let atom_types = type_table(&vdw.terms);
    let n_types = atom_types.len();
    let type_of_atom: BTreeMap<usize, usize> = vdw
        .terms
        .slot_map()
        .iter()
        .map(|(key, potential_key)| (key.atom_indices[0], atom_types[potential_key]))
        .collect();

    let bonds = valence(interchange, "Bonds");
    let angles = valence(interchange, "Angles");
    let dihedrals = valence(interchange, "ProperTorsions");
    let impropers = valence(interchange, "ImproperTorsions");
    let bond_types = bonds.map(type_table).unwrap_or_default();
    let angle_types = angles.map(type_table).unwrap_or_default();
    let dihedral_types = dihedrals.map(type_table).unwrap_or_default();
    // Impropers share the dihedral tables; their type ids continue after
    // the proper types
    let improper_types: BTreeMap<PotentialKey, usize> = impropers
        .map(|c| {
            c.potentials()
                .keys()
                .enumerate()
                .map(|(n, key)| (key.clone(), dihedral_types.len() + n + 1))
                .collect()
        })
        .unwrap_or_default();

    let is_hydrogen = |index: usize| {
        topology
            .atom_by_index(index)
            .map(|a| a.element == "H")
            .unwrap_or(false)
    };
    let (bonds_h, bonds_a) = split_h(bonds.map(slot_keys).unwrap_or_default(), &is_hydrogen);
    let (angles_h, angles_a) = split_h(angles.map(slot_keys).unwrap_or_default(), &is_hydrogen);
    let (dihedrals_h, dihedrals_a) =
        split_h(dihedrals.map(slot_keys).unwrap_or_default(), &is_hydrogen);
    let (impropers_h, impropers_a) =
        split_h(impropers.map(slot_keys).unwrap_or_default(), &is_hydrogen);

    // Per-atom excluded lists: every 1-2, 1-3, 1-4 partner with a larger
    // index; atoms with no partners contribute a single zero entry
    let mut excluded: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n_atoms];
    for (i, j) in topology
        .pairs_12()
        .into_iter()
        .chain(topology.pairs_13())
        .chain(topology.pairs_14())
    {
        excluded[i].insert(j);
    }
    let counts: Vec<i64> = excluded.iter().map(|s| s.len().max(1) as i64).collect();
    let mut excluded_list: Vec<i64> = Vec::new();
    for set in &excluded {
        if set.is_empty() {
            excluded_list.push(0);
        } else {
            excluded_list.extend(set.iter().map(|&j| (j + 1) as i64));
        }
    }

    let n_residues = topology.n_molecules().max(1);

    let file = std::fs::File::create(path).map_err(|e| ExportError::io(path, e))?;
    let mut w = BufWriter::new(file);
    let io_err = |e: std::io::Error| ExportError::io(path, e);

    writeln!(
        w,
        "%VERSION  VERSION_STAMP = V0001.000  DATE = 01/01/00  00:00:00"
    )
    .map_err(io_err)?;

    string_section(&mut w, "TITLE", &["default_name".to_string()]).map_err(io_err)?;

    let mut pointers = vec![0i64; 31];
    pointers[0] = n_atoms as i64;
    pointers[1] = n_types as i64;
    pointers[2] = bonds_h.len() as i64;
    pointers[3] = bonds_a.len() as i64;
    pointers[4] = angles_h.len() as i64;
    pointers[5] = angles_a.len() as i64;
    pointers[6] = (dihedrals_h.len() + impropers_h.len()) as i64;
    pointers[7] = (dihedrals_a.len() + impropers_a.len()) as i64;
    pointers[10] = excluded_list.len() as i64;
    pointers[11] = n_residues as i64;
    pointers[12] = bonds_a.len() as i64;
    pointers[13] = angles_a.len() as i64;
    pointers[14] = (dihedrals_a.len() + impropers_a.len()) as i64;
    pointers[15] = bond_types.len() as i64;
    pointers[16] = angle_types.len() as i64;
    pointers[17] = (dihedral_types.len() + improper_types.len()) as i64;
    pointers[18] = n_types as i64;
    pointers[21] = if interchange.is_periodic() { 1 } else { 0 };
    int_section(&mut w, "POINTERS", &pointers).map_err(io_err)?;

    let names: Vec<String> = (0..n_atoms)
        .map(|i| {
            topology
                .atom_by_index(i)
                .map(|a| a.name.clone())
                .unwrap_or_default()
        })
        .collect();
    string_section(&mut w, "ATOM_NAME", &names).map_err(io_err)?;

    let charge_values: Vec<f64> = (0..n_atoms)
        .map(|i| charges.get(&ParticleKey::Atom(i)).copied().unwrap_or(0.0) * AMBER_CHARGE_SCALE)
        .collect();
    float_section(&mut w, "CHARGE", &charge_values).map_err(io_err)?;

    let atomic_numbers: Vec<i64> = (0..n_atoms)
        .map(|i| {
            topology
                .atom_by_index(i)
                .and_then(|a| element_number(&a.element))
                .map(i64::from)
                .unwrap_or(0)
        })
        .collect();
    int_section(&mut w, "ATOMIC_NUMBER", &atomic_numbers).map_err(io_err)?;

    let masses: Vec<f64> = (0..n_atoms)
        .map(|i| topology.atom_by_index(i).map(|a| a.mass).unwrap_or(0.0))
        .collect();
    float_section(&mut w, "MASS", &masses).map_err(io_err)?;

    let type_indices: Vec<i64> = (0..n_atoms)
        .map(|i| {
            type_of_atom
                .get(&i)
                .map(|&t| t as i64)
                .ok_or_else(|| ExportError::Internal(format!("atom {i} has no vdW parameters")))
        })
        .collect::<Result<_, _>>()?;
    int_section(&mut w, "ATOM_TYPE_INDEX", &type_indices).map_err(io_err)?;

    int_section(&mut w, "NUMBER_EXCLUDED_ATOMS", &counts).map_err(io_err)?;

    // ICO matrix: both orders of a type pair point at the same triangular
    // A/B coefficient slot
    let mut parm_index = vec![0i64; n_types * n_types];
    for i in 1..=n_types {
        for j in 1..=n_types {
            let (a, b) = (i.max(j), i.min(j));
            parm_index[n_types * (i - 1) + (j - 1)] = (a * (a - 1) / 2 + b) as i64;
        }
    }
    int_section(&mut w, "NONBONDED_PARM_INDEX", &parm_index).map_err(io_err)?;

    let residue_labels: Vec<String> = topology
        .molecules_iter()
        .map(|(_, molecule)| molecule.name.clone())
        .collect();
    string_section(&mut w, "RESIDUE_LABEL", &residue_labels).map_err(io_err)?;

    let mut residue_pointers = Vec::with_capacity(n_residues);
    let mut seen_molecules = BTreeSet::new();
    for (index, atom) in topology.atoms_iter() {
        if seen_molecules.insert(atom.molecule_id) {
            residue_pointers.push((index + 1) as i64);
        }
    }
    if residue_pointers.is_empty() {
        residue_pointers.push(1);
    }
    int_section(&mut w, "RESIDUE_POINTER", &residue_pointers).map_err(io_err)?;

    if let Some(bonds) = bonds {
        let (k_values, eq_values) = harmonic_tables(
            bonds,
            &bond_types,
            "k",
            Unit::KcalPerMolPerAngstromSquared,
            "length",
            Unit::Angstrom,
        )?;
        float_section(&mut w, "BOND_FORCE_CONSTANT", &k_values).map_err(io_err)?;
        float_section(&mut w, "BOND_EQUIL_VALUE", &eq_values).map_err(io_err)?;
    } else {
        float_section(&mut w, "BOND_FORCE_CONSTANT", &[]).map_err(io_err)?;
        float_section(&mut w, "BOND_EQUIL_VALUE", &[]).map_err(io_err)?;
    }

    if let Some(angles) = angles {
        let (k_values, eq_values) = harmonic_tables(
            angles,
            &angle_types,
            "k",
            Unit::KcalPerMolPerRadianSquared,
            "angle",
            Unit::Radian,
        )?;
        float_section(&mut w, "ANGLE_FORCE_CONSTANT", &k_values).map_err(io_err)?;
        float_section(&mut w, "ANGLE_EQUIL_VALUE", &eq_values).map_err(io_err)?;
    } else {
        float_section(&mut w, "ANGLE_FORCE_CONSTANT", &[]).map_err(io_err)?;
        float_section(&mut w, "ANGLE_EQUIL_VALUE", &[]).map_err(io_err)?;
    }

    let mut dihedral_k = Vec::new();
    let mut dihedral_periodicity = Vec::new();
    let mut dihedral_phase = Vec::new();
    if let Some(dihedrals) = dihedrals {
        for (key, _) in &dihedral_types {
            let potential = &dihedrals.potentials()[key];
            dihedral_k.push(value(potential, "k", Unit::KilocaloriePerMole)?);
            dihedral_periodicity.push(
                potential
                    .get("periodicity")
                    .map(|v| v.value)
                    .or_else(|| key.mult.map(f64::from))
                    .unwrap_or(1.0),
            );
            dihedral_phase.push(value(potential, "phase", Unit::Radian)?);
        }
    }
    if let Some(impropers) = impropers {
        for (key, _) in &improper_types {
            let potential = &impropers.potentials()[key];
            dihedral_k.push(value(potential, "k", Unit::KilocaloriePerMole)?);
            dihedral_periodicity.push(
                potential
                    .get("periodicity")
                    .map(|v| v.value)
                    .or_else(|| key.mult.map(f64::from))
                    .unwrap_or(2.0),
            );
            dihedral_phase.push(value(potential, "phase", Unit::Radian)?);
        }
    }
    float_section(&mut w, "DIHEDRAL_FORCE_CONSTANT", &dihedral_k).map_err(io_err)?;
    float_section(&mut w, "DIHEDRAL_PERIODICITY", &dihedral_periodicity).map_err(io_err)?;
    float_section(&mut w, "DIHEDRAL_PHASE", &dihedral_phase).map_err(io_err)?;

    // Triangular A/B tables under the active mixing rule
    let mut lj_by_type: Vec<(f64, f64)> = vec![(0.0, 0.0); n_types];
    for (key, &type_id) in &atom_types {
        let potential = &vdw.terms.potentials()[key];
        lj_by_type[type_id - 1] = (
            value(potential, "sigma", Unit::Angstrom)?,
            value(potential, "epsilon", Unit::KilocaloriePerMole)?,
        );
    }
    let mut acoef = Vec::with_capacity(n_types * (n_types + 1) / 2);
    let mut bcoef = Vec::with_capacity(n_types * (n_types + 1) / 2);
    for i in 0..n_types {
        for j in 0..=i {
            let (sigma_i, epsilon_i) = lj_by_type[i];
            let (sigma_j, epsilon_j) = lj_by_type[j];
            let (sigma, epsilon) = vdw
                .mixing_rule
                .combine(sigma_i, epsilon_i, sigma_j, epsilon_j);
            let sigma6 = sigma.powi(6);
            acoef.push(4.0 * epsilon * sigma6 * sigma6);
            bcoef.push(4.0 * epsilon * sigma6);
        }
    }
    float_section(&mut w, "LENNARD_JONES_ACOEF", &acoef).map_err(io_err)?;
    float_section(&mut w, "LENNARD_JONES_BCOEF", &bcoef).map_err(io_err)?;

    let bond_rows = |keys: &[&TopologyKey]| -> Vec<i64> {
        let mut rows = Vec::with_capacity(keys.len() * 3);
        for key in keys {
            let type_id = bonds
                .and_then(|c| c.slot_map().get(*key))
                .and_then(|pk| bond_types.get(pk))
                .copied()
                .unwrap_or(0);
            rows.push((key.atom_indices[0] * 3) as i64);
            rows.push((key.atom_indices[1] * 3) as i64);
            rows.push(type_id as i64);
        }
        rows
    };
    int_section(&mut w, "BONDS_INC_HYDROGEN", &bond_rows(&bonds_h)).map_err(io_err)?;
    int_section(&mut w, "BONDS_WITHOUT_HYDROGEN", &bond_rows(&bonds_a)).map_err(io_err)?;

    let angle_rows = |keys: &[&TopologyKey]| -> Vec<i64> {
        let mut rows = Vec::with_capacity(keys.len() * 4);
        for key in keys {
            let type_id = angles
                .and_then(|c| c.slot_map().get(*key))
                .and_then(|pk| angle_types.get(pk))
                .copied()
                .unwrap_or(0);
            for &atom in &key.atom_indices {
                rows.push((atom * 3) as i64);
            }
            rows.push(type_id as i64);
        }
        rows
    };
    int_section(&mut w, "ANGLES_INC_HYDROGEN", &angle_rows(&angles_h)).map_err(io_err)?;
    int_section(&mut w, "ANGLES_WITHOUT_HYDROGEN", &angle_rows(&angles_a)).map_err(io_err)?;

    let dihedral_rows = |keys: &[&TopologyKey]| -> Vec<i64> {
        let mut rows = Vec::with_capacity(keys.len() * 5);
        for key in keys {
            let type_id = dihedrals
                .and_then(|c| c.slot_map().get(*key))
                .and_then(|pk| dihedral_types.get(pk))
                .copied()
                .unwrap_or(0);
            for &atom in &key.atom_indices {
                rows.push((atom * 3) as i64);
            }
            rows.push(type_id as i64);
        }
        rows
    };
    let improper_rows = |keys: &[&TopologyKey]| -> Vec<i64> {
        let mut rows = Vec::with_capacity(keys.len() * 5);
        for key in keys {
            let type_id = impropers
                .and_then(|c| c.slot_map().get(*key))
                .and_then(|pk| improper_types.get(pk))
                .copied()
                .unwrap_or(0);
            rows.push((key.atom_indices[0] * 3) as i64);
            rows.push((key.atom_indices[1] * 3) as i64);
            // Negative third and fourth codes mark the term improper and
            // suppress its 1-4 nonbonded contribution
            rows.push(-((key.atom_indices[2] * 3) as i64));
            rows.push(-((key.atom_indices[3] * 3) as i64));
            rows.push(type_id as i64);
        }
        rows
    };
    let mut dihedrals_inc_h = dihedral_rows(&dihedrals_h);
    dihedrals_inc_h.extend(improper_rows(&impropers_h));
    let mut dihedrals_no_h = dihedral_rows(&dihedrals_a);
    dihedrals_no_h.extend(improper_rows(&impropers_a));
    int_section(&mut w, "DIHEDRALS_INC_HYDROGEN", &dihedrals_inc_h).map_err(io_err)?;
    int_section(&mut w, "DIHEDRALS_WITHOUT_HYDROGEN", &dihedrals_no_h).map_err(io_err)?;

    int_section(&mut w, "EXCLUDED_ATOMS_LIST", &excluded_list).map_err(io_err)?;

    if let Some(matrix) = interchange.box_vectors() {
        float_section(
            &mut w,
            "BOX_DIMENSIONS",
            &[90.0, matrix[(0, 0)], matrix[(1, 1)], matrix[(2, 2)]],
        )
        .map_err(io_err)?;
    }

    w.flush().map_err(io_err)
}

/// Writes the coordinate file (positions in Angstroms, 6F12.7).
pub fn to_inpcrd(interchange: &Interchange, path: &Path) -> Result<(), ExportError> {
    let positions = require_positions(interchange)?;

    let file = std::fs::File::create(path).map_err(|e| ExportError::io(path, e))?;
    let mut w = BufWriter::new(file);
    let io_err = |e: std::io::Error| ExportError::io(path, e);

    writeln!(w, "default_name").map_err(io_err)?;
    writeln!(w, "{:>5}", positions.len()).map_err(io_err)?;
    let flat: Vec<f64> = positions
        .iter()
        .flat_map(|p| [p.x, p.y, p.z])
        .collect();
    for chunk in flat.chunks(6) {
        for value in chunk {
            write!(w, "{value:12.7}").map_err(io_err)?;
        }
        writeln!(w).map_err(io_err)?;
    }
    if let Some(matrix) = interchange.box_vectors() {
        for value in [
            matrix[(0, 0)],
            matrix[(1, 1)],
            matrix[(2, 2)],
            90.0,
            90.0,
            90.0,
        ] {
            write!(w, "{value:12.7}").map_err(io_err)?;
        }
        writeln!(w).map_err(io_err)?;
    }

    w.flush().map_err(io_err)
}

fn type_table(collection: &Collection) -> BTreeMap<PotentialKey, usize> {
    collection
        .potentials()
        .keys()
        .enumerate()
        .map(|(n, key)| (key.clone(), n + 1))
        .collect()
}

fn slot_keys(collection: &Collection) -> Vec<&TopologyKey> {
    collection.slot_map().keys().collect()
}

/// Partitions interaction keys into Amber's with-hydrogen and
/// without-hydrogen halves.
fn split_h<'a>(
    keys: Vec<&'a TopologyKey>,
    is_hydrogen: &dyn Fn(usize) -> bool,
) -> (Vec<&'a TopologyKey>, Vec<&'a TopologyKey>) {
    let mut with_h = Vec::new();
    let mut without_h = Vec::new();
    for key in keys {
        if key.atom_indices.iter().any(|&i| is_hydrogen(i)) {
            with_h.push(key);
        } else {
            without_h.push(key);
        }
    }
    (with_h, without_h)
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

/// Per-type (K, equilibrium) tables with the Amber halving applied to K.
fn harmonic_tables(
    collection: &Collection,
    types: &BTreeMap<PotentialKey, usize>,
    k_name: &str,
    k_unit: Unit,
    eq_name: &str,
    eq_unit: Unit,
) -> Result<(Vec<f64>, Vec<f64>), ExportError> {
    let mut k_values = vec![0.0; types.len()];
    let mut eq_values = vec![0.0; types.len()];
    for (key, &type_id) in types {
        let potential = &collection.potentials()[key];
        k_values[type_id - 1] = value(potential, k_name, k_unit)? / 2.0;
        eq_values[type_id - 1] = value(potential, eq_name, eq_unit)?;
    }
    Ok((k_values, eq_values))
}

fn string_section<W: Write>(w: &mut W, flag: &str, values: &[String]) -> std::io::Result<()> {
    writeln!(w, "%FLAG {flag}")?;
    writeln!(w, "%FORMAT(20a4)")?;
    if values.is_empty() {
        writeln!(w)?;
        return Ok(());
    }
    for chunk in values.chunks(20) {
        for value in chunk {
            write!(w, "{:<4}", truncate(value, 4))?;
        }
        writeln!(w)?;
    }
    Ok(())
}

/// Truncates to at most `max_chars` characters, never splitting a
/// multi-byte character.
fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &s[..byte_index],
        None => s,
    }
}

fn int_section<W: Write>(w: &mut W, flag: &str, values: &[i64]) -> std::io::Result<()> {
    writeln!(w, "%FLAG {flag}")?;
    writeln!(w, "%FORMAT(10I8)")?;
    if values.is_empty() {
        writeln!(w)?;
        return Ok(());
    }
    for chunk in values.chunks(10) {
        for value in chunk {
            write!(w, "{value:>8}")?;
        }
        writeln!(w)?;
    }
    Ok(())
}

fn float_section<W: Write>(w: &mut W, flag: &str, values: &[f64]) -> std::io::Result<()> {
    writeln!(w, "%FLAG {flag}")?;
    writeln!(w, "%FORMAT(5E16.8)")?;
    if values.is_empty() {
        writeln!(w)?;
        return Ok(());
    }
    for chunk in values.chunks(5) {
        for value in chunk {
            write!(w, "{}", fortran_e(*value))?;
        }
        writeln!(w)?;
    }
    Ok(())
}

/// Fortran E16.8 rendering: `d.ddddddddE(sign)dd`, right-justified.
fn fortran_e(value: f64) -> String {
    let formatted = format!("{value:.8E}");
    let (mantissa, exponent) = formatted
        .split_once('E')
        .unwrap_or((formatted.as_str(), "0"));
    let exp: i32 = exponent.parse().unwrap_or(0);
    let sign = if exp < 0 { '-' } else { '+' };
    format!("{:>16}", format!("{mantissa}E{sign}{:02}", exp.abs()))
}
