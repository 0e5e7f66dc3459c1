//! Experimental import of a GROMACS `.top`/`.gro` pair.
//!
//! Supports the single-moleculetype subset the writer emits: `[ defaults ]`,
//! `[ atomtypes ]`, `[ atoms ]`, `[ bonds ]`, `[ angles ]`, `[ dihedrals ]`,
//! and `[ constraints ]`. Values are stored in GROMACS units; the unit layer
//! converts on read.

use crate::core::collections::{Collection, CollectionKind, Potential};
use crate::core::keys::TopologyKey;
use crate::core::models::atom::{Atom, BondOrder};
use crate::core::models::ids::AtomId;
use crate::core::models::topology::Topology;
use crate::core::nonbonded::{ElectrostaticsCollection, MixingRule, VdwCollection};
use crate::core::units::{Quantity, Unit};
use crate::interop::ImportError;
use crate::system::{CollectionData, Interchange, require_experimental};
use std::collections::HashMap;
use std::path::Path;

pub fn from_gromacs(top_path: &Path, gro_path: &Path) -> Result<Interchange, ImportError> {
    require_experimental("Interchange.from_gromacs").map_err(ImportError::System)?;

    let top = parse_top(top_path)?;
    let gro = parse_gro(gro_path)?;

    if top.atoms.len() != gro.atoms.len() {
        return Err(ImportError::Unsupported(format!(
            "topology file has {} atoms but coordinate file has {}",
            top.atoms.len(),
            gro.atoms.len()
        )));
    }
    let n_atoms = top.atoms.len();
    for (i, j) in top
        .bonds
        .iter()
        .map(|b| (b.0, b.1))
        .chain(top.constraints.iter().map(|c| (c.0, c.1)))
    {
        if i >= n_atoms || j >= n_atoms {
            return Err(ImportError::Unsupported(format!(
                "bonded term references atom {} outside the {n_atoms}-atom system",
                i.max(j)
            )));
        }
    }

    // Topology: group atoms into molecules by residue number
    let mut topology = Topology::new();
    let mut molecule_ids = HashMap::new();
    let mut atom_ids: Vec<AtomId> = Vec::with_capacity(n_atoms);
    for atom in &top.atoms {
        let molecule_id = *molecule_ids
            .entry(atom.resnr)
            .or_insert_with(|| topology.add_molecule(&atom.resname));
        let id = topology
            .add_atom(molecule_id, Atom::new(&atom.name, &element_guess(&atom.name), molecule_id))
            .ok_or_else(|| ImportError::Unsupported("molecule vanished during build".to_string()))?;
        atom_ids.push(id);
    }
    for (i, j, _, _) in &top.bonds {
        topology.add_bond(atom_ids[*i], atom_ids[*j], BondOrder::Single);
    }
    for (i, j, _) in &top.constraints {
        topology.add_bond(atom_ids[*i], atom_ids[*j], BondOrder::Single);
    }

    let mut out = Interchange::new(topology);

    if !top.bonds.is_empty() {
        let mut bonds = Collection::new(CollectionKind::Bonds);
        for (i, j, length, k) in &top.bonds {
            bonds.add_or_update(
                TopologyKey::bond(*i, *j),
                Potential::new()
                    .with("length", Quantity::new(*length, Unit::Nanometer))
                    .with("k", Quantity::new(*k, Unit::KjPerMolPerNmSquared)),
            );
        }
        out.add_collection(CollectionData::Valence(bonds));
    }

    if !top.angles.is_empty() {
        let mut angles = Collection::new(CollectionKind::Angles);
        for (i, j, k, theta, force) in &top.angles {
            angles.add_or_update(
                TopologyKey::angle(*i, *j, *k),
                Potential::new()
                    .with("angle", Quantity::new(*theta, Unit::Degree))
                    .with("k", Quantity::new(*force, Unit::KjPerMolPerRadianSquared)),
            );
        }
        out.add_collection(CollectionData::Valence(angles));
    }

    for (kind, terms) in [
        (CollectionKind::ProperTorsions, &top.proper_dihedrals),
        (CollectionKind::ImproperTorsions, &top.improper_dihedrals),
    ] {
        if terms.is_empty() {
            continue;
        }
        let mut collection = Collection::new(kind);
        for term in terms {
            collection.add_or_update(
                TopologyKey::torsion(term.atoms[0], term.atoms[1], term.atoms[2], term.atoms[3], Some(term.periodicity)),
                Potential::new()
                    .with("phase", Quantity::new(term.phase, Unit::Degree))
                    .with("k", Quantity::new(term.k, Unit::KilojoulePerMole))
                    .with(
                        "periodicity",
                        Quantity::dimensionless(f64::from(term.periodicity)),
                    ),
            );
        }
        out.add_collection(CollectionData::Valence(collection));
    }

    if !top.constraints.is_empty() {
        let mut constraints = Collection::new(CollectionKind::Constraints);
        for (i, j, distance) in &top.constraints {
            constraints.add_or_update(
                TopologyKey::bond(*i, *j),
                Potential::new().with("distance", Quantity::new(*distance, Unit::Nanometer)),
            );
        }
        out.add_collection(CollectionData::Valence(constraints));
    }

    let mut vdw = VdwCollection::default();
    vdw.mixing_rule = top.mixing_rule;
    vdw.scales.scale_14 = top.fudge_lj;
    let mut electrostatics = ElectrostaticsCollection::default();
    electrostatics.scales.scale_14 = top.fudge_qq;
    for (index, atom) in top.atoms.iter().enumerate() {
        let (sigma, epsilon) = top.atom_types.get(&atom.type_name).copied().ok_or_else(|| {
            ImportError::Unsupported(format!("atom type '{}' is not declared", atom.type_name))
        })?;
        vdw.terms.add_or_update(
            TopologyKey::atom(index),
            Potential::new()
                .with("sigma", Quantity::new(sigma, Unit::Nanometer))
                .with("epsilon", Quantity::new(epsilon, Unit::KilojoulePerMole)),
        );
        electrostatics.set_partial_charge(index, Quantity::new(atom.charge, Unit::ElementaryCharge));
    }
    out.add_collection(CollectionData::Vdw(vdw));
    out.add_collection(CollectionData::Electrostatics(electrostatics));

    out.set_positions(Some(
        gro.atoms
            .iter()
            .map(|a| nalgebra::Point3::new(a.x, a.y, a.z) / crate::interop::ANGSTROM_TO_NM)
            .collect(),
    ));
    if let Some(box_nm) = gro.box_lengths {
        if box_nm.iter().any(|&v| v != 0.0) {
            out.set_box(
                &box_nm
                    .iter()
                    .map(|v| v / crate::interop::ANGSTROM_TO_NM)
                    .collect::<Vec<_>>(),
            )
            .map_err(ImportError::System)?;
        }
    }

    Ok(out)
}

fn element_guess(atom_name: &str) -> String {
    atom_name
        .chars()
        .find(|c| c.is_ascii_alphabetic())
        .map(|c| c.to_ascii_uppercase().to_string())
        .unwrap_or_default()
}

#[derive(Debug, Default)]
struct TopAtom {
    type_name: String,
    resnr: usize,
    resname: String,
    name: String,
    charge: f64,
}

#[derive(Debug)]
struct Dihedral {
    atoms: [usize; 4],
    phase: f64,
    k: f64,
    periodicity: u32,
}

#[derive(Debug, Default)]
struct TopFile {
    mixing_rule: MixingRule,
    fudge_lj: f64,
    fudge_qq: f64,
    atom_types: HashMap<String, (f64, f64)>,
    atoms: Vec<TopAtom>,
    bonds: Vec<(usize, usize, f64, f64)>,
    angles: Vec<(usize, usize, usize, f64, f64)>,
    proper_dihedrals: Vec<Dihedral>,
    improper_dihedrals: Vec<Dihedral>,
    constraints: Vec<(usize, usize, f64)>,
}

fn parse_top(path: &Path) -> Result<TopFile, ImportError> {
    let content = std::fs::read_to_string(path).map_err(|e| ImportError::io(path, e))?;
    let parse_err = |line: usize, message: String| ImportError::Parse {
        path: path.to_string_lossy().to_string(),
        line,
        message,
    };

    let mut out = TopFile {
        fudge_lj: 1.0,
        fudge_qq: 1.0,
        ..TopFile::default()
    };
    let mut section = String::new();

    for (line_number, raw) in content.lines().enumerate() {
        let line_number = line_number + 1;
        let line = raw.split(';').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with('[') {
            section = line.trim_matches(['[', ']']).trim().to_lowercase();
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        let float = |s: &str| {
            s.parse::<f64>()
                .map_err(|_| parse_err(line_number, format!("expected a number, found '{s}'")))
        };
        let index = |s: &str| {
            s.parse::<usize>()
                .map_err(|_| parse_err(line_number, format!("expected an atom number, found '{s}'")))
                .and_then(|n| {
                    n.checked_sub(1)
                        .ok_or_else(|| parse_err(line_number, "atom numbers start at 1".to_string()))
                })
        };

        match section.as_str() {
            "defaults" => {
                if fields.len() < 2 {
                    return Err(parse_err(line_number, "truncated [ defaults ] line".to_string()));
                }
                out.mixing_rule = match fields[1] {
                    "2" => MixingRule::LorentzBerthelot,
                    "3" => MixingRule::Geometric,
                    other => {
                        return Err(parse_err(
                            line_number,
                            format!("unsupported combination rule '{other}'"),
                        ));
                    }
                };
                if fields.len() >= 5 {
                    out.fudge_lj = float(fields[3])?;
                    out.fudge_qq = float(fields[4])?;
                }
            }
            "atomtypes" => {
                if fields.len() < 6 {
                    return Err(parse_err(line_number, "truncated [ atomtypes ] line".to_string()));
                }
                let sigma = float(fields[fields.len() - 2])?;
                let epsilon = float(fields[fields.len() - 1])?;
                out.atom_types.insert(fields[0].to_string(), (sigma, epsilon));
            }
            "atoms" => {
                if fields.len() < 7 {
                    return Err(parse_err(line_number, "truncated [ atoms ] line".to_string()));
                }
                out.atoms.push(TopAtom {
                    type_name: fields[1].to_string(),
                    resnr: fields[2].parse().unwrap_or(1),
                    resname: fields[3].to_string(),
                    name: fields[4].to_string(),
                    charge: float(fields[6])?,
                });
            }
            "bonds" => {
                if fields.len() < 5 {
                    return Err(parse_err(line_number, "truncated [ bonds ] line".to_string()));
                }
                out.bonds.push((
                    index(fields[0])?,
                    index(fields[1])?,
                    float(fields[3])?,
                    float(fields[4])?,
                ));
            }
            "angles" => {
                if fields.len() < 6 {
                    return Err(parse_err(line_number, "truncated [ angles ] line".to_string()));
                }
                out.angles.push((
                    index(fields[0])?,
                    index(fields[1])?,
                    index(fields[2])?,
                    float(fields[4])?,
                    float(fields[5])?,
                ));
            }
            "dihedrals" => {
                if fields.len() < 8 {
                    return Err(parse_err(line_number, "truncated [ dihedrals ] line".to_string()));
                }
                let dihedral = Dihedral {
                    atoms: [
                        index(fields[0])?,
                        index(fields[1])?,
                        index(fields[2])?,
                        index(fields[3])?,
                    ],
                    phase: float(fields[5])?,
                    k: float(fields[6])?,
                    periodicity: fields[7].parse().map_err(|_| {
                        parse_err(line_number, format!("bad periodicity '{}'", fields[7]))
                    })?,
                };
                match fields[4] {
                    "1" | "9" => out.proper_dihedrals.push(dihedral),
                    "4" => out.improper_dihedrals.push(dihedral),
                    other => {
                        return Err(parse_err(
                            line_number,
                            format!("unsupported dihedral function type '{other}'"),
                        ));
                    }
                }
            }
            "constraints" => {
                if fields.len() < 4 {
                    return Err(parse_err(line_number, "truncated [ constraints ] line".to_string()));
                }
                out.constraints.push((
                    index(fields[0])?,
                    index(fields[1])?,
                    float(fields[3])?,
                ));
            }
            // pairs are derivable from the topology; other sections carry
            // no collection data
            _ => {}
        }
    }

    Ok(out)
}

#[derive(Debug)]
struct GroAtom {
    x: f64,
    y: f64,
    z: f64,
}

#[derive(Debug)]
struct GroFile {
    atoms: Vec<GroAtom>,
    box_lengths: Option<Vec<f64>>,
}

fn parse_gro(path: &Path) -> Result<GroFile, ImportError> {
    let content = std::fs::read_to_string(path).map_err(|e| ImportError::io(path, e))?;
    let parse_err = |line: usize, message: String| ImportError::Parse {
        path: path.to_string_lossy().to_string(),
        line,
        message,
    };

    let lines: Vec<&str> = content.lines().collect();
    if lines.len() < 3 {
        return Err(parse_err(lines.len(), "file too short".to_string()));
    }
    let n_atoms: usize = lines[1]
        .trim()
        .parse()
        .map_err(|_| parse_err(2, format!("bad atom count '{}'", lines[1].trim())))?;
    if lines.len() < n_atoms + 3 {
        return Err(parse_err(
            lines.len(),
            format!("expected {n_atoms} atom lines"),
        ));
    }

    let mut atoms = Vec::with_capacity(n_atoms);
    for (offset, raw) in lines[2..2 + n_atoms].iter().enumerate() {
        let line_number = offset + 3;
        // Fixed-width name columns; coordinates are whitespace-separated
        if raw.len() < 20 {
            return Err(parse_err(line_number, "truncated atom line".to_string()));
        }
        let coords: Vec<f64> = raw[20..]
            .split_whitespace()
            .take(3)
            .map(|s| s.parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|_| parse_err(line_number, "bad coordinate field".to_string()))?;
        if coords.len() != 3 {
            return Err(parse_err(line_number, "expected three coordinates".to_string()));
        }
        atoms.push(GroAtom {
            x: coords[0],
            y: coords[1],
            z: coords[2],
        });
    }

    let box_line = lines[2 + n_atoms].trim();
    let box_lengths = if box_line.is_empty() {
        None
    } else {
        let values: Vec<f64> = box_line
            .split_whitespace()
            .map(|s| s.parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|_| parse_err(3 + n_atoms, "bad box line".to_string()))?;
        match values.len() {
            3 => Some(values),
            9 => {
                // v1x v2y v3z v1y v1z v2x v2z v3x v3y -> row-major matrix
                Some(vec![
                    values[0], values[3], values[4],
                    values[5], values[1], values[6],
                    values[7], values[8], values[2],
                ])
            }
            n => return Err(parse_err(3 + n_atoms, format!("box line has {n} values"))),
        }
    };

    Ok(GroFile { atoms, box_lengths })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::keys::ParticleKey;
    use crate::interop::gromacs::writer::{to_gro, to_top};
    use crate::test_fixtures::{water_interchange, with_experimental, without_experimental};
    use tempfile::tempdir;

    const TOLERANCE: f64 = 1e-6;

    #[test]
    fn import_requires_the_experimental_opt_in() {
        let dir = tempdir().unwrap();
        let top = dir.path().join("water.top");
        let gro = dir.path().join("water.gro");
        to_top(&water_interchange(), &top).unwrap();
        to_gro(&water_interchange(), &gro, 5).unwrap();

        let result = without_experimental(|| from_gromacs(&top, &gro));
        assert!(matches!(
            result,
            Err(ImportError::System(
                crate::system::SystemError::ExperimentalDisabled { .. }
            ))
        ));
    }

    #[test]
    fn write_then_read_preserves_the_system() {
        let dir = tempdir().unwrap();
        let top = dir.path().join("water.top");
        let gro = dir.path().join("water.gro");
        let mut original = water_interchange();
        original.set_box(&[20.0, 20.0, 20.0]).unwrap();
        to_top(&original, &top).unwrap();
        to_gro(&original, &gro, 8).unwrap();

        let imported = with_experimental(|| from_gromacs(&top, &gro)).unwrap();
        assert_eq!(imported.topology().n_atoms(), 3);

        let bond = imported.get_parameters("Bonds", &[0, 1]).unwrap();
        let length = bond
            .get("length")
            .unwrap()
            .value_in(Unit::Angstrom)
            .unwrap();
        assert!((length - 0.9572).abs() < TOLERANCE);

        let charges = imported.charges().unwrap();
        assert!((charges[&ParticleKey::Atom(0)] + 0.834).abs() < TOLERANCE);

        let positions = imported.positions().unwrap();
        assert!((positions[1].x - 0.9572).abs() < TOLERANCE);

        let box_vectors = imported.box_vectors().unwrap();
        assert!((box_vectors[(0, 0)] - 20.0).abs() < TOLERANCE);
    }

    #[test]
    fn malformed_top_reports_line_numbers() {
        let dir = tempdir().unwrap();
        let top = dir.path().join("bad.top");
        std::fs::write(&top, "[ bonds ]\n1 2 1 oops 400\n").unwrap();
        let gro = dir.path().join("water.gro");
        to_gro(&water_interchange(), &gro, 5).unwrap();

        let result = with_experimental(|| from_gromacs(&top, &gro));
        match result {
            Err(ImportError::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected parse error, got {other:?}"),
        }
    }
}
