//! Minimal PDB writer: one `ATOM` record per particle, coordinates in
//! Angstroms.
//!
//! Virtual sites have no stored coordinates, so when they are requested
//! their positions are reconstructed from the orientation atoms through the
//! same local-frame convention the simulation engines use.

use crate::core::units::Unit;
use crate::core::virtual_sites::VirtualSite;
use crate::interop::{ExportError, require_positions};
use crate::system::Interchange;
use nalgebra::{Point3, Vector3};
use std::io::{BufWriter, Write};
use std::path::Path;

const FRAME_TOLERANCE: f64 = 1e-10;

/// Writes the container as a PDB file.
///
/// With `include_virtual_sites`, the sites are appended after the real atoms
/// as `EP`-named records; requesting them when the container defines none is
/// an error.
pub fn to_pdb(
    interchange: &Interchange,
    path: &Path,
    include_virtual_sites: bool,
) -> Result<(), ExportError> {
    let positions = require_positions(interchange)?;
    let topology = interchange.topology();

    let sites = interchange.virtual_sites();
    if include_virtual_sites && !sites.is_some_and(|v| !v.is_empty()) {
        return Err(ExportError::MissingVirtualSites);
    }

    let file = std::fs::File::create(path).map_err(|e| ExportError::io(path, e))?;
    let mut w = BufWriter::new(file);
    let io_err = |e: std::io::Error| ExportError::io(path, e);

    if let Some(box_vectors) = interchange.box_vectors() {
        let v1 = box_vectors.row(0).transpose();
        let v2 = box_vectors.row(1).transpose();
        let v3 = box_vectors.row(2).transpose();
        let (a, b, c) = (v1.norm(), v2.norm(), v3.norm());
        let alpha = (v2.dot(&v3) / (b * c)).acos().to_degrees();
        let beta = (v1.dot(&v3) / (a * c)).acos().to_degrees();
        let gamma = (v1.dot(&v2) / (a * b)).acos().to_degrees();
        writeln!(
            w,
            "CRYST1{a:9.3}{b:9.3}{c:9.3}{alpha:7.2}{beta:7.2}{gamma:7.2} P 1           1"
        )
        .map_err(io_err)?;
    }

    let mut residue_numbers = std::collections::HashMap::new();
    let mut residue_names = std::collections::HashMap::new();
    for (number, (id, molecule)) in topology.molecules_iter().enumerate() {
        residue_numbers.insert(id, number + 1);
        residue_names.insert(id, residue_name(&molecule.name));
    }

    let mut serial = 0usize;
    let mut last_molecule = None;
    for (index, atom) in topology.atoms_iter() {
        let position = positions.get(index).ok_or(ExportError::MissingPositions)?;
        serial += 1;
        write_atom_record(
            &mut w,
            serial,
            &atom.name,
            residue_names
                .get(&atom.molecule_id)
                .map(String::as_str)
                .unwrap_or("UNK"),
            residue_numbers.get(&atom.molecule_id).copied().unwrap_or(1),
            position,
            &atom.element,
        )
        .map_err(io_err)?;
        last_molecule = Some(atom.molecule_id);
    }

    if include_virtual_sites {
        // Sites land in one trailing residue after the last real molecule
        let site_residue = last_molecule
            .and_then(|id| residue_numbers.get(&id).copied())
            .unwrap_or(0)
            + 1;
        if let Some(sites) = sites {
            for (key, site) in sites.iter() {
                let position = site_position(site, positions)?;
                serial += 1;
                write_atom_record(
                    &mut w,
                    serial,
                    &key.name,
                    "VS",
                    site_residue,
                    &position,
                    "",
                )
                .map_err(io_err)?;
            }
        }
    }

    writeln!(w, "END").map_err(io_err)?;
    w.flush().map_err(io_err)?;
    Ok(())
}

/// Reconstructs a site's Cartesian position from its orientation atoms.
///
/// The local frame has its origin at the weighted combination of the
/// orientation atoms, x along the weighted direction vector, z normal to
/// the plane spanned by the x and y direction vectors.
fn site_position(
    site: &VirtualSite,
    positions: &[Point3<f64>],
) -> Result<Point3<f64>, ExportError> {
    let (origin_weights, x_weights, y_weights) = site.local_frame_weights();

    let mut origin = Vector3::zeros();
    let mut x_direction = Vector3::zeros();
    let mut y_direction = Vector3::zeros();
    for (slot, &atom_index) in site.orientations.iter().enumerate() {
        let r = positions
            .get(atom_index)
            .ok_or_else(|| {
                ExportError::Internal(format!(
                    "virtual site references atom {atom_index} with no position"
                ))
            })?
            .coords;
        origin += origin_weights[slot] * r;
        x_direction += x_weights[slot] * r;
        y_direction += y_weights[slot] * r;
    }

    let x_norm = x_direction.norm();
    if x_norm < FRAME_TOLERANCE {
        return Err(ExportError::Internal(
            "virtual site orientation atoms are coincident".to_string(),
        ));
    }
    let x_hat = x_direction / x_norm;

    // A degenerate y direction only matters when the local position leaves
    // the x axis, which no kind with identical x and y weights does
    let normal = x_direction.cross(&y_direction);
    let (y_hat, z_hat) = if normal.norm() < FRAME_TOLERANCE {
        (Vector3::zeros(), Vector3::zeros())
    } else {
        let z_hat = normal.normalize();
        (z_hat.cross(&x_hat), z_hat)
    };

    let local = site.local_frame_position(Unit::Angstrom)?;
    Ok(Point3::from(
        origin + local.x * x_hat + local.y * y_hat + local.z * z_hat,
    ))
}

fn write_atom_record<W: Write>(
    w: &mut W,
    serial: usize,
    name: &str,
    residue: &str,
    residue_number: usize,
    position: &Point3<f64>,
    element: &str,
) -> std::io::Result<()> {
    // Short names start in column 14, four-character names in column 13
    let name_field = if name.chars().count() < 4 {
        format!(" {name:<3}")
    } else {
        let cut = match name.char_indices().nth(4) {
            Some((byte_index, _)) => &name[..byte_index],
            None => name,
        };
        cut.to_string()
    };
    writeln!(
        w,
        "ATOM  {serial:>5} {name_field}{altloc}{residue:>3} {chain}{residue_number:>4}{icode}   \
         {x:>8.3}{y:>8.3}{z:>8.3}{occupancy:>6.2}{temp:>6.2}          {element:>2}",
        altloc = ' ',
        chain = 'A',
        icode = ' ',
        x = position.x,
        y = position.y,
        z = position.z,
        occupancy = 1.00,
        temp = 0.00,
    )
}

fn residue_name(molecule_name: &str) -> String {
    let trimmed: String = molecule_name.chars().take(3).collect();
    let upper = trimmed.to_uppercase();
    if upper.is_empty() {
        "UNK".to_string()
    } else {
        upper
    }
}
