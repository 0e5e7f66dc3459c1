//! Conversion of virtual-site definitions into OpenMM's site classes.

use super::system::OpenMmVirtualSite;
use crate::core::keys::{ParticleKey, VirtualSiteKind};
use crate::core::units::Unit;
use crate::core::virtual_sites::VirtualSite;
use crate::interop::{ExportError, ParticleIndexMap, separation_by_atom_indices};
use crate::system::Interchange;

const SEPARATION_TOLERANCE: f64 = 1e-10;

/// Picks the most specific OpenMM site class the geometry permits.
///
/// A bond-charge site maps exactly onto `TwoParticleAverageSite`; a planar
/// symmetric divalent lone pair onto `ThreeParticleAverageSite`; everything
/// else falls back to the fully general `LocalCoordinatesSite` built from
/// the local-frame weights.
pub(crate) fn create_openmm_virtual_site(
    interchange: &Interchange,
    site: &VirtualSite,
    particle_map: &ParticleIndexMap,
) -> Result<OpenMmVirtualSite, ExportError> {
    let mut particles = Vec::with_capacity(site.orientations.len());
    for &atom_index in &site.orientations {
        let particle = particle_map
            .index_of(&ParticleKey::Atom(atom_index))
            .ok_or_else(|| {
                ExportError::Internal(format!(
                    "virtual-site orientation atom {atom_index} is not in the particle map"
                ))
            })?;
        particles.push(particle);
    }

    match site.kind {
        VirtualSiteKind::BondCharge => {
            let separation =
                separation_by_atom_indices(interchange, site.orientations[0], site.orientations[1])?;
            let distance = site.distance.value_in(Unit::Angstrom)?;
            let ratio = distance / separation;
            Ok(OpenMmVirtualSite::TwoParticleAverage {
                particles: [particles[0], particles[1]],
                weights: [1.0 + ratio, 0.0 - ratio],
            })
        }
        VirtualSiteKind::DivalentLonePair => {
            let r12 =
                separation_by_atom_indices(interchange, site.orientations[0], site.orientations[1])?;
            let r13 =
                separation_by_atom_indices(interchange, site.orientations[0], site.orientations[2])?;
            let out_of_plane = site.out_of_plane_angle.value_in(Unit::Radian)?;

            if (r12 - r13).abs() < SEPARATION_TOLERANCE && out_of_plane == 0.0 {
                let r23 = separation_by_atom_indices(
                    interchange,
                    site.orientations[1],
                    site.orientations[2],
                )?;
                let theta = ((r23 * r23 - r12 * r12 - r13 * r13) / (-2.0 * r12 * r13)).acos();
                let r1mid = (theta / 2.0).cos() * r12;
                let w1 = 1.0 + site.distance.value_in(Unit::Angstrom)? / r1mid;
                return Ok(OpenMmVirtualSite::ThreeParticleAverage {
                    particles: [particles[0], particles[1], particles[2]],
                    weights: [w1, (1.0 - w1) / 2.0, (1.0 - w1) / 2.0],
                });
            }
            local_coordinates_site(site, particles)
        }
        _ => local_coordinates_site(site, particles),
    }
}

fn local_coordinates_site(
    site: &VirtualSite,
    particles: Vec<usize>,
) -> Result<OpenMmVirtualSite, ExportError> {
    let (origin_weights, x_weights, y_weights) = site.local_frame_weights();
    let position = site.local_frame_position(Unit::Nanometer)?;
    Ok(OpenMmVirtualSite::LocalCoordinates {
        particles,
        origin_weights,
        x_weights,
        y_weights,
        local_position: [position.x, position.y, position.z],
    })
}
