use super::keys::{VirtualSiteKey, VirtualSiteKind};
use super::units::{Quantity, Unit, UnitError};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A massless particle positioned geometrically from its orientation atoms.
///
/// The first orientation atom is the parent. `distance` and the two angles
/// parameterize the placement; which of them are meaningful depends on the
/// kind (a bond-charge site only uses `distance`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualSite {
    pub kind: VirtualSiteKind,
    pub orientations: Vec<usize>,
    pub distance: Quantity,
    pub out_of_plane_angle: Quantity,
    pub in_plane_angle: Quantity,
}

impl VirtualSite {
    pub fn bond_charge(orientations: Vec<usize>, distance: Quantity) -> Self {
        Self {
            kind: VirtualSiteKind::BondCharge,
            orientations,
            distance,
            out_of_plane_angle: Quantity::new(0.0, Unit::Degree),
            in_plane_angle: Quantity::new(0.0, Unit::Degree),
        }
    }

    pub fn monovalent_lone_pair(
        orientations: Vec<usize>,
        distance: Quantity,
        out_of_plane_angle: Quantity,
        in_plane_angle: Quantity,
    ) -> Self {
        Self {
            kind: VirtualSiteKind::MonovalentLonePair,
            orientations,
            distance,
            out_of_plane_angle,
            in_plane_angle,
        }
    }

    pub fn divalent_lone_pair(
        orientations: Vec<usize>,
        distance: Quantity,
        out_of_plane_angle: Quantity,
    ) -> Self {
        Self {
            kind: VirtualSiteKind::DivalentLonePair,
            orientations,
            distance,
            out_of_plane_angle,
            in_plane_angle: Quantity::new(0.0, Unit::Degree),
        }
    }

    pub fn trivalent_lone_pair(orientations: Vec<usize>, distance: Quantity) -> Self {
        Self {
            kind: VirtualSiteKind::TrivalentLonePair,
            orientations,
            distance,
            out_of_plane_angle: Quantity::new(0.0, Unit::Degree),
            in_plane_angle: Quantity::new(0.0, Unit::Degree),
        }
    }

    /// Shifts every orientation atom index by `offset`.
    pub fn offset_orientations(&mut self, offset: usize) {
        for index in &mut self.orientations {
            *index += offset;
        }
    }

    /// Weight rows of the general local-coordinate frame: origin weights,
    /// x-direction weights, and y-direction weights over the orientation
    /// atoms. The parent atom is always the frame origin.
    pub fn local_frame_weights(&self) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
        let n = self.orientations.len();
        let mut origin = vec![0.0; n];
        origin[0] = 1.0;

        match self.kind {
            VirtualSiteKind::BondCharge => {
                let x = vec![-1.0, 1.0];
                let y = x.clone();
                (origin, x, y)
            }
            VirtualSiteKind::MonovalentLonePair => {
                (origin, vec![-1.0, 1.0, 0.0], vec![-1.0, 0.0, 1.0])
            }
            VirtualSiteKind::DivalentLonePair => {
                (origin, vec![-1.0, 0.5, 0.5], vec![-1.0, 1.0, 0.0])
            }
            VirtualSiteKind::TrivalentLonePair => {
                let third = 1.0 / 3.0;
                (
                    origin,
                    vec![-1.0, third, third, third],
                    vec![-1.0, 1.0, 0.0, 0.0],
                )
            }
        }
    }

    /// Displacement of the site in its local frame, in the requested length
    /// unit.
    pub fn local_frame_position(&self, length_unit: Unit) -> Result<Vector3<f64>, UnitError> {
        let distance = self.distance.value_in(length_unit)?;
        let phi = self.out_of_plane_angle.value_in(Unit::Radian)?;
        let theta = self.in_plane_angle.value_in(Unit::Radian)?;

        let position = match self.kind {
            VirtualSiteKind::BondCharge | VirtualSiteKind::TrivalentLonePair => {
                Vector3::new(-distance, 0.0, 0.0)
            }
            VirtualSiteKind::MonovalentLonePair => Vector3::new(
                -distance * theta.cos() * phi.cos(),
                distance * theta.sin() * phi.cos(),
                distance * phi.sin(),
            ),
            VirtualSiteKind::DivalentLonePair => {
                Vector3::new(-distance * phi.cos(), 0.0, -distance * phi.sin())
            }
        };
        Ok(position)
    }
}

/// All virtual-site definitions of one container, with the charge
/// increments electrostatics pulls from the orientation atoms.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VirtualSiteCollection {
    #[serde(with = "crate::core::map_serde")]
    pub sites: BTreeMap<VirtualSiteKey, VirtualSite>,
    /// One increment per orientation atom, moved from the atom to the site.
    #[serde(with = "crate::core::map_serde")]
    pub charge_increments: BTreeMap<VirtualSiteKey, Vec<Quantity>>,
}

impl VirtualSiteCollection {
    pub fn insert(
        &mut self,
        key: VirtualSiteKey,
        site: VirtualSite,
        charge_increments: Vec<Quantity>,
    ) {
        self.sites.insert(key.clone(), site);
        self.charge_increments.insert(key, charge_increments);
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&VirtualSiteKey, &VirtualSite)> {
        self.sites.iter()
    }

    pub fn charge_increments_for(&self, key: &VirtualSiteKey) -> &[Quantity] {
        self.charge_increments
            .get(key)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Shifts every site's key and orientation atom indices by `offset`.
    pub fn offset_atoms(&mut self, offset: usize) {
        self.sites = self
            .sites
            .iter()
            .map(|(key, site)| {
                let mut site = site.clone();
                site.offset_orientations(offset);
                (key.offset_by(offset), site)
            })
            .collect();
        self.charge_increments = self
            .charge_increments
            .iter()
            .map(|(key, increments)| (key.offset_by(offset), increments.clone()))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-12;

    #[test]
    fn bond_charge_frame_points_away_from_the_bond() {
        let site = VirtualSite::bond_charge(vec![0, 1], Quantity::new(1.5, Unit::Angstrom));
        let (origin, x, y) = site.local_frame_weights();
        assert_eq!(origin, vec![1.0, 0.0]);
        assert_eq!(x, vec![-1.0, 1.0]);
        assert_eq!(y, x);

        let position = site.local_frame_position(Unit::Nanometer).unwrap();
        assert!((position.x + 0.15).abs() < TOLERANCE);
        assert_eq!(position.y, 0.0);
        assert_eq!(position.z, 0.0);
    }

    #[test]
    fn divalent_frame_bisects_the_two_bonds() {
        let site = VirtualSite::divalent_lone_pair(
            vec![0, 1, 2],
            Quantity::new(-0.15, Unit::Angstrom),
            Quantity::new(0.0, Unit::Degree),
        );
        let (origin, x, _) = site.local_frame_weights();
        assert_eq!(origin, vec![1.0, 0.0, 0.0]);
        assert_eq!(x, vec![-1.0, 0.5, 0.5]);

        // Planar site: no z component
        let position = site.local_frame_position(Unit::Angstrom).unwrap();
        assert!((position.x - 0.15).abs() < TOLERANCE);
        assert_eq!(position.z, 0.0);
    }

    #[test]
    fn out_of_plane_angle_lifts_the_divalent_site() {
        let site = VirtualSite::divalent_lone_pair(
            vec![0, 1, 2],
            Quantity::new(1.0, Unit::Angstrom),
            Quantity::new(90.0, Unit::Degree),
        );
        let position = site.local_frame_position(Unit::Angstrom).unwrap();
        assert!(position.x.abs() < TOLERANCE);
        assert!((position.z + 1.0).abs() < TOLERANCE);
    }

    #[test]
    fn trivalent_weights_average_the_three_outer_atoms() {
        let site =
            VirtualSite::trivalent_lone_pair(vec![0, 1, 2, 3], Quantity::new(0.5, Unit::Angstrom));
        let (_, x, _) = site.local_frame_weights();
        assert_eq!(x.len(), 4);
        assert!((x.iter().sum::<f64>() - 0.0).abs() < TOLERANCE);
    }

    #[test]
    fn collection_keeps_sites_and_increments_aligned() {
        let mut collection = VirtualSiteCollection::default();
        let key = VirtualSiteKey {
            orientation_atom_indices: vec![0, 1],
            kind: VirtualSiteKind::BondCharge,
            name: "EP".to_string(),
        };
        collection.insert(
            key.clone(),
            VirtualSite::bond_charge(vec![0, 1], Quantity::new(1.0, Unit::Angstrom)),
            vec![Quantity::new(0.2, Unit::ElementaryCharge)],
        );
        assert_eq!(collection.len(), 1);
        assert_eq!(collection.charge_increments[&key].len(), 1);
    }
}
