use super::CollectionData;
use crate::core::collections::{Potential, PotentialKey};
use crate::core::keys::{LibraryChargeKey, TopologyKey, VirtualSiteKey};
use crate::core::settings::NonbondedSettings;
use crate::core::units::Quantity;
use crate::core::virtual_sites::VirtualSite;
use std::collections::BTreeMap;

/// One force category's output from the external parameterization engine:
/// a category tag plus the slots and potentials it assigned.
///
/// Tags the registry does not recognize are rejected up front by
/// [`crate::system::Interchange::from_assignments`]; nothing is silently
/// dropped.
#[derive(Debug, Clone)]
pub enum Assignment {
    Bonds(Vec<(TopologyKey, PotentialKey, Potential)>),
    Angles(Vec<(TopologyKey, PotentialKey, Potential)>),
    ProperTorsions(Vec<(TopologyKey, PotentialKey, Potential)>),
    ImproperTorsions(Vec<(TopologyKey, PotentialKey, Potential)>),
    Constraints(Vec<(TopologyKey, PotentialKey, Potential)>),
    Vdw {
        settings: Option<NonbondedSettings>,
        slots: Vec<(TopologyKey, PotentialKey, Potential)>,
    },
    Electrostatics {
        settings: Option<NonbondedSettings>,
        partial_charges: Vec<(usize, Quantity)>,
    },
    LibraryCharges(Vec<(LibraryChargeKey, Vec<Quantity>)>),
    VirtualSites(Vec<(VirtualSiteKey, VirtualSite, Vec<Quantity>)>),
    /// A handler type produced by the assigning engine that this crate has
    /// no collection for.
    Unrecognized { tag: String },
}

impl Assignment {
    /// The category tag this assignment targets.
    pub fn tag(&self) -> &str {
        match self {
            Assignment::Bonds(_) => "Bonds",
            Assignment::Angles(_) => "Angles",
            Assignment::ProperTorsions(_) => "ProperTorsions",
            Assignment::ImproperTorsions(_) => "ImproperTorsions",
            Assignment::Constraints(_) => "Constraints",
            Assignment::Vdw { .. } => "vdW",
            Assignment::Electrostatics { .. } => "Electrostatics",
            Assignment::LibraryCharges(_) => "LibraryCharges",
            Assignment::VirtualSites(_) => "VirtualSites",
            Assignment::Unrecognized { tag } => tag,
        }
    }

    /// Every atom index this assignment references, for bounds validation.
    pub fn referenced_atom_indices(&self) -> Vec<usize> {
        let mut indices = Vec::new();
        match self {
            Assignment::Bonds(slots)
            | Assignment::Angles(slots)
            | Assignment::ProperTorsions(slots)
            | Assignment::ImproperTorsions(slots)
            | Assignment::Constraints(slots)
            | Assignment::Vdw { slots, .. } => {
                for (key, _, _) in slots {
                    indices.extend(&key.atom_indices);
                }
            }
            Assignment::Electrostatics {
                partial_charges, ..
            } => {
                indices.extend(partial_charges.iter().map(|(i, _)| *i));
            }
            Assignment::LibraryCharges(entries) => {
                for (key, _) in entries {
                    indices.extend(&key.atom_indices);
                }
            }
            Assignment::VirtualSites(entries) => {
                for (key, _, _) in entries {
                    indices.extend(&key.orientation_atom_indices);
                }
            }
            Assignment::Unrecognized { .. } => {}
        }
        indices
    }
}

/// Explicit mapping from force-category tag to an empty-collection
/// constructor.
///
/// Populated once at startup and passed by reference to the assignment
/// entry point; there is no reflective dispatch on handler types.
#[derive(Clone)]
pub struct CollectionRegistry {
    constructors: BTreeMap<String, fn() -> CollectionData>,
}

impl CollectionRegistry {
    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// The registry covering every collection this crate implements.
    pub fn standard() -> Self {
        use crate::core::collections::{Collection, CollectionKind};
        use crate::core::nonbonded::{
            ElectrostaticsCollection, LibraryChargeCollection, VdwCollection,
        };
        use crate::core::virtual_sites::VirtualSiteCollection;

        let mut registry = Self::empty();
        registry.register("Bonds", || {
            CollectionData::Valence(Collection::new(CollectionKind::Bonds))
        });
        registry.register("Angles", || {
            CollectionData::Valence(Collection::new(CollectionKind::Angles))
        });
        registry.register("ProperTorsions", || {
            CollectionData::Valence(Collection::new(CollectionKind::ProperTorsions))
        });
        registry.register("ImproperTorsions", || {
            CollectionData::Valence(Collection::new(CollectionKind::ImproperTorsions))
        });
        registry.register("Constraints", || {
            CollectionData::Valence(Collection::new(CollectionKind::Constraints))
        });
        registry.register("vdW", || CollectionData::Vdw(VdwCollection::default()));
        registry.register("Electrostatics", || {
            CollectionData::Electrostatics(ElectrostaticsCollection::default())
        });
        registry.register("LibraryCharges", || {
            CollectionData::LibraryCharges(LibraryChargeCollection::default())
        });
        registry.register("VirtualSites", || {
            CollectionData::VirtualSites(VirtualSiteCollection::default())
        });
        registry
    }

    pub fn register(&mut self, tag: &str, constructor: fn() -> CollectionData) {
        self.constructors.insert(tag.to_string(), constructor);
    }

    pub fn supports(&self, tag: &str) -> bool {
        self.constructors.contains_key(tag)
    }

    pub fn construct(&self, tag: &str) -> Option<CollectionData> {
        self.constructors.get(tag).map(|ctor| ctor())
    }

    pub fn supported_tags(&self) -> Vec<&str> {
        self.constructors.keys().map(|s| s.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::collections::CollectionKind;

    #[test]
    fn standard_registry_supports_every_collection_kind() {
        let registry = CollectionRegistry::standard();
        for tag in [
            "Bonds",
            "Angles",
            "ProperTorsions",
            "ImproperTorsions",
            "Constraints",
            "vdW",
            "Electrostatics",
            "LibraryCharges",
            "VirtualSites",
        ] {
            assert!(registry.supports(tag), "missing {tag}");
        }
        assert!(!registry.supports("CMAPs"));
    }

    #[test]
    fn construct_produces_an_empty_collection_of_the_right_kind() {
        let registry = CollectionRegistry::standard();
        let data = registry.construct("Bonds").unwrap();
        match data {
            CollectionData::Valence(collection) => {
                assert_eq!(collection.kind(), CollectionKind::Bonds);
                assert!(collection.is_empty());
            }
            other => panic!("expected valence collection, got {other:?}"),
        }
    }

    #[test]
    fn assignment_tags_round_trip() {
        assert_eq!(Assignment::Bonds(Vec::new()).tag(), "Bonds");
        assert_eq!(
            Assignment::Unrecognized {
                tag: "GBSA".to_string()
            }
            .tag(),
            "GBSA"
        );
    }
}
