//! Serde adapter for ordered maps with struct keys.
//!
//! JSON objects only admit string keys, so maps keyed by [`TopologyKey`]
//! and friends are persisted as sequences of `(key, value)` pairs.
//!
//! [`TopologyKey`]: super::keys::TopologyKey

use serde::de::{Deserialize, Deserializer};
use serde::ser::{Serialize, Serializer};
use std::collections::BTreeMap;

pub fn serialize<K, V, S>(map: &BTreeMap<K, V>, serializer: S) -> Result<S::Ok, S::Error>
where
    K: Serialize,
    V: Serialize,
    S: Serializer,
{
    serializer.collect_seq(map.iter())
}

pub fn deserialize<'de, K, V, D>(deserializer: D) -> Result<BTreeMap<K, V>, D::Error>
where
    K: Deserialize<'de> + Ord,
    V: Deserialize<'de>,
    D: Deserializer<'de>,
{
    let entries = Vec::<(K, V)>::deserialize(deserializer)?;
    Ok(entries.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use crate::core::keys::TopologyKey;
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeMap;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Holder {
        #[serde(with = "super")]
        map: BTreeMap<TopologyKey, String>,
    }

    #[test]
    fn struct_keyed_map_roundtrips_through_json_as_pairs() {
        let mut map = BTreeMap::new();
        map.insert(TopologyKey::bond(0, 1), "b".to_string());
        map.insert(TopologyKey::atom(2), "a".to_string());
        let holder = Holder { map };

        let json = serde_json::to_string(&holder).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value["map"].is_array());

        let back: Holder = serde_json::from_str(&json).unwrap();
        assert_eq!(back, holder);
    }
}
