//! Serializable form of a materialized nut.

use serde::{Deserialize, Serialize};

use super::kind::NutType;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NutSnapshot {
    pub name: String,
    pub initial_name: String,
    pub nut_type: NutType,
    pub initial_type: NutType,
    pub version: u64,
    #[serde(with = "hex_bytes")]
    pub content: Vec<u8>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub referenced: Vec<NutSnapshot>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<NutSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
}

/// Content as a hex string (twice the bytes), keeping spill files plain JSON text.
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        hex::decode(text).map_err(D::Error::custom)
    }
}
