//! The synced key item that encrypts user content at protocol version > 003.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemsKeyContent {
    #[serde(with = "hex_key")]
    pub items_key: [u8; 32],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_authentication_key: Option<String>,
    pub version: String,
    pub is_default: bool,
}

mod hex_key {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(key: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(key))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(d)?;
        let bytes = hex::decode(s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("items_key must be 32 bytes"))
    }
}

impl ItemsKeyContent {
    pub fn new(items_key: [u8; 32], version: &str, is_default: bool) -> Self {
        Self {
            items_key,
            data_authentication_key: None,
            version: version.to_string(),
            is_default,
        }
    }
}
