use std::io::Read;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::crypto::base64_bytes;
use crate::error::{CofferError, Result};
use crate::jsonutil::parse_version_json;
use crate::store::{Store, METADATA_KEY};

/// The plaintext JSON header stored at the reserved `metadata` key. It is
/// never encrypted, since it carries the salt needed to derive the keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreMetadata {
    pub version: u32,
    #[serde(rename = "storeFormat")]
    pub store_format: u32,
    #[serde(with = "base64_bytes")]
    pub salt: Vec<u8>,
    #[serde(rename = "userData", default)]
    pub user_data: serde_json::Map<String, Value>,
}

impl StoreMetadata {
    pub fn new(salt: Vec<u8>) -> Self {
        Self {
            version: 1,
            store_format: 1,
            salt,
            user_data: serde_json::Map::new(),
        }
    }
}

impl Store {
    pub(crate) fn store_metadata(&self) -> Result<StoreMetadata> {
        if let Some(md) = self.meta.lock().unwrap().as_ref() {
            return Ok(md.clone());
        }
        let mut reader = self.layer.get_reader(METADATA_KEY)?;
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;

        match parse_version_json(&data) {
            Some(1) => {
                let md: StoreMetadata =
                    serde_json::from_slice(&data).map_err(|_| CofferError::MalformedMetadata)?;
                *self.meta.lock().unwrap() = Some(md.clone());
                Ok(md)
            }
            Some(_) => Err(CofferError::BadVersion),
            None => Err(CofferError::MalformedMetadata),
        }
    }

    pub(crate) fn put_store_metadata(&self, md: StoreMetadata) -> Result<()> {
        let data = serde_json::to_vec(&md)?;
        self.layer.put_reader(METADATA_KEY, &mut data.as_slice())?;
        *self.meta.lock().unwrap() = Some(md);
        Ok(())
    }

    /// Write an arbitrary (unencrypted) field to the store metadata. Meant
    /// for small configuration data, like the latest manifest pointer.
    pub fn put_metadata(&self, key: &str, data: Value) -> Result<()> {
        let mut md = self.store_metadata()?;
        md.user_data.insert(key.to_string(), data);
        self.put_store_metadata(md)
    }

    /// The value of a custom metadata field, or `MissingMetadata` if unset.
    pub fn get_metadata(&self, key: &str) -> Result<Value> {
        let md = self.store_metadata()?;
        md.user_data
            .get(key)
            .cloned()
            .ok_or(CofferError::MissingMetadata)
    }
}
