pub mod metadata;
pub mod packer;

use std::io::Read;
use std::path::Path;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::compress::{decompress_reader, CompressReader};
use crate::crypto::{self, Crypter, Keys};
use crate::error::{CofferError, Result};
use crate::storage::local::FileStorage;
use crate::storage::s3::{S3Config, S3Storage};
use crate::storage::StorageLayer;

pub use metadata::StoreMetadata;
pub use packer::Packer;

/// Reserved key of the plaintext store header.
pub const METADATA_KEY: &str = "metadata";

pub(crate) fn is_forbidden_key(key: &str) -> bool {
    key == METADATA_KEY
}

/// An offset pair (zero-indexed, inclusive) used when requesting partial
/// contents from the storage layer. The zero value means "whole object".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange(pub [u64; 2]);

impl ByteRange {
    pub fn is_empty(&self) -> bool {
        self.0 == [0, 0]
    }
}

/// Handles compressing, encrypting and uploading blobs to a storage layer.
///
/// A store starts disconnected; `wipe`, `unlock` or `open` make it ready for
/// `get`/`put`/`pack`. The crypto state is read-only once connected, so a
/// store can be shared across threads.
pub struct Store {
    pub(crate) layer: Arc<dyn StorageLayer>,
    id: String,
    pub(crate) meta: Mutex<Option<StoreMetadata>>,
    crypter: Mutex<Option<Arc<Crypter>>>,
}

impl Store {
    pub fn new(layer: Arc<dyn StorageLayer>, id: &str) -> Self {
        Self {
            layer,
            id: id.to_string(),
            meta: Mutex::new(None),
            crypter: Mutex::new(None),
        }
    }

    /// A store using the filesystem as its storage layer.
    pub fn new_fs(root: &Path) -> Self {
        let id = format!("fs{}", root.display());
        Self::new(Arc::new(FileStorage::new(root)), &id)
    }

    /// A store using S3 as its storage layer.
    pub fn new_s3(cfg: &S3Config) -> Result<Self> {
        let id = format!("s3/{}/{}/{}", cfg.access_key, cfg.region, cfg.bucket);
        Ok(Self::new(Arc::new(S3Storage::new(cfg)?), &id))
    }

    /// Unique identifier of the store, used to key the local object cache.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// True if the store has no metadata and is thus safe to wipe.
    pub fn is_clean(&self) -> bool {
        matches!(self.store_metadata(), Err(ref e) if e.is_not_exist())
    }

    /// Initialize the store by (re)populating it with metadata and a fresh
    /// salt, then connect. All existing objects are orphaned by construction
    /// since the derived keys change.
    pub fn wipe(&self, secret: &[u8]) -> Result<Keys> {
        let salt = crypto::salt();
        if !self.layer.exists()? {
            self.layer.create()?;
        }
        self.put_store_metadata(StoreMetadata::new(salt))?;
        self.unlock(secret)
    }

    /// Read the store metadata and derive keys from the secret and stored
    /// salt, then connect.
    pub fn unlock(&self, secret: &[u8]) -> Result<Keys> {
        let md = self.store_metadata().map_err(|e| {
            if e.is_not_exist() {
                CofferError::StoreNotInitialized
            } else {
                e
            }
        })?;
        let keys = crypto::derive_keys(secret, &md.salt);
        self.open(&keys)?;
        Ok(keys)
    }

    /// Cache the given keys and connect. The keys are not verified here; the
    /// first `get` of an encrypted object fails with `AuthFailure` if wrong.
    pub fn open(&self, keys: &Keys) -> Result<()> {
        if !self.layer.exists()? {
            return Err(CofferError::StoreNotInitialized);
        }
        let crypter = Crypter::new(keys)?;
        *self.crypter.lock().unwrap() = Some(Arc::new(crypter));
        Ok(())
    }

    pub(crate) fn crypter(&self) -> Result<Arc<Crypter>> {
        self.crypter
            .lock()
            .unwrap()
            .clone()
            .ok_or(CofferError::StoreNotConnected)
    }

    // -----------------------------------------------------------------------

    /// Store a blob as an object. Overwrites existing keys.
    pub fn put(&self, key: &str, data: &[u8]) -> Result<u64> {
        self.put_reader(key, data)
    }

    /// Read data into an object, composed through compress-then-encrypt.
    /// Returns the (encrypted) bytes written.
    pub fn put_reader(&self, key: &str, r: impl Read) -> Result<u64> {
        if is_forbidden_key(key) {
            return Err(CofferError::ForbiddenKey);
        }
        let crypter = self.crypter()?;
        let mut ciphertext = crypter.encrypt_reader(CompressReader::new(r));
        let written = self.layer.put_reader(key, &mut ciphertext)?;
        debug!(key, written, "store: put.reader");
        Ok(written)
    }

    /// The data stored by the given key.
    pub fn get(&self, key: &str) -> Result<Vec<u8>> {
        let mut reader = self.get_reader(key)?;
        let mut data = Vec::new();
        reader
            .read_to_end(&mut data)
            .map_err(CofferError::from_io)?;
        Ok(data)
    }

    /// A reader for the data stored by the given key, composed through
    /// decrypt-then-decompress.
    pub fn get_reader(&self, key: &str) -> Result<Box<dyn Read + Send>> {
        if is_forbidden_key(key) {
            return Err(CofferError::ForbiddenKey);
        }
        let crypter = self.crypter()?;
        debug!(key, "store: get.reader");
        let ciphertext = self.layer.get_reader(key)?;
        let plaintext = crypter.decrypt_reader(ciphertext)?;
        Ok(Box::new(decompress_reader(plaintext)))
    }

    /// Pack multiple blobs as a single object in the store.
    pub fn pack(&self, key: &str) -> Result<Packer> {
        if is_forbidden_key(key) {
            return Err(CofferError::ForbiddenKey);
        }
        let crypter = self.crypter()?;
        Ok(Packer::spawn(Arc::clone(&self.layer), crypter, key))
    }
}
