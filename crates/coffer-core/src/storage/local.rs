use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use crate::error::{CofferError, Result};
use crate::storage::StorageLayer;

/// Storage layer keeping objects as plain files under a root directory.
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl StorageLayer for FileStorage {
    fn exists(&self) -> Result<bool> {
        match fs::metadata(&self.root) {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn create(&self) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    fn size(&self, key: &str) -> Result<u64> {
        match fs::metadata(self.object_path(key)) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(CofferError::ObjectNotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn get_reader(&self, key: &str) -> Result<Box<dyn Read + Send>> {
        match fs::File::open(self.object_path(key)) {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(CofferError::ObjectNotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn put_reader(&self, key: &str, r: &mut dyn Read) -> Result<u64> {
        let path = self.object_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = fs::File::create(&path)?;
        let written = io::copy(r, &mut file)?;
        Ok(written)
    }
}
