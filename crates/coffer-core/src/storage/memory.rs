use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::Mutex;

use crate::error::{CofferError, Result};
use crate::storage::StorageLayer;

/// Callback invoked per request; returning an error fails that request.
pub type RequestFault = Box<dyn Fn(&str) -> Result<()> + Send + Sync>;
/// Callback wrapping (or replacing) the reader handed back by `get_reader`.
pub type ReaderWrapper = Box<dyn Fn(Box<dyn Read + Send>) -> Box<dyn Read + Send> + Send + Sync>;

/// In-memory storage layer for tests. Supports injecting per-request faults
/// and reader wrappers to simulate a broken network.
#[derive(Default)]
pub struct MemoryStorage {
    data: Mutex<HashMap<String, Vec<u8>>>,
    request_fn: Mutex<Vec<RequestFault>>,
    reader_fn: Mutex<Vec<ReaderWrapper>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a key directly, bypassing faults.
    pub fn put_string(&self, key: &str, value: &str) {
        self.data
            .lock()
            .unwrap()
            .insert(key.to_string(), value.as_bytes().to_vec());
    }

    /// Raw stored bytes of a key, bypassing faults.
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.data.lock().unwrap().get(key).cloned()
    }

    /// Number of stored objects with the given key prefix.
    pub fn count_keys(&self, prefix: &str) -> usize {
        self.data
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .count()
    }

    /// Add a callback consulted on every get/put request.
    pub fn inject_request_fault(&self, f: RequestFault) {
        self.request_fn.lock().unwrap().push(f);
    }

    pub fn clear_request_faults(&self) {
        self.request_fn.lock().unwrap().clear();
    }

    /// Add a callback that wraps readers returned by `get_reader`.
    pub fn inject_reader_wrapper(&self, f: ReaderWrapper) {
        self.reader_fn.lock().unwrap().push(f);
    }

    pub fn clear_reader_wrappers(&self) {
        self.reader_fn.lock().unwrap().clear();
    }

    fn check_faults(&self, key: &str) -> Result<()> {
        for f in self.request_fn.lock().unwrap().iter() {
            f(key)?;
        }
        Ok(())
    }
}

impl StorageLayer for MemoryStorage {
    fn exists(&self) -> Result<bool> {
        Ok(true)
    }

    fn create(&self) -> Result<()> {
        Ok(())
    }

    fn size(&self, key: &str) -> Result<u64> {
        match self.data.lock().unwrap().get(key) {
            Some(data) => Ok(data.len() as u64),
            None => Err(CofferError::ObjectNotFound(key.to_string())),
        }
    }

    fn get_reader(&self, key: &str) -> Result<Box<dyn Read + Send>> {
        self.check_faults(key)?;
        let data = self
            .data
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| CofferError::ObjectNotFound(key.to_string()))?;
        let mut reader: Box<dyn Read + Send> = Box::new(Cursor::new(data));
        for f in self.reader_fn.lock().unwrap().iter() {
            reader = f(reader);
        }
        Ok(reader)
    }

    fn put_reader(&self, key: &str, r: &mut dyn Read) -> Result<u64> {
        self.check_faults(key)?;
        let mut buf = Vec::new();
        r.read_to_end(&mut buf)?;
        let written = buf.len() as u64;
        self.data.lock().unwrap().insert(key.to_string(), buf);
        Ok(written)
    }
}
