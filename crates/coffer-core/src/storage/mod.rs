pub mod local;
pub mod memory;
pub mod s3;

use std::io::Read;

use crate::error::Result;

/// Abstract storage used by the store for underlying object I/O.
/// Keys are `/`-separated string paths (e.g. "blob/<set>/<bundle>").
pub trait StorageLayer: Send + Sync {
    /// True if the container (S3 bucket, folder, etc.) exists and is usable.
    fn exists(&self) -> Result<bool>;

    /// Ensure the container exists and is usable.
    fn create(&self) -> Result<()>;

    /// Stored (encrypted) content length of an object.
    fn size(&self, key: &str) -> Result<u64>;

    /// Contents of an object. A missing key is `CofferError::ObjectNotFound`.
    fn get_reader(&self, key: &str) -> Result<Box<dyn Read + Send>>;

    /// Read from `r` and store the result to an object, overwriting any
    /// existing key. Returns the bytes written.
    fn put_reader(&self, key: &str, r: &mut dyn Read) -> Result<u64>;
}

/// `Read` adapter that counts the bytes passing through it.
pub(crate) struct CountingReader<R> {
    inner: R,
    count: u64,
}

impl<R: Read> CountingReader<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self { inner, count: 0 }
    }

    pub(crate) fn count(&self) -> u64 {
        self.count
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}
