use std::io::{self, Read};
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::warn;

use crate::compress::CompressReader;
use crate::crypto::Crypter;
use crate::error::{CofferError, Result};
use crate::pipe::{pipe, PipeWriter};
use crate::storage::StorageLayer;

/// Streams multiple logical writes into a single backend object.
///
/// Each `put_reader` runs its bytes through compress-then-encrypt and
/// appends the result to an uploader feeding `StorageLayer::put_reader`
/// through an in-memory pipe. Single-producer: one thread drives the packer.
///
/// Any failure is permanent: subsequent `put_reader` calls fail with the
/// pipe-closed error, and `close` reports the first failure. `close` is
/// idempotent.
pub struct Packer {
    crypter: Arc<Crypter>,
    writer: Option<PipeWriter>,
    uploader: Option<JoinHandle<Result<u64>>>,
    closed: bool,
    close_err: Option<String>,
}

impl Packer {
    pub(crate) fn spawn(layer: Arc<dyn StorageLayer>, crypter: Arc<Crypter>, key: &str) -> Self {
        let (writer, mut reader) = pipe();
        let key = key.to_string();
        let uploader = std::thread::spawn(move || layer.put_reader(&key, &mut reader));
        Self {
            crypter,
            writer: Some(writer),
            uploader: Some(uploader),
            closed: false,
            close_err: None,
        }
    }

    /// Compress, encrypt and append the contents of `r` to the object.
    /// Returns the (encrypted) bytes appended.
    pub fn put_reader(&mut self, r: impl Read) -> Result<u64> {
        let writer = match self.writer.as_mut() {
            Some(w) => w,
            None => {
                return Err(CofferError::Io(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "pipe closed",
                )))
            }
        };
        let mut ciphertext = self.crypter.encrypt_reader(CompressReader::new(r));
        match io::copy(&mut ciphertext, writer) {
            Ok(written) => Ok(written),
            Err(e) => {
                // Close the write end of the pipe with the error, so we know
                // we've failed with this packer.
                let err = CofferError::from_io(e);
                warn!(error = %err, "store: put.packer error");
                self.shutdown(Some(io::Error::new(
                    io::ErrorKind::Other,
                    err.to_string(),
                )));
                if self.close_err.is_none() {
                    self.close_err = Some(err.to_string());
                }
                Err(err)
            }
        }
    }

    /// Finish writing and wait for the upload, returning any failure.
    /// Repeated calls return the same outcome.
    pub fn close(&mut self) -> Result<()> {
        self.shutdown(None);
        match &self.close_err {
            None => Ok(()),
            Some(msg) => Err(CofferError::Storage(msg.clone())),
        }
    }

    fn shutdown(&mut self, err: Option<io::Error>) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(mut writer) = self.writer.take() {
            writer.close(err);
        }
        if let Some(handle) = self.uploader.take() {
            match handle.join() {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => self.close_err = Some(e.to_string()),
                Err(_) => self.close_err = Some("uploader thread panicked".to_string()),
            }
        }
    }
}

impl Drop for Packer {
    fn drop(&mut self) {
        self.shutdown(None);
    }
}
