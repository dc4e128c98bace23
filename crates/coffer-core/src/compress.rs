use std::io::{self, Read, Write};

use flate2::write::GzEncoder;
use flate2::Compression;

/// Uncompressed bytes to read before flushing the gzip stream.
/// This affects compression ratios, so the more we read in, the better.
pub(crate) const FLUSH_SIZE: usize = 65535;

pub use flate2::read::GzDecoder;

/// Streaming gzip compressor implementing `Read`.
///
/// Compresses at the default level and performs a sync flush after every
/// `FLUSH_SIZE` bytes of input, so downstream consumers make forward
/// progress without unbounded buffering.
pub struct CompressReader<R> {
    inner: R,
    encoder: Option<GzEncoder<Vec<u8>>>,
    out: Vec<u8>,
    pos: usize,
}

impl<R: Read> CompressReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            encoder: Some(GzEncoder::new(Vec::new(), Compression::default())),
            out: Vec::new(),
            pos: 0,
        }
    }

    fn refill(&mut self) -> io::Result<()> {
        self.out.clear();
        self.pos = 0;

        if self.encoder.is_none() {
            return Ok(()); // finished
        }

        // Feed one flush window of input, then flush so the compressed
        // bytes become available.
        let mut window = [0u8; 8192];
        let mut fed = 0;
        while fed < FLUSH_SIZE {
            let want = window.len().min(FLUSH_SIZE - fed);
            let n = self.inner.read(&mut window[..want])?;
            if n == 0 {
                let encoder = self.encoder.take().expect("checked above");
                self.out = encoder.finish()?;
                return Ok(());
            }
            let encoder = self.encoder.as_mut().expect("checked above");
            encoder.write_all(&window[..n])?;
            fed += n;
        }
        let encoder = self.encoder.as_mut().expect("checked above");
        encoder.flush()?;
        self.out = std::mem::take(encoder.get_mut());
        Ok(())
    }
}

impl<R: Read> Read for CompressReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.pos < self.out.len() {
                let n = buf.len().min(self.out.len() - self.pos);
                buf[..n].copy_from_slice(&self.out[self.pos..self.pos + n]);
                self.pos += n;
                return Ok(n);
            }
            if self.encoder.is_none() {
                return Ok(0);
            }
            self.refill()?;
        }
    }
}

/// Streaming gzip decompressor over `inner`.
pub fn decompress_reader<R: Read>(inner: R) -> GzDecoder<R> {
    GzDecoder::new(inner)
}
