use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

use crossbeam_channel::{bounded, Receiver, Sender};

/// Chunks buffered in the channel before the writer blocks.
const PIPE_DEPTH: usize = 16;

/// An in-memory byte pipe connecting a producer thread to a consumer thread.
///
/// Writes block once `PIPE_DEPTH` chunks are in flight, so a slow consumer
/// applies backpressure to the producer. Closing the writer with an error
/// hands that error to the reader after the buffered chunks drain; dropping
/// the reader makes further writes fail with `BrokenPipe`.
pub fn pipe() -> (PipeWriter, PipeReader) {
    let (tx, rx) = bounded(PIPE_DEPTH);
    let shared = Arc::new(Mutex::new(None));
    (
        PipeWriter {
            tx: Some(tx),
            shared: Arc::clone(&shared),
        },
        PipeReader {
            rx,
            shared,
            chunk: Vec::new(),
            pos: 0,
        },
    )
}

pub struct PipeWriter {
    tx: Option<Sender<Vec<u8>>>,
    shared: Arc<Mutex<Option<io::Error>>>,
}

impl PipeWriter {
    /// Close the write end, optionally recording an error for the reader.
    /// Idempotent; only the first close takes effect.
    pub fn close(&mut self, err: Option<io::Error>) {
        if let Some(err) = err {
            let mut slot = self.shared.lock().unwrap();
            if slot.is_none() {
                *slot = Some(err);
            }
        }
        self.tx.take();
    }
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"))?;
        if buf.is_empty() {
            return Ok(0);
        }
        tx.send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        self.tx.take();
    }
}

pub struct PipeReader {
    rx: Receiver<Vec<u8>>,
    shared: Arc<Mutex<Option<io::Error>>>,
    chunk: Vec<u8>,
    pos: usize,
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pos >= self.chunk.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.chunk = chunk;
                    self.pos = 0;
                }
                // Writer gone: surface its error once, then EOF.
                Err(_) => match self.shared.lock().unwrap().take() {
                    Some(err) => return Err(err),
                    None => return Ok(0),
                },
            }
        }
        let n = buf.len().min(self.chunk.len() - self.pos);
        buf[..n].copy_from_slice(&self.chunk[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn roundtrip_across_threads() {
        let (mut w, mut r) = pipe();
        let handle = std::thread::spawn(move || {
            w.write_all(b"hello ").unwrap();
            w.write_all(b"world").unwrap();
            w.close(None);
        });
        let mut out = String::new();
        r.read_to_string(&mut out).unwrap();
        handle.join().unwrap();
        assert_eq!(out, "hello world");
    }

    #[test]
    fn close_with_error_reaches_reader() {
        let (mut w, mut r) = pipe();
        w.write_all(b"partial").unwrap();
        w.close(Some(io::Error::new(io::ErrorKind::TimedOut, "timeout")));
        let mut out = Vec::new();
        let err = r.read_to_end(&mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn write_after_reader_drop_fails() {
        let (mut w, r) = pipe();
        drop(r);
        let err = w.write_all(b"data").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn write_after_close_fails() {
        let (mut w, _r) = pipe();
        w.close(None);
        assert!(w.write_all(b"data").is_err());
    }
}
