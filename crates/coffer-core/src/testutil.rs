use std::io::Read;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::file::{File, SHA1_SIZE};

pub fn rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

pub fn rand_letters(rng: &mut StdRng, n: usize) -> Vec<u8> {
    (0..n).map(|_| LETTERS[rng.gen_range(0..LETTERS.len())]).collect()
}

pub fn rand_string(rng: &mut StdRng, n: usize) -> String {
    String::from_utf8(rand_letters(rng, n)).unwrap()
}

pub fn rand_sha1(rng: &mut StdRng) -> [u8; SHA1_SIZE] {
    let mut out = [0u8; SHA1_SIZE];
    rng.fill(&mut out[..]);
    out
}

fn truncated_now() -> chrono::DateTime<Utc> {
    chrono::DateTime::from_timestamp(Utc::now().timestamp(), 0).unwrap()
}

/// A random regular file record without a checksum.
pub fn mock_file_bare(rng: &mut StdRng) -> File {
    File {
        root: "/".to_string(),
        name: rand_string(rng, 10),
        size: 1234,
        mode: 0o100644,
        mtime: truncated_now(),
        uid: 501,
        gid: 20,
        sha1: None,
    }
}

/// A random regular file record with a checksum.
pub fn mock_file(rng: &mut StdRng) -> File {
    let mut f = mock_file_bare(rng);
    f.sha1 = Some(rand_sha1(rng));
    f
}

pub fn mock_symlink(rng: &mut StdRng) -> File {
    let mut f = mock_file(rng);
    f.mode = 0o120777;
    f
}

pub fn mock_dir(rng: &mut StdRng) -> File {
    let mut f = mock_file_bare(rng);
    f.mode = 0o040755;
    f.size = 0;
    f
}

pub fn mock_file_in(rng: &mut StdRng, root: &str) -> File {
    let mut f = mock_file(rng);
    f.root = root.to_string();
    f
}

pub fn mock_file_sized(rng: &mut StdRng, size: u64) -> File {
    let mut f = mock_file(rng);
    f.size = size;
    f
}

/// Reader adapter that returns at most one byte per read call.
pub struct OneByteReader<R>(pub R);

impl<R: Read> Read for OneByteReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.0.read(&mut buf[..1])
    }
}

/// Reader that yields some bytes, then fails with a timeout error.
pub struct FailAfter {
    data: Vec<u8>,
    pos: usize,
}

impl FailAfter {
    pub fn new(data: &[u8]) -> Self {
        Self {
            data: data.to_vec(),
            pos: 0,
        }
    }
}

impl Read for FailAfter {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.pos >= self.data.len() {
            return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "timeout"));
        }
        let n = buf.len().min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
