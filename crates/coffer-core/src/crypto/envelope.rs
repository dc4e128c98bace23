use std::io::{self, Read};

use aes::cipher::{BlockModeDecrypt, BlockModeEncrypt, KeyIvInit};
use aes::Aes256;
use hmac::{KeyInit, Mac};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::crypto::{pad, unpad, Crypter, HmacSha1, BLOCK_SIZE, HMAC_SIZE};
use crate::error::{CofferError, Result};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// How much plaintext/ciphertext to pull from the source per refill.
const READ_CHUNK: usize = 16 * 1024;

fn new_mac(crypter: &Crypter, iv: &[u8]) -> HmacSha1 {
    let mut mac =
        HmacSha1::new_from_slice(crypter.auth_key()).expect("HMAC accepts any key length");
    mac.update(iv);
    mac
}

// ---------------------------------------------------------------------------
// Encryption
// ---------------------------------------------------------------------------

/// Streaming encryptor implementing `Read`.
///
/// Output layout: `IV (16) || ciphertext (n*16) || HMAC (20)`. Partial reads
/// by the caller produce byte-identical output to a bulk read.
pub struct EncryptReader<R> {
    inner: R,
    cbc: Aes256CbcEnc,
    mac: Option<HmacSha1>,
    /// Plaintext tail shorter than one block, carried to the next refill.
    pending: Vec<u8>,
    out: Vec<u8>,
    pos: usize,
    fin: bool,
}

impl<R: Read> EncryptReader<R> {
    pub(crate) fn new(crypter: &Crypter, inner: R) -> Self {
        // The IV must be unique, but need not be secret. It precedes the
        // ciphertext and is covered by the HMAC.
        let mut iv = [0u8; BLOCK_SIZE];
        OsRng.fill_bytes(&mut iv);
        let cbc = Aes256CbcEnc::new(crypter.enc_key().into(), &iv.into());
        let mac = new_mac(crypter, &iv);
        Self {
            inner,
            cbc,
            mac: Some(mac),
            pending: Vec::new(),
            out: iv.to_vec(),
            pos: 0,
            fin: false,
        }
    }

    /// Encrypt whole blocks of `plain` onto `self.out`, feeding the HMAC.
    fn encrypt_blocks(&mut self, plain: &[u8]) {
        debug_assert_eq!(plain.len() % BLOCK_SIZE, 0);
        let start = self.out.len();
        self.out.extend_from_slice(plain);
        for block in self.out[start..].chunks_exact_mut(BLOCK_SIZE) {
            self.cbc.encrypt_block((&mut *block).try_into().unwrap());
        }
        if let Some(mac) = self.mac.as_mut() {
            mac.update(&self.out[start..]);
        }
    }

    fn refill(&mut self) -> io::Result<()> {
        self.out.clear();
        self.pos = 0;

        let mut scratch = [0u8; READ_CHUNK];
        let n = self.inner.read(&mut scratch)?;
        if n == 0 {
            // End of input: pad the plaintext, sign the ciphertext.
            self.fin = true;
            let mut tail = std::mem::take(&mut self.pending);
            pad(&mut tail);
            self.encrypt_blocks(&tail);
            let mac = self.mac.take().expect("finalized once");
            self.out.extend_from_slice(&mac.finalize().into_bytes());
            return Ok(());
        }

        self.pending.extend_from_slice(&scratch[..n]);
        let whole = self.pending.len() - self.pending.len() % BLOCK_SIZE;
        if whole > 0 {
            let rest = self.pending.split_off(whole);
            let plain = std::mem::replace(&mut self.pending, rest);
            self.encrypt_blocks(&plain);
        }
        Ok(())
    }
}

impl<R: Read> Read for EncryptReader<R> {
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
            if self.fin {
                return Ok(0);
            }
            self.refill()?;
        }
    }
}

// ---------------------------------------------------------------------------
// Decryption
// ---------------------------------------------------------------------------

/// Streaming authenticate-and-decrypt implementing `Read`.
///
/// Keeps a look-ahead of at least `HMAC_SIZE + 1` bytes so the trailing HMAC
/// is never fed to the block cipher, and so the final (padded) block is only
/// decrypted once end-of-input is known. An HMAC mismatch at end-of-stream
/// surfaces as an error that cannot be overtaken by a successful EOF.
pub struct DecryptReader<R> {
    inner: R,
    cbc: Aes256CbcDec,
    mac: Option<HmacSha1>,
    /// Ciphertext read from the source but not yet decrypted.
    enc: Vec<u8>,
    out: Vec<u8>,
    pos: usize,
    fin: bool,
}

impl<R: Read> DecryptReader<R> {
    pub(crate) fn new(crypter: &Crypter, mut inner: R) -> Result<Self> {
        // The IV leads the stream; a source shorter than that is no envelope.
        let mut iv = [0u8; BLOCK_SIZE];
        if !read_full(&mut inner, &mut iv)? {
            return Err(CofferError::TruncatedCiphertext);
        }
        let cbc = Aes256CbcDec::new(crypter.enc_key().into(), &iv.into());
        let mac = new_mac(crypter, &iv);
        Ok(Self {
            inner,
            cbc,
            mac: Some(mac),
            enc: Vec::new(),
            out: Vec::new(),
            pos: 0,
            fin: false,
        })
    }

    /// Feed `count` ciphertext bytes from the front of `self.enc` through the
    /// HMAC and the block cipher, appending plaintext to `self.out`.
    fn decrypt_blocks(&mut self, count: usize) {
        debug_assert_eq!(count % BLOCK_SIZE, 0);
        let start = self.out.len();
        self.out.extend_from_slice(&self.enc[..count]);
        if let Some(mac) = self.mac.as_mut() {
            mac.update(&self.out[start..]);
        }
        for block in self.out[start..].chunks_exact_mut(BLOCK_SIZE) {
            self.cbc.decrypt_block((&mut *block).try_into().unwrap());
        }
        self.enc.drain(..count);
    }

    fn finalize(&mut self) -> Result<()> {
        // Minimum message: one ciphertext block plus the HMAC.
        if self.enc.len() < BLOCK_SIZE + HMAC_SIZE {
            return Err(CofferError::TruncatedCiphertext);
        }
        let ct_len = self.enc.len() - HMAC_SIZE;
        if ct_len % BLOCK_SIZE != 0 {
            return Err(CofferError::MalformedCiphertext(
                "ciphertext is not a multiple of the block size".into(),
            ));
        }
        self.decrypt_blocks(ct_len);
        let mac = self.mac.take().expect("finalized once");
        mac.verify_slice(&self.enc)
            .map_err(|_| CofferError::AuthFailure)?;
        unpad(&mut self.out)
    }

    fn refill(&mut self) -> io::Result<()> {
        self.out.clear();
        self.pos = 0;

        let mut scratch = [0u8; READ_CHUNK];
        let n = self.inner.read(&mut scratch)?;
        if n == 0 {
            self.fin = true;
            return self.finalize().map_err(CofferError::into_io);
        }
        self.enc.extend_from_slice(&scratch[..n]);

        // Decrypt whole blocks, always retaining HMAC_SIZE + 1 bytes of
        // look-ahead so the message boundary stays visible at EOF.
        if self.enc.len() > HMAC_SIZE + 1 {
            let avail = self.enc.len() - (HMAC_SIZE + 1);
            let whole = avail - avail % BLOCK_SIZE;
            if whole > 0 {
                self.decrypt_blocks(whole);
            }
        }
        Ok(())
    }
}

impl<R: Read> Read for DecryptReader<R> {
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
            if self.fin {
                return Ok(0);
            }
            self.refill()?;
        }
    }
}

/// Fill `buf` completely from `r`. Returns false on early EOF.
fn read_full<R: Read>(r: &mut R, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = r.read(&mut buf[filled..])?;
        if n == 0 {
            return Ok(false);
        }
        filled += n;
    }
    Ok(true)
}
