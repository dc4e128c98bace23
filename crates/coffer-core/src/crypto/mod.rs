pub mod envelope;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha1::Sha1;

use crate::error::{CofferError, Result};

pub use envelope::{DecryptReader, EncryptReader};

/// Salt length stored in the plaintext store header.
pub const SALT_SIZE: usize = 8;
/// PBKDF2 iteration count.
pub const KDF_ROUNDS: u32 = 4096;
/// AES-256 key length.
pub const ENC_KEY_SIZE: usize = 32;
/// HMAC-SHA1 key length (one SHA-1 block).
pub const AUTH_KEY_SIZE: usize = 64;
/// HMAC-SHA1 output length.
pub const HMAC_SIZE: usize = 20;
/// AES block length.
pub const BLOCK_SIZE: usize = 16;

pub(crate) type HmacSha1 = hmac::Hmac<Sha1>;

/// Encryption and authentication keys for store data. Base64 at rest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keys {
    #[serde(rename = "encKey", with = "base64_bytes", default)]
    pub enc_key: Vec<u8>,
    #[serde(rename = "authKey", with = "base64_bytes", default)]
    pub auth_key: Vec<u8>,
}

impl Keys {
    pub fn is_empty(&self) -> bool {
        self.enc_key.is_empty() && self.auth_key.is_empty()
    }
}

/// Serde codec for binary fields carried as base64 strings in JSON.
pub(crate) mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(de)?;
        STANDARD.decode(raw).map_err(serde::de::Error::custom)
    }
}

/// Fresh cryptographically secure salt for deriving store keys.
pub fn salt() -> Vec<u8> {
    let mut buf = vec![0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut buf);
    buf
}

/// PBKDF2 over the secret and salt, yielding the encryption key (AES-256)
/// and the authentication key (HMAC-SHA1) in one derivation.
pub fn derive_keys(secret: &[u8], salt: &[u8]) -> Keys {
    let mut material = [0u8; ENC_KEY_SIZE + AUTH_KEY_SIZE];
    pbkdf2::pbkdf2_hmac::<Sha1>(secret, salt, KDF_ROUNDS, &mut material);
    Keys {
        enc_key: material[..ENC_KEY_SIZE].to_vec(),
        auth_key: material[ENC_KEY_SIZE..].to_vec(),
    }
}

/// Extend a plaintext to the next whole block with PKCS#7-style padding.
/// A full block of padding is appended when already block-aligned.
pub(crate) fn pad(buf: &mut Vec<u8>) {
    let pad = BLOCK_SIZE - (buf.len() % BLOCK_SIZE);
    buf.extend(std::iter::repeat(pad as u8).take(pad));
}

/// Strip PKCS#7 padding, validating the length and every padding byte.
pub(crate) fn unpad(buf: &mut Vec<u8>) -> Result<()> {
    let len = buf.len();
    let pad = *buf
        .last()
        .ok_or_else(|| CofferError::MalformedCiphertext("invalid padding length".into()))?
        as usize;
    if pad == 0 || pad > BLOCK_SIZE || pad > len {
        return Err(CofferError::MalformedCiphertext(
            "invalid padding length".into(),
        ));
    }
    if buf[len - pad..].iter().any(|&b| b != pad as u8) {
        return Err(CofferError::MalformedCiphertext(
            "invalid padding bytes".into(),
        ));
    }
    buf.truncate(len - pad);
    Ok(())
}

/// Encrypts and decrypts byte streams using AES-256 in CBC mode, with the
/// ciphertext authenticated by an HMAC-SHA1 signature. The envelope on the
/// wire is `IV || ciphertext || HMAC`.
#[derive(Clone)]
pub struct Crypter {
    enc_key: [u8; ENC_KEY_SIZE],
    auth_key: [u8; AUTH_KEY_SIZE],
}

impl Crypter {
    pub fn new(keys: &Keys) -> Result<Self> {
        if keys.enc_key.len() != ENC_KEY_SIZE {
            return Err(CofferError::InvalidKey(
                "invalid encryption key length".into(),
            ));
        }
        if keys.auth_key.len() != AUTH_KEY_SIZE {
            return Err(CofferError::InvalidKey(
                "invalid authentication key length".into(),
            ));
        }
        let mut enc_key = [0u8; ENC_KEY_SIZE];
        let mut auth_key = [0u8; AUTH_KEY_SIZE];
        enc_key.copy_from_slice(&keys.enc_key);
        auth_key.copy_from_slice(&keys.auth_key);
        Ok(Self { enc_key, auth_key })
    }

    pub(crate) fn enc_key(&self) -> &[u8; ENC_KEY_SIZE] {
        &self.enc_key
    }

    pub(crate) fn auth_key(&self) -> &[u8; AUTH_KEY_SIZE] {
        &self.auth_key
    }

    /// Streaming encryptor over `inner`. Emits the IV first, then ciphertext
    /// block by block, then the HMAC at end of input.
    pub fn encrypt_reader<R: std::io::Read>(&self, inner: R) -> EncryptReader<R> {
        EncryptReader::new(self, inner)
    }

    /// Streaming decryptor over `inner`. Reads the leading IV eagerly, so a
    /// stream shorter than one IV fails here rather than on first read.
    pub fn decrypt_reader<R: std::io::Read>(&self, inner: R) -> Result<DecryptReader<R>> {
        DecryptReader::new(self, inner)
    }

    /// One-shot encrypt of an in-memory plaintext.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut reader = self.encrypt_reader(std::io::Cursor::new(plaintext));
        let mut out = Vec::new();
        std::io::Read::read_to_end(&mut reader, &mut out).map_err(CofferError::from_io)?;
        Ok(out)
    }

    /// One-shot authenticate-and-decrypt of an in-memory ciphertext.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let mut reader = self.decrypt_reader(std::io::Cursor::new(ciphertext))?;
        let mut out = Vec::new();
        std::io::Read::read_to_end(&mut reader, &mut out).map_err(CofferError::from_io)?;
        Ok(out)
    }
}
