//! Persistence codec: the full database snapshot as encrypted text.
//!
//! ## File format
//!
//! ```text
//! <iv as 32 hex chars>:<AES-256-CBC ciphertext as hex>
//! ```
//!
//! The key is the SHA-256 digest of the configured passphrase and the IV is
//! fresh for every write. Payloads without exactly one `:` are legacy files,
//! obfuscated by XOR with the passphrase bytes repeated over the data.

use crate::error::{Result, SealDbError};
use crate::store::Database;
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::Path;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Size of the derived AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// Size of the CBC initialization vector in bytes.
pub const IV_SIZE: usize = 16;

const SEPARATOR: char = ':';

/// Encrypts and decrypts database snapshots under one passphrase.
#[derive(Clone)]
pub struct Codec {
    key: [u8; KEY_SIZE],
    passphrase: Vec<u8>,
}

impl std::fmt::Debug for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Codec").field("key", &"[REDACTED]").finish()
    }
}

impl Codec {
    pub fn new(passphrase: &str) -> Self {
        let digest = Sha256::digest(passphrase.as_bytes());
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&digest);
        Codec {
            key,
            passphrase: passphrase.as_bytes().to_vec(),
        }
    }

    /// Encrypt with a fresh random IV, producing `ivHex:ciphertextHex`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        let mut iv = [0u8; IV_SIZE];
        rand::thread_rng().fill_bytes(&mut iv);

        let cipher = Aes256CbcEnc::new_from_slices(&self.key, &iv)
            .map_err(|e| SealDbError::Crypto(format!("cipher init failed: {e}")))?;
        let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        Ok(format!("{}{SEPARATOR}{}", to_hex(&iv), to_hex(&ciphertext)))
    }

    /// Decrypt a payload in either the current or the legacy format.
    pub fn decrypt(&self, payload: &[u8]) -> Result<Vec<u8>> {
        match current_scheme_parts(payload) {
            Some((iv_hex, ciphertext_hex)) => {
                let iv = from_hex(iv_hex)?;
                if iv.len() != IV_SIZE {
                    return Err(SealDbError::Crypto(format!(
                        "IV must be {IV_SIZE} bytes, got {}",
                        iv.len()
                    )));
                }
                let ciphertext = from_hex(ciphertext_hex)?;
                let cipher = Aes256CbcDec::new_from_slices(&self.key, &iv)
                    .map_err(|e| SealDbError::Crypto(format!("cipher init failed: {e}")))?;
                cipher
                    .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
                    .map_err(|_| {
                        SealDbError::Crypto("decryption failed (wrong key or corrupt data)".into())
                    })
            }
            None => {
                log::warn!("Reading legacy XOR-encoded database payload");
                Ok(xor_stream(payload, &self.passphrase))
            }
        }
    }

    /// Serialize and encrypt a database.
    pub fn encode(&self, db: &Database) -> Result<Vec<u8>> {
        let plaintext = serialize(db)?;
        Ok(self.encrypt(&plaintext)?.into_bytes())
    }

    /// Decrypt and parse a database. Empty input is an empty database.
    pub fn decode(&self, bytes: &[u8]) -> Result<Database> {
        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(Database::new());
        }
        let plaintext = self.decrypt(bytes)?;
        deserialize(&plaintext)
    }

    /// Encode in the legacy XOR format. Only used to produce fixtures for the fallback path.
    pub fn encode_legacy(&self, db: &Database) -> Result<Vec<u8>> {
        let plaintext = serialize(db)?;
        Ok(xor_stream(&plaintext, &self.passphrase))
    }
}

/// Canonical JSON text of the whole database.
pub fn serialize(db: &Database) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(db)?)
}

pub fn deserialize(bytes: &[u8]) -> Result<Database> {
    Ok(serde_json::from_slice(bytes)?)
}

/// XOR `data` with `key` repeated over its length. Applying it twice is the identity.
pub fn xor_stream(data: &[u8], key: &[u8]) -> Vec<u8> {
    if key.is_empty() {
        return data.to_vec();
    }
    data.iter()
        .zip(key.iter().cycle())
        .map(|(d, k)| d ^ k)
        .collect()
}

/// True when the payload would be read through the legacy XOR path.
pub fn is_legacy_payload(payload: &[u8]) -> bool {
    current_scheme_parts(payload).is_none()
}

fn current_scheme_parts(payload: &[u8]) -> Option<(&str, &str)> {
    let text = std::str::from_utf8(payload).ok()?.trim();
    if text.matches(SEPARATOR).count() != 1 {
        return None;
    }
    text.split_once(SEPARATOR)
}

/// Replace `path` with `bytes` by writing a sibling temp file and renaming it over the target.
pub fn write_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn from_hex(hex: &str) -> Result<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return Err(SealDbError::Crypto("hex payload has odd length".into()));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            hex.get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| SealDbError::Crypto(format!("invalid hex at offset {i}")))
        })
        .collect()
}
