//! Column encryption: key provider contract and AEAD cipher helpers.
//!
//! # Responsibility
//! - Derive one symmetric key per (table, column) pair for encrypted
//!   attributes.
//! - Seal/open column values with ChaCha20-Poly1305.
//!
//! # Invariants
//! - Key derivation is deterministic per (table, column) for the lifetime
//!   of the dataset; changing it breaks decryption of existing rows.
//! - Key bytes never appear in `Debug` output or logs.

use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use sha2::{Digest, Sha256};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub const KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;

pub type CryptoResult<T> = Result<T, CryptoError>;

#[derive(Debug)]
pub enum CryptoError {
    /// No key can be produced for the column; fatal for any operation
    /// touching it.
    KeyUnavailable { table: String, column: String },
    Encrypt,
    Decrypt,
    MalformedCiphertext { length: usize },
}

impl Display for CryptoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::KeyUnavailable { table, column } => {
                write!(f, "no encryption key available for {table}.{column}")
            }
            Self::Encrypt => write!(f, "column encryption failed"),
            Self::Decrypt => write!(
                f,
                "column decryption failed (wrong key or corrupted ciphertext)"
            ),
            Self::MalformedCiphertext { length } => write!(
                f,
                "stored ciphertext of {length} bytes is shorter than the nonce prefix"
            ),
        }
    }
}

impl Error for CryptoError {}

/// Symmetric key bound to one (table, column) pair.
#[derive(Clone)]
pub struct ColumnKey([u8; KEY_SIZE]);

impl ColumnKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Short identification hash; safe to log, reveals no key material.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0);
        digest[..8].iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl std::fmt::Debug for ColumnKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnKey")
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

/// Supplies the key for an encrypted column.
///
/// Injected into the facade at construction; implementations must be
/// deterministic per (table, column) pair.
pub trait EncryptKeyProvider {
    fn column_key(&self, table: &str, column: &str) -> CryptoResult<ColumnKey>;
}

/// Key provider deriving column keys from one dataset secret.
///
/// Derivation: SHA-256 over secret, table and column with NUL separators.
pub struct DerivedKeyProvider {
    secret: Vec<u8>,
}

impl DerivedKeyProvider {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

impl EncryptKeyProvider for DerivedKeyProvider {
    fn column_key(&self, table: &str, column: &str) -> CryptoResult<ColumnKey> {
        if self.secret.is_empty() {
            return Err(CryptoError::KeyUnavailable {
                table: table.to_string(),
                column: column.to_string(),
            });
        }

        let mut hasher = Sha256::new();
        hasher.update(&self.secret);
        hasher.update([0u8]);
        hasher.update(table.as_bytes());
        hasher.update([0u8]);
        hasher.update(column.as_bytes());
        Ok(ColumnKey(hasher.finalize().into()))
    }
}

/// Encrypts a column value; output layout is `nonce || ciphertext+tag`.
pub fn seal(key: &ColumnKey, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| CryptoError::Encrypt)?;

    let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Decrypts a sealed column value produced by [`seal`].
pub fn open(key: &ColumnKey, sealed: &[u8]) -> CryptoResult<Vec<u8>> {
    if sealed.len() < NONCE_SIZE {
        return Err(CryptoError::MalformedCiphertext {
            length: sealed.len(),
        });
    }

    let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::Decrypt)
}

/// Decrypts a sealed column value expected to contain UTF-8 text.
pub fn open_string(key: &ColumnKey, sealed: &[u8]) -> CryptoResult<String> {
    let plaintext = open(key, sealed)?;
    String::from_utf8(plaintext).map_err(|_| CryptoError::Decrypt)
}

#[cfg(test)]
mod tests {
    use super::{open, open_string, seal, CryptoError, DerivedKeyProvider, EncryptKeyProvider};

    #[test]
    fn derivation_is_deterministic_per_table_and_column() {
        let provider = DerivedKeyProvider::new("dataset-secret");
        let first = provider.column_key("person", "password_encrypted").unwrap();
        let again = provider.column_key("person", "password_encrypted").unwrap();
        let other = provider.column_key("person", "name").unwrap();

        assert_eq!(first.fingerprint(), again.fingerprint());
        assert_ne!(first.fingerprint(), other.fingerprint());
    }

    #[test]
    fn empty_secret_yields_key_unavailable() {
        let provider = DerivedKeyProvider::new(Vec::new());
        let err = provider
            .column_key("person", "password_encrypted")
            .unwrap_err();
        assert!(matches!(err, CryptoError::KeyUnavailable { .. }));
    }

    #[test]
    fn seal_then_open_round_trips() {
        let provider = DerivedKeyProvider::new("dataset-secret");
        let key = provider.column_key("person", "password_encrypted").unwrap();

        let sealed = seal(&key, b"durrutia123").unwrap();
        assert_ne!(&sealed[..], b"durrutia123");
        assert_eq!(open_string(&key, &sealed).unwrap(), "durrutia123");
    }

    #[test]
    fn open_with_wrong_key_fails() {
        let provider = DerivedKeyProvider::new("dataset-secret");
        let key = provider.column_key("person", "password_encrypted").unwrap();
        let wrong = provider.column_key("patient", "name").unwrap();

        let sealed = seal(&key, b"durrutia123").unwrap();
        assert!(matches!(
            open(&wrong, &sealed),
            Err(CryptoError::Decrypt)
        ));
    }

    #[test]
    fn truncated_ciphertext_is_rejected() {
        let provider = DerivedKeyProvider::new("dataset-secret");
        let key = provider.column_key("person", "password_encrypted").unwrap();
        assert!(matches!(
            open(&key, &[1, 2, 3]),
            Err(CryptoError::MalformedCiphertext { length: 3 })
        ));
    }

    #[test]
    fn key_debug_output_hides_key_bytes() {
        let provider = DerivedKeyProvider::new("dataset-secret");
        let key = provider.column_key("person", "password_encrypted").unwrap();
        let debug = format!("{key:?}");
        assert!(debug.contains("fingerprint"));
        assert!(!debug.contains("dataset-secret"));
    }
}
