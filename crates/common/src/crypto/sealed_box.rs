//! Authenticated encryption for ledger payloads
//!
//! A `SealedBox` holds a symmetric key agreed over X25519 and seals payloads
//! into `EncryptedBlob`s, the base64 text form stored in signaling records.

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    Key, XChaCha20Poly1305, XNonce,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::keys::{KeyPair, PublicKey};

/// Size of XChaCha20-Poly1305 nonce in bytes
pub const NONCE_SIZE: usize = 24;
/// Size of the derived symmetric key in bytes
const BOX_KEY_SIZE: usize = 32;
/// Poly1305 authentication tag length
const TAG_SIZE: usize = 16;

const KDF_CONTEXT: &str = "webrtc-live 2024 signaling box v1";

/// Errors that can occur during sealing or opening
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Wrong key, corrupted or truncated blob. Treated as "no valid message".
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("payload is not valid json: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Base64 text of `nonce || ciphertext || tag`
///
/// Blobs are compared by their exact text: an echoed offer matches only the
///  very blob that was written, never a re-encryption of the same payload.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncryptedBlob(String);

impl EncryptedBlob {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for EncryptedBlob {
    fn from(encoded: String) -> Self {
        EncryptedBlob(encoded)
    }
}

impl fmt::Display for EncryptedBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for EncryptedBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix: String = self.0.chars().take(12).collect();
        write!(f, "EncryptedBlob({}.., {} chars)", prefix, self.0.len())
    }
}

/// Symmetric box keyed by an X25519 shared secret
///
/// `SealedBox::new(a, b.public())` and `SealedBox::new(b, a.public())` hold
///  the same key, so either side can open what the other sealed.
#[derive(Clone)]
pub struct SealedBox {
    key: [u8; BOX_KEY_SIZE],
}

impl fmt::Debug for SealedBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SealedBox").finish_non_exhaustive()
    }
}

impl SealedBox {
    /// Derive the box shared between `own` and the holder of `peer`
    pub fn new(own: &KeyPair, peer: &PublicKey) -> Self {
        let shared = own.secret().diffie_hellman(&peer.to_x25519());
        Self {
            key: blake3::derive_key(KDF_CONTEXT, shared.as_bytes()),
        }
    }

    /// The box for a stream's own mailbox, shared by everyone holding the
    ///  stream's secret
    pub fn for_stream(stream: &KeyPair) -> Self {
        Self::new(stream, &stream.public())
    }

    /// Seal a payload under a fresh random nonce
    ///
    /// # Errors
    ///
    /// Only fails if the entropy source fails.
    pub fn seal(&self, plaintext: &[u8]) -> Result<EncryptedBlob, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        getrandom::getrandom(&mut nonce_bytes)
            .map_err(|e| CryptoError::EncryptionFailed(format!("failed to generate nonce: {}", e)))?;
        self.seal_with_nonce(plaintext, &nonce_bytes)
    }

    fn seal_with_nonce(
        &self,
        plaintext: &[u8],
        nonce_bytes: &[u8; NONCE_SIZE],
    ) -> Result<EncryptedBlob, CryptoError> {
        let cipher = XChaCha20Poly1305::new(Key::from_slice(&self.key));
        let nonce = XNonce::from_slice(nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoError::EncryptionFailed("encrypt error".to_string()))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(EncryptedBlob(STANDARD.encode(out)))
    }

    /// Open a blob sealed under this box's key
    ///
    /// # Errors
    ///
    /// Returns `DecryptionFailed` for invalid base64, input too short for a
    ///  nonce and tag, or an authentication mismatch. No partial plaintext is
    ///  ever returned.
    pub fn open(&self, blob: &EncryptedBlob) -> Result<Vec<u8>, CryptoError> {
        let data = STANDARD
            .decode(blob.as_str())
            .map_err(|_| CryptoError::DecryptionFailed)?;
        if data.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::DecryptionFailed);
        }

        let cipher = XChaCha20Poly1305::new(Key::from_slice(&self.key));
        let nonce = XNonce::from_slice(&data[..NONCE_SIZE]);
        cipher
            .decrypt(nonce, &data[NONCE_SIZE..])
            .map_err(|_| CryptoError::DecryptionFailed)
    }

    /// Seal a value as json
    pub fn seal_json<T: Serialize>(&self, value: &T) -> Result<EncryptedBlob, CryptoError> {
        let plaintext = serde_json::to_vec(value)?;
        self.seal(&plaintext)
    }

    /// Open a blob and parse its plaintext as json
    pub fn open_json<T: DeserializeOwned>(&self, blob: &EncryptedBlob) -> Result<T, CryptoError> {
        let plaintext = self.open(blob)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }
}
