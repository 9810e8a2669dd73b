//! Cryptographic primitives for signaling payloads
//!
//! Everything written to the ledger is public, so every session description
//! and restream key is sealed before it leaves the client:
//!
//! - **Identity**: each stream is addressed by an X25519 `KeyPair`. The public
//!   half (base64) is the ledger key for the stream's record, the secret half
//!   travels only inside a share URL chosen by the owner.
//! - **Key agreement**: both ends derive the same symmetric key from
//!   X25519 Diffie-Hellman over (own secret, peer public), run through a
//!   BLAKE3 key derivation.
//! - **Encryption**: XChaCha20-Poly1305 with a fresh random nonce per seal.
//!   The wire format is base64(`nonce (24 bytes) || ciphertext || tag`).
//!
//! A viewer that loaded a share URL holds the stream's own key pair, so for
//! the stream mailbox both ends seal with `SealedBox::for_stream`.

mod keys;
mod sealed_box;

pub use keys::{
    KeyError, KeyPair, MemorySecretStore, PublicKey, SecretStore, PUBLIC_KEY_SIZE, SECRET_KEY_SIZE,
};
pub use sealed_box::{CryptoError, EncryptedBlob, SealedBox, NONCE_SIZE};
