use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use parking_lot::Mutex;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

/// Size of an X25519 secret key in bytes
pub const SECRET_KEY_SIZE: usize = 32;
/// Size of an X25519 public key in bytes
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Errors that can occur while loading or generating keys
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    /// A persisted or shared secret has the wrong byte length. This is a
    ///  configuration error and is never retried.
    #[error("invalid key length, expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
    #[error("key decode error: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("entropy source failure: {0}")]
    Entropy(String),
    #[error("secret store error: {0}")]
    Store(#[from] anyhow::Error),
}

/// Public half of a stream identity
///
/// The base64 encoding of this key is the ledger key of the stream's record.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey([u8; PUBLIC_KEY_SIZE]);

impl From<[u8; PUBLIC_KEY_SIZE]> for PublicKey {
    fn from(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        PublicKey(bytes)
    }
}

impl TryFrom<&[u8]> for PublicKey {
    type Error = KeyError;
    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() != PUBLIC_KEY_SIZE {
            return Err(KeyError::InvalidKeyLength {
                expected: PUBLIC_KEY_SIZE,
                actual: bytes.len(),
            });
        }
        let mut buff = [0; PUBLIC_KEY_SIZE];
        buff.copy_from_slice(bytes);
        Ok(buff.into())
    }
}

impl PublicKey {
    /// Parse a public key from its base64 stream key form
    pub fn from_base64(encoded: &str) -> Result<Self, KeyError> {
        let bytes = STANDARD.decode(encoded)?;
        Self::try_from(bytes.as_slice())
    }

    /// Convert public key to raw bytes
    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.0
    }

    /// The ledger key under which this stream's record lives
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    pub(crate) fn to_x25519(self) -> X25519PublicKey {
        X25519PublicKey::from(self.0)
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base64())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_base64())
    }
}

/// Where a client keeps its own stream secret between runs
///
/// Implementations store the base64 encoded secret; the key pair is rebuilt
///  from it on every start.
pub trait SecretStore {
    fn load(&self) -> Result<Option<String>, KeyError>;
    fn save(&self, encoded_secret: &str) -> Result<(), KeyError>;
}

/// Secret store that lives only as long as the process
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    secret: Mutex<Option<String>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with a value, as if it had been persisted before
    pub fn with_secret(encoded_secret: impl Into<String>) -> Self {
        Self {
            secret: Mutex::new(Some(encoded_secret.into())),
        }
    }
}

impl SecretStore for MemorySecretStore {
    fn load(&self) -> Result<Option<String>, KeyError> {
        Ok(self.secret.lock().clone())
    }

    fn save(&self, encoded_secret: &str) -> Result<(), KeyError> {
        *self.secret.lock() = Some(encoded_secret.to_string());
        Ok(())
    }
}

/// An X25519 key pair identifying one stream
///
/// The pair is generated once per client and persisted. Anyone holding the
///  secret (the owner, or a viewer who opened the owner's share URL) can read
///  the stream's sealed mailbox.
#[derive(Clone)]
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

impl PartialEq for KeyPair {
    fn eq(&self, other: &Self) -> bool {
        self.public == other.public && self.secret.to_bytes() == other.secret.to_bytes()
    }
}

impl Eq for KeyPair {}

impl From<[u8; SECRET_KEY_SIZE]> for KeyPair {
    fn from(bytes: [u8; SECRET_KEY_SIZE]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey(X25519PublicKey::from(&secret).to_bytes());
        Self { secret, public }
    }
}

impl KeyPair {
    /// Generate a fresh key pair from the OS entropy source
    pub fn generate() -> Result<Self, KeyError> {
        let mut bytes = [0u8; SECRET_KEY_SIZE];
        getrandom::getrandom(&mut bytes).map_err(|e| KeyError::Entropy(e.to_string()))?;
        Ok(Self::from(bytes))
    }

    /// Rebuild a key pair from raw secret bytes
    ///
    /// # Errors
    ///
    /// Returns `InvalidKeyLength` if the slice is not exactly `SECRET_KEY_SIZE` bytes.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != SECRET_KEY_SIZE {
            return Err(KeyError::InvalidKeyLength {
                expected: SECRET_KEY_SIZE,
                actual: bytes.len(),
            });
        }
        let mut buff = [0u8; SECRET_KEY_SIZE];
        buff.copy_from_slice(bytes);
        Ok(Self::from(buff))
    }

    /// Rebuild a key pair from a base64 encoded secret
    pub fn from_base64(encoded: &str) -> Result<Self, KeyError> {
        let bytes = STANDARD.decode(encoded.trim())?;
        Self::from_secret_bytes(&bytes)
    }

    /// Load the persisted key pair, or generate and persist a new one
    ///
    /// A persisted secret of the wrong length fails with `InvalidKeyLength`
    ///  and is left untouched.
    pub fn load_or_create(store: &dyn SecretStore) -> Result<Self, KeyError> {
        if let Some(encoded) = store.load()? {
            return Self::from_base64(&encoded);
        }
        let pair = Self::generate()?;
        store.save(&pair.secret_to_base64())?;
        tracing::info!(stream_key = %pair.public, "generated new stream key pair");
        Ok(pair)
    }

    pub fn public(&self) -> PublicKey {
        self.public
    }

    /// The ledger key of this pair's stream record
    pub fn stream_key(&self) -> String {
        self.public.to_base64()
    }

    pub fn secret_to_base64(&self) -> String {
        STANDARD.encode(self.secret.to_bytes())
    }

    pub(crate) fn secret(&self) -> &StaticSecret {
        &self.secret
    }
}
