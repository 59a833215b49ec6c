//! Device identity: X25519 keypair, the public ID friends store, and the
//! MAC-like device address fed to the initiator rule.

use std::fs;
use std::io;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

/// Device public key (32 bytes, X25519). This is the ID other devices keep as a friend.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct PublicKey(pub [u8; 32]);

impl PublicKey {
    /// Six bytes of SHA-256(public key) as `XX:XX:XX:XX:XX:XX`.
    pub fn device_address(&self) -> String {
        let digest = Sha256::digest(self.0);
        digest[..6]
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(":")
    }
}

/// X25519 keypair. Keep secret key private; expose only public key and address.
pub struct Keypair {
    secret: StaticSecret,
    public: PublicKey,
}

impl Keypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        Self::from_secret(StaticSecret::random_from_rng(OsRng))
    }

    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        Self::from_secret(StaticSecret::from(bytes))
    }

    fn from_secret(secret: StaticSecret) -> Self {
        let public = PublicKey(X25519PublicKey::from(&secret).to_bytes());
        Self { secret, public }
    }

    /// Load the secret at `path`, or generate one and write it there.
    pub fn load_or_create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let raw = fs::read(path)?;
            let bytes: [u8; 32] = raw.try_into().map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidData, "identity file is not 32 bytes")
            })?;
            return Ok(Self::from_secret_bytes(bytes));
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let kp = Self::generate();
        fs::write(path, kp.secret.to_bytes())?;
        tracing::info!(path = %path.display(), address = %kp.device_address(), "generated device identity");
        Ok(kp)
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Bytes other devices store as this device's friend ID.
    pub fn friend_id(&self) -> Vec<u8> {
        self.public.0.to_vec()
    }

    /// Friend ID in the text form the friend store keeps, for sharing out of band.
    pub fn friend_code(&self) -> String {
        STANDARD.encode(self.friend_id())
    }

    pub fn device_address(&self) -> String {
        self.public.device_address()
    }
}
