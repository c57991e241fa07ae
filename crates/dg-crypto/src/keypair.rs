use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::signing::{generate_keypair, sign_bytes, KEY_LENGTH, SIGNATURE_LENGTH};
use dg_core::DgError;

/// An Ed25519 keypair with the secret seed wiped from memory on drop.
///
/// Intended for witnesses and engine packet signing in tests and tooling;
/// production keys live outside the kernel.
#[derive(Serialize, Deserialize)]
pub struct KeyPair {
    public_key: [u8; KEY_LENGTH],
    secret_key: Vec<u8>,
}

impl KeyPair {
    pub fn generate() -> Self {
        let (private, public) = generate_keypair();
        Self { public_key: public, secret_key: private.to_vec() }
    }

    /// Restore from raw bytes (e.g. loaded from a key file).
    pub fn from_raw(secret: Vec<u8>, public: [u8; KEY_LENGTH]) -> Self {
        Self { public_key: public, secret_key: secret }
    }

    pub fn public_key(&self) -> &[u8; KEY_LENGTH] {
        &self.public_key
    }

    pub fn secret_key_bytes(&self) -> &[u8] {
        &self.secret_key
    }

    pub fn sign(&self, message: &[u8]) -> Result<[u8; SIGNATURE_LENGTH], DgError> {
        sign_bytes(&self.secret_key, message)
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key)
    }
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        self.secret_key.zeroize();
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyPair {{ public_key: {} }}", &self.public_key_hex()[..16])
    }
}
