//! dg-crypto
//!
//! Ed25519 signing primitives (RFC 8032).
//!
//! The contract mirrors how the rest of the kernel treats verification:
//! a signature that fails to verify is normal control flow and returns
//! `false`; malformed keys or signatures (wrong length, off-curve point)
//! are caller errors and raise `DgError::SignatureInvalid`. Length checks
//! run before any cryptographic call so error messages name the actual
//! problem.

pub mod keypair;
pub mod signing;

pub use keypair::KeyPair;
pub use signing::{generate_keypair, sign_bytes, verify_signature, SIGNATURE_LENGTH, KEY_LENGTH};
