use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use dg_core::DgError;

/// Ed25519 keys are 32-byte seeds / compressed points.
pub const KEY_LENGTH: usize = 32;

/// Ed25519 signatures are 64 bytes.
pub const SIGNATURE_LENGTH: usize = 64;

/// Sign `data` with a 32-byte Ed25519 private key seed.
///
/// Ed25519 is deterministic: the same key and data always produce the same
/// 64-byte signature, which the promotion tests rely on.
pub fn sign_bytes(private_key: &[u8], data: &[u8]) -> Result<[u8; SIGNATURE_LENGTH], DgError> {
    let seed: &[u8; KEY_LENGTH] = private_key.try_into().map_err(|_| {
        DgError::signature_invalid(format!(
            "private key must be exactly {KEY_LENGTH} bytes, got {}",
            private_key.len()
        ))
    })?;
    let key = SigningKey::from_bytes(seed);
    Ok(key.sign(data).to_bytes())
}

/// Verify an Ed25519 signature.
///
/// Returns `Ok(false)` when the signature does not match — that is expected
/// control flow, not an error. Only malformed inputs (wrong key or signature
/// length, non-canonical point encoding) produce `Err`.
pub fn verify_signature(public_key: &[u8], data: &[u8], signature: &[u8]) -> Result<bool, DgError> {
    let pk_bytes: &[u8; KEY_LENGTH] = public_key.try_into().map_err(|_| {
        DgError::signature_invalid(format!(
            "public key must be exactly {KEY_LENGTH} bytes, got {}",
            public_key.len()
        ))
    })?;
    let sig_bytes: &[u8; SIGNATURE_LENGTH] = signature.try_into().map_err(|_| {
        DgError::signature_invalid(format!(
            "signature must be exactly {SIGNATURE_LENGTH} bytes, got {}",
            signature.len()
        ))
    })?;
    let key = VerifyingKey::from_bytes(pk_bytes)
        .map_err(|e| DgError::signature_invalid(format!("invalid public key encoding: {e}")))?;
    let sig = Signature::from_bytes(sig_bytes);
    Ok(key.verify(data, &sig).is_ok())
}

/// Generate a fresh Ed25519 keypair: (private seed, public key).
pub fn generate_keypair() -> ([u8; KEY_LENGTH], [u8; KEY_LENGTH]) {
    let mut csprng = rand::rngs::OsRng;
    let signing_key = SigningKey::generate(&mut csprng);
    (signing_key.to_bytes(), signing_key.verifying_key().to_bytes())
}
