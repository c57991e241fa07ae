use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Value};
use uuid::Uuid;

use dg_canon::canonical_json_bytes;
use dg_core::{current_timestamp, DgError};
use dg_crypto::{sign_bytes, verify_signature};

/// ProofPacket schema version.
pub const PACKET_VERSION: &str = "1.0";

/// Wrap a proof bundle in a ProofPacket envelope.
pub(crate) fn build_proof_packet(graph_id: &str, proof_bundle: Value) -> Value {
    json!({
        "packet_version": PACKET_VERSION,
        "packet_id": Uuid::new_v4().to_string(),
        "generated_at": current_timestamp(),
        "graph_id": graph_id,
        "proof_bundle": proof_bundle,
        "signature": Value::Null,
    })
}

/// Sign a packet's proof bundle with Ed25519. The signature covers the
/// canonical JSON bytes of `proof_bundle` alone, so external verifiers can
/// reconstruct them without trusting the envelope.
pub fn sign_proof_packet(
    mut packet: Value,
    signing_key: &[u8],
    public_key: &[u8],
) -> Result<Value, DgError> {
    let canonical = canonical_json_bytes(&packet["proof_bundle"]);
    let signature = sign_bytes(signing_key, &canonical)?;
    packet["signature"] = json!({
        "algorithm": "Ed25519",
        "public_key": BASE64.encode(public_key),
        "signature": BASE64.encode(signature),
        "signed_at": current_timestamp(),
    });
    Ok(packet)
}

/// Externally verify a ProofPacket against the engine's public key.
///
/// Returns false for unsigned packets, undecodable signatures, or failed
/// verification — external verification never raises on untrusted input.
pub fn verify_proof_packet(packet: &Value, engine_public_key: &[u8]) -> bool {
    let signature_info = &packet["signature"];
    if signature_info.is_null() {
        return false;
    }
    let Some(signature_b64) = signature_info["signature"].as_str() else {
        return false;
    };
    let Ok(signature) = BASE64.decode(signature_b64) else {
        return false;
    };
    let canonical = canonical_json_bytes(&packet["proof_bundle"]);
    verify_signature(engine_public_key, &canonical, &signature).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dg_crypto::generate_keypair;

    fn packet() -> Value {
        build_proof_packet("graph:test-0000", json!({"results": {"fact_count": 1}}))
    }

    #[test]
    fn unsigned_packet_does_not_verify() {
        let (_, public) = generate_keypair();
        assert!(!verify_proof_packet(&packet(), &public));
    }

    #[test]
    fn signed_packet_verifies_round_trip() {
        let (private, public) = generate_keypair();
        let signed = sign_proof_packet(packet(), &private, &public).unwrap();
        assert!(verify_proof_packet(&signed, &public));
        assert_eq!(signed["signature"]["algorithm"], "Ed25519");
    }

    #[test]
    fn tampered_bundle_fails_verification() {
        let (private, public) = generate_keypair();
        let mut signed = sign_proof_packet(packet(), &private, &public).unwrap();
        signed["proof_bundle"]["results"]["fact_count"] = json!(2);
        assert!(!verify_proof_packet(&signed, &public));
    }

    #[test]
    fn wrong_key_fails_verification() {
        let (private, public) = generate_keypair();
        let (_, other_public) = generate_keypair();
        let signed = sign_proof_packet(packet(), &private, &public).unwrap();
        assert!(!verify_proof_packet(&signed, &other_public));
    }

    #[test]
    fn garbage_signature_returns_false_not_error() {
        let (_, public) = generate_keypair();
        let mut p = packet();
        p["signature"] = json!({"algorithm": "Ed25519", "signature": "!!!not-base64!!!"});
        assert!(!verify_proof_packet(&p, &public));
    }
}
