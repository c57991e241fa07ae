//! dg-engine
//!
//! The validated entry point to a DecisionGraph.
//!
//! External callers hand the Engine a Request-For-Access; it canonicalizes,
//! validates, queries the Scholar and answers with a signed-or-unsigned
//! ProofPacket. Writes arrive as promotion submissions, witness signatures
//! and finalizations, each strictly validated before the chain moves.
//! Simulations run the same pipeline against a forked shadow chain and can
//! never touch the base.
//!
//! The Engine owns the only mutable maps in the kernel (active promotions
//! and their expected policy heads); they die with the Engine.

pub mod engine;
pub mod packet;
pub mod rfa;

pub use engine::{replay_wal, Engine};
pub use packet::{sign_proof_packet, verify_proof_packet, PACKET_VERSION};
pub use rfa::{canonicalize_rfa, validate_rfa_fields, validate_rfa_schema};
