//! dg-chain
//!
//! The append-only ledger: Genesis creation and the Chain of cells.
//!
//! A chain is a totally ordered sequence of [`DecisionCell`]s linked by
//! `prev_cell_hash`. Appending validates identity, linkage, temporal order
//! and graph constitution; nothing is ever deleted or rewritten. Cells are
//! held behind `Arc` so forking a simulation chain shares the base cells
//! instead of copying them.

pub mod chain;
pub mod genesis;

pub use chain::{Chain, ValidationResult};
pub use genesis::{
    create_genesis_cell, generate_graph_id, parse_genesis_config, verify_genesis, GenesisConfig,
    GenesisSpec, WitnessConfig, GENESIS_RULE_BODY, GENESIS_RULE_HASH, GENESIS_RULE_ID,
};
