//! dgraph — CLI wrapper over the DecisionGraph engine.
//!
//! State lives entirely in the segmented WAL under `--data-dir`; every
//! command replays the segments into a chain, acts, and exits.
//!
//! Exit codes: 0 success, 2 schema error, 3 integrity error,
//! 4 unauthorized, 5 signature invalid, 1 anything else.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::info;

use dg_chain::{Chain, GenesisSpec};
use dg_core::DgError;
use dg_engine::{replay_wal, Engine};
use dg_wal::{SegmentedWal, WalReader};

#[derive(Parser, Debug)]
#[command(name = "dgraph", version, about = "DecisionGraph kernel CLI")]
struct Args {
    /// Directory holding the graph's WAL segments.
    #[arg(long, default_value = "./dgraph-data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mint a new graph: Genesis cell plus a fresh WAL.
    Init {
        #[arg(long, default_value = "DecisionGraph")]
        graph_name: String,
        #[arg(long, default_value = "corp")]
        root_namespace: String,
        /// Witness ids for the root namespace (comma-separated).
        #[arg(long, value_delimiter = ',')]
        witnesses: Vec<String>,
        /// Signature threshold for promotions.
        #[arg(long)]
        threshold: Option<usize>,
    },
    /// Process an RFA (JSON on stdin or from a file) and print a ProofPacket.
    Query {
        /// Path to the RFA JSON; "-" reads stdin.
        #[arg(long, default_value = "-")]
        rfa: String,
    },
    /// Append a sealed cell (JSON export format) to the chain.
    Append {
        /// Path to the cell JSON; "-" reads stdin.
        #[arg(long, default_value = "-")]
        cell: String,
    },
    /// Validate the whole chain and print a summary.
    Validate,
    /// Export the chain as JSON.
    Export,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".parse().expect("valid filter")),
        )
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => {}
        Err(err) => {
            eprintln!("{}", err.to_json());
            std::process::exit(err.exit_code());
        }
    }
}

fn run(args: &Args) -> Result<(), DgError> {
    match &args.command {
        Command::Init { graph_name, root_namespace, witnesses, threshold } => {
            init(&args.data_dir, graph_name, root_namespace, witnesses, *threshold)
        }
        Command::Query { rfa } => {
            let engine = open_engine(&args.data_dir)?;
            let rfa = read_json(rfa)?;
            let packet = engine.process_rfa(&rfa)?;
            println!("{}", serde_json::to_string_pretty(&packet).expect("packet serializes"));
            Ok(())
        }
        Command::Append { cell } => {
            let mut engine = open_engine(&args.data_dir)?;
            let value = read_json(cell)?;
            let cell = dg_core::DecisionCell::from_value(&value)?;
            let id = engine.append_cell(cell)?;
            println!("{id}");
            Ok(())
        }
        Command::Validate => {
            let engine = open_engine(&args.data_dir)?;
            let result = engine.chain().validate();
            println!("{}", result.summary());
            if result.is_valid {
                Ok(())
            } else {
                Err(DgError::IntegrityViolation(format!(
                    "{} error(s) found",
                    result.errors.len()
                )))
            }
        }
        Command::Export => {
            let engine = open_engine(&args.data_dir)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&engine.chain().to_json()).expect("chain serializes")
            );
            Ok(())
        }
    }
}

fn init(
    data_dir: &Path,
    graph_name: &str,
    root_namespace: &str,
    witnesses: &[String],
    threshold: Option<usize>,
) -> Result<(), DgError> {
    if data_dir.join("00000000.wal").exists() {
        return Err(DgError::GenesisViolation(format!(
            "graph already initialized in {}",
            data_dir.display()
        )));
    }
    let mut spec = GenesisSpec::new(graph_name, root_namespace);
    if !witnesses.is_empty() {
        let threshold = threshold.ok_or_else(|| {
            DgError::input_invalid("--threshold is required when --witnesses is given")
        })?;
        spec = spec.with_witness_set(witnesses.to_vec(), threshold);
    }

    let mut chain = Chain::new();
    chain.initialize(&spec)?;
    let graph_id = chain.graph_id().expect("initialized chain").to_string();
    let hash_scheme = chain.hash_scheme().expect("initialized chain").to_string();

    let wal = SegmentedWal::open(data_dir, &graph_id, &hash_scheme, None)?;
    let engine = Engine::new(chain).with_wal(wal)?;
    info!(graph_id, "graph initialized");
    println!("{}", engine.chain().genesis().expect("genesis exists").cell_id);
    Ok(())
}

/// Rebuild the engine from the WAL segments alone.
fn open_engine(data_dir: &Path) -> Result<Engine, DgError> {
    let (graph_id, hash_scheme) = graph_identity(data_dir)?;
    let wal = SegmentedWal::open(data_dir, &graph_id, &hash_scheme, None)?;
    let chain = replay_wal(&wal)?;
    Engine::new(chain).with_wal(wal)
}

/// Graph identity from the manifest cache, or from the first segment's
/// self-describing header when the manifest is missing or stale.
fn graph_identity(data_dir: &Path) -> Result<(String, String), DgError> {
    if let Ok(text) = std::fs::read_to_string(data_dir.join("manifest.json")) {
        if let Ok(manifest) = serde_json::from_str::<Value>(&text) {
            if let (Some(graph_id), Some(hash_scheme)) =
                (manifest["graph_id"].as_str(), manifest["hash_scheme"].as_str())
            {
                return Ok((graph_id.to_string(), hash_scheme.to_string()));
            }
        }
    }
    let scan = WalReader::scan(&data_dir.join("00000000.wal"), None)?;
    Ok((scan.header.graph_id, scan.header.hash_scheme))
}

fn read_json(source: &str) -> Result<Value, DgError> {
    let text = if source == "-" {
        use std::io::Read;
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .map_err(|e| DgError::Internal(format!("stdin read failed: {e}")))?;
        buf
    } else {
        std::fs::read_to_string(source)
            .map_err(|e| DgError::Internal(format!("cannot read {source}: {e}")))?
    };
    serde_json::from_str(&text)
        .map_err(|e| DgError::schema_invalid(format!("input is not valid JSON: {e}")))
}
