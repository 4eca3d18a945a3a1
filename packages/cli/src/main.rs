//! `solticket` — drive a Solticket wallet session from the command line.
//!
//! Stands in for the app's screens: it owns one [`SessionManager`], runs a
//! connect → (sign and submit)* → disconnect sequence against the in-process
//! wallet, and prints the result as JSON.
//!
//! - **`connect`** — authorize, print the connected identity, disconnect.
//! - **`sign`** — authorize, sign and submit each payload in order, print
//!   the signatures, disconnect.
//!
//! # Environment variables
//!
//! Session settings come from [`SessionConfig::from_env`]; `--cluster` and
//! `--contention` override the matching variables. `RUST_LOG` controls log
//! output, which goes to stderr.

use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use solticket_session::api::Cluster;
use solticket_session::{
    ContentionPolicy, MemoryWallet, PublicIdentity, SessionConfig, SessionError, SessionManager,
    SessionSnapshot, Signature,
};
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamExt;
use tracing::{debug, info};

/// solticket — wallet session CLI
///
/// Connect to a wallet, sign and submit transactions, disconnect.
#[derive(Parser)]
#[command(name = "solticket", version, about, long_about = None)]
struct Cli {
    /// Cluster to authorize for: devnet | testnet | mainnet-beta.
    #[arg(long, global = true, value_name = "CLUSTER")]
    cluster: Option<Cluster>,

    /// What to do with overlapping operations: queue | reject.
    #[arg(long, global = true, value_name = "POLICY")]
    contention: Option<ContentionPolicy>,

    /// Hex-encoded 32-byte seed for the in-process wallet key. A fresh key
    /// is generated when absent.
    #[arg(long, global = true, env = "SOLTICKET_WALLET_SEED", value_name = "HEX")]
    wallet_seed: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Connect to the wallet and print the authorized identity.
    Connect,

    /// Sign and submit one or more transactions.
    ///
    /// Payloads are opaque: they are hex-decoded and handed to the wallet
    /// unchanged. Signing stops at the first failure; nothing is retried.
    ///
    /// Example:
    ///   solticket sign --payload 00010203 --payload deadbeef
    Sign {
        /// A hex-encoded transaction. Repeat for multiple transactions.
        #[arg(long = "payload", value_name = "HEX", required = true)]
        payloads: Vec<String>,
    },
}

/// JSON printed on success.
#[derive(Serialize)]
struct SessionOutput {
    identity: PublicIdentity,
    display: String,
    cluster: Cluster,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    signatures: Vec<Signature>,
    deauthorized: bool,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "solticket=info,solticket_session=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = SessionConfig::from_env();
    if let Some(cluster) = cli.cluster {
        config.cluster = cluster;
    }
    if let Some(policy) = cli.contention {
        config.contention = policy;
    }

    let wallet = match &cli.wallet_seed {
        Some(hex_seed) => MemoryWallet::from_seed(config.cluster, &parse_seed(hex_seed)),
        None => MemoryWallet::new(config.cluster),
    };
    let cluster = config.cluster;
    let manager = SessionManager::new(Arc::new(wallet), config);

    let watcher = tokio::spawn(log_transitions(manager.changes()));

    let result = match cli.command {
        Command::Connect => run(&manager, cluster, Vec::new()).await,
        Command::Sign { payloads } => {
            let decoded = payloads
                .iter()
                .map(|p| {
                    hex::decode(p.trim_start_matches("0x"))
                        .unwrap_or_else(|e| fatal(&format!("invalid --payload {p:?}: {e}")))
                })
                .collect();
            run(&manager, cluster, decoded).await
        }
    };

    // Dropping the manager ends the stream once its last change is logged.
    drop(manager);
    let _ = watcher.await;

    match result {
        Ok(output) => {
            let json = serde_json::to_string_pretty(&output)
                .unwrap_or_else(|e| fatal(&format!("failed to encode output: {e}")));
            println!("{json}");
        }
        Err(e) => fatal(&e.to_string()),
    }
}

/// Connect, sign each payload, and always disconnect before returning.
async fn run(
    manager: &SessionManager,
    cluster: Cluster,
    payloads: Vec<Vec<u8>>,
) -> Result<SessionOutput, SessionError> {
    let identity = manager.connect().await?;

    let mut signatures = Vec::with_capacity(payloads.len());
    let mut failure = None;
    for payload in payloads {
        match manager.sign_and_submit(payload).await {
            Ok(sig) => signatures.push(sig),
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }

    let report = manager.disconnect().await;
    if let Some(e) = failure {
        return Err(e);
    }

    Ok(SessionOutput {
        identity,
        display: identity.short(4),
        cluster,
        signatures,
        deauthorized: report.deauthorized,
    })
}

/// Log session transitions the way a screen would react to them.
async fn log_transitions(mut changes: WatchStream<SessionSnapshot>) {
    let mut was_connected = false;
    while let Some(snapshot) = changes.next().await {
        if snapshot.connected() != was_connected {
            was_connected = snapshot.connected();
            match snapshot.identity {
                Some(id) => info!(identity = %id.short(4), "session connected"),
                None => info!("session disconnected"),
            }
        }
        debug!(busy = snapshot.busy, "session state changed");
    }
}

fn parse_seed(hex_seed: &str) -> [u8; 32] {
    let bytes = hex::decode(hex_seed.trim())
        .unwrap_or_else(|e| fatal(&format!("invalid wallet seed: {e}")));
    bytes
        .try_into()
        .unwrap_or_else(|b: Vec<u8>| fatal(&format!("wallet seed must be 32 bytes, got {}", b.len())))
}

/// Print an error message to stderr and exit with code 2.
fn fatal(msg: &str) -> ! {
    eprintln!("solticket: {}", msg);
    process::exit(2);
}
