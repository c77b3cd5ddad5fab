//! poe - proof-of-existence claim tools
//!
//! ## Usage
//!
//! ```bash
//! # Print a file's content digest
//! poe digest ./contract.pdf
//!
//! # Walk a claim through create, transfer, purchase and revoke
//! # against an in-memory chain
//! poe simulate ./contract.pdf --owner alice --viewer bob --price 50
//!
//! # Same, with engine debug logs on stderr and JSONL files in ./logs
//! poe -vv --log-dir ./logs simulate ./contract.pdf
//! ```

mod display;
mod simulate;

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use poe_core::{ClaimSchema, digest_reader};
use poe_logging::{LogConfig, PoeSubscriberBuilder};

use simulate::SimulateArgs;

/// Proof-of-existence claim tools
#[derive(Parser)]
#[command(name = "poe")]
#[command(about = "Compute file digests and run claim lifecycles")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// More claim-sync logging on stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Also write rotated JSONL logs to this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the content digest of a file
    Digest {
        /// Files to hash
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Run a scripted claim lifecycle against an in-memory chain
    Simulate {
        /// File whose digest is claimed
        file: PathBuf,
        /// Account that creates the claim
        #[arg(long, default_value = "alice")]
        owner: String,
        /// Account the claim is transferred to
        #[arg(long, default_value = "bob")]
        viewer: String,
        /// Note stored with the claim
        #[arg(long)]
        note: Option<String>,
        /// Asking price; enables the purchase step
        #[arg(long)]
        price: Option<u128>,
        /// Ledger storage layout
        #[arg(long, value_enum)]
        schema: Option<SchemaArg>,
        /// Sync configuration as JSON
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SchemaArg {
    OwnerBlock,
    OwnerBlockNote,
    ProofInfo,
}

impl From<SchemaArg> for ClaimSchema {
    fn from(arg: SchemaArg) -> Self {
        match arg {
            SchemaArg::OwnerBlock => ClaimSchema::OwnerBlock,
            SchemaArg::OwnerBlockNote => ClaimSchema::OwnerBlockNote,
            SchemaArg::ProofInfo => ClaimSchema::ProofInfo,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::cli(cli.verbose);
    if let Some(dir) = &cli.log_dir {
        log_config = log_config.with_file_output(dir);
    }
    let _log_guard = PoeSubscriberBuilder::new()
        .with_config(log_config)
        .init()
        .context("initialising logging")?;

    match cli.command {
        Commands::Digest { files } => {
            for path in files {
                let file = File::open(&path)
                    .with_context(|| format!("opening {}", path.display()))?;
                let digest = digest_reader(BufReader::new(file))
                    .with_context(|| format!("reading {}", path.display()))?;
                display::digest_line(&path.display().to_string(), &digest);
            }
        }
        Commands::Simulate {
            file,
            owner,
            viewer,
            note,
            price,
            schema,
            config,
        } => {
            let args = SimulateArgs {
                file,
                owner: owner.into(),
                viewer: viewer.into(),
                note,
                price,
                schema: schema.map(ClaimSchema::from),
                config,
            };
            simulate::run(args).await?;
        }
    }

    Ok(())
}
