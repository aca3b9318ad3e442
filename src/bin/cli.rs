//! Tabula CLI
//!
//! Maintenance commands for a Tabula store directory.

use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tabula::key::{parse_hex, Hex};
use tabula::{Config, Query, ReadContext, Storage};
use tracing_subscriber::{fmt, EnvFilter};

/// Tabula CLI
#[derive(Parser, Debug)]
#[command(name = "tabula-cli")]
#[command(about = "Maintenance tool for Tabula stores")]
#[command(version)]
struct Args {
    /// Store directory
    #[arg(short, long, default_value = "./tabula_data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show on-disk size and record counts per entity
    Stat,

    /// Write all records (or one entity's) to a dump file
    Dump {
        /// Output file
        output: PathBuf,

        /// Only dump this entity
        #[arg(short, long)]
        entity: Option<u32>,
    },

    /// Load a dump file into the store
    Restore {
        /// Dump file to load
        input: PathBuf,
    },

    /// Compact the store by rewriting its live records
    Vacuum,

    /// Print the raw value under a hex-encoded key
    Get {
        /// Key as hex, e.g. 0101
        key: String,
    },
}

fn main() -> ExitCode {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tabula=debug"));
    fmt().with_env_filter(filter).with_target(true).init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> tabula::Result<()> {
    let config = Config::builder().data_dir(&args.data_dir).build();
    let store = Storage::open(config)?;

    match args.command {
        Commands::Stat => {
            let mut per_entity: BTreeMap<u32, u64> = BTreeMap::new();
            let mut all = Query::with_filter(Vec::new());
            store.fetch(&mut all, |record| {
                *per_entity.entry(record.entity()?).or_default() += 1;
                Ok(ControlFlow::Continue(()))
            })?;

            println!("dir:     {}", store.dir().display());
            println!("size:    {} bytes", store.size()?);
            println!("records: {}", all.num_rows);
            for (entity, count) in per_entity {
                println!("  entity {:>10}: {}", entity, count);
            }
        }
        Commands::Dump { output, entity } => {
            let query = entity.map(Query::new);
            let count = store.dump(&output, query.as_ref())?;
            println!("{} records written to {}", count, output.display());
        }
        Commands::Restore { input } => {
            let count = store.restore(&input)?;
            println!("{} records restored from {}", count, input.display());
        }
        Commands::Vacuum => {
            let before = store.size()?;
            store.vacuum()?;
            println!("{} -> {} bytes", before, store.size()?);
        }
        Commands::Get { key } => {
            let key = parse_hex(&key)?;
            match store.get(&key)? {
                Some(value) => println!("{}", Hex(&value)),
                None => println!("(not found)"),
            }
        }
    }

    store.close()
}
