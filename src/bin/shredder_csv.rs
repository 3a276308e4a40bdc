//! shredder-csv: stream a JSON document into one CSV file per table
//!
//! Usage:
//!   # Read from stdin, write tables into the current directory
//!   cat songs.json | shredder-csv
//!
//!   # Read from a file, write tables into ./out
//!   shredder-csv songs.json --output-dir ./out
//!
//!   # Tune the null sentinel and resource limits
//!   shredder-csv songs.json --null '\N' --max-tables 64

// Use MiMalloc allocator for better performance
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use shredder::{to_csvs, DirectorySinkFactory, ShredConfig};
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;

/// Size of the chunks read from the input
const INPUT_CHUNK_SIZE: usize = 65536;

#[derive(Parser, Debug)]
#[command(name = "shredder-csv")]
#[command(about = "Stream nested JSON into flat relational CSV tables", long_about = None)]
struct Args {
    /// Input file (use stdin if omitted)
    #[arg(value_name = "FILE")]
    input: Option<String>,

    /// Directory receiving one <table>.csv file per output table
    #[arg(long, short = 'o', default_value = ".")]
    output_dir: String,

    /// Token written in place of JSON null values
    #[arg(long, default_value = "#NA")]
    null: String,

    /// Output buffer chunk size in bytes
    #[arg(long, default_value_t = 65536)]
    chunk_size: usize,

    /// Seconds to wait when handing a row to a table writer
    #[arg(long, default_value_t = 5)]
    timeout: u64,

    /// Maximum number of concurrently open tables
    #[arg(long, default_value_t = 1024)]
    max_tables: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = ShredConfig {
        null_sentinel: args.null,
        output_chunk_size: args.chunk_size,
        handoff_timeout: Duration::from_secs(args.timeout),
        max_tables: args.max_tables,
    };

    tokio::fs::create_dir_all(&args.output_dir)
        .await
        .context("Failed to create output directory")?;

    let reader: Box<dyn AsyncRead + Unpin + Send> = match &args.input {
        Some(path) => Box::new(
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open {path}"))?,
        ),
        None => Box::new(tokio::io::stdin()),
    };
    let source = ReaderStream::with_capacity(reader, INPUT_CHUNK_SIZE);

    to_csvs(
        source,
        DirectorySinkFactory::new(args.output_dir.as_str()),
        config,
    )
    .await
    .context("Conversion failed")?;
    Ok(())
}
