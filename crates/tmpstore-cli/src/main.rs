//! tmpstore CLI: drive a storage handler from the command line.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use clap::{Args, Parser, Subcommand};
use tmpstore_core::{StorageConfig, StorageKey};
use tmpstore_handler::{StorageHandler, ThreadScheduler};
use tracing::info;
use tracing_subscriber::EnvFilter;

type CliResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Writes go through the stream in chunks of this size.
const CHUNK: usize = 128;

#[derive(Parser)]
#[command(name = "tmpstore")]
#[command(about = "Ephemeral byte storage tiered between a memory budget and spill files", long_about = None)]
struct Cli {
    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Commands,
}

/// Overrides applied on top of `TMPSTORE_*` environment configuration.
#[derive(Args)]
struct Overrides {
    /// Spill directory
    #[arg(long, global = true)]
    directory: Option<PathBuf>,

    /// Memory cap of one entry in bytes
    #[arg(long, global = true)]
    max_bytes_per_entry: Option<usize>,

    /// Memory cap across all entries in bytes
    #[arg(long, global = true)]
    max_bytes_total: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write random content to one entry, read it back and compare checksums
    Process {
        /// Content length in bytes
        #[arg(short, long, default_value = "4096")]
        length: usize,
    },

    /// Run many entries through write/read/dispose concurrently
    Concurrent {
        #[arg(short, long, default_value = "200")]
        workers: usize,

        /// Content length per entry in bytes
        #[arg(short, long, default_value = "2148")]
        length: usize,

        /// Read-backs per entry
        #[arg(short, long, default_value = "5")]
        reads: usize,
    },

    /// Print the effective configuration as JSON
    Config,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = effective_config(&cli.overrides);

    let outcome = match cli.command {
        Commands::Process { length } => process(config, length),
        Commands::Concurrent {
            workers,
            length,
            reads,
        } => concurrent(config, workers, length, reads),
        Commands::Config => print_config(&config),
    };
    if let Err(e) = outcome {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn effective_config(overrides: &Overrides) -> StorageConfig {
    let mut config = StorageConfig::from_env();
    if let Some(dir) = &overrides.directory {
        config.directory = dir.clone();
    }
    if let Some(max) = overrides.max_bytes_per_entry {
        config.max_bytes_per_entry = max;
    }
    if let Some(max) = overrides.max_bytes_total {
        config.max_bytes_total = max;
    }
    config
}

fn print_config(config: &StorageConfig) -> CliResult<()> {
    config.validate()?;
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

fn start_handler(config: StorageConfig) -> CliResult<StorageHandler> {
    let handler = StorageHandler::new(config, Arc::new(ThreadScheduler::new()))?;
    handler.start()?;
    Ok(handler)
}

/// Pseudo-random bytes derived from `seed`.
fn content(seed: u64, len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    let mut hasher = blake3::Hasher::new();
    hasher.update(&seed.to_le_bytes());
    hasher.finalize_xof().fill(&mut out);
    out
}

fn write_entry(handler: &StorageHandler, key: StorageKey, data: &[u8]) -> CliResult<()> {
    let mut out = handler.open_output_stream_with_length(key, 1)?;
    for chunk in data.chunks(CHUNK) {
        out.write_all(chunk)?;
    }
    out.close()?;
    Ok(())
}

fn read_checksum(handler: &StorageHandler, key: StorageKey) -> CliResult<(blake3::Hash, u64)> {
    let mut input = handler.open_input_stream(key)?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = [0u8; CHUNK];
    let mut total = 0u64;
    loop {
        let n = input.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    input.close()?;
    Ok((hasher.finalize(), total))
}

fn round_trip(handler: &StorageHandler, seed: u64, length: usize, reads: usize) -> CliResult<StorageKey> {
    let data = content(seed, length);
    let expected = blake3::hash(&data);

    let key = handler.create()?;
    write_entry(handler, key, &data)?;
    for _ in 0..reads {
        let (actual, total) = read_checksum(handler, key)?;
        if actual != expected || total != length as u64 {
            return Err(format!(
                "content mismatch on {key}: wrote {length} bytes ({}), read {total} bytes ({})",
                expected.to_hex(),
                actual.to_hex()
            )
            .into());
        }
    }
    Ok(key)
}

fn process(config: StorageConfig, length: usize) -> CliResult<()> {
    let handler = start_handler(config)?;
    let key = round_trip(&handler, 0, length, 1)?;

    let info = handler.inspect(key)?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    handler.dispose_and_remove(key)?;
    handler.stop()?;

    println!("✓ Round trip of {} bytes matched", length);
    Ok(())
}

fn concurrent(config: StorageConfig, workers: usize, length: usize, reads: usize) -> CliResult<()> {
    let handler = Arc::new(start_handler(config)?);

    let spawned: Vec<_> = (0..workers)
        .map(|i| {
            let handler = Arc::clone(&handler);
            thread::spawn(move || -> CliResult<()> {
                let key = round_trip(&handler, i as u64, length, reads)?;
                handler.dispose(key)?;
                Ok(())
            })
        })
        .collect();

    let mut failed = 0usize;
    for worker in spawned {
        match worker.join() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                eprintln!("worker failed: {}", e);
                failed += 1;
            }
            Err(_) => {
                eprintln!("worker panicked");
                failed += 1;
            }
        }
    }

    let stats = handler.stats()?;
    info!(?stats, "concurrent run finished");
    println!("{}", serde_json::to_string_pretty(&stats)?);
    let cleared = handler.clear_disposed()?;
    handler.stop()?;

    if failed > 0 {
        return Err(format!("{failed} of {workers} workers failed").into());
    }
    println!("✓ {} workers matched checksums, {} entries cleared", workers, cleared);
    Ok(())
}
