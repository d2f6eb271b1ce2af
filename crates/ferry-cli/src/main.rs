//! FERRY CLI
//!
//! Chunked streaming file transfer over a push/pull channel

mod config;
mod progress;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use config::Config;
use ferry_core::{MismatchPolicy, Receiver, Sender};
use progress::{TransferProgress, format_bytes, format_duration, format_speed};

/// FERRY - chunked file transfer with per-chunk integrity digests
#[derive(Parser)]
#[command(name = "ferry")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path (default: <config dir>/ferry/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream a file to whichever receiver connects
    Send {
        /// File to send (default from config, then testfile.bin)
        file: Option<PathBuf>,
    },

    /// Receive one transfer from a sender
    Receive {
        /// Output file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Sender address
        #[arg(long)]
        connect: Option<SocketAddr>,

        /// What to do with a corrupt chunk: abort or skip
        #[arg(long)]
        on_mismatch: Option<MismatchPolicy>,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };

    // Validate configuration
    config.validate()?;

    // Initialize logging
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.to_lowercase()
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Send { file } => {
            let file = file.unwrap_or_else(|| config.transfer.source.clone());
            send_file(file, &config).await?;
        }
        Commands::Receive {
            output,
            connect,
            on_mismatch,
        } => {
            receive_file(output, connect, on_mismatch, &config).await?;
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}

/// Stream a file to the first receiver that connects
async fn send_file(file: PathBuf, config: &Config) -> anyhow::Result<()> {
    let sender_config = config.sender_config();
    let channel = config.channel_config()?;

    // Size is only for display; the sender reports stat failures itself
    let file_size = std::fs::metadata(&file).ok().map(|m| m.len());

    println!("File: {}", file.display());
    if let Some(size) = file_size {
        println!("Size: {}", format_bytes(size));
    }
    println!("Chunk size: {}", format_bytes(sender_config.chunk_size as u64));
    println!("Listening on: {}", channel.bind_addr);

    let progress = TransferProgress::new(file_size, &format!("Sending: {}", file.display()));
    let mut sender = Sender::new(sender_config)?.on_chunk(progress.observer());

    match sender.send_file(&file, &channel).await {
        Ok(stats) => {
            progress.finish_with_message(format!(
                "Sent {} in {} chunks ({}, {})",
                format_bytes(stats.bytes),
                stats.chunks,
                format_duration(stats.elapsed),
                format_speed(stats.throughput())
            ));
            Ok(())
        }
        Err(e) => {
            progress.abandon();
            Err(e).with_context(|| format!("sending {}", file.display()))
        }
    }
}

/// Receive one transfer into the output file
async fn receive_file(
    output: Option<PathBuf>,
    connect: Option<SocketAddr>,
    on_mismatch: Option<MismatchPolicy>,
    config: &Config,
) -> anyhow::Result<()> {
    let mut receiver_config = config.receiver_config()?;
    if let Some(path) = output {
        receiver_config.output_path = path;
    }
    if let Some(policy) = on_mismatch {
        receiver_config.mismatch_policy = policy;
    }

    let mut channel = config.channel_config()?;
    if let Some(addr) = connect {
        channel.connect_addr = addr;
    }

    println!("Output: {}", receiver_config.output_path.display());
    println!("Sender: {}", channel.connect_addr);
    println!("On mismatch: {}", receiver_config.mismatch_policy);

    let progress = TransferProgress::new(None, "Receiving");
    let mut receiver = Receiver::new(receiver_config)?.on_chunk(progress.observer());

    match receiver.receive_from(&channel).await {
        Ok(stats) => {
            progress.finish_with_message(format!(
                "Received {} in {} chunks ({})",
                format_bytes(stats.bytes),
                stats.chunks,
                format_duration(stats.elapsed)
            ));
            if stats.skipped > 0 {
                println!("Warning: {} corrupt chunk(s) were dropped", stats.skipped);
            }
            Ok(())
        }
        Err(e) => {
            progress.abandon();
            Err(e).with_context(|| format!("receiving into {}", receiver.output_path().display()))
        }
    }
}
