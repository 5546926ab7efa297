//! fmd CLI
//!
//! Command-line tools for working with the fmd device protocol.
//!
//! # Commands
//!
//! - `sign` - Build a signed `Authorization` header for a message
//! - `verify` - Check a header against a message and secret
//! - `sanitize` - Show what the server would queue for an operator body

mod commands;

use clap::{Args, Parser, Subcommand};
use fmd_server::ServerConfig;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// fmd protocol tools.
#[derive(Parser)]
#[command(name = "fmd")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Where a message was (or will be) sent.
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Request method
    #[arg(short, long, default_value = "POST")]
    pub method: String,

    /// Request path, including any query string
    #[arg(long)]
    pub path: String,

    /// Host name, optionally with `:port`
    #[arg(long)]
    pub host: String,

    /// Port used when the host carries none
    #[arg(long, default_value = "443")]
    pub port: u16,
}

/// Message body, inline or from a file.
#[derive(Args, Debug, Clone)]
pub struct BodyArgs {
    /// Body text
    #[arg(short, long, conflicts_with = "body_file")]
    pub body: Option<String>,

    /// Read the body from this file
    #[arg(long)]
    pub body_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a signed Authorization header
    Sign {
        #[command(flatten)]
        target: TargetArgs,

        #[command(flatten)]
        body: BodyArgs,

        /// Device id
        #[arg(long)]
        id: String,

        /// Shared secret
        #[arg(short, long)]
        secret: String,

        /// Extension data
        #[arg(long, default_value = "")]
        ext: String,
    },

    /// Verify an Authorization header
    Verify {
        #[command(flatten)]
        target: TargetArgs,

        #[command(flatten)]
        body: BodyArgs,

        /// Header value to check
        #[arg(long)]
        header: String,

        /// Shared secret
        #[arg(short, long)]
        secret: String,

        /// Reject timestamps more than this many seconds away
        #[arg(long)]
        max_skew: Option<u64>,
    },

    /// Sanitize an operator queue body
    Sanitize {
        #[command(flatten)]
        body: BodyArgs,

        /// Largest lock code
        #[arg(long)]
        lock_code_max: Option<u64>,

        /// Longest ring duration
        #[arg(long)]
        ring_max: Option<u64>,

        /// Longest track duration
        #[arg(long)]
        track_max: Option<u64>,

        /// Codes the device accepts
        #[arg(short, long)]
        accepts: Option<String>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Sign {
            target,
            body,
            id,
            secret,
            ext,
        } => {
            commands::sign::run(&target, &body, &id, &secret, &ext)?;
        }
        Commands::Verify {
            target,
            body,
            header,
            secret,
            max_skew,
        } => {
            commands::verify::run(&target, &body, &header, &secret, max_skew)?;
        }
        Commands::Sanitize {
            body,
            lock_code_max,
            ring_max,
            track_max,
            accepts,
        } => {
            let mut config = ServerConfig::default();
            if let Some(max) = lock_code_max {
                config = config.with_lock_code_max(max);
            }
            if let Some(max) = ring_max {
                config = config.with_ring_max(max);
            }
            if let Some(max) = track_max {
                config = config.with_track_max(max);
            }
            if let Some(codes) = accepts {
                config = config.with_default_accepts(codes);
            }
            commands::sanitize::run(&body, &config)?;
        }
        Commands::Version => {
            println!("fmd CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Default accepted commands: {}", ServerConfig::default().default_accepts);
        }
    }

    Ok(())
}
