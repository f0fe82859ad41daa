//! GCL CLI
//!
//! Command-line tools for GCL logs.
//!
//! # Commands
//!
//! - `create` - Create a log with optional metadata
//! - `append` - Append records to a log
//! - `read` - Print records by number
//! - `tail` - Print the end of a log
//! - `inspect` - Display log header, metadata and statistics
//! - `serve` - Run a log server
//!
//! With `--server <addr>`, create, append, read and tail go to a running
//! log server instead of the files under `--dir`.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// GCL command-line log tools.
#[derive(Parser)]
#[command(name = "gcl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding log files
    #[arg(global = true, short, long, default_value = "gcls")]
    dir: PathBuf,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    /// Log server address; create, append, read and tail go there instead of --dir
    #[arg(global = true, long)]
    server: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new log
    Create {
        /// Log name
        name: String,

        /// Metadata entry as id=value (id: xid, nonce, ctime, pubkey or a number)
        #[arg(short, long)]
        meta: Vec<String>,
    },

    /// Append records to a log, one per argument
    Append {
        /// Log name
        name: String,

        /// Record payloads
        #[arg(required = true)]
        records: Vec<String>,
    },

    /// Print records starting at a record number
    Read {
        /// Log name
        name: String,

        /// First record number
        recno: u64,

        /// Number of records (0 reads to the end)
        #[arg(short, long, default_value = "1")]
        count: u64,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print the last records of a log
    Tail {
        /// Log name
        name: String,

        /// Start from this record number instead of the last few
        #[arg(short, long)]
        from: Option<u64>,

        /// Number of records when --from is not given
        #[arg(short = 'n', long, default_value = "10")]
        lines: u64,

        /// Output format (text, json)
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Display log header, metadata and statistics
    Inspect {
        /// Log name
        name: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Run a log server
    Serve {
        /// TOML parameter file with gcl.* keys
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Address to listen on, overriding the parameter file
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let result = match (cli.command, cli.server.as_deref()) {
        (Commands::Create { name, meta }, Some(addr)) => commands::remote::create(addr, &name, &meta),
        (Commands::Create { name, meta }, None) => commands::create::run(&cli.dir, &name, &meta),
        (Commands::Append { name, records }, Some(addr)) => {
            commands::remote::append(addr, &name, &records)
        }
        (Commands::Append { name, records }, None) => commands::append::run(&cli.dir, &name, &records),
        (
            Commands::Read {
                name,
                recno,
                count,
                format,
            },
            server,
        ) => match server {
            Some(addr) => commands::remote::read(addr, &name, recno, count, &format),
            None => commands::read::run(&cli.dir, &name, recno, count, &format),
        },
        (
            Commands::Tail {
                name,
                from,
                lines,
                format,
            },
            server,
        ) => match server {
            Some(addr) => commands::remote::tail(addr, &name, from, lines, &format),
            None => commands::tail::run(&cli.dir, &name, from, lines, &format),
        },
        (Commands::Inspect { name, format }, _) => commands::inspect::run(&cli.dir, &name, &format),
        (Commands::Serve { config, bind }, _) => {
            commands::serve::run(&cli.dir, config.as_deref(), bind.as_deref())
        }
        (Commands::Version, _) => {
            println!("GCL CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("GCL log format v{}", gcl_core::LOG_FORMAT_VERSION);
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "command failed");
    }
    result
}
