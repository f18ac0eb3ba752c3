//! shadowtx CLI
//!
//! Drives transactions against a file-backed store from the shell. Every
//! invocation is a separate process; transactions persist in the store
//! between invocations and are addressed by id.
//!
//! # Commands
//!
//! - `start` - Start a transaction and print its id
//! - `insert` / `update` / `delete` - Stage writes in a transaction
//! - `find` / `get` - Read, inside a transaction or committed state
//! - `commit` / `rollback` - End a transaction
//! - `recover` - Finish or discard interrupted transactions
//! - `inspect` - Show transactions, locks and collections

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// shadowtx command-line transaction tools.
#[derive(Parser)]
#[command(name = "shadowtx")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    /// Output format (text, json)
    #[arg(global = true, short, long, default_value = "text")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a transaction and print its id
    Start,

    /// Stage new documents; each is a JSON object with a string `_id`
    Insert {
        /// Transaction id
        #[arg(short, long)]
        tx: String,
        /// Collection name
        collection: String,
        /// Documents as JSON objects
        #[arg(required = true)]
        documents: Vec<String>,
    },

    /// Stage replacement documents; each is a JSON object with a string `_id`
    Update {
        /// Transaction id
        #[arg(short, long)]
        tx: String,
        /// Collection name
        collection: String,
        /// Documents as JSON objects
        #[arg(required = true)]
        documents: Vec<String>,
    },

    /// Stage deletions
    Delete {
        /// Transaction id
        #[arg(short, long)]
        tx: String,
        /// Collection name
        collection: String,
        /// Document ids
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Query a collection
    Find {
        /// Read inside this transaction instead of committed state
        #[arg(short, long)]
        tx: Option<String>,
        /// Collection name
        collection: String,
        /// Only these ids (repeatable)
        #[arg(long = "id")]
        ids: Vec<String>,
        /// Field equality as `path=json` (repeatable)
        #[arg(long = "eq")]
        eq: Vec<String>,
    },

    /// Read one document
    Get {
        /// Read inside this transaction instead of committed state
        #[arg(short, long)]
        tx: Option<String>,
        /// Collection name
        collection: String,
        /// Document id
        id: String,
    },

    /// Commit a transaction
    Commit {
        /// Transaction id
        tx: String,
    },

    /// Roll a transaction back
    Rollback {
        /// Transaction id
        tx: String,
    },

    /// Finish or discard interrupted transactions
    Recover {
        /// Roll back active transactions idle for this many seconds
        #[arg(long)]
        stale_after: Option<u64>,
    },

    /// Show transactions, locks and collections
    Inspect {
        /// Only this transaction
        #[arg(short, long)]
        tx: Option<String>,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so that stdout stays parseable.
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let format = commands::Format::parse(&cli.format)?;
    let path = cli.path;
    let require = |command: &str| {
        path.clone()
            .ok_or_else(|| format!("Store path required for {command}"))
    };

    match cli.command {
        Commands::Start => {
            let c = commands::open(&require("start")?, None)?;
            commands::transaction::start(&c, format)?;
        }
        Commands::Insert {
            tx,
            collection,
            documents,
        } => {
            let c = commands::open(&require("insert")?, None)?;
            commands::write::insert(&c, &tx, &collection, &documents)?;
        }
        Commands::Update {
            tx,
            collection,
            documents,
        } => {
            let c = commands::open(&require("update")?, None)?;
            commands::write::update(&c, &tx, &collection, &documents)?;
        }
        Commands::Delete { tx, collection, ids } => {
            let c = commands::open(&require("delete")?, None)?;
            commands::write::delete(&c, &tx, &collection, &ids)?;
        }
        Commands::Find {
            tx,
            collection,
            ids,
            eq,
        } => {
            let c = commands::open(&require("find")?, None)?;
            commands::read::find(&c, tx.as_deref(), &collection, &ids, &eq, format)?;
        }
        Commands::Get { tx, collection, id } => {
            let c = commands::open(&require("get")?, None)?;
            commands::read::get(&c, tx.as_deref(), &collection, &id, format)?;
        }
        Commands::Commit { tx } => {
            let c = commands::open(&require("commit")?, None)?;
            commands::transaction::commit(&c, &tx)?;
        }
        Commands::Rollback { tx } => {
            let c = commands::open(&require("rollback")?, None)?;
            commands::transaction::rollback(&c, &tx)?;
        }
        Commands::Recover { stale_after } => {
            let c = commands::open(&require("recover")?, stale_after)?;
            commands::recover::run(&c, format)?;
        }
        Commands::Inspect { tx } => {
            let root = require("inspect")?;
            let c = commands::open(&root, None)?;
            commands::inspect::run(&c, &root, tx.as_deref(), format)?;
        }
        Commands::Version => {
            println!("shadowtx CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("shadowtx Core v{}", shadowtx_core::VERSION);
        }
    }

    Ok(())
}
