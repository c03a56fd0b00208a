//! orderdesk CLI, the main entry point.
//!
//! Commands:
//! - `serve`  Start the HTTP gateway with its background executor
//! - `ask`    Submit a question and stream the answer
//! - `watch`  Follow the answer channel
//! - `seed`   Load orders from a JSON file into the store

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod render;

/// Gateway used by `ask` and `watch` when `--url` is not given.
const DEFAULT_URL: &str = "http://127.0.0.1:8288";

#[derive(Parser)]
#[command(
    name = "orderdesk",
    about = "orderdesk: streamed AI answers to e-commerce order questions",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Ask a question about an order and stream the answer
    Ask {
        /// The customer's question
        #[arg(short, long)]
        question: String,

        /// Order id to look up
        #[arg(short, long)]
        order_id: Option<String>,

        /// Gateway base URL
        #[arg(long, env = "ORDERDESK_URL", default_value = DEFAULT_URL)]
        url: String,
    },

    /// Follow the answer channel and print every snapshot
    Watch {
        /// Gateway base URL
        #[arg(long, env = "ORDERDESK_URL", default_value = DEFAULT_URL)]
        url: String,
    },

    /// Load orders from a JSON array into the configured store
    Seed {
        /// Path to the JSON file
        #[arg(short, long)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Serve { port } => commands::serve::run(port).await?,
        Commands::Ask {
            question,
            order_id,
            url,
        } => commands::ask::run(&url, question, order_id).await?,
        Commands::Watch { url } => commands::watch::run(&url).await?,
        Commands::Seed { file } => commands::seed::run(&file).await?,
    }

    Ok(())
}
