//! Blockchain analysis CLI
//!
//! Command-line shell over the analysis engine.

use blue_analyst::{
    AnalysisRequest, Analyzer, Config, Credentials, Error, ProviderKind, Result, Subject,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "blue")]
#[command(about = "LLM-assisted Ergo blockchain analysis")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Fmt)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Fmt,
    Json,
}

#[derive(Args)]
struct Ask {
    /// Question to answer (a default per command otherwise)
    #[arg(short, long)]
    question: Option<String>,

    /// LLM provider (claude, ollama); defaults to the configured one
    #[arg(short, long)]
    provider: Option<ProviderKind>,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a wallet address
    Wallet {
        address: String,
        #[command(flatten)]
        ask: Ask,
    },

    /// Analyze a transaction
    Tx {
        /// Transaction id (64 hex characters)
        id: String,
        #[command(flatten)]
        ask: Ask,
    },

    /// Analyze current network status
    Network {
        #[command(flatten)]
        ask: Ask,
    },

    /// Trace fund flows from an address and analyze them
    Forensic {
        address: String,
        /// Hops to trace (0-5)
        #[arg(short, long)]
        depth: Option<u8>,
        #[command(flatten)]
        ask: Ask,
    },

    /// Trace fund flows without an LLM and print the raw trace
    Trace {
        address: String,
        /// Hops to trace (0-5)
        #[arg(short, long)]
        depth: Option<u8>,
    },

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (ignore if not found)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    let registry = tracing_subscriber::registry().with(filter);
    match cli.log_format {
        LogFormat::Fmt => registry.with(fmt::layer().with_writer(std::io::stderr)).init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };

    match cli.command {
        Commands::Config => print_json(&config),
        Commands::Trace { address, depth } => {
            let depth = depth.unwrap_or(config.trace.default_depth);
            let analyzer = Analyzer::from_config(config, Credentials::from_env())?;
            let report = analyzer.trace(&address, depth).await?;
            print_json(&report)
        }
        Commands::Wallet { address, ask } => run(config, Subject::Wallet(address), ask).await,
        Commands::Tx { id, ask } => run(config, Subject::Transaction(id), ask).await,
        Commands::Network { ask } => run(config, Subject::Network, ask).await,
        Commands::Forensic {
            address,
            depth,
            ask,
        } => {
            let depth = depth.unwrap_or(config.trace.default_depth);
            run(config, Subject::Forensic { address, depth }, ask).await
        }
    }
}

async fn run(config: Config, subject: Subject, ask: Ask) -> Result<()> {
    subject.validate()?;
    let provider = ask.provider.unwrap_or(config.llm.provider);
    let analyzer = Analyzer::from_config(config, Credentials::from_env())?;

    let mut request = AnalysisRequest::new(subject, provider);
    if let Some(question) = ask.question {
        request = request.with_question(question);
    }
    let outcome = analyzer.analyze(request).await?;
    print_json(&outcome)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).map_err(Error::from)?;
    println!("{}", text);
    Ok(())
}
