use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "xck")]
#[command(about = "Cross-check a migrated ledger node against its legacy predecessor", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify a block range block by block, then window by window
    Verify(commands::verify::VerifyArgs),

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> chain -> local ...)
        #[arg(required = true)]
        paths: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Silent if the file does not exist; deployments inject env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let cli = Cli::parse();
    match cli.cmd {
        Commands::Verify(args) => commands::verify::run_verify(args).await,
        Commands::ConfigHash { paths } => commands::config_hash(&paths),
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}
