use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod cmd;

#[derive(Parser)]
#[command(name = "docweave")]
#[command(version, about = "LLM-driven hierarchical documentation generator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate documentation for a parsed repository
    Generate(cmd::GenerateArgs),
    /// Show the generation state of a docs directory
    Status {
        /// Documentation output directory
        #[arg(long, default_value = "docs")]
        docs_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new(if cli.verbose { "docweave=debug" } else { "docweave=warn" })
            }),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Generate(args) => {
            let code = cmd::cmd_generate(args, cli.verbose).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::Status { docs_dir } => {
            cmd::cmd_status(&docs_dir)?;
        }
    }

    Ok(())
}
