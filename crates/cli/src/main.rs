//! bucketgames: turn a folder of games into a static site and publish it.

mod config;
mod scaffold;
mod serve;
mod upload;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "bucketgames")]
#[command(about = "Build a game catalog site from a bucket folder and publish it")]
#[command(version)]
struct Cli {
    /// Bucket folder holding bucket.toml and one folder per game
    bucket: PathBuf,

    /// Publishing configuration file (default: <BUCKET>/credentials.toml)
    #[arg(long, global = true, env = "BUCKETGAMES_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render the site into <BUCKET>/_website
    Generate {
        /// Serve the result afterwards
        #[arg(long)]
        serve: bool,
    },

    /// Serve <BUCKET>/_website locally
    Serve,

    /// Publish the site to the configured store
    Upload {
        /// Print the plan without writing anything
        #[arg(long)]
        dry_run: bool,

        /// Ignore cached fingerprints and hash every file again
        #[arg(long)]
        rehash: bool,

        /// Also write the run report as JSON to this file
        #[arg(long, value_name = "FILE")]
        report: Option<PathBuf>,
    },

    /// Create a new bucket folder with starter files
    Init,

    /// Add a game folder with a starter game.toml
    AddGame {
        /// Folder name of the game
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Generate { serve } => {
            let root = cli.bucket.clone();
            let output = tokio::task::spawn_blocking(move || bucketgames_site::generate(&root))
                .await
                .context("site build task failed")?
                .with_context(|| format!("failed to build site from {}", cli.bucket.display()))?;
            println!("Generated {}", output.display());
            if serve {
                serve::serve(&cli.bucket).await?;
            }
        }
        Commands::Serve => serve::serve(&cli.bucket).await?,
        Commands::Upload {
            dry_run,
            rehash,
            report,
        } => {
            let options = upload::UploadOptions {
                config: cli.config,
                dry_run,
                rehash,
                report,
            };
            return upload::run(&cli.bucket, options).await;
        }
        Commands::Init => {
            scaffold::init_bucket(&cli.bucket)?;
            println!("Created bucket {}", cli.bucket.display());
        }
        Commands::AddGame { name } => {
            let game = scaffold::add_game(&cli.bucket, &name)?;
            println!("Created game {}", game.display());
        }
    }
    Ok(ExitCode::SUCCESS)
}
