use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

use shipyard::config::ShipyardConfig;

mod cmd;

#[derive(Parser)]
#[command(name = "shipyard")]
#[command(version, about = "Clone, build and publish repositories behind one web server")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a config file (defaults to ./shipyard.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Permanent root holding published projects
    #[arg(long, global = true)]
    pub serving_dir: Option<PathBuf>,

    /// Transient root for per-deployment working directories
    #[arg(long, global = true)]
    pub deployments_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server
    Serve {
        /// Address to listen on
        #[arg(short, long)]
        listen: Option<SocketAddr>,

        /// Prefix of the URLs returned for published projects
        #[arg(long)]
        public_url: Option<String>,
    },
    /// Clone, build and publish one repository
    Deploy {
        /// Repository name
        #[arg(short, long)]
        repo: String,

        /// Repository owner (defaults to source.default_owner)
        #[arg(short, long)]
        owner: Option<String>,

        /// Access token used to authorize the clone
        #[arg(long, env = "SHIPYARD_TOKEN", hide_env_values = true)]
        token: String,

        /// URL of a running shipyard server to deploy through
        #[arg(long, env = "SHIPYARD_SERVER")]
        server: Option<String>,
    },
    /// Report the project type of a local directory
    Classify {
        /// Directory to inspect
        dir: PathBuf,
    },
    /// List published projects
    Projects {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    /// Defaults, then the config file, then `SHIPYARD_*`, then flags.
    fn load_config(&self) -> Result<ShipyardConfig> {
        let cwd = std::env::current_dir().context("Failed to get current directory")?;
        let mut config = ShipyardConfig::load_or_default(self.config.as_deref(), &cwd)?;
        config.apply_env()?;

        if let Some(dir) = &self.serving_dir {
            config.paths.serving_dir = dir.clone();
        }
        if let Some(dir) = &self.deployments_dir {
            config.paths.deployments_dir = dir.clone();
        }
        if let Commands::Serve { listen, public_url } = &self.command {
            if let Some(listen) = listen {
                config.server.listen = *listen;
            }
            if let Some(url) = public_url {
                config.server.public_url = url.clone();
            }
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Serve { .. } => {
            let config = cli.load_config()?;
            let _guard = shipyard::logging::init(&config.logging, cli.verbose)?;
            cmd::cmd_serve(config).await?;
        }
        Commands::Deploy {
            repo,
            owner,
            token,
            server,
        } => {
            let config = cli.load_config()?;
            let _guard = shipyard::logging::init(&config.logging, cli.verbose)?;
            cmd::cmd_deploy(config, repo, owner.as_deref(), token, server.as_deref()).await?;
        }
        Commands::Classify { dir } => cmd::cmd_classify(dir)?,
        Commands::Projects { json } => {
            let config = cli.load_config()?;
            cmd::cmd_projects(&config, *json)?;
        }
    }

    Ok(())
}
