//! lambda-dev command line.
//!
//! `build` compiles function entries into bundles on disk; `serve` runs the
//! local emulator with rebuild-on-change.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use lambda_dev::prelude::*;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "lambda-dev", about = "Build and serve serverless HTTP functions locally", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compile function entries into bundles.
    Build {
        #[command(flatten)]
        common: CommonArgs,

        /// Output directory for bundles.
        #[arg(short, long)]
        target: Option<PathBuf>,

        /// Development build: keep artifacts in memory.
        #[arg(long)]
        dev: bool,
    },

    /// Serve function entries with rebuild on change.
    Serve {
        #[command(flatten)]
        common: CommonArgs,

        /// Port to listen on.
        #[arg(short, long)]
        port: Option<u16>,

        /// Host address to bind to.
        #[arg(long)]
        host: Option<String>,

        /// Prefix every function route is served under.
        #[arg(short, long)]
        base_path: Option<String>,

        /// Build once instead of rebuilding on change.
        #[arg(long)]
        no_watch: bool,

        /// Environment variable for functions (KEY=VALUE).
        #[arg(short, long = "env", value_parser = parse_key_value)]
        env: Vec<(String, String)>,
    },
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Entry file or directory of entries.
    entry: Option<PathBuf>,

    /// Node version bundles target.
    #[arg(long)]
    node: Option<String>,

    /// Custom bundler configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Keep only entries whose file matches this pattern.
    #[arg(long)]
    include: Option<String>,

    /// Drop entries whose file matches this pattern.
    #[arg(long)]
    exclude: Option<String>,

    /// Settings file (TOML); flags override its values.
    #[arg(short, long, env = "LAMBDA_DEV_SETTINGS")]
    settings: Option<PathBuf>,
}

impl CommonArgs {
    fn load(self) -> Result<DevConfig, ServeError> {
        let mut config = match &self.settings {
            Some(path) => DevConfig::from_file(path)?,
            None => DevConfig::new(),
        };

        if let Some(entry) = self.entry {
            config.entry = entry;
        }
        if let Some(node) = self.node {
            config.node_target = node;
        }
        if self.config.is_some() {
            config.bundler_config = self.config;
        }
        if self.include.is_some() {
            config.include = self.include;
        }
        if self.exclude.is_some() {
            config.exclude = self.exclude;
        }
        Ok(config)
    }
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got {:?}", s))
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Build {
            common,
            target,
            dev,
        } => build(common, target, dev).await,
        Commands::Serve {
            common,
            port,
            host,
            base_path,
            no_watch,
            env,
        } => {
            serve(common, |config| {
                if let Some(port) = port {
                    config.port = port;
                }
                if let Some(host) = host {
                    config.host = host;
                }
                if let Some(base_path) = base_path {
                    config.base_path = base_path;
                }
                if no_watch {
                    config.watch = false;
                }
                config.env.extend(env);
            })
            .await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}

async fn build(common: CommonArgs, target: Option<PathBuf>, dev: bool) -> Result<(), ServeError> {
    let mut config = common.load()?;
    if let Some(target) = target {
        config.target_dir = target;
    }

    let entries = config.entries()?;
    info!("Building {} function(s)", entries.len());

    let compilation = if dev {
        let options = BuildOptions::new(entries)
            .dev(true)
            .node_target(config.node_target.clone())
            .custom_config(config.bundler_config.clone())
            .target_dir(config.target_dir.clone());
        lambda_dev::build::run(options, None).await?
    } else {
        build_bundles(&config, entries).await?
    };

    info!(
        "Done building {} module(s) into {}",
        compilation.modules.len(),
        config.target_dir.display()
    );
    Ok(())
}

async fn serve(
    common: CommonArgs,
    overrides: impl FnOnce(&mut DevConfig),
) -> Result<(), ServeError> {
    let mut config = common.load()?;
    overrides(&mut config);

    let entries = config.entries()?;
    info!("Starting lambda-dev for {} function(s)...", entries.len());

    let server = DevServer::create(config, entries).await?;
    server.run().await
}
