use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use graphite_config::{Config, OverridableConfig};
use graphite_server::{LocalInterfaces, Manager};
use graphite_store::Store;

use crate::setup;

const ABOUT: &str = "Runs the Graphite Carbon and Render servers";

/// The default config folder, relative to the working directory.
const DEFAULT_CONFIG_DIR: &str = ".graphite";

#[derive(Debug, Parser)]
#[command(name = "graphite", version, about = ABOUT)]
struct Cli {
    /// The path to the config folder.
    #[arg(
        long,
        short,
        global = true,
        value_name = "CONFIG",
        env = "GRAPHITE_CONFIG",
        default_value = DEFAULT_CONFIG_DIR
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the Carbon and Render servers.
    Run(RunArgs),
    /// Manage the configuration.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Debug, Default, Args)]
struct RunArgs {
    /// The address to bind the servers to.
    #[arg(long, value_name = "HOST", env = "GRAPHITE_HOST")]
    host: Option<String>,
    /// The port of the Carbon plaintext server.
    #[arg(long, value_name = "PORT", env = "GRAPHITE_CARBON_PORT")]
    carbon_port: Option<String>,
    /// The port of the Render HTTP server.
    #[arg(long, value_name = "PORT", env = "GRAPHITE_RENDER_PORT")]
    render_port: Option<String>,
    /// The storage backend, `memory` or `empty`.
    #[arg(long, value_name = "NAME", env = "GRAPHITE_STORE")]
    store: Option<String>,
}

impl RunArgs {
    fn into_overrides(self) -> OverridableConfig {
        OverridableConfig {
            host: self.host,
            carbon_port: self.carbon_port,
            render_port: self.render_port,
            store: self.store,
        }
    }
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Write a config file with default values.
    Init {
        /// Replace an existing config file.
        #[arg(long)]
        overwrite: bool,
    },
    /// Print the effective configuration as YAML.
    Show,
}

/// Runs the command line application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None => run(load_config(&cli.config, RunArgs::default())?),
        Some(Command::Run(args)) => run(load_config(&cli.config, args)?),
        Some(Command::Config {
            command: ConfigCommand::Init { overwrite },
        }) => init_config(&cli.config, overwrite),
        Some(Command::Config {
            command: ConfigCommand::Show,
        }) => show_config(&load_config(&cli.config, RunArgs::default())?),
    }
}

/// Loads the config folder if it exists, otherwise falls back to defaults.
fn load_config(path: &Path, args: RunArgs) -> Result<Config> {
    let mut config = if Config::exists(path) {
        Config::from_path(path)?
    } else {
        Config::default()
    };

    config.apply_override(args.into_overrides())?;
    Ok(config)
}

#[allow(clippy::print_stdout)]
fn init_config(path: &Path, overwrite: bool) -> Result<()> {
    if Config::exists(path) && !overwrite {
        anyhow::bail!(
            "a config already exists in {}, pass --overwrite to replace it",
            path.display()
        );
    }

    Config::default().save(path)?;
    println!("wrote config to {}", path.display());
    Ok(())
}

#[allow(clippy::print_stdout)]
fn show_config(config: &Config) -> Result<()> {
    print!("{}", config.to_yaml_string()?);
    Ok(())
}

/// Starts the servers and blocks until the process is interrupted.
pub fn run(config: Config) -> Result<()> {
    setup::check_config(&config)?;
    graphite_log::init(config.logging());
    setup::dump_spawn_infos(&config);
    setup::init_metrics(&config)?;

    let store = graphite_store::create_store(config.store_kind(), &config.store_config())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("graphite")
        .enable_all()
        .build()
        .context("failed to create the runtime")?;

    runtime.block_on(serve(&config, store))
}

async fn serve(config: &Config, store: Arc<dyn Store>) -> Result<()> {
    let mut manager = Manager::new(config.server_config(), Arc::new(LocalInterfaces));
    manager.set_carbon_listener(store.clone());
    manager.set_render_listener(store);

    manager
        .start()
        .await
        .context("failed to start the servers")?;

    for addr in manager.bound_addresses()? {
        graphite_log::info!(
            "accepting carbon on {addr}:{} and render on {addr}:{}",
            config.carbon_port(),
            config.render_port()
        );
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for the shutdown signal")?;

    graphite_log::info!("shutting down");
    manager.stop().await?;
    Ok(())
}
