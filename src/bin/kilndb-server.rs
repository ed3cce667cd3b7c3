//! The kilndb server binary: load config, open the engine, serve TCP until
//! a termination signal arrives, then close cleanly.

use std::path::PathBuf;
use std::sync::atomic::Ordering;

use clap::Parser;
use kilndb::server::Server;
use kilndb::Config;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "kilndb-server")]
#[command(about = "Multi-datatype key-value store on an append-only log")]
#[command(version)]
struct Args {
    /// TOML config file; defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data directory, overriding the config file
    #[arg(long = "dir_path")]
    dir_path: Option<PathBuf>,
}

fn main() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();

    let mut config = match &args.config {
        None => {
            tracing::info!("no config set, using the default config");
            Config::default()
        }
        Some(path) => match load_config(path) {
            Ok(config) => config,
            Err(err) => {
                tracing::error!("failed to load config {}: {err}", path.display());
                std::process::exit(1);
            }
        },
    };
    if let Some(dir) = args.dir_path {
        config.dir_path = dir;
    }

    let server = match Server::new(config) {
        Ok(server) => server,
        Err(err) => {
            tracing::error!("failed to open database: {err}");
            std::process::exit(1);
        }
    };

    let shutdown = server.shutdown_handle();
    if let Err(err) = ctrlc::set_handler(move || {
        tracing::info!("termination signal received");
        shutdown.store(true, Ordering::Relaxed);
    }) {
        tracing::error!("failed to install signal handler: {err}");
        std::process::exit(1);
    }

    if let Err(err) = server.serve() {
        tracing::error!("server error: {err}");
        std::process::exit(1);
    }
    tracing::info!("kilndb is ready to exit, bye");
}

fn load_config(path: &PathBuf) -> kilndb::Result<Config> {
    let raw = std::fs::read_to_string(path)?;
    let config = toml::from_str(&raw)?;
    Ok(config)
}
