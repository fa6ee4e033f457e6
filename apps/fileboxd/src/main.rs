//! filebox server daemon entry point.

mod app;
mod config;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// Serves per-user file namespaces over TCP.
#[derive(Debug, Parser)]
#[command(name = "fileboxd", version, about)]
struct Cli {
    /// TCP port to listen on
    port: Option<u16>,

    /// Worker threads for the runtime
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
    threads: Option<u16>,

    /// Storage root holding the user namespaces
    #[arg(long)]
    root: Option<PathBuf>,

    /// Serve one shared namespace; clients send no user name
    #[arg(long)]
    single_user: bool,

    /// Reply with an error header when a requested file is missing
    #[arg(long)]
    reply_on_missing: bool,

    /// Close connections idle for this many seconds
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    idle_timeout: Option<u64>,

    /// TOML configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

impl Cli {
    /// Overrides `config` with the flags given on the command line.
    fn apply(&self, config: &mut Config) {
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(threads) = self.threads {
            config.threads = Some(usize::from(threads));
        }
        if let Some(root) = &self.root {
            config.root = root.clone();
        }
        if self.single_user {
            config.multi_user = false;
        }
        if self.reply_on_missing {
            config.reply_on_missing = true;
        }
        if let Some(secs) = self.idle_timeout {
            config.idle_timeout_secs = Some(secs);
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    config.validate()?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.port,
        threads = ?config.threads,
        "starting fileboxd"
    );

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if let Some(threads) = config.threads {
        builder.worker_threads(threads);
    }
    let rt = builder.build().context("cannot build tokio runtime")?;
    rt.block_on(app::run(config))?;

    tracing::info!("fileboxd shut down cleanly");
    Ok(())
}
