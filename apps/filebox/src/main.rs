//! Interactive filebox client.

mod repl;

use std::io::Write;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use filebox_client::{Client, DEFAULT_RESPONSE_TIMEOUT};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

/// Uploads, downloads and lists files on a filebox server.
#[derive(Debug, Parser)]
#[command(name = "filebox", version, about)]
struct Cli {
    /// Server host name or address
    host: String,

    /// Server port
    port: u16,

    /// User name to log in as (prompted when omitted)
    #[arg(long, conflicts_with = "anonymous")]
    user: Option<String>,

    /// Send no user name; for servers started with --single-user
    #[arg(long)]
    anonymous: bool,

    /// Seconds to wait for a download or list reply (0 waits forever)
    #[arg(long, value_name = "SECS", default_value_t = DEFAULT_RESPONSE_TIMEOUT.as_secs())]
    response_timeout: u64,
}

impl Cli {
    fn response_timeout(&self) -> Option<Duration> {
        (self.response_timeout > 0).then(|| Duration::from_secs(self.response_timeout))
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("cannot build tokio runtime")?;
    rt.block_on(run(cli))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut input = BufReader::new(tokio::io::stdin());
    let mut stdout = std::io::stdout();

    let user = match (&cli.user, cli.anonymous) {
        (Some(user), _) => Some(user.clone()),
        (None, true) => None,
        (None, false) => Some(prompt_user(&mut input, &mut stdout).await?),
    };

    let mut client = Client::connect(&cli.host, cli.port)
        .await?
        .with_response_timeout(cli.response_timeout());
    if let Some(user) = &user {
        client.login(user).await?;
    }

    let download_dir = std::env::current_dir().context("cannot determine current directory")?;
    repl::run(&mut client, input, &mut stdout, &download_dir).await?;

    if let Err(e) = client.close().await {
        tracing::debug!("close failed: {e}");
    }
    Ok(())
}

async fn prompt_user<I, O>(input: &mut I, out: &mut O) -> anyhow::Result<String>
where
    I: tokio::io::AsyncBufRead + Unpin,
    O: Write,
{
    loop {
        write!(out, "Username: ")?;
        out.flush()?;
        let mut line = String::new();
        if input.read_line(&mut line).await? == 0 {
            anyhow::bail!("no user name given");
        }
        let user = line.trim();
        if !user.is_empty() {
            return Ok(user.to_string());
        }
    }
}
