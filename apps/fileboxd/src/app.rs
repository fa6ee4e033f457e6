//! Wires the file server to process signals.

use anyhow::Context;
use filebox_server::FileServer;

use crate::config::Config;

/// Runs the server until Ctrl-C.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let server = FileServer::bind(config.server_config())
        .await
        .context("cannot start file server")?;

    let cancel = server.cancel_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Ctrl-C received, shutting down");
                cancel.cancel();
            }
            Err(e) => tracing::error!("cannot listen for Ctrl-C: {e}"),
        }
    });

    server.run().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unusable_storage_root_fails_startup() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("file");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let config = Config {
            port: 0,
            bind: [127, 0, 0, 1].into(),
            root: blocker.join("storage"),
            ..Config::default()
        };
        let err = run(config).await.unwrap_err();
        assert!(format!("{err:#}").contains("cannot start file server"));
    }
}
