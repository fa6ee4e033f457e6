//! TCP acceptor.
//!
//! Accepts connections until cancelled and runs each one as an independent
//! [`Session`] task.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::ServerError;
use crate::namespace::NamespaceResolver;
use crate::session::{Session, SessionConfig};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on (port 0 = OS-assigned).
    pub listen: SocketAddr,
    /// Directory holding every namespace.
    pub storage_root: PathBuf,
    pub session: SessionConfig,
}

/// A bound filebox server.
pub struct FileServer {
    listener: TcpListener,
    resolver: Arc<NamespaceResolver>,
    session_config: Arc<SessionConfig>,
    cancel: CancellationToken,
}

impl FileServer {
    /// Prepares the storage root and binds the listener.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        tokio::fs::create_dir_all(&config.storage_root)
            .await
            .map_err(|source| ServerError::StorageRoot {
                path: config.storage_root.clone(),
                source,
            })?;

        let listener = TcpListener::bind(config.listen).await?;
        info!(
            addr = %listener.local_addr()?,
            root = %config.storage_root.display(),
            multi_user = config.session.multi_user,
            "file server listening"
        );

        Ok(Self {
            listener,
            resolver: Arc::new(NamespaceResolver::new(config.storage_root)),
            session_config: Arc::new(config.session),
            cancel: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Token that stops [`run`](Self::run) when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Accepts connections until the cancel token fires.
    ///
    /// Sessions already running are left to finish on their own.
    pub async fn run(self) -> Result<(), ServerError> {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("server shutting down");
                    break Ok(());
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            if let Err(e) = stream.set_nodelay(true) {
                                warn!(%peer_addr, "cannot disable Nagle: {e}");
                            }
                            info!(%peer_addr, "connection accepted");
                            let session = Session::new(
                                stream,
                                peer_addr.to_string(),
                                Arc::clone(&self.resolver),
                                Arc::clone(&self.session_config),
                            );
                            tokio::spawn(async move {
                                match session.run().await {
                                    Ok(()) => info!(%peer_addr, "session closed"),
                                    Err(e) => error!(%peer_addr, "session terminated: {e}"),
                                }
                            });
                        }
                        Err(e) => {
                            error!("accept error: {e}");
                        }
                    }
                }
            }
        }
    }
}
