//! filebox server: namespaces, sessions and the TCP acceptor.
//!
//! Each accepted connection runs one [`Session`] on its own task. Sessions
//! share nothing but the directory tree under the storage root.

mod namespace;
mod server;
mod session;

pub use namespace::{Namespace, NamespaceResolver, ResolveError};
pub use server::{FileServer, ServerConfig};
pub use session::{Session, SessionConfig, SessionError};

/// Errors produced by the server outside of individual sessions.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot prepare storage root {path}: {source}")]
    StorageRoot {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}
