//! filebox client: connects to a server and runs upload, download and list
//! requests over the framed protocol.

mod client;
mod command;

pub use client::Client;
pub use command::{Command, CommandError};

use std::path::PathBuf;
use std::time::Duration;

use filebox_protocol::ChannelError;

/// Default time to wait for the header of a download or list reply.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors produced by the client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("cannot connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("cannot open {path}: {source}")]
    LocalFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("server refused: {0}")]
    Refused(String),

    #[error("no reply from server within {0:?}")]
    NoReply(Duration),
}

impl ClientError {
    /// Whether the connection is unusable after this error.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Connect { .. } | Self::NoReply(_) => true,
            Self::Channel(e) => e.is_fatal(),
            Self::LocalFile { .. } | Self::Refused(_) => false,
        }
    }
}
