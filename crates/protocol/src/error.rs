//! Error types for the framed protocol.

use std::io;

use crate::MAX_HEADER_LEN;

/// Errors produced while reading or writing frames.
///
/// Stream and file failures are kept apart because they have different
/// blast radius: a stream failure ends the session, a file failure only
/// ends the current request.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("stream closed by peer")]
    StreamClosed,

    #[error("stream I/O error: {0}")]
    Stream(#[source] io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("file system error: {0}")]
    FileSystem(#[source] io::Error),

    #[error("transfer aborted after {moved} of {expected} bytes: {source}")]
    Transfer {
        moved: u64,
        expected: u64,
        #[source]
        source: io::Error,
    },
}

impl ChannelError {
    /// Returns `true` if the session cannot continue after this error.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::StreamClosed | Self::Stream(_) | Self::Transfer { .. } => true,
            Self::Protocol(e) => e.is_fatal(),
            Self::FileSystem(_) => false,
        }
    }
}

/// Malformed or unexpected frame contents.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown operation: {0:?}")]
    UnknownOperation(String),

    #[error("header is missing the {0}")]
    MissingField(&'static str),

    #[error("invalid size: {0:?}")]
    InvalidSize(String),

    #[error("header exceeds {MAX_HEADER_LEN} bytes")]
    HeaderTooLong,

    #[error("header is not valid UTF-8")]
    InvalidUtf8,

    #[error("declared size {declared} is smaller than the {moved} bytes already accounted for")]
    SizeUnderflow { declared: u64, moved: u64 },

    #[error("invalid user name: {0:?}")]
    InvalidUserName(String),

    #[error("invalid file name: {0:?}")]
    InvalidFileName(String),

    #[error("unexpected response: {0:?}")]
    UnexpectedResponse(String),
}

impl ProtocolError {
    /// Unknown operations and bad file names are rejected per request;
    /// everything else leaves the stream in an unknown framing state.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::UnknownOperation(_) | Self::InvalidFileName(_))
    }
}
