//! Per-connection state machine.
//!
//! One [`Session`] owns one stream and its buffer. It alternates between
//! reading a header and carrying out the request the header describes; a
//! new header is only read once the previous request is finished.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use filebox_protocol::header::parse_user_name;
use filebox_protocol::{ChannelError, DownloadReply, FramedStream, Listing, Request};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use crate::namespace::{Namespace, NamespaceResolver, ResolveError};

/// Behaviour switches shared by all sessions of a server.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Expect a user name header first and confine the session to that
    /// user's directory. When `false`, every session uses the storage root.
    pub multi_user: bool,

    /// Answer downloads of missing files with `!\n<reason>\n\n` instead of
    /// silently dropping the request.
    pub reply_on_missing: bool,

    /// Upper bound on each stream read/write. `None` waits indefinitely.
    pub idle_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            multi_user: true,
            reply_on_missing: false,
            idle_timeout: None,
        }
    }
}

/// Errors that end or abort work inside a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Namespace(#[from] ResolveError),
}

impl SessionError {
    /// Whether the session must close after this error.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Channel(e) => e.is_fatal(),
            Self::Namespace(_) => true,
        }
    }
}

#[derive(Debug)]
enum State {
    AwaitUsername,
    AwaitHeader,
    Uploading { file_name: String, size: u64 },
    Downloading { file_name: String },
    Listing,
    Closed,
}

/// Server side of one connection.
pub struct Session<S> {
    framed: FramedStream<S>,
    peer: String,
    resolver: Arc<NamespaceResolver>,
    config: Arc<SessionConfig>,
    namespace: Option<Namespace>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Session<S> {
    pub fn new(
        stream: S,
        peer: impl Into<String>,
        resolver: Arc<NamespaceResolver>,
        config: Arc<SessionConfig>,
    ) -> Self {
        Self {
            framed: FramedStream::new(stream).with_idle_timeout(config.idle_timeout),
            peer: peer.into(),
            resolver,
            config,
            namespace: None,
        }
    }

    /// Serves requests until the peer disconnects or a fatal error occurs.
    ///
    /// A clean disconnect between requests returns `Ok(())`. Per-request
    /// failures are logged and the session keeps going.
    pub async fn run(mut self) -> Result<(), SessionError> {
        let mut state = if self.config.multi_user {
            State::AwaitUsername
        } else {
            self.namespace = Some(self.resolver.shared().await?);
            State::AwaitHeader
        };
        let mut outcome = Ok(());

        loop {
            if matches!(state, State::Closed) {
                break;
            }
            state = match self.step(state).await {
                Ok(next) => next,
                Err(SessionError::Channel(ChannelError::StreamClosed)) => {
                    info!(peer = %self.peer, "peer disconnected");
                    State::Closed
                }
                Err(e) if e.is_fatal() => {
                    outcome = Err(e);
                    State::Closed
                }
                Err(e) => {
                    warn!(peer = %self.peer, "request failed: {e}");
                    State::AwaitHeader
                }
            };
        }

        outcome
    }

    async fn step(&mut self, state: State) -> Result<State, SessionError> {
        match state {
            State::AwaitUsername => {
                let header = self.framed.read_header().await?;
                let user = parse_user_name(&header).map_err(ChannelError::from)?;
                let namespace = self.resolver.resolve(&user).await?;
                info!(
                    peer = %self.peer,
                    %user,
                    root = %namespace.root().display(),
                    "user session started"
                );
                self.namespace = Some(namespace);
                Ok(State::AwaitHeader)
            }
            State::AwaitHeader => {
                let header = self.framed.read_header().await?;
                let request = Request::parse(&header).map_err(ChannelError::from)?;
                debug!(peer = %self.peer, %request, "request received");
                Ok(match request {
                    Request::Upload { file_name, size } => State::Uploading { file_name, size },
                    Request::Download { file_name } => State::Downloading { file_name },
                    Request::List => State::Listing,
                })
            }
            State::Uploading { file_name, size } => {
                self.upload(&file_name, size).await?;
                Ok(State::AwaitHeader)
            }
            State::Downloading { file_name } => {
                self.download(&file_name).await?;
                Ok(State::AwaitHeader)
            }
            State::Listing => {
                self.list().await?;
                Ok(State::AwaitHeader)
            }
            State::Closed => Ok(State::Closed),
        }
    }

    async fn upload(&mut self, file_name: &str, size: u64) -> Result<(), SessionError> {
        let namespace = self.namespace()?;
        let path = match namespace.resolve(file_name) {
            Ok(path) => path,
            Err(e) => {
                self.framed.discard(size).await?;
                return Err(ChannelError::from(e).into());
            }
        };
        let mut file = match File::create(&path).await {
            Ok(file) => file,
            Err(e) => {
                self.framed.discard(size).await?;
                return Err(ChannelError::FileSystem(e).into());
            }
        };

        info!(peer = %self.peer, file = %path.display(), size, "receiving upload");
        let received = self.framed.receive_into(&mut file, size).await?;
        info!(peer = %self.peer, file = %path.display(), bytes = received, "upload complete");
        Ok(())
    }

    async fn download(&mut self, file_name: &str) -> Result<(), SessionError> {
        let namespace = self.namespace()?;
        let opened = match namespace.resolve(file_name) {
            Ok(path) => open_regular(&path).await,
            Err(e) => Err(io::Error::new(io::ErrorKind::InvalidInput, e.to_string())),
        };
        let (mut file, size) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                warn!(peer = %self.peer, file = file_name, "cannot serve download: {e}");
                if self.config.reply_on_missing {
                    let reply = DownloadReply::Missing {
                        reason: e.to_string(),
                    };
                    self.framed.write_frame(&reply.encode()).await?;
                }
                return Ok(());
            }
        };

        info!(peer = %self.peer, file = file_name, size, "sending download");
        self.framed
            .write_frame(&DownloadReply::Found { size }.encode())
            .await?;
        let sent = self.framed.send_from(&mut file, size).await?;
        info!(peer = %self.peer, file = file_name, bytes = sent, "download complete");
        Ok(())
    }

    async fn list(&mut self) -> Result<(), SessionError> {
        let namespace = self.namespace()?;
        let listing = match namespace.list().await {
            Ok(listing) => listing,
            Err(e) => {
                warn!(peer = %self.peer, "cannot list namespace: {e}");
                Listing::default()
            }
        };
        debug!(peer = %self.peer, entries = listing.entries.len(), "sending listing");
        self.framed.write_frame(&listing.encode()).await?;
        Ok(())
    }

    fn namespace(&self) -> Result<Namespace, SessionError> {
        self.namespace.clone().ok_or_else(|| {
            ChannelError::from(filebox_protocol::ProtocolError::MissingField("user name")).into()
        })
    }
}

/// Opens `path` for reading if it is a regular file, returning its size.
async fn open_regular(path: &Path) -> io::Result<(File, u64)> {
    let file = File::open(path).await?;
    let meta = file.metadata().await?;
    if !meta.is_file() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "not a regular file",
        ));
    }
    Ok((file, meta.len()))
}
