//! Client side of a connection.
//!
//! Mirrors the server session: each call sends one request header, then
//! pushes or pulls the payload through the same framed stream.

use std::path::Path;
use std::time::Duration;

use filebox_protocol::header::encode_user_name;
use filebox_protocol::{ChannelError, DownloadReply, FramedStream, ListEntry, Request};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::{ClientError, DEFAULT_RESPONSE_TIMEOUT};

/// A connection to a filebox server.
pub struct Client<S> {
    framed: FramedStream<S>,
    response_timeout: Option<Duration>,
}

impl Client<TcpStream> {
    /// Connects to `host:port`, trying every resolved address in turn.
    pub async fn connect(host: &str, port: u16) -> Result<Self, ClientError> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|source| ClientError::Connect {
                addr: format!("{host}:{port}"),
                source,
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("cannot disable Nagle: {e}");
        }
        info!(host, port, "connected");
        Ok(Self::new(stream))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Client<S> {
    pub fn new(stream: S) -> Self {
        Self {
            framed: FramedStream::new(stream),
            response_timeout: Some(DEFAULT_RESPONSE_TIMEOUT),
        }
    }

    /// Sets how long to wait for a reply header; `None` waits forever.
    ///
    /// A server that drops a download request sends nothing at all, so
    /// without a timeout the client would block on it indefinitely.
    pub fn with_response_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Announces the user name. Multi-user servers expect this first.
    pub async fn login(&mut self, user: &str) -> Result<(), ClientError> {
        let header = encode_user_name(user).map_err(ChannelError::from)?;
        self.framed.write_frame(&header).await?;
        debug!(user, "user name sent");
        Ok(())
    }

    /// Uploads the local file at `path`. The server stores it under the
    /// final component of `path`.
    pub async fn upload(&mut self, path: &Path) -> Result<u64, ClientError> {
        let local_err = |source| ClientError::LocalFile {
            path: path.to_path_buf(),
            source,
        };
        let mut file = File::open(path).await.map_err(local_err)?;
        let meta = file.metadata().await.map_err(local_err)?;
        if !meta.is_file() {
            return Err(local_err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "not a regular file",
            )));
        }

        let request = Request::Upload {
            file_name: path.to_string_lossy().into_owned(),
            size: meta.len(),
        };
        let header = request.encode().map_err(ChannelError::from)?;

        info!(%request, "uploading");
        self.framed.write_frame(&header).await?;
        let sent = self.framed.send_from(&mut file, meta.len()).await?;
        Ok(sent)
    }

    /// Downloads `file_name` from the server into `dest`.
    ///
    /// `dest` is only created once the server has confirmed the file exists.
    pub async fn download(&mut self, file_name: &str, dest: &Path) -> Result<u64, ClientError> {
        let request = Request::Download {
            file_name: file_name.to_string(),
        };
        let header = request.encode().map_err(ChannelError::from)?;

        info!(%request, "downloading");
        self.framed.write_frame(&header).await?;
        let reply = self.read_reply().await?;
        let size = match DownloadReply::parse(&reply).map_err(ChannelError::from)? {
            DownloadReply::Found { size } => size,
            DownloadReply::Missing { reason } => return Err(ClientError::Refused(reason)),
        };

        let mut file = match File::create(dest).await {
            Ok(file) => file,
            Err(source) => {
                warn!(dest = %dest.display(), "cannot create destination, skipping payload");
                self.framed.discard(size).await?;
                return Err(ClientError::LocalFile {
                    path: dest.to_path_buf(),
                    source,
                });
            }
        };
        let received = self.framed.receive_into(&mut file, size).await?;
        Ok(received)
    }

    /// Lists the files in the session's namespace.
    pub async fn list(&mut self) -> Result<Vec<ListEntry>, ClientError> {
        let header = Request::List.encode().map_err(ChannelError::from)?;
        self.framed.write_frame(&header).await?;
        let limit = self.response_timeout;
        let listing = within(limit, self.framed.read_listing()).await?;
        Ok(listing.entries)
    }

    /// Shuts down the write half so the server sees a clean disconnect.
    pub async fn close(self) -> Result<(), ClientError> {
        let mut stream = self.framed.into_inner();
        stream
            .shutdown()
            .await
            .map_err(|e| ClientError::Channel(ChannelError::Stream(e)))
    }

    async fn read_reply(&mut self) -> Result<String, ClientError> {
        let limit = self.response_timeout;
        within(limit, self.framed.read_header()).await
    }
}

/// Awaits a reply, giving up after `limit`.
async fn within<T, F>(limit: Option<Duration>, reply: F) -> Result<T, ClientError>
where
    F: Future<Output = Result<T, ChannelError>>,
{
    let Some(limit) = limit else {
        return Ok(reply.await?);
    };
    match tokio::time::timeout(limit, reply).await {
        Ok(reply) => Ok(reply?),
        Err(_) => Err(ClientError::NoReply(limit)),
    }
}
