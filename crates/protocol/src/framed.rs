//! Delimiter-framed reader over a byte stream.
//!
//! [`FramedStream`] owns the stream together with the buffer of bytes that
//! were read off it but not yet consumed. Header reads fill the buffer in
//! whole chunks, so they routinely overshoot the delimiter; whatever lies
//! past it is carryover for the next consumer (a payload or the next header).

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::error::{ChannelError, ProtocolError};
use crate::{CHUNK_SIZE, DELIMITER, MAX_HEADER_LEN};

/// A byte stream plus its session-owned read buffer.
#[derive(Debug)]
pub struct FramedStream<S> {
    stream: S,
    buffer: Vec<u8>,
    idle_timeout: Option<Duration>,
}

impl<S> FramedStream<S> {
    /// Wraps `stream` with an empty buffer and no timeout.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: Vec::with_capacity(CHUNK_SIZE),
            idle_timeout: None,
        }
    }

    /// Bounds every individual stream read and write by `timeout`.
    ///
    /// `None` waits on the peer indefinitely.
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Bytes read from the stream but not consumed yet.
    pub fn carryover(&self) -> &[u8] {
        &self.buffer
    }

    /// Consumes the wrapper, discarding any carryover.
    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Removes up to `max` bytes from the front of the buffer.
    pub(crate) fn take_carryover(&mut self, max: usize) -> Vec<u8> {
        let n = self.buffer.len().min(max);
        self.buffer.drain(..n).collect()
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> FramedStream<S> {
    /// Reads one header, up to and including the delimiter.
    ///
    /// Bytes that arrive after the delimiter stay in the buffer. Returns
    /// [`ChannelError::StreamClosed`] if the peer disconnects between frames
    /// and [`ChannelError::Stream`] if it disconnects inside one.
    pub async fn read_header(&mut self) -> Result<String, ChannelError> {
        let raw = self.read_until(DELIMITER).await?;
        trace!(len = raw.len(), carryover = self.buffer.len(), "header read");
        String::from_utf8(raw).map_err(|_| ProtocolError::InvalidUtf8.into())
    }

    /// Reads one `\n`-terminated line and returns it without the newline.
    ///
    /// Used for replies whose total length is unbounded, such as listings.
    /// Each line is still subject to [`MAX_HEADER_LEN`].
    pub async fn read_line(&mut self) -> Result<String, ChannelError> {
        let mut raw = self.read_until(b"\n").await?;
        raw.pop();
        String::from_utf8(raw).map_err(|_| ProtocolError::InvalidUtf8.into())
    }

    /// Drains the buffer up to and including the first `marker`, reading
    /// more from the stream as needed.
    async fn read_until(&mut self, marker: &[u8]) -> Result<Vec<u8>, ChannelError> {
        let mut scanned = 0;
        loop {
            if let Some(pos) = find_marker(&self.buffer, marker, scanned) {
                return Ok(self.buffer.drain(..pos + marker.len()).collect());
            }
            if self.buffer.len() >= MAX_HEADER_LEN {
                return Err(ProtocolError::HeaderTooLong.into());
            }
            // The marker may straddle two reads.
            scanned = self.buffer.len().saturating_sub(marker.len() - 1);

            let mut chunk = [0u8; CHUNK_SIZE];
            let n = self.read_some(&mut chunk).await.map_err(ChannelError::Stream)?;
            if n == 0 {
                if self.buffer.is_empty() {
                    return Err(ChannelError::StreamClosed);
                }
                return Err(ChannelError::Stream(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream ended inside a header",
                )));
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    /// Writes a complete frame (header and optional inline body) and flushes.
    pub async fn write_frame(&mut self, frame: &[u8]) -> Result<(), ChannelError> {
        self.write_all(frame).await.map_err(ChannelError::Stream)?;
        self.flush().await.map_err(ChannelError::Stream)
    }

    /// Single bounded read straight from the stream, bypassing the buffer.
    pub(crate) async fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.idle_timeout {
            Some(limit) => tokio::time::timeout(limit, self.stream.read(buf))
                .await
                .map_err(|_| timed_out("read", limit))?,
            None => self.stream.read(buf).await,
        }
    }

    /// Writes exactly `data`, retrying short writes.
    pub(crate) async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        match self.idle_timeout {
            Some(limit) => tokio::time::timeout(limit, self.stream.write_all(data))
                .await
                .map_err(|_| timed_out("write", limit))?,
            None => self.stream.write_all(data).await,
        }
    }

    pub(crate) async fn flush(&mut self) -> io::Result<()> {
        self.stream.flush().await
    }
}

fn timed_out(op: &str, limit: Duration) -> io::Error {
    io::Error::new(
        io::ErrorKind::TimedOut,
        format!("{op} made no progress within {limit:?}"),
    )
}

/// Position of the first `marker` at or after `from`.
fn find_marker(buf: &[u8], marker: &[u8], from: usize) -> Option<usize> {
    buf.get(from..)?
        .windows(marker.len())
        .position(|w| w == marker)
        .map(|p| p + from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delimiter_search() {
        assert_eq!(find_marker(b"l\n\n", DELIMITER, 0), Some(1));
        assert_eq!(find_marker(b"u\nname\n5\n\nabc", DELIMITER, 0), Some(8));
        assert_eq!(find_marker(b"u\nname\n", DELIMITER, 0), None);
        assert_eq!(find_marker(b"ab\n\ncd\n\n", DELIMITER, 3), Some(6));
        assert_eq!(find_marker(b"ab", DELIMITER, 5), None);
        assert_eq!(find_marker(b"ab\ncd", b"\n", 0), Some(2));
    }

    #[tokio::test]
    async fn header_with_carryover() {
        let mock = tokio_test::io::Builder::new()
            .read(b"u\nfile.bin\n6\n\nabc")
            .build();
        let mut framed = FramedStream::new(mock);

        let header = framed.read_header().await.unwrap();
        assert_eq!(header, "u\nfile.bin\n6\n\n");
        assert_eq!(framed.carryover(), b"abc");
    }

    #[tokio::test]
    async fn header_split_across_reads() {
        let mock = tokio_test::io::Builder::new()
            .read(b"d\nreport.txt\n")
            .read(b"\n")
            .build();
        let mut framed = FramedStream::new(mock);

        let header = framed.read_header().await.unwrap();
        assert_eq!(header, "d\nreport.txt\n\n");
        assert!(framed.carryover().is_empty());
    }

    #[tokio::test]
    async fn two_headers_in_one_read() {
        let mock = tokio_test::io::Builder::new().read(b"l\n\nl\n\n").build();
        let mut framed = FramedStream::new(mock);

        assert_eq!(framed.read_header().await.unwrap(), "l\n\n");
        assert_eq!(framed.carryover(), b"l\n\n");
        // Served from the buffer; the mock has nothing left to read.
        assert_eq!(framed.read_header().await.unwrap(), "l\n\n");
    }

    #[tokio::test]
    async fn clean_close_between_frames() {
        let mock = tokio_test::io::Builder::new().build();
        let mut framed = FramedStream::new(mock);

        let result = framed.read_header().await;
        assert!(matches!(result, Err(ChannelError::StreamClosed)));
    }

    #[tokio::test]
    async fn close_inside_header() {
        let mock = tokio_test::io::Builder::new().read(b"u\nhalf").build();
        let mut framed = FramedStream::new(mock);

        match framed.read_header().await {
            Err(ChannelError::Stream(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn oversized_header_rejected() {
        let junk = vec![b'x'; MAX_HEADER_LEN + 1];
        let (mut peer, local) = tokio::io::duplex(MAX_HEADER_LEN * 2);
        peer.write_all(&junk).await.unwrap();

        let mut framed = FramedStream::new(local);
        let result = framed.read_header().await;
        assert!(matches!(
            result,
            Err(ChannelError::Protocol(ProtocolError::HeaderTooLong))
        ));
    }

    #[tokio::test]
    async fn invalid_utf8_rejected() {
        let mock = tokio_test::io::Builder::new().read(b"\xff\xfe\n\n").build();
        let mut framed = FramedStream::new(mock);

        let result = framed.read_header().await;
        assert!(matches!(
            result,
            Err(ChannelError::Protocol(ProtocolError::InvalidUtf8))
        ));
    }

    #[tokio::test]
    async fn idle_timeout_fires() {
        let (_peer, local) = tokio::io::duplex(64);
        let mut framed =
            FramedStream::new(local).with_idle_timeout(Some(Duration::from_millis(50)));

        match framed.read_header().await {
            Err(ChannelError::Stream(e)) => assert_eq!(e.kind(), io::ErrorKind::TimedOut),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn lines_split_across_reads() {
        let mock = tokio_test::io::Builder::new()
            .read(b"2\nal")
            .read(b"pha\n")
            .read(b"\nrest")
            .build();
        let mut framed = FramedStream::new(mock);

        assert_eq!(framed.read_line().await.unwrap(), "2");
        assert_eq!(framed.read_line().await.unwrap(), "alpha");
        assert_eq!(framed.read_line().await.unwrap(), "");
        assert_eq!(framed.carryover(), b"rest");
    }

    #[tokio::test]
    async fn write_frame_sends_exact_bytes() {
        let mock = tokio_test::io::Builder::new().write(b"l\n\n").build();
        let mut framed = FramedStream::new(mock);
        framed.write_frame(b"l\n\n").await.unwrap();
    }
}
