//! Chunked payload pump between a [`FramedStream`] and a file.
//!
//! Inbound transfers drain carryover before touching the stream again and
//! never read past the declared length, so whatever follows the payload is
//! left for the next header read.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace, warn};

use crate::CHUNK_SIZE;
use crate::error::{ChannelError, ProtocolError};
use crate::framed::FramedStream;

/// Which way the payload moves relative to the local file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Stream to file.
    Inbound,
    /// File to stream.
    Outbound,
}

/// Byte accounting for one in-flight payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    direction: Direction,
    target: u64,
    moved: u64,
}

impl Transfer {
    pub fn new(direction: Direction, target: u64) -> Self {
        Self {
            direction,
            target,
            moved: 0,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn target(&self) -> u64 {
        self.target
    }

    pub fn moved(&self) -> u64 {
        self.moved
    }

    /// Bytes still owed. Fails instead of wrapping if more was moved than
    /// declared.
    pub fn remaining(&self) -> Result<u64, ProtocolError> {
        self.target
            .checked_sub(self.moved)
            .ok_or(ProtocolError::SizeUnderflow {
                declared: self.target,
                moved: self.moved,
            })
    }

    fn advance(&mut self, n: usize) {
        debug_assert!(n > 0, "a chunk must move at least one byte");
        self.moved += n as u64;
    }

    fn log_complete(&self) {
        debug!(
            direction = ?self.direction(),
            bytes = self.moved(),
            expected = self.target(),
            "transfer complete"
        );
    }

    fn abort(&self, source: io::Error) -> ChannelError {
        ChannelError::Transfer {
            moved: self.moved,
            expected: self.target,
            source,
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> FramedStream<S> {
    /// Moves exactly `expected` payload bytes from the stream into `file`.
    ///
    /// Carryover is consumed first. If writing to `file` fails, the rest of
    /// the payload is still read and dropped so the stream stays in frame,
    /// and the write error is returned as [`ChannelError::FileSystem`].
    /// Stream failures return [`ChannelError::Transfer`]; `file` keeps the
    /// bytes written so far.
    pub async fn receive_into<W>(
        &mut self,
        file: &mut W,
        expected: u64,
    ) -> Result<u64, ChannelError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut transfer = Transfer::new(Direction::Inbound, expected);
        let mut file_error: Option<io::Error> = None;

        loop {
            let remaining = transfer.remaining()?;
            if remaining == 0 || self.carryover().is_empty() {
                break;
            }
            let chunk = self.take_carryover(chunk_len(remaining));
            write_chunk(file, &mut file_error, &chunk).await;
            transfer.advance(chunk.len());
            trace!(bytes = chunk.len(), total = transfer.moved(), "carryover written");
        }

        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            let remaining = transfer.remaining()?;
            if remaining == 0 {
                break;
            }
            let want = chunk_len(remaining);
            let n = match self.read_some(&mut buf[..want]).await {
                Ok(0) => Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream ended inside a payload",
                )),
                other => other,
            };
            let n = match n {
                Ok(n) => n,
                Err(e) => {
                    let _ = file.flush().await;
                    return Err(transfer.abort(e));
                }
            };
            write_chunk(file, &mut file_error, &buf[..n]).await;
            transfer.advance(n);
            trace!(bytes = n, total = transfer.moved(), "chunk received");
        }

        if file_error.is_none() {
            if let Err(e) = file.flush().await {
                file_error = Some(e);
            }
        }
        if let Some(e) = file_error {
            return Err(ChannelError::FileSystem(e));
        }

        transfer.log_complete();
        Ok(transfer.moved())
    }

    /// Reads and drops a declared payload of `expected` bytes.
    pub async fn discard(&mut self, expected: u64) -> Result<u64, ChannelError> {
        self.receive_into(&mut tokio::io::sink(), expected).await
    }

    /// Streams `file` until end-of-file.
    ///
    /// `advertised` is the size announced to the peer. It is only used for
    /// diagnostics; end-of-file alone ends the transfer. Any failure leaves
    /// the peer expecting more bytes, so both stream and file errors come
    /// back as [`ChannelError::Transfer`].
    pub async fn send_from<R>(&mut self, file: &mut R, advertised: u64) -> Result<u64, ChannelError>
    where
        R: AsyncRead + Unpin,
    {
        let mut transfer = Transfer::new(Direction::Outbound, advertised);
        let mut buf = vec![0u8; CHUNK_SIZE];

        loop {
            let n = file.read(&mut buf).await.map_err(|e| transfer.abort(e))?;
            if n == 0 {
                break;
            }
            self.write_all(&buf[..n]).await.map_err(|e| transfer.abort(e))?;
            transfer.advance(n);
            trace!(bytes = n, total = transfer.moved(), "chunk sent");
        }
        self.flush().await.map_err(|e| transfer.abort(e))?;

        if transfer.moved() != transfer.target() {
            warn!(
                sent = transfer.moved(),
                advertised = transfer.target(),
                "file size changed while it was being sent"
            );
        }
        transfer.log_complete();
        Ok(transfer.moved())
    }
}

fn chunk_len(remaining: u64) -> usize {
    usize::try_from(remaining).map_or(CHUNK_SIZE, |r| r.min(CHUNK_SIZE))
}

/// Writes `data` unless an earlier write already failed.
async fn write_chunk<W>(file: &mut W, failed: &mut Option<io::Error>, data: &[u8])
where
    W: AsyncWrite + Unpin,
{
    if failed.is_some() {
        return;
    }
    if let Err(e) = file.write_all(data).await {
        warn!("file write failed, discarding rest of payload: {e}");
        *failed = Some(e);
    }
}

#[cfg(test)]
mod tests {
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use super::*;

    /// Payload bytes with a recognisable pattern.
    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    /// A file that refuses every write.
    struct FullDisk;

    impl AsyncWrite for FullDisk {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::Error::other("no space left on device")))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[test]
    fn transfer_accounting() {
        let mut t = Transfer::new(Direction::Inbound, 10);
        assert_eq!(t.direction(), Direction::Inbound);
        assert_eq!(t.target(), 10);
        assert_eq!(t.remaining().unwrap(), 10);
        t.advance(4);
        assert_eq!(t.moved(), 4);
        assert_eq!(t.remaining().unwrap(), 6);
        t.advance(6);
        assert_eq!(t.remaining().unwrap(), 0);
    }

    #[test]
    fn transfer_underflow_is_an_error() {
        let mut t = Transfer::new(Direction::Inbound, 2);
        t.advance(3);
        assert!(matches!(
            t.remaining(),
            Err(ProtocolError::SizeUnderflow {
                declared: 2,
                moved: 3
            })
        ));
    }

    #[test]
    fn chunk_len_is_bounded() {
        assert_eq!(chunk_len(0), 0);
        assert_eq!(chunk_len(17), 17);
        assert_eq!(chunk_len(CHUNK_SIZE as u64), CHUNK_SIZE);
        assert_eq!(chunk_len(u64::MAX), CHUNK_SIZE);
    }

    #[tokio::test]
    async fn carryover_written_before_next_read() {
        let payload = pattern(10);
        let mut first = b"u\nf\n10\n\n".to_vec();
        first.extend_from_slice(&payload[..4]);

        // The second read fails: only carryover can have reached the file.
        let mock = tokio_test::io::Builder::new()
            .read(&first)
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let mut framed = FramedStream::new(mock);
        framed.read_header().await.unwrap();

        let mut file = Vec::new();
        let err = framed.receive_into(&mut file, 10).await.unwrap_err();
        assert!(matches!(
            err,
            ChannelError::Transfer {
                moved: 4,
                expected: 10,
                ..
            }
        ));
        assert_eq!(file, &payload[..4]);
    }

    #[tokio::test]
    async fn carryover_then_stream_reads() {
        let payload = pattern(CHUNK_SIZE * 2 + 7);
        let mut first = b"u\nbig\n8199\n\n".to_vec();
        first.extend_from_slice(&payload[..100]);

        let mock = tokio_test::io::Builder::new()
            .read(&first)
            .read(&payload[100..])
            .build();
        let mut framed = FramedStream::new(mock);
        framed.read_header().await.unwrap();

        let mut file = Vec::new();
        let moved = framed.receive_into(&mut file, payload.len() as u64).await.unwrap();
        assert_eq!(moved, payload.len() as u64);
        assert_eq!(file, payload);
    }

    #[tokio::test]
    async fn carryover_past_payload_stays_buffered() {
        let mock = tokio_test::io::Builder::new()
            .read(b"u\na\n3\n\nxyzl\n\n")
            .build();
        let mut framed = FramedStream::new(mock);
        framed.read_header().await.unwrap();

        let mut file = Vec::new();
        assert_eq!(framed.receive_into(&mut file, 3).await.unwrap(), 3);
        assert_eq!(file, b"xyz");
        assert_eq!(framed.carryover(), b"l\n\n");
        assert_eq!(framed.read_header().await.unwrap(), "l\n\n");
    }

    #[tokio::test]
    async fn zero_length_payload_reads_nothing() {
        // Any read would hit the scripted error.
        let mock = tokio_test::io::Builder::new()
            .read_error(io::Error::other("must not be read"))
            .build();
        let mut framed = FramedStream::new(mock);

        let mut file = Vec::new();
        assert_eq!(framed.receive_into(&mut file, 0).await.unwrap(), 0);
        assert!(file.is_empty());

        // Consume the scripted action so the mock is satisfied on drop.
        let mut scratch = [0u8; 1];
        assert!(framed.read_some(&mut scratch).await.is_err());
    }

    #[tokio::test]
    async fn eof_mid_payload_is_transfer_error() {
        let mock = tokio_test::io::Builder::new().read(b"abc").build();
        let mut framed = FramedStream::new(mock);

        let mut file = Vec::new();
        match framed.receive_into(&mut file, 8).await {
            Err(ChannelError::Transfer {
                moved,
                expected,
                source,
            }) => {
                assert_eq!((moved, expected), (3, 8));
                assert_eq!(source.kind(), io::ErrorKind::UnexpectedEof);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(file, b"abc");
    }

    #[tokio::test]
    async fn failed_file_write_still_drains_payload() {
        let mock = tokio_test::io::Builder::new()
            .read(b"0123456789")
            .read(b"d\nx\n\n")
            .build();
        let mut framed = FramedStream::new(mock);

        let err = framed.receive_into(&mut FullDisk, 10).await.unwrap_err();
        assert!(matches!(err, ChannelError::FileSystem(_)));
        assert!(!err.is_fatal());
        // Still in frame: the next header parses.
        assert_eq!(framed.read_header().await.unwrap(), "d\nx\n\n");
    }

    #[tokio::test]
    async fn discard_consumes_declared_bytes() {
        let mock = tokio_test::io::Builder::new()
            .read(b"u\nx\n5\n\nab")
            .read(b"cde")
            .build();
        let mut framed = FramedStream::new(mock);
        framed.read_header().await.unwrap();

        assert_eq!(framed.discard(5).await.unwrap(), 5);
        assert!(framed.carryover().is_empty());
    }

    #[tokio::test]
    async fn send_from_writes_whole_file() {
        let payload = pattern(CHUNK_SIZE + 1);
        let mock = tokio_test::io::Builder::new()
            .write(&payload[..CHUNK_SIZE])
            .write(&payload[CHUNK_SIZE..])
            .build();
        let mut framed = FramedStream::new(mock);

        let mut file = &payload[..];
        let sent = framed.send_from(&mut file, payload.len() as u64).await.unwrap();
        assert_eq!(sent, payload.len() as u64);
    }

    #[tokio::test]
    async fn send_from_empty_file() {
        let mock = tokio_test::io::Builder::new().build();
        let mut framed = FramedStream::new(mock);

        let mut file: &[u8] = &[];
        assert_eq!(framed.send_from(&mut file, 0).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn send_from_reports_stream_failure() {
        let mock = tokio_test::io::Builder::new()
            .write_error(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
            .build();
        let mut framed = FramedStream::new(mock);

        let mut file: &[u8] = b"data";
        let err = framed.send_from(&mut file, 4).await.unwrap_err();
        assert!(matches!(err, ChannelError::Transfer { moved: 0, expected: 4, .. }));
    }

    #[tokio::test]
    async fn real_file_roundtrip_through_duplex() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        let dst = dir.path().join("dst.bin");
        let payload = pattern(100_003);
        std::fs::write(&src, &payload).unwrap();

        let (a, b) = tokio::io::duplex(CHUNK_SIZE);
        let mut sender = FramedStream::new(a);
        let mut receiver = FramedStream::new(b);

        let send = async {
            let mut file = tokio::fs::File::open(&src).await.unwrap();
            sender.send_from(&mut file, payload.len() as u64).await.unwrap()
        };
        let recv = async {
            let mut file = tokio::fs::File::create(&dst).await.unwrap();
            receiver
                .receive_into(&mut file, payload.len() as u64)
                .await
                .unwrap()
        };
        let (sent, received) = tokio::join!(send, recv);

        assert_eq!(sent, received);
        assert_eq!(std::fs::read(&dst).unwrap(), payload);
    }
}
