//! Framed transfer protocol shared by the filebox client and server.
//!
//! Every exchange on the stream is a newline-separated text header terminated
//! by a blank line, optionally followed by a raw payload whose length the
//! header declares. The header read may pull payload bytes off the stream
//! along with the header; those bytes stay buffered in [`FramedStream`] and
//! are consumed by the transfer pump before it issues any further reads.
//!
//! # Wire format
//!
//! ```text
//! USER NAME (client -> server, once):   <user>\n\n
//! UPLOAD:    u\n<name>\n<size>\n\n  + <size> raw bytes
//! DOWNLOAD:  d\n<name>\n\n
//!   reply:   <size>\n\n + <size> raw bytes
//!        or  !\n<message>\n\n          (only when the server opts in)
//! LIST:      l\n\n
//!   reply:   <count>\n (<name>\n<size>\n){count} \n
//! ```

pub mod error;
pub mod framed;
pub mod header;
pub mod pump;

pub use error::{ChannelError, ProtocolError};
pub use framed::FramedStream;
pub use header::{DownloadReply, ListEntry, Listing, Request, final_component};
pub use pump::{Direction, Transfer};

/// End-of-header marker.
pub const DELIMITER: &[u8; 2] = b"\n\n";

/// Upper bound on payload bytes moved per stream or file operation.
///
/// This is a tuning parameter, not a protocol constant: peers never
/// negotiate it and may use different values.
pub const CHUNK_SIZE: usize = 4096;

/// Largest header accepted before the delimiter is seen (64 KiB).
pub const MAX_HEADER_LEN: usize = 64 * 1024;
