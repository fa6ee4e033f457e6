//! Text headers: parsing and encoding.
//!
//! A header is a sequence of `\n`-terminated fields followed by an empty
//! line. Field values therefore can never contain a newline; encoders reject
//! such values instead of producing a frame the peer would misread.

use std::fmt;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{ChannelError, ProtocolError};
use crate::framed::FramedStream;

const OP_UPLOAD: &str = "u";
const OP_DOWNLOAD: &str = "d";
const OP_LIST: &str = "l";
const REPLY_MISSING: &str = "!";

/// A client request, as carried by one header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Followed on the wire by exactly `size` payload bytes.
    Upload { file_name: String, size: u64 },
    Download { file_name: String },
    List,
}

impl Request {
    /// Parses a header produced by [`FramedStream::read_header`](crate::FramedStream::read_header).
    pub fn parse(header: &str) -> Result<Self, ProtocolError> {
        let mut fields = fields(header);
        let op = fields.next().unwrap_or_default();
        match op {
            OP_UPLOAD => {
                let file_name = required(fields.next(), "file name")?;
                let size = parse_size(&required(fields.next(), "size")?)?;
                Ok(Self::Upload { file_name, size })
            }
            OP_DOWNLOAD => {
                let file_name = required(fields.next(), "file name")?;
                Ok(Self::Download { file_name })
            }
            OP_LIST => Ok(Self::List),
            other => Err(ProtocolError::UnknownOperation(other.to_string())),
        }
    }

    /// Encodes the request header (without any payload).
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let text = match self {
            Self::Upload { file_name, size } => {
                check_field(file_name)?;
                format!("{OP_UPLOAD}\n{file_name}\n{size}\n\n")
            }
            Self::Download { file_name } => {
                check_field(file_name)?;
                format!("{OP_DOWNLOAD}\n{file_name}\n\n")
            }
            Self::List => format!("{OP_LIST}\n\n"),
        };
        Ok(text.into_bytes())
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upload { file_name, size } => write!(f, "upload {file_name} ({size} bytes)"),
            Self::Download { file_name } => write!(f, "download {file_name}"),
            Self::List => f.write_str("list"),
        }
    }
}

/// Encodes the one-time user name header.
pub fn encode_user_name(user: &str) -> Result<Vec<u8>, ProtocolError> {
    if user.is_empty() || user.contains('\n') {
        return Err(ProtocolError::InvalidUserName(user.to_string()));
    }
    Ok(format!("{user}\n\n").into_bytes())
}

/// Extracts the user name from its header.
pub fn parse_user_name(header: &str) -> Result<String, ProtocolError> {
    match fields(header).next() {
        Some(user) if !user.is_empty() => Ok(user.to_string()),
        _ => Err(ProtocolError::MissingField("user name")),
    }
}

/// Server reply to a download request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadReply {
    /// Followed on the wire by exactly `size` payload bytes.
    Found { size: u64 },
    /// Only sent by servers configured to report missing files.
    Missing { reason: String },
}

impl DownloadReply {
    pub fn parse(header: &str) -> Result<Self, ProtocolError> {
        let mut fields = fields(header);
        match fields.next() {
            Some(REPLY_MISSING) => Ok(Self::Missing {
                reason: fields.next().unwrap_or_default().to_string(),
            }),
            Some(size) => Ok(Self::Found {
                size: parse_size(size)?,
            }),
            None => Err(ProtocolError::UnexpectedResponse(header.to_string())),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Found { size } => format!("{size}\n\n").into_bytes(),
            Self::Missing { reason } => {
                // A multi-line reason would break framing; keep the first line.
                let reason = reason.lines().next().unwrap_or_default();
                format!("{REPLY_MISSING}\n{reason}\n\n").into_bytes()
            }
        }
    }
}

/// One entry of a listing reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub name: String,
    pub size: u64,
}

/// Server reply to a list request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    pub entries: Vec<ListEntry>,
}

impl Listing {
    /// Encodes `<count>\n` followed by `<name>\n<size>\n` pairs and the
    /// terminating blank line.
    ///
    /// Entry names must be non-empty and newline-free, otherwise the blank
    /// line would appear early. [`Listing::push`] enforces this.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = format!("{}\n", self.entries.len());
        for entry in &self.entries {
            out.push_str(&entry.name);
            out.push('\n');
            out.push_str(&entry.size.to_string());
            out.push('\n');
        }
        out.push('\n');
        out.into_bytes()
    }

    pub fn parse(header: &str) -> Result<Self, ProtocolError> {
        let mut fields = fields(header);
        let count = parse_size(&required(fields.next(), "entry count")?)?;
        let mut entries = Vec::new();
        for _ in 0..count {
            let name = required(fields.next(), "entry name")?;
            let size = parse_size(&required(fields.next(), "entry size")?)?;
            entries.push(ListEntry { name, size });
        }
        if fields.next().is_some() {
            return Err(ProtocolError::UnexpectedResponse(header.to_string()));
        }
        Ok(Self { entries })
    }

    /// Adds an entry, refusing names that cannot be framed.
    pub fn push(&mut self, name: String, size: u64) -> Result<(), ProtocolError> {
        check_field(&name)?;
        self.entries.push(ListEntry { name, size });
        Ok(())
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> FramedStream<S> {
    /// Reads a listing reply line by line.
    ///
    /// A listing grows with the namespace, so unlike [`Listing::parse`] this
    /// does not need the whole reply to fit in one header.
    pub async fn read_listing(&mut self) -> Result<Listing, ChannelError> {
        let count = parse_size(&self.read_line().await?)?;
        let mut entries = Vec::new();
        for _ in 0..count {
            let name = self.read_line().await?;
            if name.is_empty() {
                return Err(ProtocolError::MissingField("entry name").into());
            }
            let size = parse_size(&self.read_line().await?)?;
            entries.push(ListEntry { name, size });
        }
        let end = self.read_line().await?;
        if !end.is_empty() {
            return Err(ProtocolError::UnexpectedResponse(end).into());
        }
        Ok(Listing { entries })
    }
}

/// Final path component of `name`, treating both `/` and `\` as separators.
///
/// Returns `None` when nothing usable is left (`""`, `.`, `..`, or a
/// trailing separator).
pub fn final_component(name: &str) -> Option<&str> {
    let last = name.rsplit(['/', '\\']).next().unwrap_or_default();
    match last {
        "" | "." | ".." => None,
        other => Some(other),
    }
}

/// Header fields with the trailing delimiter stripped.
fn fields(header: &str) -> std::str::Split<'_, char> {
    let body = header.strip_suffix("\n\n").unwrap_or(header);
    body.split('\n')
}

fn required(field: Option<&str>, what: &'static str) -> Result<String, ProtocolError> {
    match field {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => Err(ProtocolError::MissingField(what)),
    }
}

fn parse_size(text: &str) -> Result<u64, ProtocolError> {
    text.trim()
        .parse()
        .map_err(|_| ProtocolError::InvalidSize(text.to_string()))
}

fn check_field(value: &str) -> Result<(), ProtocolError> {
    if value.is_empty() || value.contains('\n') {
        return Err(ProtocolError::InvalidFileName(value.to_string()));
    }
    Ok(())
}
