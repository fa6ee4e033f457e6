//! Per-user storage directories.

use std::io;
use std::path::{Path, PathBuf};

use filebox_protocol::{Listing, ProtocolError, final_component};
use tracing::{debug, warn};

/// Maps user names to directories under a common storage root.
#[derive(Debug, Clone)]
pub struct NamespaceResolver {
    base: PathBuf,
}

impl NamespaceResolver {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Returns the namespace of `user`, creating its directory if needed.
    ///
    /// Safe to call concurrently for the same user: creation is
    /// create-if-absent and an existing directory is not an error.
    pub async fn resolve(&self, user: &str) -> Result<Namespace, ResolveError> {
        validate_user_name(user)?;
        self.open(self.base.join(user)).await
    }

    /// Namespace rooted at the storage root itself (single-user mode).
    pub async fn shared(&self) -> Result<Namespace, ResolveError> {
        self.open(self.base.clone()).await
    }

    async fn open(&self, root: PathBuf) -> Result<Namespace, ResolveError> {
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(ResolveError::Io)?;
        debug!(root = %root.display(), "namespace ready");
        Ok(Namespace { root })
    }
}

/// Why a namespace could not be produced.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error(transparent)]
    InvalidUser(#[from] ProtocolError),

    #[error("cannot create namespace directory: {0}")]
    Io(#[source] io::Error),
}

/// A directory confining one session's file operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    root: PathBuf,
}

impl Namespace {
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a client-supplied file name to a path inside the root.
    ///
    /// Only the final path component is kept, so `../../etc/passwd` becomes
    /// `<root>/passwd`.
    pub fn resolve(&self, file_name: &str) -> Result<PathBuf, ProtocolError> {
        final_component(file_name)
            .map(|name| self.root.join(name))
            .ok_or_else(|| ProtocolError::InvalidFileName(file_name.to_string()))
    }

    /// Lists the entries of the root with their sizes, sorted by name.
    pub async fn list(&self) -> io::Result<Listing> {
        let mut dir = tokio::fs::read_dir(&self.root).await?;
        let mut found = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                warn!(root = %self.root.display(), "skipping entry with non UTF-8 name");
                continue;
            };
            if name == "." || name == ".." {
                continue;
            }
            let size = match entry.metadata().await {
                Ok(meta) => meta.len(),
                Err(e) => {
                    warn!(%name, "skipping entry without metadata: {e}");
                    continue;
                }
            };
            found.push((name, size));
        }
        found.sort();

        let mut listing = Listing::default();
        for (name, size) in found {
            if let Err(e) = listing.push(name, size) {
                warn!("skipping unlistable entry: {e}");
            }
        }
        Ok(listing)
    }
}

fn validate_user_name(user: &str) -> Result<(), ProtocolError> {
    let ok = !user.is_empty()
        && user != "."
        && user != ".."
        && !user.contains(['/', '\\', '\0'])
        && !Path::new(user).is_absolute();
    if ok {
        Ok(())
    } else {
        Err(ProtocolError::InvalidUserName(user.to_string()))
    }
}
