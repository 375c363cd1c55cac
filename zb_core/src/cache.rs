use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::context;
use crate::hasher::HashVal;

/// Which result family a cache entry belongs to. The kind names both the
/// subdirectory and the file suffix, so the two families cannot collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum CacheKind {
    Test,
    Lint,
}

impl CacheKind {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// The on-disk result cache: `<root>/<kind>/<hex[..3]>/<hex[3..]>.<kind>`.
///
/// Directories are created lazily with owner-only permissions; entries are
/// replaced whole. Concurrent writers for the same hash race and the last
/// one wins, which is acceptable because equal hashes imply equal content.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
    force: bool,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>, force: bool) -> Self {
        Self {
            root: root.into(),
            force,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The entry path for a hex digest. The first three hex characters are
    /// the shard directory.
    pub fn path(&self, kind: CacheKind, hex: &str) -> PathBuf {
        self.root
            .join(kind.as_str())
            .join(&hex[..3])
            .join(format!("{}.{}", &hex[3..], kind.as_str()))
    }

    /// Whether a replayable entry exists. Always false under `force` and
    /// for the cycle sentinel.
    pub fn have(&self, kind: CacheKind, hash: &HashVal) -> bool {
        if self.force || hash.is_cycle() {
            return false;
        }

        let path = self.path(kind, &hash.to_hex());
        fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
    }

    pub fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    /// Write an entry, creating the shard directory with mode 0700 and the
    /// file with mode 0600.
    pub fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;

        if let Some(parent) = path.parent() {
            context::create_private_dir(parent)?;
        }

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)?;
        file.write_all(bytes)
    }
}
