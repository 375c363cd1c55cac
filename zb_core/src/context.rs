use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::consts;

/// Ambient configuration shared by every operation of one invocation.
///
/// Created once from flags and environment, then threaded through the
/// loader, the graph and the operations. Never mutated after construction.
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// The compiler driver binary, e.g. `go`.
    pub driver: String,
    /// The external linter binary.
    pub linter: String,
    /// Source roots, in lookup order.
    pub src_dirs: Vec<PathBuf>,
    /// The invocation's working directory.
    pub cwd: PathBuf,
    /// Root of the on-disk result cache.
    pub cache_root: PathBuf,
    /// Treat every cached result as stale.
    pub force: bool,
    /// Operate on the named packages only, not their enclosing projects.
    pub package_mode: bool,
    /// List what would run instead of running it.
    pub list_only: bool,
    /// Warn on TODO/FIXME lines while scanning sources.
    pub warn_todo_fixme: bool,
    /// Leave vendored packages out of project expansion.
    pub exclude_vendor: bool,
    /// Passed to the driver's generate sub-action as `-run`.
    pub generate_run: Option<String>,
}

impl BuildContext {
    pub fn new() -> Self {
        let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self {
            driver: "go".to_string(),
            linter: "gometalinter".to_string(),
            src_dirs: default_src_dirs(),
            cwd,
            cache_root: default_cache_root(),
            force: false,
            package_mode: false,
            list_only: false,
            warn_todo_fixme: true,
            exclude_vendor: false,
            generate_run: None,
        }
    }

    /// Refresh the mtime of `path` to now.
    ///
    /// The driver refuses to rewrite an up-to-date artifact, yet the
    /// artifact's mtime must advance past its inputs for the next staleness
    /// check, so every successful build touches its output.
    pub fn touch(&self, path: &Path) -> io::Result<()> {
        let file = fs::File::open(path)?;
        file.set_modified(SystemTime::now())
    }
}

impl Default for BuildContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Source roots of the toolchain's conventional workspace layout: the
/// `src` directory under each workspace root.
pub fn default_src_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();

    if let Ok(gopath) = env::var("GOPATH") {
        for root in env::split_paths(&gopath) {
            if root.as_os_str().is_empty() {
                continue;
            }
            dirs.push(root.join("src"));
        }
    } else if let Some(home) = dirs::home_dir() {
        dirs.push(home.join("go").join("src"));
    }

    if let Ok(goroot) = env::var("GOROOT") {
        dirs.push(PathBuf::from(goroot).join("src"));
    }

    dirs
}

/// `$HOME/Library/Caches/zb` on darwin, `$HOME/.cache/zb` elsewhere,
/// honoring the platform override the cache crate knows about.
pub fn default_cache_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(env::temp_dir)
        .join(consts::APP_NAME)
}

/// Ensure `dir` exists with owner-only permissions.
pub fn create_private_dir(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    if dir.is_dir() {
        return Ok(());
    }

    fs::DirBuilder::new().recursive(true).mode(0o700).create(dir)
}
