use std::path::{Component, Path, PathBuf};

use crate::consts;
use crate::context::BuildContext;

/// Map an absolute directory back to the import path rooted at one of the
/// source roots. Does not require sources to exist, so the result may not
/// be a loadable import path.
pub fn dir_to_import_path(ctx: &BuildContext, dir: &Path) -> Option<String> {
    for src_dir in &ctx.src_dirs {
        if let Ok(rel) = dir.strip_prefix(src_dir) {
            if rel.as_os_str().is_empty() {
                continue;
            }
            return Some(path_to_import(rel));
        }
    }
    None
}

/// Map an import path to the first source root that contains it as a
/// directory.
pub fn import_path_to_dir(ctx: &BuildContext, import_path: &str) -> Option<PathBuf> {
    for src_dir in &ctx.src_dirs {
        let dir = src_dir.join(import_path);
        if dir.is_dir() {
            return Some(dir);
        }
    }
    None
}

/// Walk up from `dir` until a directory containing the version-control
/// marker is found. `None` means no enclosing project.
pub fn project_dir(start: &Path) -> Option<PathBuf> {
    let mut dir = start.to_path_buf();
    loop {
        if dir.join(consts::VCS_MARKER).exists() {
            return Some(dir);
        }
        if !dir.pop() {
            return None;
        }
    }
}

/// The nearest project directory above the directory an import path maps
/// to, if any.
pub fn import_path_to_project_dir(ctx: &BuildContext, import_path: &str) -> Option<PathBuf> {
    project_dir(&import_path_to_dir(ctx, import_path)?)
}

/// Whether an argument is a filesystem path rather than an import path.
pub fn is_local(arg: &str) -> bool {
    arg == "."
        || arg == ".."
        || arg.starts_with("./")
        || arg.starts_with("../")
        || Path::new(arg).is_absolute()
}

/// Convert a local argument to a fully-qualified import path when it falls
/// under a source root; otherwise the absolute path is returned unchanged
/// (the caller decides whether that is an error).
pub fn normalize_import_path(ctx: &BuildContext, arg: &str) -> String {
    if !is_local(arg) {
        return arg.to_string();
    }

    let mut dir = PathBuf::from(arg);
    if !dir.is_absolute() {
        dir = normalize_lexically(&ctx.cwd.join(dir));
    }

    match dir_to_import_path(ctx, &dir) {
        Some(found) => found,
        None => dir.to_string_lossy().into_owned(),
    }
}

/// Whether the import path sits under a vendored subtree.
pub fn is_vendored(import_path: &str) -> bool {
    import_path.contains(consts::VENDOR_SEGMENT) || import_path.starts_with("vendor/")
}

/// Resolve `.` and `..` components without touching the filesystem.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

fn path_to_import(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_with_root(root: &Path) -> BuildContext {
        let mut ctx = BuildContext::new();
        ctx.src_dirs = vec![root.to_path_buf()];
        ctx
    }

    #[test]
    fn dir_round_trips_through_import_path() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        std::fs::create_dir_all(src.join("a/b")).unwrap();

        let ctx = ctx_with_root(&src);
        let import = dir_to_import_path(&ctx, &src.join("a/b")).unwrap();
        assert_eq!(import, "a/b");
        assert_eq!(import_path_to_dir(&ctx, &import).unwrap(), src.join("a/b"));
    }

    #[test]
    fn project_dir_walks_to_marker() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join(".git")).unwrap();
        std::fs::create_dir_all(tmp.path().join("a/b/c")).unwrap();

        assert_eq!(
            project_dir(&tmp.path().join("a/b/c")),
            Some(tmp.path().to_path_buf())
        );
    }

    #[test]
    fn project_dir_gives_up_at_root() {
        assert!(project_dir(Path::new("/nonexistent-zb-root")).is_none());
    }

    #[test]
    fn local_detection() {
        assert!(is_local("."));
        assert!(is_local("./x"));
        assert!(is_local("../x"));
        assert!(is_local("/abs"));
        assert!(!is_local("example.com/pkg"));
    }

    #[test]
    fn vendored_detection() {
        assert!(is_vendored("a/vendor/b"));
        assert!(is_vendored("vendor/b"));
        assert!(!is_vendored("a/b"));
    }

    #[test]
    fn lexical_normalization() {
        assert_eq!(
            normalize_lexically(Path::new("/a/b/../c/./d")),
            PathBuf::from("/a/c/d")
        );
    }
}
