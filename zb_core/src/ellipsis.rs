use std::path::{Path, PathBuf};

use tracing::warn;

use crate::consts;
use crate::context::BuildContext;
use crate::pathutil;

/// The wildcard accepted at the end of an argument, in either spelling.
const ELLIPSIS: [&str; 2] = ["...", "\u{2026}"];

pub fn has_ellipsis(arg: &str) -> bool {
    ELLIPSIS.iter().any(|e| arg == *e || arg.ends_with(&format!("/{e}")))
}

/// Strip the trailing wildcard, leaving the prefix (possibly empty).
fn strip_ellipsis(arg: &str) -> &str {
    for e in ELLIPSIS {
        if arg == e {
            return "";
        }
        if let Some(prefix) = arg.strip_suffix(&format!("/{e}")) {
            return prefix;
        }
    }
    arg
}

/// Expand every argument, replacing wildcard forms by the import paths of
/// all package directories below them. Non-wildcard arguments pass through
/// untouched. Expansion is best-effort: unreadable directories are skipped
/// with a warning.
pub fn expand(ctx: &BuildContext, args: &[String]) -> Vec<String> {
    let mut out = Vec::new();

    for arg in args {
        if !has_ellipsis(arg) {
            out.push(arg.clone());
            continue;
        }

        let prefix = strip_ellipsis(arg);
        if prefix.is_empty() {
            for root in &ctx.src_dirs {
                walk_packages(ctx, root, &mut out);
            }
            continue;
        }

        let dir = if pathutil::is_local(prefix) {
            let p = PathBuf::from(prefix);
            if p.is_absolute() {
                Some(p)
            } else {
                Some(pathutil::normalize_lexically(&ctx.cwd.join(p)))
            }
        } else {
            pathutil::import_path_to_dir(ctx, prefix)
        };

        match dir {
            Some(dir) if dir.is_dir() => walk_packages(ctx, &dir, &mut out),
            _ => warn!(arg = %arg, "ellipsis prefix does not name a directory, skipping"),
        }
    }

    out
}

/// Whether a directory entry should be descended into.
fn keep_dir(name: &str) -> bool {
    if name.starts_with('.') || name.starts_with('_') {
        return false;
    }
    !consts::ELLIPSIS_SKIP.contains(&name)
}

/// Whether a file name is a buildable, non-test source.
fn is_package_source(name: &str) -> bool {
    name.ends_with(consts::SOURCE_SUFFIX) && !name.ends_with(consts::TEST_SUFFIX)
}

/// Emit the import path of every directory under `root` that holds at
/// least one non-test source file.
fn walk_packages(ctx: &BuildContext, root: &Path, out: &mut Vec<String>) {
    let mut builder = ignore::WalkBuilder::new(root);
    builder.standard_filters(false);
    builder.sort_by_file_name(|a, b| a.cmp(b));
    builder.filter_entry(|entry| {
        if entry.depth() == 0 {
            return true;
        }
        let name = entry.file_name().to_string_lossy();
        match entry.file_type() {
            Some(ft) if ft.is_dir() => keep_dir(&name),
            _ => true,
        }
    });
    let walker = builder.build();

    let mut dirs = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(root = %root.display(), %err, "skipping unreadable entry");
                continue;
            }
        };

        let is_source_file = entry
            .file_type()
            .map(|ft| ft.is_file())
            .unwrap_or(false)
            && is_package_source(&entry.file_name().to_string_lossy());

        if is_source_file {
            if let Some(dir) = entry.path().parent() {
                if dirs.last().map(Path::new) != Some(dir) {
                    dirs.push(dir.to_string_lossy().into_owned());
                }
            }
        }
    }

    dirs.sort();
    dirs.dedup();

    for dir in dirs {
        if let Some(import) = pathutil::dir_to_import_path(ctx, Path::new(&dir)) {
            out.push(import);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn ctx_with_root(root: &Path) -> BuildContext {
        let mut ctx = BuildContext::new();
        ctx.src_dirs = vec![root.to_path_buf()];
        ctx.cwd = root.to_path_buf();
        ctx
    }

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"package x\n").unwrap();
    }

    #[test]
    fn expands_packages_below_prefix() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        touch(&src.join("a/a.go"));
        touch(&src.join("a/b/b.go"));
        touch(&src.join("a/b/c/c.go"));

        let ctx = ctx_with_root(&src);
        let got = expand(&ctx, &["a/...".to_string()]);
        assert_eq!(got, vec!["a", "a/b", "a/b/c"]);
    }

    #[test]
    fn skips_skip_list_and_hidden_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        touch(&src.join("a/a.go"));
        touch(&src.join("a/vendor/v/v.go"));
        touch(&src.join("a/testdata/t/t.go"));
        touch(&src.join("a/.hidden/h.go"));
        touch(&src.join("a/_skip/s.go"));

        let ctx = ctx_with_root(&src);
        let got = expand(&ctx, &["a/...".to_string()]);
        assert_eq!(got, vec!["a"]);
    }

    #[test]
    fn test_only_dirs_are_not_packages() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        touch(&src.join("a/a.go"));
        touch(&src.join("a/t/only_test.go"));

        let ctx = ctx_with_root(&src);
        let got = expand(&ctx, &["a/...".to_string()]);
        assert_eq!(got, vec!["a"]);
    }

    #[test]
    fn concrete_args_pass_through() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = ctx_with_root(tmp.path());
        let got = expand(&ctx, &["example.com/x".to_string()]);
        assert_eq!(got, vec!["example.com/x"]);
    }

    #[test]
    fn unicode_ellipsis_is_accepted() {
        assert!(has_ellipsis("a/\u{2026}"));
        assert!(has_ellipsis("a/..."));
        assert!(!has_ellipsis("a/..x"));
    }
}
