use std::io::Write;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, error, warn};

use crate::cache::{CacheKind, CacheStore};
use crate::consts;
use crate::context::BuildContext;
use crate::driver;
use crate::flags::LintFlags;
use crate::hasher::Hasher;
use crate::ops::OpError;
use crate::package::{PackageLoader, PackageMeta};
use crate::project;

/// One linter finding: file, line, column, severity, message, linter name,
/// with an optional replay annotation.
static FINDING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\A([^:]*):(\d+):(\d+):(warning|error|info): (.*?) \((\w+)\)( \(cached\))?\z")
        .unwrap()
});

static MISSING_COMMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r" should have comment.* or be unexported").unwrap());

/// File suffixes whose findings are filtered out by default; these name
/// generated files nobody is expected to fix by hand.
pub static DEFAULT_IGNORE_SUFFIXES: &[&str] = &[
    ".pb.go",
    ".pb.gw.go",
    "_string.go",
    "bindata.go",
    "bindata_assetfs.go",
    "static.go",
];

// capture groups of FINDING_RE
const LINT_FILE: usize = 1;
const LINT_SEVERITY: usize = 4;
const LINT_MESSAGE: usize = 5;
const LINT_LINTER: usize = 6;
const LINT_CACHED: usize = 7;

/// Runs the lint operation: cached results replay through the filter, the
/// rest invoke the external linter once per package in that package's
/// directory.
#[derive(Debug)]
pub struct LintRunner {
    ctx: Arc<BuildContext>,
    cache: CacheStore,
    hasher: Arc<Hasher>,
    lint_args: Vec<String>,
    no_tests: bool,
    no_missing_comment: bool,
    ignore_suffixes: Vec<String>,
}

impl LintRunner {
    pub fn new(
        ctx: Arc<BuildContext>,
        hasher: Arc<Hasher>,
        flags: &LintFlags,
        no_missing_comment: bool,
        ignore_suffixes: Vec<String>,
    ) -> Self {
        let cache = CacheStore::new(ctx.cache_root.clone(), ctx.force);

        let ignore_suffixes = if ignore_suffixes.is_empty() {
            DEFAULT_IGNORE_SUFFIXES
                .iter()
                .map(|s| s.to_string())
                .collect()
        } else {
            ignore_suffixes.into_iter().filter(|s| !s.is_empty()).collect()
        };

        Self {
            ctx,
            cache,
            hasher,
            lint_args: flags.lint_args(),
            no_tests: flags.no_tests,
            no_missing_comment,
            ignore_suffixes,
        }
    }

    fn have_result(&self, pkg: &PackageMeta) -> Result<bool, OpError> {
        let hash = self.hasher.lint_hash(pkg, &self.lint_args, self.no_tests)?;
        Ok(self.cache.have(CacheKind::Lint, &hash))
    }

    /// Lint `pkgs` (already sorted). The exit code is non-zero when any
    /// non-ignored finding line was emitted, fresh or replayed.
    pub async fn run(
        &self,
        pkgs: &[Arc<PackageMeta>],
        out: &mut dyn Write,
        eout: &mut dyn Write,
    ) -> Result<i32, OpError> {
        let mut code = consts::EXIT_OK;

        for pkg in pkgs {
            if pkg.is_vendored {
                continue;
            }

            let found = if self.have_result(pkg)? {
                match self.show_result(pkg, out, eout) {
                    Ok(found) => found,
                    Err(err) => {
                        warn!(import_path = %pkg.import_path, %err, "unreadable cache entry, re-linting");
                        self.lint_package(pkg, out, eout).await?
                    }
                }
            } else {
                self.lint_package(pkg, out, eout).await?
            };

            if found && code == consts::EXIT_OK {
                code = consts::EXIT_FAILED;
            }
        }

        Ok(code)
    }

    /// Run the external linter for one package and filter its stream,
    /// ingesting the raw output with replay annotations into the cache.
    async fn lint_package(
        &self,
        pkg: &PackageMeta,
        out: &mut dyn Write,
        eout: &mut dyn Write,
    ) -> Result<bool, OpError> {
        let hash = self.hasher.lint_hash(pkg, &self.lint_args, self.no_tests)?;

        let mut args = self.lint_args.clone();
        args.push(".".to_string());

        debug!("→ {}", driver::quote_command(&self.ctx.linter, &args));

        let output = tokio::process::Command::new(&self.ctx.linter)
            .args(&args)
            .current_dir(&pkg.dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| {
                OpError::Driver(crate::driver::DriverError::Spawn {
                    program: self.ctx.linter.clone(),
                    source,
                })
            })?;

        for line in String::from_utf8_lossy(&output.stderr).lines() {
            if !line.is_empty() {
                error!("← {line}");
            }
        }
        debug!(code = driver::exit_code(output.status), "linter finished");

        let text = String::from_utf8_lossy(&output.stdout);
        let mut entry = String::new();
        let found = self
            .filter_lines(text.lines(), out, eout, Some(&mut entry))
            .map_err(io_err)?;

        if !hash.is_cycle() {
            let path = self.cache.path(CacheKind::Lint, &hash.to_hex());
            if let Err(err) = self.cache.write(&path, entry.as_bytes()) {
                warn!(path = %path.display(), %err, "could not write lint cache entry");
            }
        }

        Ok(found)
    }

    /// Replay a cached entry through the filter.
    fn show_result(
        &self,
        pkg: &PackageMeta,
        out: &mut dyn Write,
        eout: &mut dyn Write,
    ) -> Result<bool, OpError> {
        let hash = self.hasher.lint_hash(pkg, &self.lint_args, self.no_tests)?;
        let path = self.cache.path(CacheKind::Lint, &hash.to_hex());
        let data = self.cache.read(&path).map_err(|source| OpError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let text = String::from_utf8_lossy(&data);
        self.filter_lines(text.lines(), out, eout, None).map_err(io_err)
    }

    /// The shared filter. Finding lines may be dropped (missing-comment
    /// rule, ignored suffixes) or emitted to the severity sink; everything
    /// else passes through. When `cache_buf` is given, the unfiltered
    /// stream is recorded with ` (cached)` appended to each finding line.
    ///
    /// Filtering is idempotent: emitted lines are never rewritten.
    fn filter_lines<'a>(
        &self,
        lines: impl Iterator<Item = &'a str>,
        out: &mut dyn Write,
        eout: &mut dyn Write,
        mut cache_buf: Option<&mut String>,
    ) -> std::io::Result<bool> {
        let mut found = false;

        for line in lines {
            let m = match FINDING_RE.captures(line) {
                None => {
                    if let Some(buf) = cache_buf.as_mut() {
                        buf.push_str(line);
                        buf.push('\n');
                    }
                    writeln!(out, "{line}")?;
                    continue;
                }
                Some(m) => m,
            };

            if let Some(buf) = cache_buf.as_mut() {
                buf.push_str(line);
                if m.get(LINT_CACHED).is_none() {
                    buf.push_str(" (cached)");
                }
                buf.push('\n');
            }

            if self.no_missing_comment
                && &m[LINT_LINTER] == "golint"
                && MISSING_COMMENT_RE.is_match(&m[LINT_MESSAGE])
            {
                continue;
            }

            if self
                .ignore_suffixes
                .iter()
                .any(|s| m[LINT_FILE].ends_with(s.as_str()))
            {
                continue;
            }

            found = true;
            if &m[LINT_SEVERITY] == "error" {
                writeln!(eout, "{line}")?;
            } else {
                writeln!(out, "{line}")?;
            }
        }

        Ok(found)
    }
}

fn io_err(source: std::io::Error) -> OpError {
    OpError::Io {
        path: String::new(),
        source,
    }
}

/// The lint operation end to end.
pub async fn run_lint(
    ctx: Arc<BuildContext>,
    loader: Arc<PackageLoader>,
    flags: LintFlags,
    no_missing_comment: bool,
    ignore_suffixes: Vec<String>,
    args: &[String],
    out: &mut dyn Write,
    eout: &mut dyn Write,
) -> Result<i32, OpError> {
    let pkgs = if ctx.package_mode {
        project::list_packages(&loader, args)?
    } else {
        let mut pkgs: Vec<Arc<PackageMeta>> = project::resolve_projects(&loader, args)?
            .into_iter()
            .flat_map(|p| p.packages)
            .collect();
        pkgs.sort_by(|a, b| a.dir.cmp(&b.dir));
        pkgs.dedup_by(|a, b| a.dir == b.dir);
        pkgs
    };

    let hasher = Arc::new(Hasher::new(loader.clone()));
    let runner = LintRunner::new(ctx, hasher, &flags, no_missing_comment, ignore_suffixes);
    runner.run(&pkgs, out, eout).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner(no_missing_comment: bool) -> LintRunner {
        let ctx = Arc::new(BuildContext::new());
        let loader = Arc::new(PackageLoader::new(ctx.clone(), None));
        let hasher = Arc::new(Hasher::new(loader));
        LintRunner::new(ctx, hasher, &LintFlags::default(), no_missing_comment, vec![])
    }

    fn filter(r: &LintRunner, input: &str) -> (String, String, bool, String) {
        let mut out = Vec::new();
        let mut eout = Vec::new();
        let mut cache = String::new();
        let found = r
            .filter_lines(input.lines(), &mut out, &mut eout, Some(&mut cache))
            .unwrap();
        (
            String::from_utf8(out).unwrap(),
            String::from_utf8(eout).unwrap(),
            found,
            cache,
        )
    }

    #[test]
    fn finding_lines_match() {
        assert!(FINDING_RE.is_match("main.go:10:2:warning: thing is wrong (golint)"));
        assert!(FINDING_RE.is_match("a/b.go:1:1:error: boom (vet)"));
        assert!(FINDING_RE.is_match("b.go:1:1:info: meh (gotype) (cached)"));
        assert!(!FINDING_RE.is_match("plain output"));
        assert!(!FINDING_RE.is_match("b.go:1:1:fatal: nope (vet)"));
    }

    #[test]
    fn findings_fail_and_are_annotated_in_cache() {
        let r = runner(false);
        let (out, eout, found, cache) =
            filter(&r, "main.go:10:2:warning: thing is wrong (golint)\n");

        assert!(found);
        assert_eq!(out, "main.go:10:2:warning: thing is wrong (golint)\n");
        assert!(eout.is_empty());
        assert_eq!(cache, "main.go:10:2:warning: thing is wrong (golint) (cached)\n");
    }

    #[test]
    fn error_severity_goes_to_the_error_sink() {
        let r = runner(false);
        let (out, eout, found, _) = filter(&r, "main.go:1:1:error: boom (vet)\n");
        assert!(found);
        assert!(out.is_empty());
        assert_eq!(eout, "main.go:1:1:error: boom (vet)\n");
    }

    #[test]
    fn missing_comment_findings_are_dropped_when_asked() {
        let line = "x.go:3:1:warning: exported function X should have comment or be unexported (golint)\n";

        let r = runner(true);
        let (out, eout, found, cache) = filter(&r, line);
        assert!(!found);
        assert!(out.is_empty() && eout.is_empty());
        // dropped from the console but still recorded in the cache
        assert!(cache.contains("(cached)"));

        let r = runner(false);
        let (_, _, found, _) = filter(&r, line);
        assert!(found);
    }

    #[test]
    fn ignored_suffixes_are_dropped() {
        let r = runner(false);
        let (out, _, found, _) = filter(&r, "api.pb.go:1:1:warning: generated mess (golint)\n");
        assert!(!found);
        assert!(out.is_empty());
    }

    #[test]
    fn non_findings_pass_through() {
        let r = runner(false);
        let (out, _, found, cache) = filter(&r, "some linter banner\n");
        assert!(!found);
        assert_eq!(out, "some linter banner\n");
        assert_eq!(cache, "some linter banner\n");
    }

    #[test]
    fn filter_is_idempotent() {
        let r = runner(false);
        let input = "main.go:10:2:warning: thing is wrong (golint)\nplain\n";
        let (first, _, _, _) = filter(&r, input);
        let (second, _, _, _) = filter(&r, &first);
        assert_eq!(first, second);
    }

    #[test]
    fn replayed_findings_are_not_reannotated() {
        let r = runner(false);
        let (_, _, _, cache) = filter(&r, "b.go:1:1:info: meh (gotype) (cached)\n");
        assert_eq!(cache, "b.go:1:1:info: meh (gotype) (cached)\n");
    }
}
