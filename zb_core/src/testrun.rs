use std::collections::VecDeque;
use std::io::Write;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::LazyLock;

use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, warn};

use crate::cache::{CacheKind, CacheStore};
use crate::consts;
use crate::context::BuildContext;
use crate::dependency::TargetMode;
use crate::driver::{self, Driver};
use crate::flags::TestFlags;
use crate::hasher::Hasher;
use crate::ops::OpError;
use crate::package::{PackageLoader, PackageMeta};
use crate::project;

/// The driver's per-package terminal line: status, import path, duration
/// or bracketed reason.
static SUMMARY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\A(\?|ok|FAIL) {0,3}\t([^ \t]+)[ \t]([0-9.]+s|\[.*\])\z").unwrap()
});

const FAIL: &str = "FAIL";

/// Runs the test operation: cached packages replay, the rest are batched
/// into a single driver test invocation whose output is framed per
/// package, teed to the console and ingested into the cache.
#[derive(Debug)]
pub struct TestRunner {
    ctx: Arc<BuildContext>,
    driver: Driver,
    cache: CacheStore,
    hasher: Arc<Hasher>,
    flags: TestFlags,
}

impl TestRunner {
    pub fn new(ctx: Arc<BuildContext>, hasher: Arc<Hasher>, flags: TestFlags) -> Self {
        let driver = Driver::new(ctx.driver.clone());
        let cache = CacheStore::new(ctx.cache_root.clone(), ctx.force);
        Self {
            ctx,
            driver,
            cache,
            hasher,
            flags,
        }
    }

    fn have_result(&self, pkg: &PackageMeta) -> Result<bool, OpError> {
        let hash = self.hasher.test_hash(pkg, &self.flags)?;
        Ok(self.cache.have(CacheKind::Test, &hash))
    }

    /// Run tests for `pkgs` (already sorted). Cached results are emitted
    /// in order, interleaved with fresh ones as the driver produces them.
    pub async fn run(
        &self,
        pkgs: &[Arc<PackageMeta>],
        out: &mut dyn Write,
        eout: &mut dyn Write,
    ) -> Result<i32, OpError> {
        let mut kept: Vec<Arc<PackageMeta>> = Vec::new();
        let mut to_run: VecDeque<Arc<PackageMeta>> = VecDeque::new();

        for pkg in pkgs {
            if pkg.is_vendored {
                continue;
            }
            kept.push(pkg.clone());
            if !self.have_result(pkg)? {
                to_run.push_back(pkg.clone());
            }
        }

        if self.ctx.list_only {
            for pkg in &to_run {
                writeln!(out, "{}", pkg.import_path).map_err(io_err)?;
            }
            return Ok(consts::EXIT_OK);
        }

        let mut code = consts::EXIT_OK;

        let mut child = None;
        if !to_run.is_empty() {
            let mut args = vec!["test".to_string()];
            args.extend(self.flags.test_args());
            for pkg in &to_run {
                args.push(pkg.import_path.to_string());
            }

            debug!("→ {}", driver::quote_command(&self.driver.program, &args));

            let mut cmd = tokio::process::Command::new(&self.driver.program);
            cmd.args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped());

            let mut spawned = cmd.spawn().map_err(|source| {
                OpError::Driver(crate::driver::DriverError::Spawn {
                    program: self.driver.program.clone(),
                    source,
                })
            })?;

            // compile failures and the like arrive on stderr; they are not
            // part of the framed stream, surface them on the log
            if let Some(stderr) = spawned.stderr.take() {
                tokio::spawn(async move {
                    let mut lines = BufReader::new(stderr).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        error!("← {line}");
                    }
                });
            }

            child = Some(spawned);
        }

        let mut reader = child
            .as_mut()
            .and_then(|c| c.stdout.take())
            .map(BufReader::new);

        for pkg in &kept {
            let fresh = to_run.front().map(|p| p.dir == pkg.dir).unwrap_or(false);

            if fresh {
                to_run.pop_front();
                if let Some(reader) = reader.as_mut() {
                    let failed = self.read_result(reader, pkg, out, eout).await?;
                    if failed && code == consts::EXIT_OK {
                        code = consts::EXIT_FAILED;
                    }
                }
            } else {
                match self.show_result(pkg, out, eout) {
                    Ok(passed) => {
                        if !passed && code == consts::EXIT_OK {
                            code = consts::EXIT_FAILED;
                        }
                    }
                    Err(err) => {
                        warn!(import_path = %pkg.import_path, %err, "unreadable cache entry, skipping replay");
                    }
                }
            }
        }

        // anything after the last summary line passes through untouched
        if let Some(reader) = reader.as_mut() {
            let mut rest = String::new();
            let mut lines = reader.lines();
            while let Ok(Some(line)) = lines.next_line().await {
                rest.push_str(&line);
                rest.push('\n');
            }
            out.write_all(rest.as_bytes()).map_err(io_err)?;
        }

        if let Some(mut child) = child {
            let status = child.wait().await.map_err(|source| {
                OpError::Driver(crate::driver::DriverError::Spawn {
                    program: self.driver.program.clone(),
                    source,
                })
            })?;
            let ecode = driver::exit_code(status);
            if code == consts::EXIT_OK {
                code = ecode;
            }
        }

        Ok(code)
    }

    /// Consume framed output for one package: everything up to and
    /// including its summary line. The buffer plus the annotated summary
    /// goes into the cache; the original bytes go to the console.
    async fn read_result<'a>(
        &self,
        reader: &mut BufReader<tokio::process::ChildStdout>,
        pkg: &PackageMeta,
        out: &'a mut dyn Write,
        eout: &'a mut dyn Write,
    ) -> Result<bool, OpError> {
        let hash = self.hasher.test_hash(pkg, &self.flags)?;

        let mut echo = String::new();
        let mut entry = String::new();
        let mut failed = false;

        loop {
            let mut line = String::new();
            let n = reader.read_line(&mut line).await.map_err(io_err)?;
            if n == 0 {
                break;
            }

            echo.push_str(&line);
            let trimmed = line.strip_suffix('\n').unwrap_or(&line);

            let m = match SUMMARY_RE.captures(trimmed) {
                None => {
                    entry.push_str(&line);
                    continue;
                }
                Some(m) => m,
            };

            failed = &m[1] == FAIL;
            entry.push_str(trimmed);
            entry.push_str(" (cached)\n");

            if !hash.is_cycle() {
                let path = self.cache.path(CacheKind::Test, &hash.to_hex());
                if let Err(err) = self.cache.write(&path, entry.as_bytes()) {
                    warn!(path = %path.display(), %err, "could not write test cache entry");
                }
            }
            break;
        }

        let sink = if failed { eout } else { out };
        sink.write_all(echo.as_bytes()).map_err(io_err)?;

        Ok(failed)
    }

    /// Replay a cached result verbatim; the stored bytes already carry the
    /// annotated summary line.
    fn show_result(
        &self,
        pkg: &PackageMeta,
        out: &mut dyn Write,
        eout: &mut dyn Write,
    ) -> Result<bool, OpError> {
        let hash = self.hasher.test_hash(pkg, &self.flags)?;
        if hash.is_cycle() {
            return Ok(true);
        }

        let path = self.cache.path(CacheKind::Test, &hash.to_hex());
        let data = self.cache.read(&path).map_err(|source| OpError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let last_line = data
            .split(|b| *b == b'\n')
            .filter(|l| !l.is_empty())
            .next_back()
            .unwrap_or_default();

        if last_line.starts_with(FAIL.as_bytes()) {
            eout.write_all(&data).map_err(io_err)?;
            return Ok(false);
        }

        out.write_all(&data).map_err(io_err)?;
        Ok(true)
    }
}

fn io_err(source: std::io::Error) -> OpError {
    OpError::Io {
        path: String::new(),
        source,
    }
}

/// The test operation end to end: resolve packages, optionally generate
/// first, then run the batch.
pub async fn run_test(
    ctx: Arc<BuildContext>,
    loader: Arc<PackageLoader>,
    flags: TestFlags,
    generate: bool,
    args: &[String],
    out: &mut dyn Write,
    eout: &mut dyn Write,
) -> Result<i32, OpError> {
    let pkgs = if ctx.package_mode {
        project::list_packages(&loader, args)?
    } else {
        if generate {
            crate::ops::run_build(
                ctx.clone(),
                loader.clone(),
                flags.build.clone(),
                TargetMode::Generate,
                args,
            )
            .await?;
        }

        let mut pkgs: Vec<Arc<PackageMeta>> = project::resolve_projects(&loader, args)?
            .into_iter()
            .flat_map(|p| p.packages)
            .collect();
        pkgs.sort_by(|a, b| a.dir.cmp(&b.dir));
        pkgs.dedup_by(|a, b| a.dir == b.dir);
        pkgs
    };

    let hasher = Arc::new(Hasher::new(loader.clone()));
    let runner = TestRunner::new(ctx, hasher, flags);
    runner.run(&pkgs, out, eout).await
}
