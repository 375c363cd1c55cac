use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use zb_core::cache::{CacheKind, CacheStore};
use zb_core::consts;
use zb_core::context::BuildContext;
use zb_core::flags::{LintFlags, TestFlags};
use zb_core::hasher::Hasher;
use zb_core::lint::LintRunner;
use zb_core::package::{ImportPath, LoadError, PackageMeta, PackageSource};
use zb_core::testrun::TestRunner;

#[derive(Debug, Default)]
struct TableSource {
    table: HashMap<String, Arc<PackageMeta>>,
}

impl TableSource {
    fn add(&mut self, root: &Path, import: &str, files: &[(&str, &str)]) -> Arc<PackageMeta> {
        let dir = root.join(import);
        fs::create_dir_all(&dir).unwrap();

        let mut sources = Vec::new();
        for (name, body) in files {
            fs::write(dir.join(name), body).unwrap();
            sources.push(name.to_string());
        }

        let meta = Arc::new(PackageMeta {
            import_path: ImportPath::new(import),
            dir,
            sources,
            ancillary: vec![],
            test_sources: vec![],
            xtest_sources: vec![],
            imports: vec![],
            test_imports: vec![],
            xtest_imports: vec![],
            is_command: false,
            is_vendored: import.contains("/vendor/"),
            install_path: root.join("pkg").join(format!("{import}.a")),
        });

        self.table.insert(import.to_string(), meta.clone());
        meta
    }
}

impl PackageSource for TableSource {
    fn load_import(&self, import_path: &str, _src_dir: &Path) -> Result<Arc<PackageMeta>, LoadError> {
        self.table
            .get(import_path)
            .cloned()
            .ok_or_else(|| LoadError::NoSources {
                import_path: import_path.to_string(),
            })
    }
}

fn context(cache_root: PathBuf) -> Arc<BuildContext> {
    let mut ctx = BuildContext::new();
    ctx.cache_root = cache_root;
    ctx.warn_todo_fixme = false;
    Arc::new(ctx)
}

#[tokio::test]
async fn cached_test_results_replay_in_order() {
    let tmp = tempfile::tempdir().unwrap();
    let cache_root = tmp.path().join("cache");

    let mut src = TableSource::default();
    let a = src.add(tmp.path(), "proj/a", &[("a.go", "package a\n")]);
    let b = src.add(tmp.path(), "proj/b", &[("b.go", "package b\n")]);
    let hasher = Arc::new(Hasher::new(Arc::new(src)));

    let flags = TestFlags::default();
    let cache = CacheStore::new(cache_root.clone(), false);

    // seed the cache the way a previous run would have left it
    let ha = hasher.test_hash(&a, &flags).unwrap();
    cache
        .write(
            &cache.path(CacheKind::Test, &ha.to_hex()),
            b"ok  \tproj/a\t0.01s (cached)\n",
        )
        .unwrap();

    let hb = hasher.test_hash(&b, &flags).unwrap();
    cache
        .write(
            &cache.path(CacheKind::Test, &hb.to_hex()),
            b"--- FAIL: TestB (0.00s)\nFAIL\nFAIL\tproj/b\t0.02s (cached)\n",
        )
        .unwrap();

    let runner = TestRunner::new(context(cache_root), hasher, flags);

    let mut out = Vec::new();
    let mut eout = Vec::new();
    let code = runner
        .run(&[a, b], &mut out, &mut eout)
        .await
        .unwrap();

    assert_eq!(code, consts::EXIT_FAILED);
    assert_eq!(out, b"ok  \tproj/a\t0.01s (cached)\n");
    assert_eq!(
        eout,
        b"--- FAIL: TestB (0.00s)\nFAIL\nFAIL\tproj/b\t0.02s (cached)\n"
    );
}

#[tokio::test]
async fn vendored_packages_are_excluded_from_test() {
    let tmp = tempfile::tempdir().unwrap();
    let cache_root = tmp.path().join("cache");

    let mut src = TableSource::default();
    let v = src.add(tmp.path(), "proj/vendor/dep", &[("d.go", "package d\n")]);
    let hasher = Arc::new(Hasher::new(Arc::new(src)));

    let runner = TestRunner::new(context(cache_root), hasher, TestFlags::default());

    let mut out = Vec::new();
    let mut eout = Vec::new();
    // a vendored-only list runs nothing and succeeds without a driver
    let code = runner.run(&[v], &mut out, &mut eout).await.unwrap();

    assert_eq!(code, consts::EXIT_OK);
    assert!(out.is_empty());
}

#[tokio::test]
async fn list_only_prints_uncached_packages() {
    let tmp = tempfile::tempdir().unwrap();
    let cache_root = tmp.path().join("cache");

    let mut src = TableSource::default();
    let a = src.add(tmp.path(), "proj/a", &[("a.go", "package a\n")]);
    let hasher = Arc::new(Hasher::new(Arc::new(src)));

    let mut ctx = BuildContext::new();
    ctx.cache_root = cache_root;
    ctx.list_only = true;
    let runner = TestRunner::new(Arc::new(ctx), hasher, TestFlags::default());

    let mut out = Vec::new();
    let mut eout = Vec::new();
    let code = runner.run(&[a], &mut out, &mut eout).await.unwrap();

    assert_eq!(code, consts::EXIT_OK);
    assert_eq!(String::from_utf8(out).unwrap(), "proj/a\n");
}

#[tokio::test]
async fn cached_lint_findings_replay_through_the_filter() {
    let tmp = tempfile::tempdir().unwrap();
    let cache_root = tmp.path().join("cache");

    let mut src = TableSource::default();
    let a = src.add(tmp.path(), "proj/a", &[("a.go", "package a\n")]);
    let hasher = Arc::new(Hasher::new(Arc::new(src)));

    let flags = LintFlags::default();
    let cache = CacheStore::new(cache_root.clone(), false);

    let ha = hasher.lint_hash(&a, &flags.lint_args(), false).unwrap();
    cache
        .write(
            &cache.path(CacheKind::Lint, &ha.to_hex()),
            b"a.go:1:1:warning: something smells (golint) (cached)\n",
        )
        .unwrap();

    let runner = LintRunner::new(context(cache_root), hasher, &flags, false, vec![]);

    let mut out = Vec::new();
    let mut eout = Vec::new();
    let code = runner.run(&[a], &mut out, &mut eout).await.unwrap();

    assert_eq!(code, consts::EXIT_FAILED);
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "a.go:1:1:warning: something smells (golint) (cached)\n"
    );
}

#[tokio::test]
async fn fully_filtered_replay_exits_clean() {
    let tmp = tempfile::tempdir().unwrap();
    let cache_root = tmp.path().join("cache");

    let mut src = TableSource::default();
    let a = src.add(tmp.path(), "proj/a", &[("a.go", "package a\n")]);
    let hasher = Arc::new(Hasher::new(Arc::new(src)));

    let flags = LintFlags::default();
    let cache = CacheStore::new(cache_root.clone(), false);

    // the only finding is a golint missing-comment message
    let ha = hasher.lint_hash(&a, &flags.lint_args(), false).unwrap();
    cache
        .write(
            &cache.path(CacheKind::Lint, &ha.to_hex()),
            b"a.go:1:1:warning: exported type A should have comment or be unexported (golint) (cached)\n",
        )
        .unwrap();

    let runner = LintRunner::new(context(cache_root), hasher, &flags, true, vec![]);

    let mut out = Vec::new();
    let mut eout = Vec::new();
    let code = runner.run(&[a], &mut out, &mut eout).await.unwrap();

    assert_eq!(code, consts::EXIT_OK);
    assert!(out.is_empty());
    assert!(eout.is_empty());
}
