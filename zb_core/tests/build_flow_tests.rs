use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use zb_core::context::BuildContext;
use zb_core::dependency::TargetMode;
use zb_core::flags::BuildFlags;
use zb_core::ops;
use zb_core::package::PackageLoader;
use zb_core::project;

/// A miniature workspace: one source root holding one project, inspected
/// through a fake driver that serves canned `list -json` records and logs
/// every build-family invocation.
struct Workspace {
    _tmp: tempfile::TempDir,
    src: PathBuf,
    project_dir: PathBuf,
    fixtures: PathBuf,
    log: PathBuf,
    driver: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        let project_dir = src.join("proj");
        let fixtures = tmp.path().join("fixtures");
        let log = tmp.path().join("invocations.log");
        let driver = tmp.path().join("fake-driver.sh");

        fs::create_dir_all(project_dir.join(".git")).unwrap();
        fs::create_dir_all(&fixtures).unwrap();

        let script = format!(
            r#"#!/bin/sh
cmd="$1"; shift
for last; do :; done
case "$cmd" in
list)
    cat "{fixtures}/$last.json"
    ;;
build)
    echo "build $last" >> "{log}"
    prev=""
    for a; do
        if [ "$prev" = "-o" ]; then : > "$a"; fi
        prev="$a"
    done
    ;;
install)
    echo "install $last" >> "{log}"
    ;;
generate)
    echo "generate $last" >> "{log}"
    : > "$(dirname "$last")/foo.out"
    ;;
esac
"#,
            fixtures = fixtures.display(),
            log = log.display(),
        );
        fs::write(&driver, script).unwrap();
        let mut perms = fs::metadata(&driver).unwrap().permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&driver, perms).unwrap();

        Self {
            _tmp: tmp,
            src,
            project_dir,
            fixtures,
            log,
            driver,
        }
    }

    fn context(&self) -> Arc<BuildContext> {
        let mut ctx = BuildContext::new();
        ctx.driver = self.driver.display().to_string();
        ctx.src_dirs = vec![self.src.clone()];
        ctx.cwd = self.src.clone();
        ctx.warn_todo_fixme = false;
        Arc::new(ctx)
    }

    fn add_package(
        &self,
        import: &str,
        name: &str,
        sources: &[(&str, &str)],
        imports: &[&str],
    ) -> PathBuf {
        let dir = self.src.join(import);
        fs::create_dir_all(&dir).unwrap();

        let mut go_files = Vec::new();
        for (file, body) in sources {
            fs::write(dir.join(file), body).unwrap();
            go_files.push(format!("\"{file}\""));
        }

        let target = if name == "main" {
            String::new()
        } else {
            self.src
                .join("pkg")
                .join(format!("{import}.a"))
                .display()
                .to_string()
        };

        let imports_json = imports
            .iter()
            .map(|i| format!("\"{i}\""))
            .collect::<Vec<_>>()
            .join(", ");

        let json = format!(
            r#"{{
    "Dir": "{dir}",
    "ImportPath": "{import}",
    "Name": "{name}",
    "Target": "{target}",
    "GoFiles": [{go_files}],
    "Imports": [{imports_json}]
}}"#,
            dir = dir.display(),
            go_files = go_files.join(", "),
        );

        let fixture = self.fixtures.join(format!("{import}.json"));
        fs::create_dir_all(fixture.parent().unwrap()).unwrap();
        fs::write(fixture, json).unwrap();

        dir
    }

    fn add_no_sources_fixture(&self, import: &str) {
        let dir = self.src.join(import);
        fs::create_dir_all(&dir).unwrap();

        let json = format!(
            r#"{{
    "Dir": "{dir}",
    "ImportPath": "{import}",
    "Error": {{"Err": "no Go files in {dir}"}}
}}"#,
            dir = dir.display(),
        );

        let fixture = self.fixtures.join(format!("{import}.json"));
        fs::create_dir_all(fixture.parent().unwrap()).unwrap();
        fs::write(fixture, json).unwrap();
    }

    /// Pre-create an install output whose mtime lies in the past, so the
    /// first build sees it stale and the touch after building moves it
    /// forward.
    fn add_stale_output(&self, import: &str) {
        let path = self.src.join("pkg").join(format!("{import}.a"));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"old object\n").unwrap();

        let old = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);
        fs::File::open(&path).unwrap().set_modified(old).unwrap();
    }

    fn invocations(&self) -> Vec<String> {
        fs::read_to_string(&self.log)
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    fn mtime(path: &Path) -> SystemTime {
        fs::metadata(path).unwrap().modified().unwrap()
    }
}

fn three_package_project(ws: &Workspace) {
    ws.add_package("proj", "main", &[("main.go", "package main\n")], &["proj/b"]);
    ws.add_package("proj/b", "b", &[("b.go", "package b\n")], &["proj/b/c"]);
    ws.add_package("proj/b/c", "c", &[("c.go", "package c\n")], &[]);
    ws.add_stale_output("proj/b");
    ws.add_stale_output("proj/b/c");
}

#[tokio::test]
async fn build_produces_the_executable_and_respects_order() {
    let ws = Workspace::new();
    three_package_project(&ws);

    let ctx = ws.context();
    let loader = Arc::new(PackageLoader::new(ctx.clone(), None));

    let built = ops::run_build(
        ctx,
        loader,
        BuildFlags::default(),
        TargetMode::Build,
        &["proj".to_string()],
    )
    .await
    .unwrap();

    assert_eq!(built, 3);

    // the executable lands in the project directory under the package
    // directory's base name
    let exe = ws.project_dir.join("proj");
    assert!(exe.exists());

    // its mtime is at least the newest source mtime in the whole tree
    let newest_source = ["proj/main.go", "proj/b/b.go", "proj/b/c/c.go"]
        .iter()
        .map(|p| Workspace::mtime(&ws.src.join(p)))
        .max()
        .unwrap();
    assert!(Workspace::mtime(&exe) >= newest_source);

    // dependencies were driven before their dependents
    let log = ws.invocations();
    assert_eq!(log.len(), 3);
    let pos = |needle: &str| log.iter().position(|l| l == needle).unwrap();
    assert!(pos("install proj/b/c") < pos("install proj/b"));
    assert!(pos("install proj/b") < pos("build proj"));
}

#[tokio::test]
async fn second_build_drives_nothing() {
    let ws = Workspace::new();
    three_package_project(&ws);

    let ctx = ws.context();
    let loader = Arc::new(PackageLoader::new(ctx.clone(), None));

    ops::run_build(
        ctx.clone(),
        loader.clone(),
        BuildFlags::default(),
        TargetMode::Build,
        &["proj".to_string()],
    )
    .await
    .unwrap();

    let first = ws.invocations().len();
    assert_eq!(first, 3);

    let built = ops::run_build(
        ctx,
        loader,
        BuildFlags::default(),
        TargetMode::Build,
        &["proj".to_string()],
    )
    .await
    .unwrap();

    assert_eq!(built, 0);
    assert_eq!(ws.invocations().len(), first);
}

#[tokio::test]
async fn package_less_argument_expands_below_the_project() {
    let ws = Workspace::new();
    ws.add_no_sources_fixture("proj");
    ws.add_package("proj/b", "b", &[("b.go", "package b\n")], &[]);

    let ctx = ws.context();
    let loader = Arc::new(PackageLoader::new(ctx, None));

    let projects = project::resolve_projects(&loader, &["proj".to_string()]).unwrap();
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0].dir, ws.project_dir);

    let imports: Vec<String> = projects[0]
        .packages
        .iter()
        .map(|p| p.import_path.to_string())
        .collect();
    assert_eq!(imports, vec!["proj/b"]);
}

#[tokio::test]
async fn generate_runs_once_for_a_patsubst_directive() {
    let ws = Workspace::new();

    let dir = ws.add_package(
        "proj",
        "main",
        &[
            ("main.go", "package main\n"),
            (
                "gen.go",
                "package main\n\n//zb:generate -patsubst %.tmpl %.out *.tmpl\n",
            ),
        ],
        &[],
    );
    fs::write(dir.join("foo.tmpl"), "template\n").unwrap();

    let ctx = ws.context();
    let loader = Arc::new(PackageLoader::new(ctx.clone(), None));

    ops::run_build(
        ctx.clone(),
        loader.clone(),
        BuildFlags::default(),
        TargetMode::Generate,
        &["proj".to_string()],
    )
    .await
    .unwrap();

    let log = ws.invocations();
    let generates: Vec<_> = log.iter().filter(|l| l.starts_with("generate")).collect();
    assert_eq!(generates.len(), 1);
    assert!(dir.join("foo.out").exists());

    // a fresh artifact means the next generate pass is a no-op
    ops::run_build(
        ctx,
        loader,
        BuildFlags::default(),
        TargetMode::Generate,
        &["proj".to_string()],
    )
    .await
    .unwrap();

    let log = ws.invocations();
    let generates: Vec<_> = log.iter().filter(|l| l.starts_with("generate")).collect();
    assert_eq!(generates.len(), 1);
}

#[tokio::test]
async fn listing_packages_honors_package_mode_boundaries() {
    let ws = Workspace::new();
    ws.add_package("proj", "main", &[("main.go", "package main\n")], &["proj/b"]);
    ws.add_package("proj/b", "b", &[("b.go", "package b\n")], &[]);

    let ctx = ws.context();
    let loader = Arc::new(PackageLoader::new(ctx, None));

    let pkgs = project::list_packages(&loader, &["proj".to_string()]).unwrap();
    let imports: Vec<String> = pkgs.iter().map(|p| p.import_path.to_string()).collect();
    assert_eq!(imports, vec!["proj"]);

    let pkgs = project::list_packages(&loader, &["proj/...".to_string()]).unwrap();
    let imports: Vec<String> = pkgs.iter().map(|p| p.import_path.to_string()).collect();
    assert_eq!(imports, vec!["proj", "proj/b"]);
}
