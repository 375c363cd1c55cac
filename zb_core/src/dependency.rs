use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use tracing::debug;

use crate::FastMap;
use crate::context::BuildContext;
use crate::directive::DirectiveScanner;
use crate::package::{PackageLoader, PackageMeta};

/// Which operation family the graph is being built for. The mode decides
/// where package outputs land and what the executor does with each node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetMode {
    Build,
    Install,
    Generate,
}

impl fmt::Display for TargetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TargetMode::Build => "build",
            TargetMode::Install => "install",
            TargetMode::Generate => "generate",
        })
    }
}

/// The mtime used for staleness checks; a missing file reads as the epoch
/// so anything real is newer than it.
pub fn file_mtime(path: &Path) -> SystemTime {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

/// A source file that declares generate directives. Shared between every
/// derived artifact of the same file so the generate sub-action can be
/// serialized per declaring file.
#[derive(Debug)]
pub struct DeclaringSource {
    pub path: PathBuf,
    pub lock: tokio::sync::Mutex<()>,
}

/// Hands out one [DeclaringSource] per path for the invocation.
#[derive(Debug, Default)]
pub struct DeclaringRegistry {
    map: FastMap<PathBuf, Arc<DeclaringSource>>,
}

impl DeclaringRegistry {
    pub fn get(&self, path: &Path) -> Arc<DeclaringSource> {
        self.map
            .entry(path.to_path_buf())
            .or_insert_with(|| {
                Arc::new(DeclaringSource {
                    path: path.to_path_buf(),
                    lock: tokio::sync::Mutex::new(()),
                })
            })
            .clone()
    }
}

/// A leaf input file. Never buildable; its mtime is the filesystem mtime.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
}

/// A derived artifact declared by a generate directive. Regenerated by the
/// driver's generate sub-action on the declaring source whenever its input
/// is strictly newer.
#[derive(Debug, Clone)]
pub struct GeneratedFile {
    pub path: PathBuf,
    pub depends: PathBuf,
    pub declaring: Arc<DeclaringSource>,
}

/// A package compiled to a library or executable.
#[derive(Debug, Clone)]
pub struct PackageDep {
    pub meta: Arc<PackageMeta>,
    /// Where this node's artifact lives for the current mode.
    pub output: PathBuf,
    /// Import-path prefix bounding the in-project dependency walk.
    pub project_import_path: String,
    pub project_dir: PathBuf,
    /// Commit identifier stamped into executables.
    pub commit: Option<String>,
}

impl PackageDep {
    pub fn new(
        meta: Arc<PackageMeta>,
        mode: TargetMode,
        project_dir: &Path,
        project_import_path: &str,
        commit: Option<String>,
    ) -> Self {
        let output = match mode {
            TargetMode::Install => meta.install_path.clone(),
            TargetMode::Build | TargetMode::Generate => meta.build_path(project_dir),
        };

        Self {
            meta,
            output,
            project_import_path: project_import_path.to_string(),
            project_dir: project_dir.to_path_buf(),
            commit,
        }
    }

    fn in_project(&self, import: &str) -> bool {
        import == self.project_import_path
            || import.starts_with(&format!("{}/", self.project_import_path))
    }
}

/// A node in the dependency graph. Identity is the pair (name, kind); two
/// values with equal identity collapse to one target.
#[derive(Debug, Clone, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Dependency {
    Source(SourceFile),
    Generated(GeneratedFile),
    Package(PackageDep),
}

impl Dependency {
    pub fn source(path: impl Into<PathBuf>) -> Self {
        Dependency::Source(SourceFile { path: path.into() })
    }

    /// Identity name: the filesystem path of the node's artifact.
    pub fn name(&self) -> String {
        match self {
            Dependency::Source(f) => f.path.display().to_string(),
            Dependency::Generated(g) => g.path.display().to_string(),
            Dependency::Package(p) => p.output.display().to_string(),
        }
    }

    /// The stable kind discriminator: the variant tag, never a type name.
    pub fn kind(&self) -> &'static str {
        self.into()
    }

    pub fn buildable(&self) -> bool {
        match self {
            Dependency::Source(_) => false,
            Dependency::Generated(_) | Dependency::Package(_) => true,
        }
    }

    pub fn mtime(&self) -> SystemTime {
        match self {
            Dependency::Source(f) => file_mtime(&f.path),
            Dependency::Generated(g) => file_mtime(&g.path),
            Dependency::Package(p) => file_mtime(&p.output),
        }
    }

    /// The package behind this node, when there is one.
    pub fn package(&self) -> Option<&Arc<PackageMeta>> {
        match self {
            Dependency::Package(p) => Some(&p.meta),
            _ => None,
        }
    }
}

/// Everything dependency enumeration needs: the loader for imports, the
/// directive scanner for derived files, and the per-project anchors.
#[derive(Debug)]
pub struct DepContext {
    pub ctx: Arc<BuildContext>,
    pub loader: Arc<PackageLoader>,
    pub scanner: Arc<DirectiveScanner>,
    pub registry: Arc<DeclaringRegistry>,
    pub mode: TargetMode,
    pub project_dir: PathBuf,
    pub project_import_path: String,
    pub commit: Option<String>,
}

impl Dependency {
    /// Enumerate this node's direct dependencies.
    ///
    /// Packages depend on their in-project imports, their own source files
    /// and the derived artifacts those sources declare; generated files
    /// depend on their input; leaf files have none.
    pub fn dependencies(&self, dc: &DepContext) -> Result<Vec<Dependency>, crate::ops::OpError> {
        match self {
            Dependency::Source(_) => Ok(Vec::new()),

            Dependency::Generated(g) => Ok(vec![Dependency::source(g.depends.clone())]),

            Dependency::Package(p) => {
                let mut deps = Vec::new();

                for import in &p.meta.imports {
                    if !p.in_project(import) {
                        continue;
                    }

                    let meta = dc.loader.load(import, &p.meta.dir)?;
                    deps.push(Dependency::Package(PackageDep::new(
                        meta,
                        dc.mode,
                        &p.project_dir,
                        &p.project_import_path,
                        p.commit.clone(),
                    )));
                }

                for path in p.meta.compiled_source_paths() {
                    let rules = dc
                        .scanner
                        .scan(&path, &dc.project_dir, p.meta.is_vendored)?;

                    for rule in rules.iter() {
                        debug!(
                            artifact = %rule.artifact.display(),
                            "package depends on generated file"
                        );
                        deps.push(Dependency::Generated(GeneratedFile {
                            path: rule.artifact.clone(),
                            depends: rule.depends.clone(),
                            declaring: dc.registry.get(&path),
                        }));
                    }

                    deps.push(Dependency::source(path));
                }

                Ok(deps)
            }
        }
    }
}
