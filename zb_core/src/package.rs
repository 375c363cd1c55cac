use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::FastMap;
use crate::context::BuildContext;
use crate::driver::{Driver, DriverError, RawPackage};
use crate::pathutil;

/// A canonical package import path.
///
/// Never a relative filesystem path, never empty, never carries an
/// ellipsis; the `/vendor/` segment marks a vendored package.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ImportPath(String);

impl ImportPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_vendored(&self) -> bool {
        pathutil::is_vendored(&self.0)
    }
}

impl fmt::Display for ImportPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ImportPath {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Everything the invocation knows about one package. Built once from the
/// driver's package-inspection record, memoized, never mutated.
#[derive(Debug, Clone)]
pub struct PackageMeta {
    pub import_path: ImportPath,
    pub dir: PathBuf,
    /// Primary-language sources, in the order the driver reports them.
    pub sources: Vec<String>,
    /// Ancillary compiled inputs (foreign-language sources, headers,
    /// objects), in the order the driver reports them.
    pub ancillary: Vec<String>,
    /// Test sources compiled into the package itself.
    pub test_sources: Vec<String>,
    /// Test sources of the adjacent test-only package.
    pub xtest_sources: Vec<String>,
    pub imports: Vec<String>,
    pub test_imports: Vec<String>,
    pub xtest_imports: Vec<String>,
    /// Whether this package is an executable entry point.
    pub is_command: bool,
    pub is_vendored: bool,
    /// The conventional install output path reported by the driver.
    pub install_path: PathBuf,
}

impl PackageMeta {
    fn from_raw(raw: RawPackage) -> Self {
        let import_path = ImportPath::new(raw.import_path);
        let is_vendored = import_path.is_vendored();

        let mut ancillary = Vec::new();
        ancillary.extend(raw.cgo_files);
        ancillary.extend(raw.c_files);
        ancillary.extend(raw.cxx_files);
        ancillary.extend(raw.m_files);
        ancillary.extend(raw.h_files);
        ancillary.extend(raw.f_files);
        ancillary.extend(raw.s_files);
        ancillary.extend(raw.swig_files);
        ancillary.extend(raw.swig_cxx_files);
        ancillary.extend(raw.syso_files);

        Self {
            import_path,
            dir: PathBuf::from(raw.dir),
            sources: raw.go_files,
            ancillary,
            test_sources: raw.test_go_files,
            xtest_sources: raw.xtest_go_files,
            imports: raw.imports,
            test_imports: raw.test_imports,
            xtest_imports: raw.xtest_imports,
            is_command: raw.name == "main",
            is_vendored,
            install_path: PathBuf::from(raw.target),
        }
    }

    /// Every compiled input, primary then ancillary, in declaration order.
    pub fn compiled_sources(&self) -> impl Iterator<Item = &String> {
        self.sources.iter().chain(self.ancillary.iter())
    }

    /// Absolute paths of every compiled input.
    pub fn compiled_source_paths(&self) -> Vec<PathBuf> {
        self.compiled_sources().map(|f| self.dir.join(f)).collect()
    }

    /// The path `build` writes: executables land in the project directory
    /// under the package directory's base name, libraries install.
    pub fn build_path(&self, project_dir: &Path) -> PathBuf {
        if !self.is_command {
            return self.install_path.clone();
        }

        let base = if project_dir.as_os_str().is_empty() {
            &self.dir
        } else {
            project_dir
        };

        let name = self
            .dir
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(self.import_path.as_str()));

        let path = base.join(&name);
        if path == self.dir {
            return self.dir.join(name);
        }
        path
    }
}

#[derive(Error, Debug)]
pub enum LoadError {
    /// Recoverable: the directory holds no buildable inputs. Callers that
    /// were searching for projects expand this into an ellipsis search
    /// below the directory.
    #[error("no buildable sources for {import_path}")]
    NoSources { import_path: String },

    /// The driver rejected the import path.
    #[error("cannot load package {import_path}: {message}")]
    Rejected {
        import_path: String,
        message: String,
    },

    #[error(transparent)]
    Driver(#[from] DriverError),
}

impl LoadError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, LoadError::NoSources { .. })
    }
}

fn is_no_sources_message(message: &str) -> bool {
    message.contains("no Go files") || message.contains("no buildable Go source files")
}

/// Loads package metadata through the driver's package-inspection service,
/// memoizing by import path for the lifetime of the invocation.
///
/// The memo map is shared; concurrent insert-if-absent races load the same
/// record twice and keep one, which is harmless.
#[derive(Debug)]
pub struct PackageLoader {
    ctx: Arc<BuildContext>,
    driver: Driver,
    tags: Option<String>,
    memo: FastMap<String, Arc<PackageMeta>>,
}

impl PackageLoader {
    pub fn new(ctx: Arc<BuildContext>, tags: Option<String>) -> Self {
        let driver = Driver::new(ctx.driver.clone());
        Self {
            ctx,
            driver,
            tags,
            memo: FastMap::default(),
        }
    }

    pub fn context(&self) -> &Arc<BuildContext> {
        &self.ctx
    }

    /// Load one package. `src_dir` anchors relative import resolution.
    pub fn load(&self, import_path: &str, src_dir: &Path) -> Result<Arc<PackageMeta>, LoadError> {
        let normalized = pathutil::normalize_import_path(&self.ctx, import_path);

        if let Some(meta) = self.memo.get(&normalized) {
            return Ok(meta.clone());
        }

        let raw = self
            .driver
            .inspect(&normalized, src_dir, self.tags.as_deref())?;

        if let Some(err) = &raw.error {
            if is_no_sources_message(&err.err) {
                return Err(LoadError::NoSources {
                    import_path: normalized,
                });
            }
            return Err(LoadError::Rejected {
                import_path: normalized,
                message: err.err.clone(),
            });
        }

        if raw.go_files.is_empty() && raw.cgo_files.is_empty() && raw.test_go_files.is_empty() {
            return Err(LoadError::NoSources {
                import_path: normalized,
            });
        }

        debug!(import_path = %raw.import_path, dir = %raw.dir, "loaded package");

        let meta = Arc::new(PackageMeta::from_raw(raw));

        let canonical = meta.import_path.as_str().to_string();
        if canonical != normalized {
            self.memo
                .entry(canonical)
                .or_insert_with(|| meta.clone());
        }
        self.memo.entry(normalized).or_insert_with(|| meta.clone());

        Ok(meta)
    }
}

/// Where package metadata comes from. The production implementation is
/// [PackageLoader]; tests substitute an in-memory table.
pub trait PackageSource: Send + Sync + std::fmt::Debug {
    fn load_import(&self, import_path: &str, src_dir: &Path) -> Result<Arc<PackageMeta>, LoadError>;
}

impl PackageSource for PackageLoader {
    fn load_import(&self, import_path: &str, src_dir: &Path) -> Result<Arc<PackageMeta>, LoadError> {
        self.load(import_path, src_dir)
    }
}
