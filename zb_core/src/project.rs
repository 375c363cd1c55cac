use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::ellipsis;
use crate::package::{LoadError, PackageLoader, PackageMeta};
use crate::pathutil;

/// A project: the directory carrying the version-control marker, plus
/// every package whose source directory lies beneath it.
#[derive(Debug)]
pub struct Project {
    pub dir: PathBuf,
    pub import_path: String,
    pub packages: Vec<Arc<PackageMeta>>,
}

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("could not find project directory for: {dir}")]
    NoProject { dir: String },

    #[error("could not find base import path for: {dir}")]
    NoImportPath { dir: String },

    #[error("no packages found for: {arg}")]
    NothingMatched { arg: String },

    #[error(transparent)]
    Load(#[from] LoadError),
}

/// Resolve user arguments into the unique projects they name, each filled
/// with its packages. `.` is assumed when no arguments are given.
pub fn resolve_projects(
    loader: &Arc<PackageLoader>,
    args: &[String],
) -> Result<Vec<Project>, ResolveError> {
    let ctx = loader.context().clone();

    let args = if args.is_empty() {
        vec![".".to_string()]
    } else {
        args.to_vec()
    };

    let mut queue: VecDeque<String> = ellipsis::expand(&ctx, &args).into();
    let mut seen: HashSet<String> = HashSet::new();
    let mut projects: Vec<Project> = Vec::new();

    while let Some(import_path) = queue.pop_front() {
        if !seen.insert(import_path.clone()) {
            continue;
        }

        let meta = match loader.load(&import_path, &ctx.cwd) {
            Ok(meta) => meta,
            Err(err) if err.is_recoverable() => {
                // the directory itself holds no sources; as long as it
                // sits under a project whose subtree has packages, expand
                // below it instead
                let expanded = expand_below(loader, &import_path)?;
                if expanded.is_empty() {
                    return Err(ResolveError::NothingMatched { arg: import_path });
                }
                queue.extend(expanded);
                continue;
            }
            Err(err) => return Err(err.into()),
        };

        let project_dir =
            pathutil::project_dir(&meta.dir).ok_or_else(|| ResolveError::NoProject {
                dir: meta.dir.display().to_string(),
            })?;

        if projects.iter().any(|p| p.dir == project_dir) {
            continue;
        }

        let mut project = new_project(loader, project_dir)?;
        fill_packages(loader, &mut project)?;
        insert_sorted(&mut projects, project);
    }

    Ok(projects)
}

/// Resolve user arguments into packages only, without walking up to their
/// enclosing projects.
pub fn list_packages(
    loader: &Arc<PackageLoader>,
    args: &[String],
) -> Result<Vec<Arc<PackageMeta>>, ResolveError> {
    let ctx = loader.context().clone();

    let args = if args.is_empty() {
        vec![".".to_string()]
    } else {
        args.to_vec()
    };

    let mut queue: VecDeque<String> = ellipsis::expand(&ctx, &args).into();
    let mut seen: HashSet<String> = HashSet::new();
    let mut packages: Vec<Arc<PackageMeta>> = Vec::new();

    while let Some(import_path) = queue.pop_front() {
        if !seen.insert(import_path.clone()) {
            continue;
        }

        match loader.load(&import_path, &ctx.cwd) {
            Ok(meta) => {
                if !packages.iter().any(|p| p.dir == meta.dir) {
                    let at = packages
                        .binary_search_by(|p| p.dir.cmp(&meta.dir))
                        .unwrap_err();
                    packages.insert(at, meta);
                }
            }
            Err(err) if err.is_recoverable() => {
                let expanded = expand_below(loader, &import_path)?;
                if expanded.is_empty() {
                    return Err(ResolveError::NothingMatched { arg: import_path });
                }
                queue.extend(expanded);
            }
            Err(err) => return Err(err.into()),
        }
    }

    Ok(packages)
}

/// A package-less import path still names a spot in the tree; find its
/// project and search for packages below the directory it maps to.
fn expand_below(loader: &Arc<PackageLoader>, import_path: &str) -> Result<Vec<String>, ResolveError> {
    let ctx = loader.context();

    let normalized = pathutil::normalize_import_path(ctx, import_path);
    let dir = match pathutil::import_path_to_project_dir(ctx, &normalized) {
        Some(dir) => dir,
        None => return Ok(Vec::new()),
    };

    let base = match pathutil::dir_to_import_path(ctx, &dir) {
        Some(base) => base,
        None => return Ok(Vec::new()),
    };

    debug!(arg = import_path, below = %base, "expanding package-less argument");
    Ok(ellipsis::expand(ctx, &[format!("{base}/...")]))
}

fn new_project(loader: &Arc<PackageLoader>, dir: PathBuf) -> Result<Project, ResolveError> {
    let ctx = loader.context();

    let import_path =
        pathutil::dir_to_import_path(ctx, &dir).ok_or_else(|| ResolveError::NoImportPath {
            dir: dir.display().to_string(),
        })?;

    Ok(Project {
        dir,
        import_path,
        packages: Vec::new(),
    })
}

/// Discover the project's packages by ellipsis expansion from its base
/// import path, sorted by source directory.
fn fill_packages(loader: &Arc<PackageLoader>, project: &mut Project) -> Result<(), ResolveError> {
    let ctx = loader.context().clone();

    let import_paths = ellipsis::expand(&ctx, &[format!("{}/...", project.import_path)]);

    for import_path in import_paths {
        if ctx.exclude_vendor && pathutil::is_vendored(&import_path) {
            continue;
        }

        let meta = match loader.load(&import_path, &project.dir) {
            Ok(meta) => meta,
            Err(err) if err.is_recoverable() => continue,
            Err(err) => return Err(err.into()),
        };

        if project.packages.iter().any(|p| p.dir == meta.dir) {
            continue;
        }

        let at = project
            .packages
            .binary_search_by(|p| p.dir.cmp(&meta.dir))
            .unwrap_err();
        project.packages.insert(at, meta);
    }

    Ok(())
}

fn insert_sorted(projects: &mut Vec<Project>, project: Project) {
    let at = projects
        .binary_search_by(|p| p.dir.cmp(&project.dir))
        .unwrap_or_else(|e| e);
    projects.insert(at, project);
}
