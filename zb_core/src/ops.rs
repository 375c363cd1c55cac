use std::fs;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use thiserror::Error;
use tracing::{error, info};

use crate::consts;
use crate::context::BuildContext;
use crate::dependency::{
    DeclaringRegistry, DepContext, Dependency, GeneratedFile, PackageDep, TargetMode, file_mtime,
};
use crate::directive::{DirectiveError, DirectiveScanner};
use crate::driver::{Driver, DriverError};
use crate::graph::TargetGraph;
use crate::hasher::HashError;
use crate::package::{LoadError, PackageLoader};
use crate::pathutil;
use crate::project::{self, Project, ResolveError};
use crate::scheduler;
use crate::vcs;

/// The failure value every task body produces; the scheduler keeps the
/// first one and maps it to the invocation's exit code.
#[derive(Error, Debug)]
pub enum OpError {
    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Directive(#[from] DirectiveError),

    #[error(transparent)]
    Hash(#[from] HashError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("stopped with exit code {code}")]
    Stopped { code: i32 },
}

impl OpError {
    pub fn exit_code(&self) -> i32 {
        match self {
            OpError::Driver(err) => err.exit_code(),
            OpError::Stopped { code } => *code,
            _ => consts::EXIT_FAILED,
        }
    }
}

/// Shared state of one build-family run.
#[derive(Debug)]
pub struct OpEnv {
    pub ctx: Arc<BuildContext>,
    pub driver: Driver,
    pub flags: crate::flags::BuildFlags,
    pub mode: TargetMode,
    built: AtomicUsize,
}

impl OpEnv {
    pub fn new(ctx: Arc<BuildContext>, flags: crate::flags::BuildFlags, mode: TargetMode) -> Self {
        let driver = Driver::new(ctx.driver.clone());
        Self {
            ctx,
            driver,
            flags,
            mode,
            built: AtomicUsize::new(0),
        }
    }

    pub fn built(&self) -> usize {
        self.built.load(Ordering::SeqCst)
    }
}

impl PackageDep {
    /// Build args, injecting the version-stamping symbol overrides for
    /// executables unless the user supplied their own.
    fn stamped_args(&self, env: &OpEnv) -> Vec<String> {
        let mut args = env.flags.build_args();

        if self.meta.is_command && env.flags.ldflags.is_none() {
            let commit = self.commit.as_deref().unwrap_or("");
            let date = Utc::now().format(consts::BUILD_DATE_FORMAT);
            args.push("-ldflags".to_string());
            args.push(format!("-X main.gitCommit={commit} -X main.buildDate={date}"));
        }

        args
    }

    pub async fn build(&self, env: &OpEnv) -> Result<(), OpError> {
        if !self.meta.is_command || env.mode == TargetMode::Install {
            return self.install(env).await;
        }

        let mut args = vec!["build".to_string()];
        args.extend(self.stamped_args(env));
        args.push("-o".to_string());
        args.push(self.output.display().to_string());
        args.push(self.meta.import_path.to_string());

        env.driver.exec(&args, None).await?;
        touch(env, &self.output)
    }

    pub async fn install(&self, env: &OpEnv) -> Result<(), OpError> {
        let mut args = vec!["install".to_string()];
        args.extend(self.stamped_args(env));
        args.push(self.meta.import_path.to_string());

        env.driver.exec(&args, None).await?;
        touch(env, &self.meta.install_path)
    }
}

impl GeneratedFile {
    /// Run the generate sub-action on the declaring source, at most once
    /// per declaring file: several derived artifacts can share one source,
    /// so staleness is re-checked under the file's lock and later holders
    /// observe an up-to-date artifact.
    pub async fn generate(&self, env: &OpEnv) -> Result<(), OpError> {
        let _guard = self.declaring.lock.lock().await;

        if file_mtime(&self.depends) <= file_mtime(&self.path) {
            return Ok(());
        }

        let mut args = vec!["generate".to_string()];
        if let Some(run) = &env.ctx.generate_run {
            args.push("-run".to_string());
            args.push(run.clone());
        }
        args.extend(env.flags.build_args());
        args.push(self.declaring.path.display().to_string());

        env.driver.exec(&args, None).await?;
        Ok(())
    }
}

fn touch(env: &OpEnv, path: &std::path::Path) -> Result<(), OpError> {
    env.ctx.touch(path).map_err(|source| OpError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Assemble the full target graph for a set of projects.
pub fn project_graph(
    loader: &Arc<PackageLoader>,
    scanner: &Arc<DirectiveScanner>,
    projects: &[Project],
    mode: TargetMode,
) -> Result<TargetGraph, OpError> {
    let registry = Arc::new(DeclaringRegistry::default());
    let mut graph = TargetGraph::new();

    for project in projects {
        let commit = vcs::commit_hash(&project.dir);

        let dc = DepContext {
            ctx: loader.context().clone(),
            loader: loader.clone(),
            scanner: scanner.clone(),
            registry: registry.clone(),
            mode,
            project_dir: project.dir.clone(),
            project_import_path: project.import_path.clone(),
            commit: commit.clone(),
        };

        let roots = project
            .packages
            .iter()
            .map(|meta| {
                Dependency::Package(PackageDep::new(
                    meta.clone(),
                    mode,
                    &project.dir,
                    &project.import_path,
                    commit.clone(),
                ))
            })
            .collect();

        graph.add_roots(&dc, roots)?;
    }

    Ok(graph)
}

/// Assemble the target graph in package mode: each named package anchors
/// its own walk, bounded by its own import path.
pub fn package_graph(
    loader: &Arc<PackageLoader>,
    scanner: &Arc<DirectiveScanner>,
    packages: &[Arc<crate::package::PackageMeta>],
    mode: TargetMode,
) -> Result<TargetGraph, OpError> {
    let registry = Arc::new(DeclaringRegistry::default());
    let mut graph = TargetGraph::new();

    for meta in packages {
        let project_dir = pathutil::project_dir(&meta.dir).unwrap_or_else(|| meta.dir.clone());
        let commit = vcs::commit_hash(&project_dir);

        let dc = DepContext {
            ctx: loader.context().clone(),
            loader: loader.clone(),
            scanner: scanner.clone(),
            registry: registry.clone(),
            mode,
            project_dir: project_dir.clone(),
            project_import_path: meta.import_path.as_str().to_string(),
            commit: commit.clone(),
        };

        let roots = vec![Dependency::Package(PackageDep::new(
            meta.clone(),
            mode,
            &project_dir,
            meta.import_path.as_str(),
            commit,
        ))];

        graph.add_roots(&dc, roots)?;
    }

    Ok(graph)
}

/// Drain a graph under the build policy: a buildable target rebuilds when
/// any dependency's mtime is strictly newer than its own. Returns how many
/// targets were built.
pub async fn run_targets(env: Arc<OpEnv>, graph: TargetGraph) -> Result<usize, OpError> {
    let body_env = env.clone();

    scheduler::drain(graph, move |targets, id| {
        let env = body_env.clone();
        async move {
            let target = &targets[id];

            // generate acts on derived files only
            if env.mode == TargetMode::Generate
                && !matches!(target.dep, Dependency::Generated(_))
            {
                return Ok(());
            }

            let mine = target.dep.mtime();
            // strict ordering: filesystem mtime resolution may collide
            // within one second, and equal must mean fresh
            let stale = target
                .deps
                .iter()
                .any(|&d| targets[d].dep.mtime() > mine);
            if !stale {
                return Ok(());
            }

            match &target.dep {
                Dependency::Package(p) => p.build(&env).await?,
                Dependency::Generated(g) => g.generate(&env).await?,
                Dependency::Source(_) => return Ok(()),
            }

            env.built.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    })
    .await?;

    Ok(env.built())
}

/// The build, install and generate operations: resolve, assemble, drain.
pub async fn run_build(
    ctx: Arc<BuildContext>,
    loader: Arc<PackageLoader>,
    flags: crate::flags::BuildFlags,
    mode: TargetMode,
    args: &[String],
) -> Result<usize, OpError> {
    let scanner = Arc::new(DirectiveScanner::new(ctx.clone()));

    let graph = if ctx.package_mode {
        let packages = project::list_packages(&loader, args)?;
        package_graph(&loader, &scanner, &packages, mode)?
    } else {
        let projects = project::resolve_projects(&loader, args)?;
        project_graph(&loader, &scanner, &projects, mode)?
    };

    let env = Arc::new(OpEnv::new(ctx, flags, mode));
    let built = run_targets(env, graph).await?;

    if built == 0 {
        info!("nothing to {mode}");
    }

    Ok(built)
}

/// Remove the executables `build` writes into project directories.
pub fn clean(ctx: &Arc<BuildContext>, loader: &Arc<PackageLoader>, args: &[String]) -> Result<(), OpError> {
    if ctx.package_mode {
        for meta in project::list_packages(loader, args)? {
            let dir = pathutil::project_dir(&meta.dir).unwrap_or_else(|| meta.dir.clone());
            clean_package(&dir, &meta);
        }
        return Ok(());
    }

    for project in project::resolve_projects(loader, args)? {
        for meta in &project.packages {
            clean_package(&project.dir, meta);
        }
    }

    Ok(())
}

fn clean_package(project_dir: &std::path::Path, meta: &crate::package::PackageMeta) {
    if !meta.is_command {
        return;
    }

    let path = meta.build_path(project_dir);
    match fs::remove_file(&path) {
        Ok(()) => info!(path = %path.display(), "removed"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            info!(path = %path.display(), "no such file or directory");
        }
        Err(err) => error!(path = %path.display(), %err, "error removing executable"),
    }
}
