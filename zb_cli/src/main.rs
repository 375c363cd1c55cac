use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, shells};
use tokio::runtime::Builder;
use tracing::error;
use tracing_subscriber::EnvFilter;

use zb_core::consts;
use zb_core::context::BuildContext;
use zb_core::dependency::TargetMode;
use zb_core::flags::{BuildFlags, LintFlags, TestFlags};
use zb_core::ops::{self, OpError};
use zb_core::package::PackageLoader;
use zb_core::{lint, project, testrun};

// populated by the build environment when cutting a release
const GIT_COMMIT: Option<&str> = option_env!("ZB_GIT_COMMIT");
const BUILD_DATE: Option<&str> = option_env!("ZB_BUILD_DATE");

#[derive(Parser, Debug)]
#[command(
    name = "zb",
    bin_name = "zb",
    version = env!("CARGO_PKG_VERSION"),
    about = "an opinionated repo-based build tool",
    propagate_version = true,
    subcommand_help_heading = "Operations"
)]
struct Args {
    #[command(subcommand)]
    command: SubCommands,

    #[command(flatten)]
    globals: Globals,
}

#[derive(clap::Args, Debug)]
struct Globals {
    /// Set log level (ERROR, WARN, INFO, DEBUG, TRACE)
    #[arg(global = true, long, env = "LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Silence the TODO/FIXME warnings emitted while scanning sources
    #[arg(global = true, long)]
    no_warn_todo_fixme: bool,

    /// Result cache directory
    #[arg(global = true, long, env = "CACHE", value_name = "DIR")]
    cache: Option<PathBuf>,

    /// Operate on the named packages only, not their enclosing projects
    #[arg(global = true, long)]
    package: bool,
}

impl Globals {
    fn context(&self, force: bool, list_only: bool, exclude_vendor: bool) -> Arc<BuildContext> {
        let mut ctx = BuildContext::new();
        ctx.warn_todo_fixme = !self.no_warn_todo_fixme;
        ctx.package_mode = self.package;
        ctx.force = force;
        ctx.list_only = list_only;
        ctx.exclude_vendor = exclude_vendor;
        if let Some(cache) = &self.cache {
            ctx.cache_root = cache.clone();
        }
        Arc::new(ctx)
    }
}

#[derive(Subcommand, Debug)]
enum SubCommands {
    Build(BuildArgs),
    Install(InstallArgs),
    Clean(CleanArgs),
    Test(TestArgs),
    Lint(LintArgs),
    List(ListArgs),
    Commands(CommandsArgs),
    Version(VersionArgs),
    Complete(CompleteArgs),
}

fn runtime() -> eyre::Result<tokio::runtime::Runtime> {
    Ok(Builder::new_multi_thread().enable_all().build()?)
}

/// Log an operation failure with its wrapped chain and hand back the
/// mapped exit code.
fn op_exit(err: OpError) -> i32 {
    let code = err.exit_code();
    error!("{:#}", eyre::Report::new(err));
    code
}

#[derive(clap::Args, Debug)]
#[command(about = "build all of the packages in each of the projects")]
struct BuildArgs {
    #[command(flatten)]
    flags: BuildFlags,

    #[arg(value_name = "PACKAGES")]
    packages: Vec<String>,
}

impl BuildArgs {
    fn invoke(self, globals: &Globals) -> eyre::Result<i32> {
        run_build_family(globals, self.flags, self.packages, TargetMode::Build)
    }
}

#[derive(clap::Args, Debug)]
#[command(about = "compile and install all of the packages in each of the projects")]
struct InstallArgs {
    #[command(flatten)]
    flags: BuildFlags,

    #[arg(value_name = "PACKAGES")]
    packages: Vec<String>,
}

impl InstallArgs {
    fn invoke(self, globals: &Globals) -> eyre::Result<i32> {
        run_build_family(globals, self.flags, self.packages, TargetMode::Install)
    }
}

fn run_build_family(
    globals: &Globals,
    flags: BuildFlags,
    packages: Vec<String>,
    mode: TargetMode,
) -> eyre::Result<i32> {
    let ctx = globals.context(flags.rebuild_all, false, false);
    let loader = Arc::new(PackageLoader::new(ctx.clone(), flags.tags.clone()));

    let result = runtime()?.block_on(ops::run_build(ctx, loader, flags, mode, &packages));
    match result {
        Ok(_) => Ok(consts::EXIT_OK),
        Err(err) => Ok(op_exit(err)),
    }
}

#[derive(clap::Args, Debug)]
#[command(about = "remove executables in repo produced by build")]
struct CleanArgs {
    #[arg(value_name = "PACKAGES")]
    packages: Vec<String>,
}

impl CleanArgs {
    fn invoke(self, globals: &Globals) -> eyre::Result<i32> {
        let ctx = globals.context(false, false, true);
        let loader = Arc::new(PackageLoader::new(ctx.clone(), None));

        match ops::clean(&ctx, &loader, &self.packages) {
            Ok(()) => Ok(consts::EXIT_OK),
            Err(err) => Ok(op_exit(err)),
        }
    }
}

#[derive(clap::Args, Debug)]
#[command(about = "test all of the packages in each of the projects and cache the results")]
struct TestArgs {
    #[command(flatten)]
    flags: TestFlags,

    /// Treat all test results as uncached
    #[arg(short = 'f', long = "force")]
    force: bool,

    /// List the uncached tests it would run
    #[arg(short = 'l', long = "list")]
    list: bool,

    /// Run the generate sub-action as necessary before execution
    #[arg(short = 'g', long = "generate")]
    generate: bool,

    #[arg(value_name = "PACKAGES")]
    packages: Vec<String>,
}

impl TestArgs {
    fn invoke(self, globals: &Globals) -> eyre::Result<i32> {
        let ctx = globals.context(self.force, self.list, false);
        let loader = Arc::new(PackageLoader::new(ctx.clone(), self.flags.build.tags.clone()));

        let mut out = io::stdout();
        let mut eout = io::stderr();

        let result = runtime()?.block_on(testrun::run_test(
            ctx,
            loader,
            self.flags,
            self.generate,
            &self.packages,
            &mut out,
            &mut eout,
        ));

        match result {
            Ok(code) => Ok(code),
            Err(err) => Ok(op_exit(err)),
        }
    }
}

#[derive(clap::Args, Debug)]
#[command(about = "lint the packages in each of the projects and cache the results")]
struct LintArgs {
    #[command(flatten)]
    flags: LintFlags,

    /// Treat all lint results as uncached
    #[arg(short = 'f', long = "force")]
    force: bool,

    /// Hide missing-comment warnings
    #[arg(short = 'n', long = "no-missing-comment")]
    no_missing_comment: bool,

    /// Filter out lint lines from files that have these suffixes
    #[arg(long = "ignore-suffix", value_name = "SUFFIX")]
    ignore_suffixes: Vec<String>,

    #[arg(value_name = "PACKAGES")]
    packages: Vec<String>,
}

impl LintArgs {
    fn invoke(self, globals: &Globals) -> eyre::Result<i32> {
        let ctx = globals.context(self.force, false, false);
        let loader = Arc::new(PackageLoader::new(ctx.clone(), None));

        let mut out = io::stdout();
        let mut eout = io::stderr();

        let result = runtime()?.block_on(lint::run_lint(
            ctx,
            loader,
            self.flags,
            self.no_missing_comment,
            self.ignore_suffixes,
            &self.packages,
            &mut out,
            &mut eout,
        ));

        match result {
            Ok(code) => Ok(code),
            Err(err) => Ok(op_exit(err)),
        }
    }
}

#[derive(clap::Args, Debug)]
#[command(about = "list the packages the arguments name")]
struct ListArgs {
    #[arg(value_name = "PACKAGES")]
    packages: Vec<String>,
}

impl ListArgs {
    fn invoke(self, globals: &Globals) -> eyre::Result<i32> {
        let ctx = globals.context(false, false, false);
        let loader = Arc::new(PackageLoader::new(ctx.clone(), None));

        let packages = if ctx.package_mode {
            project::list_packages(&loader, &self.packages)
        } else {
            project::resolve_projects(&loader, &self.packages).map(|projects| {
                let mut pkgs: Vec<_> = projects.into_iter().flat_map(|p| p.packages).collect();
                pkgs.sort_by(|a, b| a.dir.cmp(&b.dir));
                pkgs.dedup_by(|a, b| a.dir == b.dir);
                pkgs
            })
        };

        match packages {
            Ok(packages) => {
                let mut out = io::stdout().lock();
                for pkg in packages {
                    writeln!(out, "{}", pkg.import_path)?;
                }
                Ok(consts::EXIT_OK)
            }
            Err(err) => Ok(op_exit(err.into())),
        }
    }
}

#[derive(clap::Args, Debug)]
#[command(about = "print the names of the operations")]
struct CommandsArgs {}

impl CommandsArgs {
    fn invoke(self, _globals: &Globals) -> eyre::Result<i32> {
        let mut out = io::stdout().lock();
        for sub in Args::command().get_subcommands() {
            writeln!(out, "{}", sub.get_name())?;
        }
        Ok(consts::EXIT_OK)
    }
}

#[derive(clap::Args, Debug)]
#[command(about = "print the version")]
struct VersionArgs {}

impl VersionArgs {
    fn invoke(self, _globals: &Globals) -> eyre::Result<i32> {
        println!("zb {}", env!("CARGO_PKG_VERSION"));
        if let Some(commit) = GIT_COMMIT {
            println!("commit: {commit}");
        }
        if let Some(date) = BUILD_DATE {
            println!("built:  {date}");
        }
        Ok(consts::EXIT_OK)
    }
}

#[derive(Debug, Clone, ValueEnum)]
enum Shell {
    Bash,
    Elvish,
    Fish,
    PowerShell,
    Zsh,
}

#[derive(clap::Args, Debug)]
#[command(about = "generate a shell completion script")]
struct CompleteArgs {
    #[arg(long)]
    shell: Shell,

    #[arg(long, default_value = "zb")]
    bin_name: String,

    /// Write to a file instead of stdout
    #[arg(long, value_name = "FILE")]
    output_file: Option<PathBuf>,
}

impl CompleteArgs {
    fn invoke(self, _globals: &Globals) -> eyre::Result<i32> {
        let mut command = Args::command();
        let bin_name = self.bin_name;

        let mut output: Box<dyn Write> = match self.output_file {
            Some(file) => Box::new(File::create(file)?),
            None => Box::new(io::stdout()),
        };

        match self.shell {
            Shell::Bash => generate(shells::Bash, &mut command, bin_name, &mut output),
            Shell::Elvish => generate(shells::Elvish, &mut command, bin_name, &mut output),
            Shell::Fish => generate(shells::Fish, &mut command, bin_name, &mut output),
            Shell::PowerShell => generate(shells::PowerShell, &mut command, bin_name, &mut output),
            Shell::Zsh => generate(shells::Zsh, &mut command, bin_name, &mut output),
        }

        Ok(consts::EXIT_OK)
    }
}

fn setup_tracing(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn inner_main() -> eyre::Result<i32> {
    let Args { command, globals } = Args::parse();

    setup_tracing(&globals.log_level);

    match command {
        SubCommands::Build(cmd) => cmd.invoke(&globals),
        SubCommands::Install(cmd) => cmd.invoke(&globals),
        SubCommands::Clean(cmd) => cmd.invoke(&globals),
        SubCommands::Test(cmd) => cmd.invoke(&globals),
        SubCommands::Lint(cmd) => cmd.invoke(&globals),
        SubCommands::List(cmd) => cmd.invoke(&globals),
        SubCommands::Commands(cmd) => cmd.invoke(&globals),
        SubCommands::Version(cmd) => cmd.invoke(&globals),
        SubCommands::Complete(cmd) => cmd.invoke(&globals),
    }
}

fn main() {
    if let Err(err) = color_eyre::install() {
        eprintln!("failed to install error hooks: {err}");
    }

    let code = match inner_main() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("ERROR: {err:?}");
            consts::EXIT_FAILED
        }
    };

    std::process::exit(code);
}
