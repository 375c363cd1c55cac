use std::collections::BTreeMap;

use clap::Args;

/// Pass-through flags for the driver's build and install sub-actions.
#[derive(Args, Debug, Clone, Default)]
pub struct BuildFlags {
    /// Force rebuilding of packages that are already up-to-date
    #[arg(short = 'a', long = "rebuild-all")]
    pub rebuild_all: bool,

    /// Print the commands but do not run them
    #[arg(short = 'n', long = "dry-run")]
    pub dry_run: bool,

    /// Enable data race detection
    #[arg(long)]
    pub race: bool,

    /// Print the names of packages as they are compiled
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Print the commands as they are executed
    #[arg(short = 'x', long = "print-commands")]
    pub print_commands: bool,

    /// Arguments to pass on each linker invocation
    #[arg(long)]
    pub ldflags: Option<String>,

    /// A comma-separated list of build tags to consider satisfied
    #[arg(long)]
    pub tags: Option<String>,
}

impl BuildFlags {
    /// The argument vector handed to the driver's build-family
    /// sub-actions.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.rebuild_all {
            args.push("-a".to_string());
        }
        if self.dry_run {
            args.push("-n".to_string());
        }
        if self.race {
            args.push("-race".to_string());
        }
        if self.verbose {
            args.push("-v".to_string());
        }
        if self.print_commands {
            args.push("-x".to_string());
        }
        if let Some(ldflags) = &self.ldflags {
            args.push("-ldflags".to_string());
            args.push(ldflags.clone());
        }
        if let Some(tags) = &self.tags {
            args.push("-tags".to_string());
            args.push(tags.clone());
        }

        args
    }
}

/// Pass-through flags for the driver's test sub-action.
#[derive(Args, Debug, Clone, Default)]
pub struct TestFlags {
    #[command(flatten)]
    pub build: BuildFlags,

    /// Tell long-running tests to shorten their run time
    #[arg(long)]
    pub short: bool,

    /// Run only those tests matching the regular expression
    #[arg(long)]
    pub run: Option<String>,

    /// Run each test this many times
    #[arg(long)]
    pub count: Option<u32>,

    /// Panic test binaries after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

impl TestFlags {
    /// The argument vector handed to the driver's test sub-action.
    pub fn test_args(&self) -> Vec<String> {
        let mut args = self.build.build_args();

        if self.short {
            args.push("-short".to_string());
        }
        if let Some(run) = &self.run {
            args.push("-run".to_string());
            args.push(run.clone());
        }
        if let Some(count) = self.count {
            args.push("-count".to_string());
            args.push(count.to_string());
        }
        if let Some(timeout) = self.timeout {
            args.push("-timeout".to_string());
            args.push(format!("{timeout}s"));
        }

        args
    }
}

// defaults as the linter expects them; matching values are elided from the
// normalized argument vector so they cannot perturb the lint hash
const DEFAULT_CONCURRENCY: usize = 16;
const DEFAULT_CYCLO_OVER: u32 = 10;
const DEFAULT_LINE_LENGTH: u32 = 80;
const DEFAULT_MIN_CONFIDENCE: f64 = 0.80;
const DEFAULT_MIN_OCCURRENCES: u32 = 3;
const DEFAULT_DUPL_THRESHOLD: u32 = 50;
const DEFAULT_DEADLINE_SECS: u64 = 5;

// disabled by default
static DISABLED_LINTERS: &[&str] = &["aligncheck", "dupl", "gocyclo", "structcheck"];

// enabled by default
static ENABLED_LINTERS: &[&str] = &["gofmt", "goimports", "unused"];

/// Flags for the external linter.
#[derive(Args, Debug, Clone)]
pub struct LintFlags {
    /// Only run fast linters
    #[arg(long)]
    pub fast: bool,

    /// Number of concurrent linters to run
    #[arg(short = 'j', long, default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// Exclude messages matching these regular expressions
    #[arg(short = 'e', long)]
    pub exclude: Vec<String>,

    /// Include messages matching these regular expressions
    #[arg(short = 'I', long)]
    pub include: Vec<String>,

    /// Report functions with cyclomatic complexity over N
    #[arg(long, default_value_t = DEFAULT_CYCLO_OVER)]
    pub cyclo_over: u32,

    /// Report lines longer than N
    #[arg(long, default_value_t = DEFAULT_LINE_LENGTH)]
    pub line_length: u32,

    /// Minimum confidence interval to pass to golint
    #[arg(long, default_value_t = DEFAULT_MIN_CONFIDENCE)]
    pub min_confidence: f64,

    /// Minimum occurrences to report a repeated constant
    #[arg(long, default_value_t = DEFAULT_MIN_OCCURRENCES)]
    pub min_occurrences: u32,

    /// Minimum token sequence to report as a clone
    #[arg(long, default_value_t = DEFAULT_DUPL_THRESHOLD)]
    pub dupl_threshold: u32,

    /// Do not include test files for linters that support this option
    #[arg(long)]
    pub no_tests: bool,

    /// Cancel linters if they have not completed within this many seconds
    #[arg(long, default_value_t = 30)]
    pub deadline: u64,

    /// Only show errors
    #[arg(long)]
    pub errors: bool,

    /// Do not enable GC for linters
    #[arg(long)]
    pub no_enable_gc: bool,

    /// Aggregate issues reported by several linters
    #[arg(long)]
    pub aggregate: bool,

    /// Linters to disable
    #[arg(short = 'D', long)]
    pub disable: Vec<String>,

    /// Previously disabled linters to enable
    #[arg(short = 'E', long)]
    pub enable: Vec<String>,

    /// Disable all linters
    #[arg(long)]
    pub disable_all: bool,

    /// Enable all linters
    #[arg(long)]
    pub enable_all: bool,
}

impl Default for LintFlags {
    fn default() -> Self {
        Self {
            fast: false,
            concurrency: DEFAULT_CONCURRENCY,
            exclude: Vec::new(),
            include: Vec::new(),
            cyclo_over: DEFAULT_CYCLO_OVER,
            line_length: DEFAULT_LINE_LENGTH,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            min_occurrences: DEFAULT_MIN_OCCURRENCES,
            dupl_threshold: DEFAULT_DUPL_THRESHOLD,
            no_tests: false,
            deadline: 30,
            errors: false,
            no_enable_gc: false,
            aggregate: false,
            disable: Vec::new(),
            enable: Vec::new(),
            disable_all: false,
            enable_all: false,
        }
    }
}

impl LintFlags {
    /// The sorted enable/disable vector: built-in defaults overlaid with
    /// the user's choices, rendered deterministically.
    fn linter_args(&self) -> Vec<String> {
        let mut map: BTreeMap<&str, &str> = BTreeMap::new();

        for l in DISABLED_LINTERS {
            map.insert(*l, "-D");
        }
        for l in ENABLED_LINTERS {
            map.insert(*l, "-E");
        }
        for l in &self.disable {
            map.insert(l.as_str(), "-D");
        }
        for l in &self.enable {
            map.insert(l.as_str(), "-E");
        }

        let mut args = Vec::new();
        for (linter, flag) in map.iter().filter(|(_, f)| **f == "-D") {
            args.push(flag.to_string());
            args.push(linter.to_string());
        }
        for (linter, flag) in map.iter().filter(|(_, f)| **f == "-E") {
            args.push(flag.to_string());
            args.push(linter.to_string());
        }

        if self.fast {
            args.push("--fast".to_string());
        }
        if self.disable_all {
            args.push("--disable-all".to_string());
        }
        if self.enable_all {
            args.push("--enable-all".to_string());
        }

        args
    }

    /// The normalized linter argument vector. Values matching the linter's
    /// own defaults are elided so the rendering, and therefore the lint
    /// hash, is stable across invocations that mean the same thing.
    pub fn lint_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if self.concurrency != 0 && self.concurrency != DEFAULT_CONCURRENCY {
            args.push("-j".to_string());
            args.push(self.concurrency.to_string());
        }

        for v in &self.exclude {
            args.push("--exclude".to_string());
            args.push(v.clone());
        }
        for v in &self.include {
            args.push("--include".to_string());
            args.push(v.clone());
        }

        if self.cyclo_over != 0 && self.cyclo_over != DEFAULT_CYCLO_OVER {
            args.push("--cyclo-over".to_string());
            args.push(self.cyclo_over.to_string());
        }
        if self.line_length != 0 && self.line_length != DEFAULT_LINE_LENGTH {
            args.push("--line-length".to_string());
            args.push(self.line_length.to_string());
        }
        if self.min_confidence != 0.0 && self.min_confidence != DEFAULT_MIN_CONFIDENCE {
            args.push("--min-confidence".to_string());
            args.push(format!("{:.6}", self.min_confidence));
        }
        if self.min_occurrences != 0 && self.min_occurrences != DEFAULT_MIN_OCCURRENCES {
            args.push("--min-occurrences".to_string());
            args.push(self.min_occurrences.to_string());
        }
        if self.dupl_threshold != 0 && self.dupl_threshold != DEFAULT_DUPL_THRESHOLD {
            args.push("--dupl-threshold".to_string());
            args.push(self.dupl_threshold.to_string());
        }

        if !self.no_tests {
            args.push("--tests".to_string());
        }

        if self.deadline != 0 && self.deadline != DEFAULT_DEADLINE_SECS {
            args.push("--deadline".to_string());
            args.push(format!("{}s", self.deadline));
        }

        if self.errors {
            args.push("--errors".to_string());
        }
        if !self.no_enable_gc {
            args.push("--enable-gc".to_string());
        }
        if self.aggregate {
            args.push("--aggregate".to_string());
        }

        args.extend(self.linter_args());
        args
    }
}
