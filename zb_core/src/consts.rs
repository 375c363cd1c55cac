/// Exit code for a successful invocation.
pub const EXIT_OK: i32 = 0;

/// Exit code for a failed build, test failure or lint finding.
pub const EXIT_FAILED: i32 = 1;

/// Exit code when a subprocess was terminated by a signal.
pub const EXIT_SIGNALED: i32 = 98;

/// Exit code when a subprocess was stopped.
pub const EXIT_STOPPED: i32 = 99;

/// Exit code when a subprocess was continued.
pub const EXIT_CONTINUED: i32 = 100;

/// Exit code when a subprocess dumped core.
pub const EXIT_CORE_DUMP: i32 = 101;

/// The generate directive marker. Must be the first token of a comment
/// line, followed by a single space or tab.
pub static DIRECTIVE_PREFIX: &str = "//zb:generate";

/// File suffix of primary-language sources.
pub static SOURCE_SUFFIX: &str = ".go";

/// File suffix of test sources.
pub static TEST_SUFFIX: &str = "_test.go";

/// Directory names skipped during ellipsis expansion.
pub static ELLIPSIS_SKIP: &[&str] = &["vendor", "testdata"];

/// The version-control marker that bounds a project.
pub static VCS_MARKER: &str = ".git";

/// The path segment that marks a vendored package.
pub static VENDOR_SEGMENT: &str = "/vendor/";

/// The timestamp layout stamped into executables as `main.buildDate`.
pub static BUILD_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S+00:00";

/// Application name; names the cache directory.
pub static APP_NAME: &str = "zb";
