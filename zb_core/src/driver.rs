use std::io;
use std::path::Path;
use std::process::Stdio;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::consts;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("failed to run `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("`{program}` exited with code {code}")]
    Subprocess { program: String, code: i32 },
    #[error("package inspection produced invalid output: {0}")]
    Decode(#[from] serde_json::Error),
}

impl DriverError {
    /// The exit code this error maps to at the process boundary.
    pub fn exit_code(&self) -> i32 {
        match self {
            DriverError::Subprocess { code, .. } => *code,
            _ => consts::EXIT_FAILED,
        }
    }
}

/// Map a subprocess exit status onto the exit code ladder.
pub fn exit_code(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    if let Some(code) = status.code() {
        return code;
    }
    if status.core_dumped() {
        return consts::EXIT_CORE_DUMP;
    }
    if status.signal().is_some() {
        return consts::EXIT_SIGNALED;
    }
    if status.stopped_signal().is_some() {
        return consts::EXIT_STOPPED;
    }
    if status.continued() {
        return consts::EXIT_CONTINUED;
    }
    consts::EXIT_FAILED
}

/// Render a command line the way it would be typed, quoting arguments that
/// contain spaces.
pub fn quote_command(program: &str, args: &[String]) -> String {
    let mut out = program.to_string();
    for a in args {
        out.push(' ');
        if a.contains(' ') {
            out.push('"');
            out.push_str(a);
            out.push('"');
        } else {
            out.push_str(a);
        }
    }
    out
}

/// The external compiler driver, invoked per sub-action as a subprocess.
#[derive(Debug, Clone)]
pub struct Driver {
    pub program: String,
}

impl Driver {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Run a driver sub-action to completion, capturing its output.
    ///
    /// The captured stream is emitted on the log at `info` on success and
    /// `error` on failure; a non-zero exit becomes [DriverError::Subprocess]
    /// with the mapped code.
    pub async fn exec(&self, args: &[String], cwd: Option<&Path>) -> Result<(), DriverError> {
        info!("→ {}", quote_command(&self.program, args));

        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let output = cmd.output().await.map_err(|source| DriverError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        let code = exit_code(output.status);
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));

        for line in text.lines().filter(|l| !l.is_empty()) {
            if code == consts::EXIT_OK {
                info!("← {line}");
            } else {
                error!("← {line}");
            }
        }

        if code != consts::EXIT_OK {
            return Err(DriverError::Subprocess {
                program: self.program.clone(),
                code,
            });
        }

        Ok(())
    }

    /// Ask the driver's package-inspection service about one import path.
    ///
    /// `src_dir` anchors relative resolution; tags pass through.
    pub fn inspect(
        &self,
        import_path: &str,
        src_dir: &Path,
        tags: Option<&str>,
    ) -> Result<RawPackage, DriverError> {
        let mut args = vec!["list".to_string(), "-e".to_string(), "-json".to_string()];
        if let Some(tags) = tags {
            args.push("-tags".to_string());
            args.push(tags.to_string());
        }
        args.push(import_path.to_string());

        debug!("→ {}", quote_command(&self.program, &args));

        let mut cmd = std::process::Command::new(&self.program);
        cmd.args(&args).stdin(Stdio::null());
        if src_dir.is_dir() {
            cmd.current_dir(src_dir);
        }

        let output = cmd.output().map_err(|source| DriverError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        if !output.status.success() && output.stdout.is_empty() {
            return Err(DriverError::Subprocess {
                program: self.program.clone(),
                code: exit_code(output.status),
            });
        }

        Ok(serde_json::from_slice(&output.stdout)?)
    }
}

/// The package-inspection record as the driver reports it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct RawPackage {
    pub dir: String,
    pub import_path: String,
    pub name: String,
    pub target: String,
    pub go_files: Vec<String>,
    pub cgo_files: Vec<String>,
    pub c_files: Vec<String>,
    #[serde(rename = "CXXFiles")]
    pub cxx_files: Vec<String>,
    pub m_files: Vec<String>,
    pub h_files: Vec<String>,
    pub f_files: Vec<String>,
    pub s_files: Vec<String>,
    pub swig_files: Vec<String>,
    #[serde(rename = "SwigCXXFiles")]
    pub swig_cxx_files: Vec<String>,
    pub syso_files: Vec<String>,
    pub test_go_files: Vec<String>,
    #[serde(rename = "XTestGoFiles")]
    pub xtest_go_files: Vec<String>,
    pub imports: Vec<String>,
    pub test_imports: Vec<String>,
    #[serde(rename = "XTestImports")]
    pub xtest_imports: Vec<String>,
    pub error: Option<RawPackageError>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawPackageError {
    #[serde(rename = "Err")]
    pub err: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting_wraps_spaced_arguments() {
        let got = quote_command(
            "go",
            &["build".to_string(), "-ldflags".to_string(), "-X a=b c".to_string()],
        );
        assert_eq!(got, "go build -ldflags \"-X a=b c\"");
    }

    #[test]
    fn raw_package_decodes_inspection_output() {
        let json = r#"{
            "Dir": "/src/a",
            "ImportPath": "a",
            "Name": "main",
            "Target": "/gopath/bin/a",
            "GoFiles": ["main.go"],
            "TestGoFiles": ["main_test.go"],
            "XTestGoFiles": [],
            "Imports": ["fmt"],
            "TestImports": ["testing"],
            "XTestImports": []
        }"#;
        let raw: RawPackage = serde_json::from_str(json).unwrap();
        assert_eq!(raw.import_path, "a");
        assert_eq!(raw.name, "main");
        assert_eq!(raw.go_files, vec!["main.go"]);
        assert_eq!(raw.test_imports, vec!["testing"]);
        assert!(raw.error.is_none());
    }

    #[test]
    fn raw_package_surfaces_inspection_errors() {
        let json = r#"{
            "Dir": "/src/empty",
            "ImportPath": "empty",
            "Error": {"Err": "no Go files in /src/empty"}
        }"#;
        let raw: RawPackage = serde_json::from_str(json).unwrap();
        assert!(raw.error.unwrap().err.contains("no Go files"));
    }
}
