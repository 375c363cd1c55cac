use std::path::Path;
use std::process::{Command, Stdio};

use tracing::warn;

/// The current commit identifier of the repository at `dir`, used to
/// version-stamp executables. Failure degrades to `None` with a warning;
/// stamping is then skipped for the commit symbol.
pub fn commit_hash(dir: &Path) -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(dir)
        .stdin(Stdio::null())
        .output();

    match output {
        Ok(output) if output.status.success() => {
            let hash = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if hash.is_empty() { None } else { Some(hash) }
        }
        Ok(output) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(dir = %dir.display(), "could not read commit: {}", stderr.trim());
            None
        }
        Err(err) => {
            warn!(dir = %dir.display(), %err, "could not run version-control probe");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_repository_probes_to_none() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(commit_hash(tmp.path()), None);
    }
}
