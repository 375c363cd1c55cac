use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::FastMap;
use crate::consts;
use crate::context::BuildContext;

/// One derived-file rule produced by a generate directive: regenerate
/// `artifact` whenever `depends` is newer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateRule {
    pub artifact: PathBuf,
    pub depends: PathBuf,
}

#[derive(Error, Debug)]
pub enum DirectiveError {
    #[error("{path}:{line}: bad backslash")]
    BadBackslash { path: String, line: usize },

    #[error("{path}:{line}: mismatched quoted string")]
    MismatchedQuote { path: String, line: usize },

    #[error("{path}:{line}: bad quoted string")]
    BadQuotedString { path: String, line: usize },

    #[error("{path}:{line}: expected space after quoted argument")]
    ExpectedSpace { path: String, line: usize },

    #[error("{path}:{line}: no arguments to directive")]
    NoArguments { path: String, line: usize },

    #[error("{path}:{line}: invalid -target directive")]
    InvalidTarget { path: String, line: usize },

    #[error("{path}:{line}: invalid -patsubst directive")]
    InvalidPatSubst { path: String, line: usize },

    #[error("{path}:{line}: bad glob pattern `{pattern}`")]
    BadPattern {
        path: String,
        line: usize,
        pattern: String,
    },

    #[error("error reading {path}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Scans source files for generate directives, memoizing per file so a
/// source shared by several packages is parsed once.
#[derive(Debug)]
pub struct DirectiveScanner {
    ctx: Arc<BuildContext>,
    memo: FastMap<PathBuf, Arc<Vec<GenerateRule>>>,
}

impl DirectiveScanner {
    pub fn new(ctx: Arc<BuildContext>) -> Self {
        Self {
            ctx,
            memo: FastMap::default(),
        }
    }

    /// Scan one source file. `project_dir` roots the TODO/FIXME warning
    /// paths; vendored files are never warned about.
    pub fn scan(
        &self,
        path: &Path,
        project_dir: &Path,
        vendored: bool,
    ) -> Result<Arc<Vec<GenerateRule>>, DirectiveError> {
        if let Some(rules) = self.memo.get(path) {
            return Ok(rules.clone());
        }

        let rules = Arc::new(self.scan_uncached(path, project_dir, vendored)?);
        self.memo.insert(path.to_path_buf(), rules.clone());
        Ok(rules)
    }

    fn scan_uncached(
        &self,
        path: &Path,
        project_dir: &Path,
        vendored: bool,
    ) -> Result<Vec<GenerateRule>, DirectiveError> {
        let bytes = fs::read(path).map_err(|source| DirectiveError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let warn_markers = self.ctx.warn_todo_fixme
            && !vendored
            && !path.to_string_lossy().contains(consts::VENDOR_SEGMENT)
            && path.starts_with(project_dir);

        let mut rules = Vec::new();

        for (idx, raw_line) in bytes.split(|b| *b == b'\n').enumerate() {
            let line_no = idx + 1;
            let lossy = String::from_utf8_lossy(raw_line);
            let line: &str = lossy.strip_suffix('\r').unwrap_or(lossy.as_ref());

            if warn_markers && (line.contains("TODO") || line.contains("FIXME")) {
                let rel = path
                    .strip_prefix(project_dir)
                    .unwrap_or(path)
                    .display()
                    .to_string();
                warn!("{rel}:{line_no}:{}", line.trim());
            }

            let rest = match strip_directive_prefix(line) {
                Some(rest) => rest,
                None => continue,
            };

            let words = split_words(rest, path, line_no)?;
            if words.is_empty() {
                return Err(DirectiveError::NoArguments {
                    path: path.display().to_string(),
                    line: line_no,
                });
            }

            let parsed = self.parse_directive(path, line_no, &words)?;
            for rule in &parsed {
                debug!(
                    artifact = %rule.artifact.display(),
                    depends = %rule.depends.display(),
                    declared_by = %path.display(),
                    "found generate dependency"
                );
            }
            rules.extend(parsed);
        }

        Ok(rules)
    }

    fn parse_directive(
        &self,
        path: &Path,
        line: usize,
        words: &[String],
    ) -> Result<Vec<GenerateRule>, DirectiveError> {
        match words[0].as_str() {
            "-patsubst" => self.parse_patsubst(path, line, &words[1..]),
            "-target" => self.parse_target(path, line, &words[1..]),
            _ => {
                // plain form: the declaring source is the input, every
                // matched file is a derived artifact
                let files = self.expand_globs(path, line, words)?;
                Ok(files
                    .into_iter()
                    .map(|artifact| GenerateRule {
                        artifact,
                        depends: path.to_path_buf(),
                    })
                    .collect())
            }
        }
    }

    fn parse_target(
        &self,
        path: &Path,
        line: usize,
        words: &[String],
    ) -> Result<Vec<GenerateRule>, DirectiveError> {
        if words.len() < 2 {
            return Err(DirectiveError::InvalidTarget {
                path: path.display().to_string(),
                line,
            });
        }

        let mut target = PathBuf::from(&words[0]);
        if !target.is_absolute() {
            target = file_dir(path).join(target);
        }

        let files = self.expand_globs(path, line, &words[1..])?;
        Ok(files
            .into_iter()
            .map(|depends| GenerateRule {
                artifact: target.clone(),
                depends,
            })
            .collect())
    }

    fn parse_patsubst(
        &self,
        path: &Path,
        line: usize,
        words: &[String],
    ) -> Result<Vec<GenerateRule>, DirectiveError> {
        if words.len() < 3 {
            return Err(DirectiveError::InvalidPatSubst {
                path: path.display().to_string(),
                line,
            });
        }

        let pattern = &words[0];
        let replacement = &words[1];
        let files = self.expand_globs(path, line, &words[2..])?;

        let mut rules = Vec::new();
        for file in files {
            let derived = substitute(pattern, replacement, &file.to_string_lossy());
            if derived.is_empty() {
                continue;
            }

            let mut artifact = PathBuf::from(derived);
            if !artifact.is_absolute() {
                artifact = file_dir(path).join(artifact);
            }

            rules.push(GenerateRule {
                artifact,
                depends: file,
            });
        }
        Ok(rules)
    }

    /// Resolve glob words against the declaring file's directory. Words
    /// without a wildcard pass through as literal paths.
    fn expand_globs(
        &self,
        path: &Path,
        line: usize,
        words: &[String],
    ) -> Result<Vec<PathBuf>, DirectiveError> {
        let mut files = Vec::new();

        for word in words {
            let joined = {
                let w = PathBuf::from(word);
                if w.is_absolute() {
                    w
                } else {
                    file_dir(path).join(w)
                }
            };

            if !word.contains('*') {
                files.push(joined);
                continue;
            }

            let pattern = joined.to_string_lossy().into_owned();
            let matches = glob::glob(&pattern).map_err(|_| DirectiveError::BadPattern {
                path: path.display().to_string(),
                line,
                pattern: word.clone(),
            })?;

            for m in matches.flatten() {
                files.push(m);
            }
        }

        Ok(files)
    }
}

fn file_dir(path: &Path) -> PathBuf {
    path.parent().map(Path::to_path_buf).unwrap_or_default()
}

/// The remainder of a directive line, or None if the line is not one.
fn strip_directive_prefix(line: &str) -> Option<&str> {
    let rest = line.strip_prefix(consts::DIRECTIVE_PREFIX)?;
    if rest.starts_with(' ') || rest.starts_with('\t') {
        Some(&rest[1..])
    } else {
        None
    }
}

/// Split a directive body into shell-style words, honoring double-quoted
/// strings with backslash escapes.
fn split_words(body: &str, path: &Path, line_no: usize) -> Result<Vec<String>, DirectiveError> {
    let err_path = || path.display().to_string();
    let mut words = Vec::new();
    let mut line = body;

    loop {
        line = line.trim_start_matches([' ', '\t']);
        if line.is_empty() {
            break;
        }

        if let Some(rest) = line.strip_prefix('"') {
            let mut word = String::new();
            let mut chars = rest.char_indices();
            let mut closed_at = None;

            while let Some((i, c)) = chars.next() {
                match c {
                    '\\' => match chars.next() {
                        Some((_, esc)) => {
                            let mapped = match esc {
                                'n' => '\n',
                                't' => '\t',
                                'r' => '\r',
                                '"' => '"',
                                '\\' => '\\',
                                _ => {
                                    return Err(DirectiveError::BadQuotedString {
                                        path: err_path(),
                                        line: line_no,
                                    });
                                }
                            };
                            word.push(mapped);
                        }
                        None => {
                            return Err(DirectiveError::BadBackslash {
                                path: err_path(),
                                line: line_no,
                            });
                        }
                    },
                    '"' => {
                        closed_at = Some(i);
                        break;
                    }
                    c => word.push(c),
                }
            }

            let closed_at = closed_at.ok_or_else(|| DirectiveError::MismatchedQuote {
                path: err_path(),
                line: line_no,
            })?;

            words.push(word);
            line = &rest[closed_at + 1..];
            if !line.is_empty() && !line.starts_with([' ', '\t']) {
                return Err(DirectiveError::ExpectedSpace {
                    path: err_path(),
                    line: line_no,
                });
            }
            continue;
        }

        let end = line.find([' ', '\t']).unwrap_or(line.len());
        words.push(line[..end].to_string());
        line = &line[end..];
    }

    Ok(words)
}

/// Position of the first `%` not escaped by a backslash.
fn find_percent(value: &str) -> Option<usize> {
    let mut prev = '\0';
    for (i, c) in value.char_indices() {
        if c == '%' && prev != '\\' {
            return Some(i);
        }
        prev = c;
    }
    None
}

/// Make-style pattern substitution: the part of `file` matched by the `%`
/// in `pattern` replaces the `%` in `replacement`. Empty means no match.
pub fn substitute(pattern: &str, replacement: &str, file: &str) -> String {
    let pp = match find_percent(pattern) {
        Some(pp) => pp,
        None => {
            if pattern == file {
                return replacement.to_string();
            }
            return String::new();
        }
    };

    let prefix = &pattern[..pp];
    if !file.starts_with(prefix) {
        return String::new();
    }

    let match_part = &file[prefix.len()..];
    let suffix = &pattern[pp + 1..];
    if !match_part.ends_with(suffix) {
        return String::new();
    }
    let match_part = &match_part[..match_part.len() - suffix.len()];

    let pr = match find_percent(replacement) {
        Some(pr) => pr,
        None => return replacement.to_string(),
    };

    let mut out = String::with_capacity(replacement.len() + match_part.len());
    out.push_str(&replacement[..pr]);
    out.push_str(match_part);
    out.push_str(&replacement[pr + 1..]);
    out
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;

    use super::*;

    fn scanner() -> DirectiveScanner {
        let mut ctx = BuildContext::new();
        ctx.warn_todo_fixme = false;
        DirectiveScanner::new(Arc::new(ctx))
    }

    fn write_source(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn splits_plain_words() {
        let words = split_words("a b\tc", Path::new("x"), 1).unwrap();
        assert_eq!(words, vec!["a", "b", "c"]);
    }

    #[test]
    fn splits_quoted_words_with_escapes() {
        let words = split_words(r#"a "b c" "d\"e""#, Path::new("x"), 1).unwrap();
        assert_eq!(words, vec!["a", "b c", "d\"e"]);
    }

    #[test]
    fn rejects_mismatched_quote() {
        let err = split_words(r#""unterminated"#, Path::new("x"), 1).unwrap_err();
        assert!(matches!(err, DirectiveError::MismatchedQuote { .. }));
    }

    #[test]
    fn rejects_trailing_backslash() {
        let err = split_words(r#""bad\"#, Path::new("x"), 1).unwrap_err();
        assert!(matches!(
            err,
            DirectiveError::BadBackslash { .. } | DirectiveError::MismatchedQuote { .. }
        ));
    }

    #[test]
    fn rejects_missing_space_after_quote() {
        let err = split_words(r#""a"b"#, Path::new("x"), 1).unwrap_err();
        assert!(matches!(err, DirectiveError::ExpectedSpace { .. }));
    }

    #[test]
    fn directive_prefix_requires_space_or_tab() {
        assert!(strip_directive_prefix("//zb:generate foo").is_some());
        assert!(strip_directive_prefix("//zb:generate\tfoo").is_some());
        assert!(strip_directive_prefix("//zb:generatefoo").is_none());
        assert!(strip_directive_prefix("// zb:generate foo").is_none());
    }

    #[test]
    fn substitute_basic_patterns() {
        assert_eq!(substitute("%.tmpl", "%.out", "foo.tmpl"), "foo.out");
        assert_eq!(substitute("%.tmpl", "%.out", "a/b.tmpl"), "a/b.out");
        assert_eq!(substitute("%.tmpl", "%.out", "foo.txt"), "");
        assert_eq!(substitute("exact", "gen.out", "exact"), "gen.out");
        assert_eq!(substitute("exact", "gen.out", "other"), "");
    }

    #[test]
    fn substitute_honors_escaped_percent() {
        // an escaped % is literal, so the pattern has no wildcard
        assert_eq!(substitute(r"\%.tmpl", "out", r"\%.tmpl"), "out");
    }

    #[test]
    fn plain_form_depends_on_declaring_source() {
        let tmp = tempfile::tempdir().unwrap();
        write_source(tmp.path(), "foo.tmpl", "x");
        let src = write_source(tmp.path(), "gen.go", "//zb:generate *.tmpl\n");

        let rules = scanner().scan(&src, tmp.path(), false).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].artifact, tmp.path().join("foo.tmpl"));
        assert_eq!(rules[0].depends, src);
    }

    #[test]
    fn target_form_inverts_the_dependency() {
        let tmp = tempfile::tempdir().unwrap();
        write_source(tmp.path(), "in.txt", "x");
        let src = write_source(tmp.path(), "gen.go", "//zb:generate -target out.bin in.txt\n");

        let rules = scanner().scan(&src, tmp.path(), false).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].artifact, tmp.path().join("out.bin"));
        assert_eq!(rules[0].depends, tmp.path().join("in.txt"));
    }

    #[test]
    fn patsubst_form_derives_artifacts() {
        let tmp = tempfile::tempdir().unwrap();
        write_source(tmp.path(), "foo.tmpl", "x");
        write_source(tmp.path(), "bar.tmpl", "x");
        let src = write_source(
            tmp.path(),
            "gen.go",
            "//zb:generate -patsubst %.tmpl %.out *.tmpl\n",
        );

        let mut rules = scanner().scan(&src, tmp.path(), false).unwrap().to_vec();
        rules.sort_by(|a, b| a.artifact.cmp(&b.artifact));
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].artifact, tmp.path().join("bar.out"));
        assert_eq!(rules[0].depends, tmp.path().join("bar.tmpl"));
        assert_eq!(rules[1].artifact, tmp.path().join("foo.out"));
    }

    #[test]
    fn empty_directive_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let src = write_source(tmp.path(), "gen.go", "//zb:generate \n");
        let err = scanner().scan(&src, tmp.path(), false).unwrap_err();
        assert!(matches!(err, DirectiveError::NoArguments { .. }));
    }

    #[test]
    fn scan_is_memoized_per_file() {
        let tmp = tempfile::tempdir().unwrap();
        let src = write_source(tmp.path(), "gen.go", "package x\n");
        let s = scanner();
        let a = s.scan(&src, tmp.path(), false).unwrap();
        let b = s.scan(&src, tmp.path(), false).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
