use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;
use zb_digest::{Digest, DigestWriter};

use crate::FastMap;
use crate::flags::TestFlags;
use crate::package::{LoadError, PackageMeta, PackageSource};

/// The sentinel written in place of a hash when a package participates in
/// its own transitive-dependency cycle.
pub static CYCLE: &str = "cycle";

/// A computed content hash: either a real digest or the cycle sentinel.
/// Sentinel hashes are never cacheable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashVal {
    Cycle,
    Digest(Digest),
}

impl HashVal {
    pub fn is_cycle(&self) -> bool {
        matches!(self, HashVal::Cycle)
    }

    pub fn to_hex(&self) -> String {
        match self {
            HashVal::Cycle => CYCLE.to_string(),
            HashVal::Digest(d) => d.to_hex(),
        }
    }
}

impl fmt::Display for HashVal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashVal::Cycle => f.write_str(CYCLE),
            HashVal::Digest(d) => write!(f, "{d}"),
        }
    }
}

#[derive(Error, Debug)]
pub enum HashError {
    #[error("error hashing {path}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Load(#[from] LoadError),
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    InProgress,
    Cycle,
    Done(Digest),
}

/// Computes the three content hashes. Package hashes are memoized with an
/// in-progress marker so recursive hashing of a cyclic import graph
/// terminates; every member of a cycle keeps the sentinel.
#[derive(Debug)]
pub struct Hasher {
    source: Arc<dyn PackageSource>,
    pkg_memo: FastMap<String, Slot>,
    test_memo: FastMap<String, HashVal>,
    lint_memo: FastMap<String, HashVal>,
    cycle_members: Mutex<HashSet<String>>,
}

impl Hasher {
    pub fn new(source: Arc<dyn PackageSource>) -> Self {
        Self {
            source,
            pkg_memo: FastMap::default(),
            test_memo: FastMap::default(),
            lint_memo: FastMap::default(),
            cycle_members: Mutex::new(HashSet::new()),
        }
    }

    /// The deep content hash of a package: its transitive imports in
    /// sorted order, then its own compiled sources.
    pub fn package_hash(&self, meta: &PackageMeta) -> Result<HashVal, HashError> {
        let mut stack = Vec::new();
        self.package_hash_inner(meta, &mut stack)
    }

    fn package_hash_inner(
        &self,
        meta: &PackageMeta,
        stack: &mut Vec<String>,
    ) -> Result<HashVal, HashError> {
        let key = meta.import_path.as_str().to_string();

        match self.pkg_memo.get(&key).map(|s| *s) {
            Some(Slot::Done(d)) => return Ok(HashVal::Digest(d)),
            Some(Slot::Cycle) => return Ok(HashVal::Cycle),
            Some(Slot::InProgress) => {
                // reached again during its own computation: everything on
                // the stack from the first occurrence down is in the cycle
                if let Some(pos) = stack.iter().position(|s| s == &key) {
                    let mut members = self.cycle_members.lock();
                    for member in &stack[pos..] {
                        members.insert(member.clone());
                    }
                }
                return Ok(HashVal::Cycle);
            }
            None => {}
        }

        self.pkg_memo.insert(key.clone(), Slot::InProgress);
        stack.push(key.clone());

        let computed = self.compute_package_hash(meta, stack);

        stack.pop();

        match computed {
            Ok(digest) => {
                if self.cycle_members.lock().contains(&key) {
                    debug!(import_path = %key, "package participates in an import cycle");
                    self.pkg_memo.insert(key, Slot::Cycle);
                    Ok(HashVal::Cycle)
                } else {
                    self.pkg_memo.insert(key, Slot::Done(digest));
                    Ok(HashVal::Digest(digest))
                }
            }
            Err(err) => {
                self.pkg_memo.remove(&key);
                Err(err)
            }
        }
    }

    fn compute_package_hash(
        &self,
        meta: &PackageMeta,
        stack: &mut Vec<String>,
    ) -> Result<Digest, HashError> {
        let deps = self.transitive_imports(meta)?;

        let mut w = DigestWriter::new();
        w.update("pkg\n");

        for dep in deps.values() {
            let hash = self.package_hash_inner(dep, stack)?;
            w.update(format!("import {hash}\n"));
        }

        let files: Vec<&String> = meta.compiled_sources().collect();
        hash_files(&mut w, &meta.dir, &files)?;

        Ok(w.finalize())
    }

    /// The transitive import closure of `meta`, excluding the package
    /// itself, keyed and therefore ordered by import path. Imports without
    /// buildable sources contribute nothing and are skipped.
    fn transitive_imports(
        &self,
        meta: &PackageMeta,
    ) -> Result<BTreeMap<String, Arc<PackageMeta>>, HashError> {
        let mut found: BTreeMap<String, Arc<PackageMeta>> = BTreeMap::new();
        let mut queue: Vec<Arc<PackageMeta>> = vec![];

        let root_key = meta.import_path.as_str().to_string();

        for import in &meta.imports {
            self.queue_import(import, &meta.dir, &root_key, &mut found, &mut queue)?;
        }

        while let Some(dep) = queue.pop() {
            for import in &dep.imports {
                self.queue_import(import, &dep.dir, &root_key, &mut found, &mut queue)?;
            }
        }

        Ok(found)
    }

    fn queue_import(
        &self,
        import: &str,
        src_dir: &Path,
        root_key: &str,
        found: &mut BTreeMap<String, Arc<PackageMeta>>,
        queue: &mut Vec<Arc<PackageMeta>>,
    ) -> Result<(), HashError> {
        if import == "C" {
            return Ok(());
        }

        let dep = match self.source.load_import(import, src_dir) {
            Ok(dep) => dep,
            Err(err) if err.is_recoverable() => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        let key = dep.import_path.as_str().to_string();
        if key == root_key || found.contains_key(&key) {
            return Ok(());
        }

        found.insert(key, dep.clone());
        queue.push(dep);
        Ok(())
    }

    /// The test result hash: flags that invalidate, the deep package hash,
    /// the direct test and adjacent-test import hashes, then the test
    /// sources.
    pub fn test_hash(&self, meta: &PackageMeta, flags: &TestFlags) -> Result<HashVal, HashError> {
        let key = meta.import_path.as_str().to_string();
        if let Some(v) = self.test_memo.get(&key) {
            return Ok(*v);
        }

        let pkg_hash = self.package_hash(meta)?;
        if pkg_hash.is_cycle() {
            self.test_memo.insert(key, HashVal::Cycle);
            return Ok(HashVal::Cycle);
        }

        let mut w = DigestWriter::new();
        w.update("test\n");

        if flags.build.race {
            w.update("-race\n");
        }
        if flags.short {
            w.update("-short\n");
        }
        if flags.build.verbose {
            w.update("-v\n");
        }

        w.update(format!("pkg {pkg_hash}\n"));

        for import in &meta.test_imports {
            let hash = self.import_hash(import, &meta.dir)?;
            w.update(format!("testimport {hash}\n"));
        }
        for import in &meta.xtest_imports {
            let hash = self.import_hash(import, &meta.dir)?;
            w.update(format!("xtestimport {hash}\n"));
        }

        let files: Vec<&String> = meta
            .test_sources
            .iter()
            .chain(meta.xtest_sources.iter())
            .collect();
        hash_files(&mut w, &meta.dir, &files)?;

        let val = HashVal::Digest(w.finalize());
        self.test_memo.insert(key, val);
        Ok(val)
    }

    /// The lint result hash: the normalized linter arguments and the
    /// package's own text. No transitive dependency hashing; lint reads
    /// the package's source, not its imports.
    pub fn lint_hash(
        &self,
        meta: &PackageMeta,
        lint_args: &[String],
        no_tests: bool,
    ) -> Result<HashVal, HashError> {
        let key = meta.import_path.as_str().to_string();
        if let Some(v) = self.lint_memo.get(&key) {
            return Ok(*v);
        }

        let mut w = DigestWriter::new();
        w.update("lint\n");

        for arg in lint_args {
            w.update(format!("{arg}\n"));
        }

        let mut files: Vec<&String> = meta.compiled_sources().collect();
        if !no_tests {
            files.extend(meta.test_sources.iter());
            files.extend(meta.xtest_sources.iter());
        }
        hash_files(&mut w, &meta.dir, &files)?;

        let val = HashVal::Digest(w.finalize());
        self.lint_memo.insert(key, val);
        Ok(val)
    }

    fn import_hash(&self, import: &str, src_dir: &Path) -> Result<HashVal, HashError> {
        if import == "C" {
            return Ok(HashVal::Cycle);
        }
        match self.source.load_import(import, src_dir) {
            Ok(dep) => self.package_hash(&dep),
            Err(err) if err.is_recoverable() => Ok(HashVal::Cycle),
            Err(err) => Err(err.into()),
        }
    }
}

/// The shared per-file block: name line, raw bytes, byte-count line. The
/// byte count closes each file so concatenated recipes cannot collide.
fn hash_files(w: &mut DigestWriter, dir: &Path, files: &[&String]) -> Result<(), HashError> {
    for name in files {
        let path = dir.join(name.as_str());
        let mut file = fs::File::open(&path).map_err(|source| HashError::Io {
            path: path.display().to_string(),
            source,
        })?;

        w.update(format!("file {name}\n"));
        let n = io::copy(&mut file, w).map_err(|source| HashError::Io {
            path: path.display().to_string(),
            source,
        })?;
        w.update(format!("{n} bytes\n"));
    }
    Ok(())
}
