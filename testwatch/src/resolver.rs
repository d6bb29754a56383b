//! File-to-test resolution for the testwatch daemon.
//!
//! A changed source file maps to its test file(s) by naming convention:
//! the test suffix is inserted before the source extension (`a.rb` ->
//! `a_test.rb`), and every known test file whose path contains that
//! derived basename is selected. A file that already carries the test
//! suffix runs directly.
//!
//! The same walker also produces the daemon's watch list: every source
//! file under the root.

use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::error::{DaemonError, Result};

/// Resolves source files to test files under a fixed root.
#[derive(Debug, Clone)]
pub struct TestResolver {
    root: PathBuf,
    source_ext: String,
    test_suffix: String,
}

impl TestResolver {
    /// Creates a resolver for `root` using the given naming convention.
    ///
    /// `source_ext` is the extension without a dot (`rb`); `test_suffix`
    /// is inserted before it (`_test`).
    #[must_use]
    pub fn new(
        root: impl Into<PathBuf>,
        source_ext: impl Into<String>,
        test_suffix: impl Into<String>,
    ) -> Self {
        Self {
            root: root.into(),
            source_ext: source_ext.into(),
            test_suffix: test_suffix.into(),
        }
    }

    /// The root directory being scanned.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every source file under the root (the watch list).
    ///
    /// Unreadable subtrees are skipped rather than failing the scan.
    #[must_use]
    pub fn source_files(&self) -> Vec<PathBuf> {
        self.walk(|name| name.ends_with(&self.dot_ext()))
    }

    /// Every test file under the root.
    #[must_use]
    pub fn test_files(&self) -> Vec<PathBuf> {
        let test_ending = self.test_ending();
        self.walk(|name| name.ends_with(&test_ending))
    }

    /// Whether a path already names a test file.
    #[must_use]
    pub fn is_test_file(&self, path: &Path) -> bool {
        path.file_name()
            .map(|name| name.to_string_lossy().ends_with(&self.test_ending()))
            .unwrap_or(false)
    }

    /// Appends the source extension to a bare name typed by the operator.
    #[must_use]
    pub fn ensure_source_ext(&self, name: &str) -> String {
        if name.ends_with(&self.dot_ext()) {
            name.to_string()
        } else {
            format!("{name}{}", self.dot_ext())
        }
    }

    /// Derives the test-file basename for a source file
    /// (`lib/a.rb` -> `a_test.rb`).
    #[must_use]
    pub fn derived_test_name(&self, file: &Path) -> String {
        let basename = file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let dot_ext = self.dot_ext();
        if let Some(stem) = basename.strip_suffix(&dot_ext) {
            format!("{stem}{}{dot_ext}", self.test_suffix)
        } else {
            format!("{basename}{}{dot_ext}", self.test_suffix)
        }
    }

    /// Resolves a changed or operator-named file to the test files to run.
    ///
    /// A test file resolves to itself. Otherwise every known test file
    /// whose path contains the derived basename is selected.
    ///
    /// # Errors
    ///
    /// Returns [`DaemonError::Resolution`] when no test file matches;
    /// callers report it and continue.
    pub fn resolve(&self, file: &Path) -> Result<Vec<PathBuf>> {
        if self.is_test_file(file) {
            debug!(file = %file.display(), "already a test file");
            return Ok(vec![file.to_path_buf()]);
        }

        let derived = self.derived_test_name(file);
        let matches: Vec<PathBuf> = self
            .test_files()
            .into_iter()
            .filter(|candidate| candidate.to_string_lossy().contains(&derived))
            .collect();

        if matches.is_empty() {
            Err(DaemonError::Resolution { filename: derived })
        } else {
            Ok(matches)
        }
    }

    fn dot_ext(&self) -> String {
        format!(".{}", self.source_ext)
    }

    fn test_ending(&self) -> String {
        format!("{}{}", self.test_suffix, self.dot_ext())
    }

    fn walk(&self, keep: impl Fn(&str) -> bool) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = WalkDir::new(&self.root)
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| keep(&entry.file_name().to_string_lossy()))
            .map(walkdir::DirEntry::into_path)
            .collect();
        files.sort();
        files
    }
}
