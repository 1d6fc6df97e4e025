//! Package inspection via the Go toolchain.
//!
//! Canticle never parses Go source itself; it asks `go list -json` for a
//! package's metadata with `GOPATH` pointed at the target workspace and
//! reads the structured output.

use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;
use std::process::Command;
use thiserror::Error;

/// Errors from listing a package.
#[derive(Error, Debug)]
pub enum PackageError {
    /// The toolchain reported a package with no buildable source files.
    /// Callers treat this as an empty import set.
    #[error("package '{0}' has no buildable source files")]
    NoBuildableFiles(String),

    #[error("could not run 'go list' for '{package}': {reason}")]
    ListFailed { package: String, reason: String },

    #[error("unparseable 'go list' output for '{package}': {reason}")]
    BadOutput { package: String, reason: String },
}

impl PackageError {
    /// True for the recoverable no-buildable-files sub-kind.
    #[must_use]
    pub fn is_no_buildable(&self) -> bool {
        matches!(self, PackageError::NoBuildableFiles(_))
    }
}

/// Reads a package's remote imports by import path. The fetch and save
/// handlers take one of these so tests and callers control the toolchain
/// boundary.
pub type ImportReader = Box<dyn Fn(&str) -> Result<Vec<String>, PackageError>>;

/// The subset of `go list -json` output the tool consumes.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Package {
    pub import_path: String,
    pub imports: Vec<String>,
    pub test_imports: Vec<String>,
}

impl Package {
    /// Returns the package's remote imports, optionally including test
    /// imports, deduplicated and sorted.
    #[must_use]
    pub fn remote_imports(&self, include_tests: bool) -> Vec<String> {
        let mut imports: BTreeSet<&str> = self
            .imports
            .iter()
            .filter(|i| is_remote(i))
            .map(String::as_str)
            .collect();
        if include_tests {
            imports.extend(self.test_imports.iter().filter(|i| is_remote(i)).map(String::as_str));
        }
        imports.into_iter().map(str::to_string).collect()
    }
}

/// True when an import path names a remote package: not a relative import,
/// at least two segments, and a dot in the first segment (a domain name).
/// Standard library imports never qualify.
#[must_use]
pub fn is_remote(import_path: &str) -> bool {
    if import_path.starts_with("./") || import_path.starts_with("../") {
        return false;
    }
    let mut parts = import_path.split('/');
    let first = parts.next().unwrap_or_default();
    if parts.next().is_none() {
        return false;
    }
    first.contains('.')
}

/// Lists a package in the given workspace by spawning `go list -json`.
///
/// # Errors
///
/// Returns [`PackageError::NoBuildableFiles`] when the toolchain reports a
/// directory with nothing to build, [`PackageError::ListFailed`] for other
/// subprocess failures, and [`PackageError::BadOutput`] when the JSON does
/// not parse.
pub fn load_package(import_path: &str, workspace: &Path) -> Result<Package, PackageError> {
    let output = Command::new("go")
        .args(["list", "-json", import_path])
        .env("GOPATH", workspace)
        .output()
        .map_err(|e| PackageError::ListFailed {
            package: import_path.to_string(),
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("no buildable Go source files")
            || stderr.contains("no Go files in")
        {
            return Err(PackageError::NoBuildableFiles(import_path.to_string()));
        }
        return Err(PackageError::ListFailed {
            package: import_path.to_string(),
            reason: stderr.trim().to_string(),
        });
    }

    serde_json::from_slice(&output.stdout).map_err(|e| PackageError::BadOutput {
        package: import_path.to_string(),
        reason: e.to_string(),
    })
}

/// Reads the remote imports of a package, tests included.
///
/// # Errors
///
/// Propagates any [`PackageError`] from [`load_package`].
pub fn remote_imports(import_path: &str, workspace: &Path) -> Result<Vec<String>, PackageError> {
    let pkg = load_package(import_path, workspace)?;
    Ok(pkg.remote_imports(true))
}
