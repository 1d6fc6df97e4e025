//! Workspace discovery and path/import-path translation.
//!
//! A workspace is a directory containing a `src/` subtree that holds every
//! checked-out repository. Import paths are slash-separated and map directly
//! onto directories under `src/`.

use std::env;
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Name of the manifest file kept at a project root.
pub const MANIFEST_FILE: &str = "Canticle";

/// Directory under the workspace that holds package sources.
pub const SOURCE_DIR: &str = "src";

/// Errors that can occur when locating or translating workspace paths.
#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("no workspace: not inside a 'src/' tree and GOPATH is unset")]
    NoWorkspace,

    #[error("path '{path}' is not inside workspace '{workspace}'")]
    OutsideWorkspace { workspace: String, path: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Returns the on-disk source directory for an import path:
/// `workspace/src/<import_path>` with slashes mapped to the native separator.
#[must_use]
pub fn package_source(workspace: &Path, import_path: &str) -> PathBuf {
    let mut p = workspace.join(SOURCE_DIR);
    for part in import_path.split('/').filter(|s| !s.is_empty()) {
        p.push(part);
    }
    p
}

/// Returns the import path named by an absolute path inside a workspace.
///
/// The result is the path relative to the workspace, converted to forward
/// slashes, with a leading `src/` stripped. The `src` directory itself names
/// the empty package.
///
/// # Errors
///
/// Returns [`WorkspaceError::OutsideWorkspace`] if `path` is not under
/// `workspace`.
pub fn package_name(workspace: &Path, path: &Path) -> Result<String, WorkspaceError> {
    let rel = path
        .strip_prefix(workspace)
        .map_err(|_| WorkspaceError::OutsideWorkspace {
            workspace: workspace.display().to_string(),
            path: path.display().to_string(),
        })?;

    let mut parts: Vec<&str> = Vec::new();
    for c in rel.components() {
        if let Component::Normal(os) = c {
            parts.push(os.to_str().unwrap_or_default());
        }
    }
    if parts.first() == Some(&SOURCE_DIR) {
        parts.remove(0);
    }
    Ok(parts.join("/"))
}

/// Locates the workspace for the current process.
///
/// Preference order: an ancestor of the current directory named `src` (the
/// workspace is that ancestor's parent), then the `GOPATH` environment
/// variable.
///
/// # Errors
///
/// Returns [`WorkspaceError::NoWorkspace`] when neither applies.
pub fn workspace_root() -> Result<PathBuf, WorkspaceError> {
    let cwd = env::current_dir()?;
    if let Some(root) = project_workspace(&cwd) {
        return Ok(root);
    }
    match env::var("GOPATH") {
        Ok(gopath) if !gopath.is_empty() => Ok(PathBuf::from(gopath)),
        _ => Err(WorkspaceError::NoWorkspace),
    }
}

/// Returns the workspace containing `dir`, if `dir` lies inside a `src/`
/// tree: everything before the first `src` component.
#[must_use]
pub fn project_workspace(dir: &Path) -> Option<PathBuf> {
    let mut root = PathBuf::new();
    for c in dir.components() {
        if let Component::Normal(os) = c {
            if os == SOURCE_DIR {
                return Some(root);
            }
        }
        root.push(c);
    }
    None
}

/// Component-wise prefix test: true when `child` lives somewhere below
/// `parent`. This is not a string-prefix test; `a/bc` is not a child of
/// `a/b`.
#[must_use]
pub fn path_is_child(parent: &Path, child: &Path) -> bool {
    let parent: Vec<_> = parent.components().collect();
    let child: Vec<_> = child.components().collect();
    if child.len() < parent.len() {
        return false;
    }
    parent.iter().zip(child.iter()).all(|(p, c)| p == c)
}

/// Same test for slash-separated import paths.
#[must_use]
pub fn import_is_child(parent: &str, child: &str) -> bool {
    let parent: Vec<_> = parent.split('/').collect();
    let child: Vec<_> = child.split('/').collect();
    if child.len() < parent.len() {
        return false;
    }
    parent.iter().zip(child.iter()).all(|(p, c)| p == c)
}

/// Lists the child directories of `dir` whose names do not begin with a dot,
/// sorted by name.
///
/// # Errors
///
/// Returns an error if `dir` cannot be read.
pub fn visible_subdirectories(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut subdirs = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if name.to_string_lossy().starts_with('.') {
            continue;
        }
        if entry.file_type()?.is_dir() {
            subdirs.push(entry.path());
        }
    }
    subdirs.sort();
    Ok(subdirs)
}

/// Returns the manifest location for a project directory.
#[must_use]
pub fn dependency_file(project: &Path) -> PathBuf {
    project.join(MANIFEST_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn package_source_joins_under_src() {
        let p = package_source(Path::new("/ws"), "example.org/x/lib");
        assert_eq!(p, Path::new("/ws/src/example.org/x/lib"));
    }

    #[test]
    fn package_name_strips_src_prefix() {
        let name = package_name(Path::new("/ws"), Path::new("/ws/src/example.org/x/lib")).unwrap();
        assert_eq!(name, "example.org/x/lib");
    }

    #[test]
    fn package_name_of_src_is_empty() {
        let name = package_name(Path::new("/ws"), Path::new("/ws/src")).unwrap();
        assert_eq!(name, "");
    }

    #[test]
    fn package_name_outside_workspace_errors() {
        let err = package_name(Path::new("/ws"), Path::new("/elsewhere/pkg")).unwrap_err();
        assert!(matches!(err, WorkspaceError::OutsideWorkspace { .. }));
    }

    #[test]
    fn project_workspace_finds_src_ancestor() {
        let root = project_workspace(Path::new("/home/dev/ws/src/example.org/proj")).unwrap();
        assert_eq!(root, Path::new("/home/dev/ws"));
    }

    #[test]
    fn project_workspace_none_without_src() {
        assert!(project_workspace(Path::new("/home/dev/elsewhere")).is_none());
    }

    #[test]
    fn path_is_child_is_segment_wise() {
        assert!(path_is_child(Path::new("/a/b"), Path::new("/a/b/c")));
        assert!(path_is_child(Path::new("/a/b"), Path::new("/a/b")));
        assert!(!path_is_child(Path::new("/a/b"), Path::new("/a/bc")));
        assert!(!path_is_child(Path::new("/a/b/c"), Path::new("/a/b")));
    }

    #[test]
    fn import_is_child_is_segment_wise() {
        assert!(import_is_child("example.org/x", "example.org/x/lib"));
        assert!(!import_is_child("example.org/x", "example.org/xy"));
    }

    #[test]
    fn visible_subdirectories_skips_hidden() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("b")).unwrap();
        std::fs::create_dir(dir.path().join("a")).unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join("file"), "x").unwrap();

        let subdirs = visible_subdirectories(dir.path()).unwrap();
        assert_eq!(subdirs, vec![dir.path().join("a"), dir.path().join("b")]);
    }
}
