//! The `Canticle` manifest: a JSON array of repository pins.
//!
//! Each entry pins one repository root to a revision and optionally records
//! the remote URL to fetch it from. The file lives at a project's root
//! directory and is always written sorted by root.

use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::workspace::{dependency_file, import_is_child};

/// Errors that can occur when reading or writing a manifest.
#[derive(Error, Debug)]
pub enum ManifestError {
    /// The manifest file does not exist. Callers routinely tolerate this.
    #[error("no manifest at '{0}'")]
    NotFound(String),

    #[error("failed to read manifest '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse manifest '{path}': {reason}")]
    Parse { path: String, reason: String },
}

/// One pinned repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct ManifestEntry {
    /// Shortest import-path prefix owned by this repository.
    pub root: String,

    /// Remote URL to fetch from. Blank when host metadata suffices.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source_path: String,

    /// VCS revision: commit id, tag, or branch name. Blank means the
    /// backend's default.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub revision: String,

    /// When set, the repository's entire visible subtree is in scope even if
    /// no import chain reaches it.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub all: bool,
}

impl ManifestEntry {
    /// A pin with just a root, default source and revision.
    #[must_use]
    pub fn new(root: impl Into<String>) -> Self {
        ManifestEntry {
            root: root.into(),
            source_path: String::new(),
            revision: String::new(),
            all: false,
        }
    }
}

/// The ordered list of pins for one project.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Reads the manifest of the project at `project_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::NotFound`] when the file is absent; most
    /// callers treat that as an empty manifest.
    pub fn read(project_dir: &Path) -> Result<Self, ManifestError> {
        Self::read_file(&dependency_file(project_dir))
    }

    /// Reads a manifest from an explicit file path.
    ///
    /// # Errors
    ///
    /// See [`Manifest::read`].
    pub fn read_file(path: &Path) -> Result<Self, ManifestError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ManifestError::NotFound(path.display().to_string()));
            }
            Err(e) => {
                return Err(ManifestError::Io {
                    path: path.display().to_string(),
                    source: e,
                });
            }
        };
        Self::parse(&content).map_err(|reason| ManifestError::Parse {
            path: path.display().to_string(),
            reason,
        })
    }

    /// Parses a manifest from its JSON text.
    ///
    /// # Errors
    ///
    /// Returns the parse failure as a message.
    pub fn parse(content: &str) -> Result<Self, String> {
        let entries: Vec<ManifestEntry> =
            serde_json::from_str(content).map_err(|e| e.to_string())?;
        Ok(Manifest { entries })
    }

    /// Serialises the manifest, sorted by root, as indented JSON.
    #[must_use]
    pub fn to_json_string(&self) -> String {
        let mut sorted = self.entries.clone();
        sorted.sort_by(|a, b| a.root.cmp(&b.root));
        // Vec<ManifestEntry> serialisation cannot fail.
        serde_json::to_string_pretty(&sorted).expect("manifest serialisation")
    }

    /// Writes the manifest to the project at `project_dir`, sorted by root.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be written.
    pub fn write(&self, project_dir: &Path) -> Result<(), ManifestError> {
        let path = dependency_file(project_dir);
        std::fs::write(&path, self.to_json_string()).map_err(|e| ManifestError::Io {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// Finds the entry whose root is `import_path` or a path-segment
    /// ancestor of it. The manifest is small; a linear scan suffices.
    #[must_use]
    pub fn entry_for(&self, import_path: &str) -> Option<&ManifestEntry> {
        self.entries
            .iter()
            .find(|e| import_is_child(&e.root, import_path))
    }

    /// Appends entries whose roots are not yet present.
    pub fn merge_unknown(&mut self, entries: Vec<ManifestEntry>) {
        for entry in entries {
            if !self.entries.iter().any(|e| e.root == entry.root) {
                self.entries.push(entry);
            }
        }
    }
}
