//! The walker handler that materialises dependencies during get/vendor.
//!
//! For every package the loader decides between a fresh clone and a revision
//! sync, honours any pin the manifest carries for the package's root, learns
//! new roots from resolver answers and child manifests, and records the
//! package's imports as the node's children.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::dep::{Dependencies, Dependency};
use crate::manifest::{Manifest, ManifestEntry, ManifestError};
use crate::pkg::{ImportReader, PackageError};
use crate::resolve::{RepoResolver, ResolveError};
use crate::vcs::VcsError;
use crate::walker::{NodeHandler, Visit};
use crate::workspace::{import_is_child, package_source, visible_subdirectories};

/// Errors from fetching a package.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("cannot fetch '{0}': it is a file, not a directory")]
    NotDirectory(String),

    #[error(transparent)]
    Resolution(#[from] ResolveError),

    /// A manifest entry whose root could not be resolved.
    #[error("cannot resolve '{root}': {source}")]
    Entry {
        root: String,
        #[source]
        source: ResolveError,
    },

    #[error("cannot fetch '{package}': {source}")]
    Vcs {
        package: String,
        #[source]
        source: VcsError,
    },

    #[error(transparent)]
    Package(#[from] PackageError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("could not stat '{path}': {reason}")]
    Stat { path: String, reason: String },
}

/// Walker node-handler for get/vendor.
pub struct DependencyLoader<'a> {
    workspace: PathBuf,
    resolver: &'a dyn RepoResolver,
    read_imports: ImportReader,
    deps: Dependencies,
    entries: Vec<ManifestEntry>,
    children: HashMap<String, Vec<String>>,
    injected_roots: HashSet<String>,
}

impl<'a> DependencyLoader<'a> {
    pub fn new(
        resolver: &'a dyn RepoResolver,
        read_imports: ImportReader,
        workspace: impl Into<PathBuf>,
        entries: Vec<ManifestEntry>,
    ) -> Self {
        DependencyLoader {
            workspace: workspace.into(),
            resolver,
            read_imports,
            deps: Dependencies::new(),
            entries,
            children: HashMap::new(),
            injected_roots: HashSet::new(),
        }
    }

    /// Fetches or re-pins one package. This is the walker handler.
    ///
    /// # Errors
    ///
    /// Every failure here is fatal to the walk: a pinned revision that
    /// cannot be honoured must not be papered over.
    pub fn fetch_update_package(&mut self, pkg: &str) -> Result<Visit, FetchError> {
        let src = package_source(&self.workspace, pkg);
        let fetch = match std::fs::metadata(&src) {
            Ok(meta) if meta.is_dir() => false,
            Ok(_) => return Err(FetchError::NotDirectory(pkg.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => {
                return Err(FetchError::Stat {
                    path: src.display().to_string(),
                    reason: e.to_string(),
                });
            }
        };

        let entry = self.entry_for(pkg).cloned();
        let vcs = self.resolver.resolve_repo(pkg, entry.as_ref())?;

        // First sighting of this root: remember where it came from so
        // siblings under the same root fetch from the same source.
        let entry = match entry {
            Some(entry) => entry,
            None => {
                let mut fabricated = ManifestEntry::new(vcs.get_root());
                fabricated.source_path = vcs.get_source().unwrap_or_default();
                self.entries.push(fabricated.clone());
                fabricated
            }
        };

        let result = if fetch {
            vcs.create(&entry.revision)
        } else {
            vcs.set_rev(&entry.revision)
        };
        result.map_err(|source| FetchError::Vcs {
            package: pkg.to_string(),
            source,
        })?;

        // Deeper imports inherit pins saved by the package itself.
        match Manifest::read(&package_source(&self.workspace, pkg)) {
            Ok(manifest) => self.merge_unknown(manifest.entries),
            Err(ManifestError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let imports = match (self.read_imports)(pkg) {
            Ok(imports) => imports,
            Err(e) if e.is_no_buildable() => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        let mut dep = Dependency::new(pkg);
        for import in &imports {
            dep.imports.insert(import.clone());
            self.deps.add_import_edge(import, pkg);
        }
        self.deps.add(dep);

        let mut children = imports;
        children.extend(self.inject_all_subtree(pkg)?);
        self.children.insert(pkg.to_string(), children);
        Ok(Visit::Descend)
    }

    /// Walker reader: the children recorded for `pkg` by the handler.
    pub fn package_imports(&mut self, pkg: &str) -> Result<Vec<String>, FetchError> {
        Ok(self.children.get(pkg).cloned().unwrap_or_default())
    }

    /// The dependencies fetched so far.
    #[must_use]
    pub fn fetched_deps(&self) -> &Dependencies {
        &self.deps
    }

    /// The pins known so far: manifest entries plus fabricated roots.
    #[must_use]
    pub fn known_entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    fn entry_for(&self, pkg: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| import_is_child(&e.root, pkg))
    }

    fn merge_unknown(&mut self, entries: Vec<ManifestEntry>) {
        for entry in entries {
            if !self.entries.iter().any(|e| e.root == entry.root) {
                self.entries.push(entry);
            }
        }
    }

    /// When `pkg` is the first visit under an `All` root, every visible
    /// subdirectory of that root becomes a synthetic child, so subpackages
    /// no import chain reaches are still walked.
    fn inject_all_subtree(&mut self, pkg: &str) -> Result<Vec<String>, FetchError> {
        let root = match self
            .entries
            .iter()
            .find(|e| e.all && import_is_child(&e.root, pkg))
        {
            Some(entry) => entry.root.clone(),
            None => return Ok(Vec::new()),
        };
        if !self.injected_roots.insert(root.clone()) {
            return Ok(Vec::new());
        }
        let dir = package_source(&self.workspace, &root);
        let mut subpackages = Vec::new();
        collect_subpackages(&dir, &root, &mut subpackages)?;
        Ok(subpackages)
    }
}

impl NodeHandler for DependencyLoader<'_> {
    type Error = FetchError;

    fn handle(&mut self, pkg: &str) -> Result<Visit, FetchError> {
        self.fetch_update_package(pkg)
    }

    fn children(&mut self, pkg: &str) -> Result<Vec<String>, FetchError> {
        self.package_imports(pkg)
    }
}

/// Recursively lists the import paths of all visible subdirectories.
fn collect_subpackages(
    dir: &Path,
    import_path: &str,
    out: &mut Vec<String>,
) -> Result<(), FetchError> {
    let subdirs = visible_subdirectories(dir).map_err(|e| FetchError::Stat {
        path: dir.display().to_string(),
        reason: e.to_string(),
    })?;
    for subdir in subdirs {
        if let Some(name) = subdir.file_name().and_then(|n| n.to_str()) {
            let child = format!("{import_path}/{name}");
            out.push(child.clone());
            collect_subpackages(&subdir, &child, out)?;
        }
    }
    Ok(())
}
