//! The walker handler that records a project's dependency tree for save,
//! and the pass that turns the finished graph into per-repository sources.
//!
//! The save walker traverses on-disk paths: the project's own subpackages by
//! directory listing, and everything they import by translating import paths
//! back into workspace paths.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;
use thiserror::Error;

use crate::dep::{Dependencies, Dependency};
use crate::manifest::{Manifest, ManifestError};
use crate::pkg::ImportReader;
use crate::resolve::RepoResolver;
use crate::vcs::VcsError;
use crate::walker::{NodeHandler, Visit};
use crate::workspace::{
    package_name, package_source, path_is_child, visible_subdirectories, WorkspaceError,
};

/// Errors from the save pipeline.
#[derive(Error, Debug)]
pub enum SaveError {
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("cannot read revision for '{root}': {source}")]
    Vcs {
        root: String,
        #[source]
        source: VcsError,
    },

    #[error("could not list '{path}': {reason}")]
    List { path: String, reason: String },
}

/// Walker node-handler for save. Nodes are on-disk paths.
pub struct DependencySaver {
    workspace: PathBuf,
    project_path: PathBuf,
    read_imports: ImportReader,
    excludes: HashSet<PathBuf>,
    deps: Dependencies,
}

impl DependencySaver {
    pub fn new(
        read_imports: ImportReader,
        workspace: impl Into<PathBuf>,
        project_path: impl Into<PathBuf>,
    ) -> Self {
        DependencySaver {
            workspace: workspace.into(),
            project_path: project_path.into(),
            read_imports,
            excludes: HashSet::new(),
            deps: Dependencies::new(),
        }
    }

    /// Directories never recurred into unless the dep tree reaches them.
    pub fn set_excludes(&mut self, excludes: impl IntoIterator<Item = PathBuf>) {
        self.excludes = excludes.into_iter().collect();
    }

    /// Records the first-order imports of the package at `path`. This is
    /// the walker handler; unreadable nodes carry their error and are
    /// skipped rather than aborting the walk.
    ///
    /// # Errors
    ///
    /// Only path-translation failures abort; read failures are attached to
    /// the node.
    pub fn save_package_deps(&mut self, path: &str) -> Result<Visit, SaveError> {
        let path_buf = PathBuf::from(path);
        let pkg = package_name(&self.workspace, &path_buf)?;

        match std::fs::metadata(&path_buf) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                let mut dep = Dependency::new(&pkg);
                dep.err = Some(format!("'{path}' is a file, not a directory"));
                self.deps.add(dep);
                return Ok(Visit::Skip);
            }
            Err(e) => {
                let mut dep = Dependency::new(&pkg);
                dep.err = Some(format!("'{path}' could not be found on disk: {e}"));
                self.deps.add(dep);
                return Ok(Visit::Skip);
            }
        }

        let imports = match (self.read_imports)(&pkg) {
            Ok(imports) => imports,
            Err(e) if e.is_no_buildable() => Vec::new(),
            Err(e) => {
                let mut dep = Dependency::new(&pkg);
                dep.err = Some(format!("cannot read deps of '{pkg}': {e}"));
                self.deps.add(dep);
                return Ok(Visit::Skip);
            }
        };

        let mut dep = Dependency::new(&pkg);
        for import in &imports {
            dep.imports.insert(import.clone());
            self.deps.add_import_edge(import, &pkg);
        }
        self.deps.add(dep);
        Ok(Visit::Descend)
    }

    /// Walker reader: the node's recorded imports translated back to disk
    /// paths, plus its visible subdirectories when the node lies inside the
    /// project being saved.
    ///
    /// # Errors
    ///
    /// Returns a [`SaveError::List`] when a project directory cannot be
    /// listed.
    pub fn package_paths(&mut self, path: &str) -> Result<Vec<String>, SaveError> {
        let path_buf = PathBuf::from(path);
        let mut children = Vec::new();

        if path_is_child(&self.project_path, &path_buf) {
            let subdirs = visible_subdirectories(&path_buf).map_err(|e| SaveError::List {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
            children.extend(
                subdirs
                    .into_iter()
                    .filter(|d| !self.excludes.contains(d))
                    .map(|d| d.to_string_lossy().into_owned()),
            );
        }

        let pkg = package_name(&self.workspace, &path_buf)?;
        if let Some(dep) = self.deps.get(&pkg) {
            children.extend(
                dep.imports
                    .iter()
                    .map(|i| package_source(&self.workspace, i).to_string_lossy().into_owned()),
            );
        }
        Ok(children)
    }

    /// The dependency graph recorded by the walk.
    #[must_use]
    pub fn dependencies(&self) -> &Dependencies {
        &self.deps
    }

    #[must_use]
    pub fn into_dependencies(self) -> Dependencies {
        self.deps
    }
}

impl NodeHandler for DependencySaver {
    type Error = SaveError;

    fn handle(&mut self, path: &str) -> Result<Visit, SaveError> {
        self.save_package_deps(path)
    }

    fn children(&mut self, path: &str) -> Result<Vec<String>, SaveError> {
        self.package_paths(path)
    }
}

/// Everything observed about one repository root at save time.
#[derive(Debug, Clone, Default)]
pub struct DependencySource {
    /// Repository root import path.
    pub root: String,
    /// Revisions observed: on-disk state plus any pins found in child
    /// manifests under the project.
    pub revisions: BTreeSet<String>,
    /// The revision the working copy is actually at.
    pub on_disk_revision: String,
    /// Remote URLs observed.
    pub sources: BTreeSet<String>,
    /// The remote URL the working copy reports.
    pub on_disk_source: String,
    /// Import paths attributed to this root.
    pub deps: BTreeSet<String>,
    /// Error recorded while reading this source.
    pub err: Option<String>,
}

impl DependencySource {
    #[must_use]
    pub fn new(root: impl Into<String>) -> Self {
        DependencySource {
            root: root.into(),
            ..DependencySource::default()
        }
    }
}

/// The set of sources discovered for a save, keyed by root.
#[derive(Debug, Clone, Default)]
pub struct DependencySources {
    sources: BTreeMap<String, DependencySource>,
}

impl DependencySources {
    #[must_use]
    pub fn new() -> Self {
        DependencySources::default()
    }

    /// Finds the source whose root covers `import_path`.
    pub fn source_for_mut(&mut self, import_path: &str) -> Option<&mut DependencySource> {
        self.sources
            .values_mut()
            .find(|s| crate::workspace::import_is_child(&s.root, import_path))
    }

    pub fn add(&mut self, source: DependencySource) {
        self.sources.insert(source.root.clone(), source);
    }

    /// Sources in root order.
    pub fn iter(&self) -> impl Iterator<Item = &DependencySource> {
        self.sources.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Converts a finished dependency graph into one [`DependencySource`] per
/// repository root, using the local resolver to read on-disk state.
pub struct SourcesResolver<'a> {
    pub workspace: PathBuf,
    pub project_path: PathBuf,
    pub resolver: &'a dyn RepoResolver,
    /// Record branch names instead of revisions where a branch exists.
    pub branches: bool,
}

impl<'a> SourcesResolver<'a> {
    /// # Errors
    ///
    /// Fails when a repository's revision or remote cannot be read, or a
    /// child manifest is unparseable. Unresolvable roots are skipped with a
    /// warning; save-level policy decides whether that matters.
    pub fn resolve_sources(&self, deps: &Dependencies) -> Result<DependencySources, SaveError> {
        let mut sources = DependencySources::new();

        for dep in deps.iter() {
            if let Some(source) = sources.source_for_mut(&dep.import_path) {
                source.deps.insert(dep.import_path.clone());
                if source.err.is_none() {
                    source.err = dep.err.clone();
                }
                continue;
            }

            let vcs = match self.resolver.resolve_repo(&dep.import_path, None) {
                Ok(vcs) => vcs,
                Err(e) => {
                    eprintln!("WARN: skipping {}: {e}", dep.import_path);
                    continue;
                }
            };

            let root = vcs.get_root().to_string();
            let root_src = package_source(&self.workspace, &root);
            if root_src == self.project_path || path_is_child(&root_src, &self.project_path) {
                // The project's own repository is not a dependency of itself.
                continue;
            }

            let mut source = DependencySource::new(&root);
            source.err = dep.err.clone();

            let rev = if self.branches {
                match vcs.get_branch() {
                    Ok(branch) => branch,
                    Err(e) => {
                        eprintln!("WARN: no branch at {root}: {e}");
                        self.on_disk_rev(&*vcs, &root)?
                    }
                }
            } else {
                self.on_disk_rev(&*vcs, &root)?
            };
            source.revisions.insert(rev.clone());
            source.on_disk_revision = rev;

            let vcs_source = vcs.get_source().map_err(|e| SaveError::Vcs {
                root: root.clone(),
                source: e,
            })?;
            source.sources.insert(vcs_source.clone());
            source.on_disk_source = vcs_source;
            source.deps.insert(dep.import_path.clone());

            sources.add(source);
        }

        self.add_child_manifests(&mut sources, deps)?;
        Ok(sources)
    }

    fn on_disk_rev(&self, vcs: &dyn crate::vcs::Vcs, root: &str) -> Result<String, SaveError> {
        vcs.get_rev().map_err(|e| SaveError::Vcs {
            root: root.to_string(),
            source: e,
        })
    }

    /// Child `Canticle` manifests at the project's own subpackages
    /// contribute their pins as revision/source candidates.
    fn add_child_manifests(
        &self,
        sources: &mut DependencySources,
        deps: &Dependencies,
    ) -> Result<(), SaveError> {
        for dep in deps.iter() {
            let dir = package_source(&self.workspace, &dep.import_path);
            if !path_is_child(&self.project_path, &dir) {
                continue;
            }
            let manifest = match Manifest::read(&dir) {
                Ok(m) => m,
                Err(ManifestError::NotFound(_)) => continue,
                Err(e) => return Err(e.into()),
            };
            for entry in manifest.entries {
                if let Some(source) = sources.source_for_mut(&entry.root) {
                    if !entry.revision.is_empty() {
                        source.revisions.insert(entry.revision);
                    }
                    if !entry.source_path.is_empty() {
                        source.sources.insert(entry.source_path);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestEntry;
    use crate::resolve::ResolveError;
    use crate::vcs::{BranchUpdate, Vcs};
    use crate::walker::DependencyWalker;
    use std::collections::BTreeMap;
    use std::path::Path;
    use std::sync::Arc;

    fn graph_reader(graph: BTreeMap<&'static str, Vec<&'static str>>) -> ImportReader {
        Box::new(move |pkg: &str| {
            Ok(graph
                .get(pkg)
                .map(|children| children.iter().map(|c| c.to_string()).collect())
                .unwrap_or_default())
        })
    }

    /// Lays out a workspace with a project and one external repo, and walks
    /// the project. Both project subpackages import `ext.org/lib`.
    fn walk_project(ws: &Path) -> DependencySaver {
        let proj = ws.join("src/example.org/proj");
        std::fs::create_dir_all(proj.join("sub")).unwrap();
        std::fs::create_dir_all(ws.join("src/ext.org/lib")).unwrap();

        let reader = graph_reader(BTreeMap::from([
            ("example.org/proj", vec!["ext.org/lib"]),
            ("example.org/proj/sub", vec!["ext.org/lib"]),
        ]));
        let mut saver = DependencySaver::new(reader, ws, &proj);
        DependencyWalker::new(&mut saver)
            .traverse_dependencies(&proj.to_string_lossy())
            .unwrap();
        saver
    }

    #[test]
    fn walk_records_imports_and_importers() {
        let ws = tempfile::tempdir().unwrap();
        let saver = walk_project(ws.path());
        let deps = saver.dependencies();

        let lib = deps.get("ext.org/lib").unwrap();
        assert!(lib.imported_from.contains("example.org/proj"));
        assert!(lib.imported_from.contains("example.org/proj/sub"));

        let proj = deps.get("example.org/proj").unwrap();
        assert!(proj.imports.contains("ext.org/lib"));
    }

    #[test]
    fn missing_node_records_error_and_skips() {
        let ws = tempfile::tempdir().unwrap();
        let missing = ws.path().join("src/example.org/gone");
        let mut saver = DependencySaver::new(graph_reader(BTreeMap::new()), ws.path(), &missing);
        let visit = saver
            .save_package_deps(&missing.to_string_lossy())
            .unwrap();
        assert_eq!(visit, Visit::Skip);
        assert!(saver.dependencies().get("example.org/gone").unwrap().err.is_some());
    }

    #[test]
    fn excluded_directories_are_not_children() {
        let ws = tempfile::tempdir().unwrap();
        let proj = ws.path().join("src/example.org/proj");
        std::fs::create_dir_all(proj.join("keep")).unwrap();
        std::fs::create_dir_all(proj.join("skipme")).unwrap();

        let mut saver = DependencySaver::new(graph_reader(BTreeMap::new()), ws.path(), &proj);
        saver.set_excludes([proj.join("skipme")]);
        saver.save_package_deps(&proj.to_string_lossy()).unwrap();
        let children = saver.package_paths(&proj.to_string_lossy()).unwrap();

        assert!(children.iter().any(|c| c.ends_with("keep")));
        assert!(!children.iter().any(|c| c.ends_with("skipme")));
    }

    /// Local-style handle over fixed revision/source values.
    #[derive(Debug)]
    struct FixedVcs {
        root: String,
        rev: String,
        branch: Option<String>,
        source: String,
    }

    impl Vcs for FixedVcs {
        fn create(&self, _rev: &str) -> Result<(), VcsError> {
            Ok(())
        }
        fn set_rev(&self, _rev: &str) -> Result<(), VcsError> {
            Ok(())
        }
        fn get_rev(&self) -> Result<String, VcsError> {
            Ok(self.rev.clone())
        }
        fn get_branch(&self) -> Result<String, VcsError> {
            self.branch.clone().ok_or(VcsError::Unsupported {
                op: "branch lookup",
                handle: "fixed",
            })
        }
        fn update_branch(&self, _branch: &str) -> Result<BranchUpdate, VcsError> {
            Ok(BranchUpdate {
                updated: false,
                output: String::new(),
            })
        }
        fn get_source(&self) -> Result<String, VcsError> {
            Ok(self.source.clone())
        }
        fn get_root(&self) -> &str {
            &self.root
        }
    }

    /// Roots `ext.org/...` paths at `ext.org/lib`; everything else at the
    /// project.
    struct RootingResolver {
        branch: Option<String>,
    }

    impl RepoResolver for RootingResolver {
        fn resolve_repo(
            &self,
            import_path: &str,
            _entry: Option<&ManifestEntry>,
        ) -> Result<Arc<dyn Vcs>, ResolveError> {
            let root = if import_path.starts_with("ext.org/") {
                "ext.org/lib"
            } else {
                "example.org/proj"
            };
            Ok(Arc::new(FixedVcs {
                root: root.to_string(),
                rev: "rev-on-disk".to_string(),
                branch: self.branch.clone(),
                source: "https://ext.org/lib".to_string(),
            }))
        }
    }

    fn sources_for(ws: &Path, branches: bool) -> DependencySources {
        let saver = walk_project(ws);
        let resolver = RootingResolver {
            branch: if branches { Some("main".to_string()) } else { None },
        };
        let sr = SourcesResolver {
            workspace: ws.to_path_buf(),
            project_path: ws.join("src/example.org/proj"),
            resolver: &resolver,
            branches,
        };
        sr.resolve_sources(saver.dependencies()).unwrap()
    }

    #[test]
    fn single_revision_produces_one_source_per_root() {
        let ws = tempfile::tempdir().unwrap();
        let sources = sources_for(ws.path(), false);

        assert_eq!(sources.len(), 1, "project's own root must be skipped");
        let source = sources.iter().next().unwrap();
        assert_eq!(source.root, "ext.org/lib");
        assert_eq!(source.on_disk_revision, "rev-on-disk");
        assert_eq!(source.on_disk_source, "https://ext.org/lib");
        assert_eq!(source.revisions.len(), 1);
    }

    #[test]
    fn branch_mode_records_branch_names() {
        let ws = tempfile::tempdir().unwrap();
        let sources = sources_for(ws.path(), true);
        assert_eq!(sources.iter().next().unwrap().on_disk_revision, "main");
    }

    #[test]
    fn child_manifest_pins_become_candidates() {
        let ws = tempfile::tempdir().unwrap();
        // A sub-manifest under the project pins ext.org/lib at another rev.
        let sub = ws.path().join("src/example.org/proj/sub");
        std::fs::create_dir_all(&sub).unwrap();
        std::fs::write(
            sub.join("Canticle"),
            r#"[{"Root":"ext.org/lib","Revision":"pinned-r1","SourcePath":"https://mirror.ext.org/lib"}]"#,
        )
        .unwrap();

        let sources = sources_for(ws.path(), false);
        let source = sources.iter().next().unwrap();
        assert!(source.revisions.contains("pinned-r1"));
        assert!(source.revisions.contains("rev-on-disk"));
        assert_eq!(source.revisions.len(), 2);
        assert!(source.sources.contains("https://mirror.ext.org/lib"));
        assert_eq!(source.on_disk_revision, "rev-on-disk");
    }
}
