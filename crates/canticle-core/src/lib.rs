//! Core engine for the `cant` dependency tool.
//!
//! This crate provides:
//! - Workspace discovery and import-path/filesystem translation
//! - Package inspection through the Go toolchain
//! - The `Canticle` manifest model (per-repository revision pins)
//! - A cycle-safe dependency walker shared by save and restore
//! - VCS primitives and handles for git, hg, svn, and bzr
//! - Layered repository resolvers behind a memoising composite
//! - The fetch and save walker handlers, conflict resolution, and the
//!   parallel manifest fetcher

mod conflict;
mod dep;
mod fetch;
mod fetcher;
mod manifest;
mod pkg;
mod resolve;
mod save;
mod vcs;
mod walker;
mod workspace;

pub use conflict::{ConflictError, ConflictResolver, PreferLocal, Prompt};
pub use dep::{Dependencies, Dependency};
pub use fetch::{DependencyLoader, FetchError};
pub use fetcher::{fetch_entries, FetchReport};
pub use manifest::{Manifest, ManifestEntry, ManifestError};
pub use pkg::{is_remote, load_package, remote_imports, ImportReader, Package, PackageError};
pub use resolve::{
    CompositeResolver, LocalResolver, MemoizedResolver, MetadataResolver, RemoteResolver,
    RepoResolver, ResolveError,
};
pub use save::{
    DependencySaver, DependencySource, DependencySources, SaveError, SourcesResolver,
};
pub use vcs::{ping, BranchUpdate, LocalVcs, RemoteVcs, Vcs, VcsError, VcsKind};
pub use walker::{DependencyWalker, NodeHandler, Visit};
pub use workspace::{
    dependency_file, import_is_child, package_name, package_source, path_is_child,
    project_workspace, visible_subdirectories, workspace_root, WorkspaceError, MANIFEST_FILE,
    SOURCE_DIR,
};

/// Crate version, stamped into `--version` output by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
