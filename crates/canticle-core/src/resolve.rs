//! Repository resolution: mapping an import path to a VCS handle.
//!
//! Three concrete strategies (local disk, remote protocol sniffing, host
//! metadata discovery) sit behind a composite that tries them in order and a
//! memoising wrapper that caches outcomes for the lifetime of a command.

use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use thiserror::Error;

use crate::manifest::ManifestEntry;
use crate::vcs::{ping, LocalVcs, RemoteVcs, Vcs, VcsKind};
use crate::workspace::{package_name, package_source};

/// Errors from repository resolution. Cloneable so the memoising resolver
/// can replay cached failures.
#[derive(Error, Debug, Clone)]
pub enum ResolveError {
    /// No resolver in the chain could produce a handle.
    #[error("could not resolve a repository for '{path}': {reason}")]
    ResolutionFailure { path: String, reason: String },

    #[error("expected a directory at '{0}', found a file")]
    NotDirectory(String),

    #[error("could not stat '{path}': {reason}")]
    Stat { path: String, reason: String },

    #[error("no version control metadata found for '{0}'")]
    NoVcsMetadata(String),

    #[error("remote ping failed for '{url}': {reason}")]
    PingFailed { url: String, reason: String },

    #[error("metadata discovery failed for '{path}': {reason}")]
    MetadataFailed { path: String, reason: String },
}

/// Maps an import path (plus its manifest entry, when one exists) to a
/// repository handle.
pub trait RepoResolver: Send + Sync {
    /// # Errors
    ///
    /// Returns a [`ResolveError`] when this strategy cannot produce a
    /// handle; composite callers treat that as "try the next one".
    fn resolve_repo(
        &self,
        import_path: &str,
        entry: Option<&ManifestEntry>,
    ) -> Result<Arc<dyn Vcs>, ResolveError>;
}

/// Resolves against working copies already present under `workspace/src`.
pub struct LocalResolver {
    workspace: PathBuf,
}

impl LocalResolver {
    #[must_use]
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        LocalResolver {
            workspace: workspace.into(),
        }
    }
}

impl RepoResolver for LocalResolver {
    fn resolve_repo(
        &self,
        import_path: &str,
        _entry: Option<&ManifestEntry>,
    ) -> Result<Arc<dyn Vcs>, ResolveError> {
        let full = package_source(&self.workspace, import_path);
        let meta = std::fs::metadata(&full).map_err(|e| ResolveError::Stat {
            path: full.display().to_string(),
            reason: e.to_string(),
        })?;
        if !meta.is_dir() {
            return Err(ResolveError::NotDirectory(full.display().to_string()));
        }

        let (kind, repo_dir) = find_vcs_metadata(&full, &self.workspace)
            .ok_or_else(|| ResolveError::NoVcsMetadata(import_path.to_string()))?;
        let root = package_name(&self.workspace, &repo_dir).map_err(|e| ResolveError::Stat {
            path: repo_dir.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Arc::new(LocalVcs::new(kind, root, self.workspace.clone())))
    }
}

/// Walks from `dir` up to (but not past) `workspace` looking for a backend
/// metadata directory; the directory containing it is the repository root.
fn find_vcs_metadata(dir: &Path, workspace: &Path) -> Option<(VcsKind, PathBuf)> {
    let mut current = dir;
    loop {
        for kind in VcsKind::ALL {
            if current.join(kind.metadata_dir()).is_dir() {
                return Some((kind, current.to_path_buf()));
            }
        }
        if current == workspace {
            return None;
        }
        current = current.parent()?;
    }
}

/// Known URL prefixes and the backends they imply. `https://` forcing git is
/// a heuristic, not a guarantee; the metadata resolver covers hosts where it
/// is wrong.
const PROTOCOL_TABLE: [(&str, VcsKind); 7] = [
    ("git+ssh://", VcsKind::Git),
    ("git://", VcsKind::Git),
    ("git@", VcsKind::Git),
    ("ssh://hg@", VcsKind::Hg),
    ("svn://", VcsKind::Svn),
    ("bzr://", VcsKind::Bzr),
    ("https://", VcsKind::Git),
];

/// Guesses a backend from a URL's protocol prefix.
#[must_use]
pub fn guess_protocol(url: &str) -> Option<VcsKind> {
    PROTOCOL_TABLE
        .iter()
        .find(|(prefix, _)| url.starts_with(prefix))
        .map(|(_, kind)| *kind)
}

/// Resolves by pattern-matching the source URL (or import path) against
/// known protocol prefixes and pinging the remote.
pub struct RemoteResolver {
    workspace: PathBuf,
}

impl RemoteResolver {
    #[must_use]
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        RemoteResolver {
            workspace: workspace.into(),
        }
    }
}

impl RepoResolver for RemoteResolver {
    fn resolve_repo(
        &self,
        import_path: &str,
        entry: Option<&ManifestEntry>,
    ) -> Result<Arc<dyn Vcs>, ResolveError> {
        let resolve_path = match entry {
            Some(e) if !e.source_path.is_empty() => e.source_path.as_str(),
            _ => import_path,
        };
        let kind = guess_protocol(resolve_path).ok_or_else(|| ResolveError::ResolutionFailure {
            path: resolve_path.to_string(),
            reason: "no known protocol prefix".to_string(),
        })?;
        ping(kind, resolve_path).map_err(|e| ResolveError::PingFailed {
            url: resolve_path.to_string(),
            reason: e.to_string(),
        })?;

        let root = match entry {
            Some(e) if !e.root.is_empty() => e.root.clone(),
            _ => import_path.to_string(),
        };
        Ok(Arc::new(RemoteVcs::new(
            kind,
            root,
            resolve_path,
            self.workspace.clone(),
        )))
    }
}

/// Resolves through the host's `?go-get=1` metadata convention: an HTTP GET
/// whose response carries a `<meta name="go-import">` tag naming the root,
/// backend, and repository URL.
pub struct MetadataResolver {
    workspace: PathBuf,
}

impl MetadataResolver {
    #[must_use]
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        MetadataResolver {
            workspace: workspace.into(),
        }
    }

    fn fetch_metadata(&self, import_path: &str) -> Result<String, ResolveError> {
        let url = format!("https://{import_path}?go-get=1");
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| ResolveError::MetadataFailed {
                path: import_path.to_string(),
                reason: e.to_string(),
            })?;
        let response = client.get(&url).send().map_err(|e| ResolveError::MetadataFailed {
            path: import_path.to_string(),
            reason: e.to_string(),
        })?;
        response.text().map_err(|e| ResolveError::MetadataFailed {
            path: import_path.to_string(),
            reason: e.to_string(),
        })
    }
}

impl RepoResolver for MetadataResolver {
    fn resolve_repo(
        &self,
        import_path: &str,
        _entry: Option<&ManifestEntry>,
    ) -> Result<Arc<dyn Vcs>, ResolveError> {
        let body = self.fetch_metadata(import_path)?;
        let meta = parse_go_import_meta(&body, import_path).ok_or_else(|| {
            ResolveError::MetadataFailed {
                path: import_path.to_string(),
                reason: "no matching go-import meta tag".to_string(),
            }
        })?;
        let root = trim_path_to_root(import_path, &meta.root).ok_or_else(|| {
            ResolveError::MetadataFailed {
                path: import_path.to_string(),
                reason: format!("reported root '{}' is longer than the import path", meta.root),
            }
        })?;
        Ok(Arc::new(RemoteVcs::new(
            meta.kind,
            root,
            meta.repo,
            self.workspace.clone(),
        )))
    }
}

/// A parsed `go-import` meta tag.
#[derive(Debug, PartialEq, Eq)]
struct GoImportMeta {
    root: String,
    kind: VcsKind,
    repo: String,
}

/// Extracts the `go-import` meta tag for `import_path` from an HTML body.
/// Content is three space-separated fields: root, vcs, repo URL. A tag whose
/// root prefixes the import path wins; otherwise the first well-formed tag
/// is used (mirrors may report a root spelled for another host).
fn parse_go_import_meta(body: &str, import_path: &str) -> Option<GoImportMeta> {
    // Static pattern.
    let re = Regex::new(r#"<meta\s+name="go-import"\s+content="([^"]+)""#).expect("meta pattern");
    let mut fallback = None;
    for caps in re.captures_iter(body) {
        let content = &caps[1];
        let mut fields = content.split_whitespace();
        let (root, vcs, repo) = match (fields.next(), fields.next(), fields.next()) {
            (Some(root), Some(vcs), Some(repo)) => (root, vcs, repo),
            _ => continue,
        };
        let kind = match vcs {
            "git" => VcsKind::Git,
            "hg" => VcsKind::Hg,
            "svn" => VcsKind::Svn,
            "bzr" => VcsKind::Bzr,
            _ => continue,
        };
        let meta = GoImportMeta {
            root: root.to_string(),
            kind,
            repo: repo.to_string(),
        };
        if crate::workspace::import_is_child(root, import_path) {
            return Some(meta);
        }
        if fallback.is_none() {
            fallback = Some(meta);
        }
    }
    fallback
}

/// Truncates `import_path` to as many segments as `root` has, so a host that
/// reports a differently-spelled root still yields a prefix of the import
/// path.
#[must_use]
pub fn trim_path_to_root(import_path: &str, root: &str) -> Option<String> {
    let segments: Vec<&str> = import_path.split('/').collect();
    let root_len = root.split('/').count();
    if segments.len() < root_len {
        return None;
    }
    Some(segments[..root_len].join("/"))
}

/// Tries a fixed sequence of resolvers, returning the first success. When
/// all fail, the last failure is propagated.
pub struct CompositeResolver {
    resolvers: Vec<Box<dyn RepoResolver>>,
}

impl CompositeResolver {
    #[must_use]
    pub fn new(resolvers: Vec<Box<dyn RepoResolver>>) -> Self {
        CompositeResolver { resolvers }
    }

    /// The get/vendor chain: local, then remote protocol, then metadata.
    #[must_use]
    pub fn for_fetch(workspace: &Path) -> Self {
        CompositeResolver::new(vec![
            Box::new(LocalResolver::new(workspace)),
            Box::new(RemoteResolver::new(workspace)),
            Box::new(MetadataResolver::new(workspace)),
        ])
    }

    /// The save chain: local disk only.
    #[must_use]
    pub fn for_save(workspace: &Path) -> Self {
        CompositeResolver::new(vec![Box::new(LocalResolver::new(workspace))])
    }
}

impl RepoResolver for CompositeResolver {
    fn resolve_repo(
        &self,
        import_path: &str,
        entry: Option<&ManifestEntry>,
    ) -> Result<Arc<dyn Vcs>, ResolveError> {
        let mut last = ResolveError::ResolutionFailure {
            path: import_path.to_string(),
            reason: "no resolvers configured".to_string(),
        };
        for resolver in &self.resolvers {
            match resolver.resolve_repo(import_path, entry) {
                Ok(vcs) => return Ok(vcs),
                Err(e) => last = e,
            }
        }
        Err(last)
    }
}

/// Caches resolution outcomes (successes and failures) by import path. Safe
/// for concurrent use from the parallel fetcher; racing misses cost at most
/// one duplicated resolution per key.
pub struct MemoizedResolver {
    inner: Box<dyn RepoResolver>,
    cache: RwLock<HashMap<String, Result<Arc<dyn Vcs>, ResolveError>>>,
}

impl MemoizedResolver {
    #[must_use]
    pub fn new(inner: Box<dyn RepoResolver>) -> Self {
        MemoizedResolver {
            inner,
            cache: RwLock::new(HashMap::new()),
        }
    }
}

impl RepoResolver for MemoizedResolver {
    fn resolve_repo(
        &self,
        import_path: &str,
        entry: Option<&ManifestEntry>,
    ) -> Result<Arc<dyn Vcs>, ResolveError> {
        if let Ok(cache) = self.cache.read() {
            if let Some(cached) = cache.get(import_path) {
                return cached.clone();
            }
        }

        let result = self.inner.resolve_repo(import_path, entry);
        if let Ok(mut cache) = self.cache.write() {
            cache
                .entry(import_path.to_string())
                .or_insert_with(|| result.clone());
        }
        result
    }
}
