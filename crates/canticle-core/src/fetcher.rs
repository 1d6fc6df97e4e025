//! Parallel materialisation of manifest entries.
//!
//! Each manifest entry owns an independent filesystem subtree, so the
//! fetcher fans out one thread per entry, funnels per-entry outcomes back
//! over a channel, and never lets one failure cancel the rest. The shared
//! resolver is memoised and lock-guarded.

use std::collections::BTreeMap;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use crate::fetch::FetchError;
use crate::manifest::ManifestEntry;
use crate::resolve::RepoResolver;

/// Outcome of fetching one manifest.
#[derive(Debug, Default)]
pub struct FetchReport {
    /// Per-entry failures, in no particular order.
    pub errors: Vec<FetchError>,
    /// Roots whose branch fast-forwarded, with the backend's summary line.
    pub updated: BTreeMap<String, String>,
}

impl FetchReport {
    /// True when every entry materialised cleanly.
    #[must_use]
    pub fn ok(&self) -> bool {
        self.errors.is_empty()
    }
}

type TaskOutcome = Result<Option<(String, String)>, FetchError>;

/// Fetches every entry in parallel: resolve, create at the pinned revision,
/// and in update mode fast-forward the pinned branch.
#[must_use]
pub fn fetch_entries(
    resolver: Arc<dyn RepoResolver>,
    entries: Vec<ManifestEntry>,
    update: bool,
) -> FetchReport {
    let (tx, rx) = mpsc::channel::<TaskOutcome>();
    let mut handles = Vec::with_capacity(entries.len());

    for entry in entries {
        let resolver = resolver.clone();
        let tx = tx.clone();
        handles.push(thread::spawn(move || {
            // A send only fails when the collector is gone; nothing useful
            // remains to do then.
            let _ = tx.send(fetch_entry(&*resolver, &entry, update));
        }));
    }
    drop(tx);

    let mut report = FetchReport::default();
    for outcome in rx {
        match outcome {
            Ok(Some((root, summary))) => {
                report.updated.insert(root, summary);
            }
            Ok(None) => {}
            Err(e) => report.errors.push(e),
        }
    }
    for handle in handles {
        let _ = handle.join();
    }
    report
}

/// One fetch task: the body run per entry.
fn fetch_entry(
    resolver: &dyn RepoResolver,
    entry: &ManifestEntry,
    update: bool,
) -> TaskOutcome {
    let vcs = resolver
        .resolve_repo(&entry.root, Some(entry))
        .map_err(|source| FetchError::Entry {
            root: entry.root.clone(),
            source,
        })?;

    vcs.create(&entry.revision).map_err(|source| FetchError::Vcs {
        package: entry.root.clone(),
        source,
    })?;

    if !update {
        return Ok(None);
    }
    let result = vcs
        .update_branch(&entry.revision)
        .map_err(|source| FetchError::Vcs {
            package: entry.root.clone(),
            source,
        })?;
    if result.updated {
        Ok(Some((entry.root.clone(), result.output)))
    } else {
        Ok(None)
    }
}
