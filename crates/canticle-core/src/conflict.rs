//! Reducing observed dependency sources to final manifest pins.
//!
//! Two strategies: prefer whatever is on disk, or ask the user whenever more
//! than one candidate revision or source was observed. Both emit entries in
//! root order so the written manifest is reproducible.

use std::io::{self, BufRead, Write};
use thiserror::Error;

use crate::manifest::ManifestEntry;
use crate::save::{DependencySource, DependencySources};

/// Errors from conflict resolution.
#[derive(Error, Debug)]
pub enum ConflictError {
    /// A source carried a read error; the save must not silently pin it.
    #[error("cannot resolve '{root}': {reason}")]
    SourceError { root: String, reason: String },

    #[error("prompt failed: {0}")]
    Io(#[from] io::Error),
}

/// Reduces the observed sources to one pin per repository root.
pub trait ConflictResolver {
    /// # Errors
    ///
    /// Strategy-specific; see [`PreferLocal`] and [`Prompt`].
    fn resolve_conflicts(
        &mut self,
        sources: &DependencySources,
    ) -> Result<Vec<ManifestEntry>, ConflictError>;
}

/// Pins every root at its on-disk revision and source, refusing to proceed
/// past any source that recorded an error.
#[derive(Debug, Default)]
pub struct PreferLocal;

impl ConflictResolver for PreferLocal {
    fn resolve_conflicts(
        &mut self,
        sources: &DependencySources,
    ) -> Result<Vec<ManifestEntry>, ConflictError> {
        let mut entries = Vec::with_capacity(sources.len());
        for source in sources.iter() {
            if let Some(reason) = &source.err {
                return Err(ConflictError::SourceError {
                    root: source.root.clone(),
                    reason: reason.clone(),
                });
            }
            let mut entry = ManifestEntry::new(&source.root);
            entry.source_path = source.on_disk_source.clone();
            entry.revision = source.on_disk_revision.clone();
            entries.push(entry);
        }
        Ok(entries)
    }
}

/// Prompts on any root with more than one observed revision or source,
/// marking the on-disk candidate. Single candidates never interact.
pub struct Prompt<R: BufRead, W: Write> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Prompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Prompt { input, output }
    }

    fn resolve_conflict(
        &mut self,
        source: &DependencySource,
    ) -> Result<ManifestEntry, ConflictError> {
        let mut entry = ManifestEntry::new(&source.root);

        entry.revision = match source.revisions.len() {
            0 => String::new(),
            1 => source.revisions.iter().next().cloned().unwrap_or_default(),
            _ => self.select(
                &source.root,
                "revisions",
                &source.on_disk_revision,
                source.revisions.iter(),
            )?,
        };
        entry.source_path = match source.sources.len() {
            0 => String::new(),
            1 => source.sources.iter().next().cloned().unwrap_or_default(),
            _ => self.select(
                &source.root,
                "sources",
                &source.on_disk_source,
                source.sources.iter(),
            )?,
        };
        Ok(entry)
    }

    /// Prints the candidates, marking the on-disk one, and reads the
    /// selection.
    fn select<'a>(
        &mut self,
        pkg: &str,
        conflict: &str,
        ondisk: &str,
        alts: impl Iterator<Item = &'a String>,
    ) -> Result<String, ConflictError> {
        writeln!(self.output, "\nPackage {pkg} has conflicting {conflict}:")?;
        for alt in alts {
            if alt == ondisk {
                writeln!(self.output, "{alt} (current)")?;
            } else {
                writeln!(self.output, "{alt}")?;
            }
        }
        write!(self.output, "Selection {conflict}: ")?;
        self.output.flush()?;

        let mut choice = String::new();
        self.input.read_line(&mut choice)?;
        Ok(choice.trim().to_string())
    }
}

impl Prompt<io::StdinLock<'static>, io::Stdout> {
    /// A prompt over the process's stdin/stdout.
    #[must_use]
    pub fn stdio() -> Self {
        Prompt::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> ConflictResolver for Prompt<R, W> {
    fn resolve_conflicts(
        &mut self,
        sources: &DependencySources,
    ) -> Result<Vec<ManifestEntry>, ConflictError> {
        let mut entries = Vec::with_capacity(sources.len());
        for source in sources.iter() {
            entries.push(self.resolve_conflict(source)?);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn source(root: &str, revisions: &[&str], ondisk_rev: &str, sources: &[&str]) -> DependencySource {
        let mut s = DependencySource::new(root);
        s.revisions = revisions.iter().map(|r| r.to_string()).collect();
        s.on_disk_revision = ondisk_rev.to_string();
        s.sources = sources.iter().map(|r| r.to_string()).collect();
        s.on_disk_source = sources.first().unwrap_or(&"").to_string();
        s
    }

    fn sources_of(list: Vec<DependencySource>) -> DependencySources {
        let mut sources = DependencySources::new();
        for s in list {
            sources.add(s);
        }
        sources
    }

    #[test]
    fn prefer_local_emits_on_disk_state() {
        let sources = sources_of(vec![
            source("z.org/lib", &["r1", "r2"], "r2", &["https://z.org/lib"]),
            source("a.org/lib", &["r9"], "r9", &["https://a.org/lib"]),
        ]);
        let entries = PreferLocal.resolve_conflicts(&sources).unwrap();

        // Deterministic root order, on-disk values win outright.
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].root, "a.org/lib");
        assert_eq!(entries[1].root, "z.org/lib");
        assert_eq!(entries[1].revision, "r2");
        assert_eq!(entries[1].source_path, "https://z.org/lib");
    }

    #[test]
    fn prefer_local_fails_on_source_error() {
        let mut bad = source("a.org/lib", &["r1"], "r1", &[]);
        bad.err = Some("dirty checkout".to_string());
        let sources = sources_of(vec![bad]);

        let err = PreferLocal.resolve_conflicts(&sources).unwrap_err();
        assert!(matches!(err, ConflictError::SourceError { .. }));
    }

    #[test]
    fn prompt_single_candidate_never_interacts() {
        let sources = sources_of(vec![source(
            "a.org/lib",
            &["r1"],
            "r1",
            &["https://a.org/lib"],
        )]);
        // Empty input: any read would fail the selection with an empty
        // choice, so the assertion below proves no prompt happened.
        let mut out = Vec::new();
        let mut prompt = Prompt::new(Cursor::new(""), &mut out);
        let entries = prompt.resolve_conflicts(&sources).unwrap();

        assert_eq!(entries[0].revision, "r1");
        assert!(out.is_empty(), "unexpected prompt output: {:?}", String::from_utf8_lossy(&out));
    }

    #[test]
    fn prompt_selects_among_conflicting_revisions() {
        let sources = sources_of(vec![source(
            "ext.org/lib",
            &["r1", "r2"],
            "r2",
            &["https://ext.org/lib"],
        )]);
        let mut out = Vec::new();
        let mut prompt = Prompt::new(Cursor::new("r1\n"), &mut out);
        let entries = prompt.resolve_conflicts(&sources).unwrap();

        assert_eq!(entries[0].revision, "r1");
        let printed = String::from_utf8(out).unwrap();
        assert!(printed.contains("conflicting revisions"));
        assert!(printed.contains("r2 (current)"));
        assert!(printed.contains("ext.org/lib"));
    }

    #[test]
    fn prompt_selects_among_conflicting_sources() {
        let mut s = source("ext.org/lib", &["r1"], "r1", &[]);
        s.sources = ["https://a.example/lib", "https://b.example/lib"]
            .iter()
            .map(|x| x.to_string())
            .collect();
        s.on_disk_source = "https://a.example/lib".to_string();
        let sources = sources_of(vec![s]);

        let mut out = Vec::new();
        let mut prompt = Prompt::new(Cursor::new("https://b.example/lib\n"), &mut out);
        let entries = prompt.resolve_conflicts(&sources).unwrap();

        assert_eq!(entries[0].source_path, "https://b.example/lib");
        assert!(String::from_utf8(out).unwrap().contains("conflicting sources"));
    }

    #[test]
    fn prompt_empty_sets_yield_empty_fields() {
        let sources = sources_of(vec![source("ext.org/lib", &[], "", &[])]);
        let mut prompt = Prompt::new(Cursor::new(""), Vec::new());
        let entries = prompt.resolve_conflicts(&sources).unwrap();
        assert_eq!(entries[0].revision, "");
        assert_eq!(entries[0].source_path, "");
    }
}
