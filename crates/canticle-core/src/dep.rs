//! In-memory dependency graph nodes.
//!
//! Nodes refer to each other by import path, never by reference, so the
//! graph tolerates cycles and the walker's visited set is a plain string
//! set.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// One node of the import graph.
#[derive(Debug, Clone, Default)]
pub struct Dependency {
    /// Import path naming this node.
    pub import_path: String,
    /// Import paths that import this one.
    pub imported_from: BTreeSet<String>,
    /// Import paths this one imports.
    pub imports: BTreeSet<String>,
    /// Error encountered while reading this node, if any.
    pub err: Option<String>,
}

impl Dependency {
    #[must_use]
    pub fn new(import_path: impl Into<String>) -> Self {
        Dependency {
            import_path: import_path.into(),
            ..Dependency::default()
        }
    }
}

/// The dependency set of a walk, keyed by import path. Ordered so traversal
/// results and printed output are deterministic.
#[derive(Debug, Clone, Default)]
pub struct Dependencies {
    deps: BTreeMap<String, Dependency>,
}

impl Dependencies {
    #[must_use]
    pub fn new() -> Self {
        Dependencies::default()
    }

    #[must_use]
    pub fn get(&self, import_path: &str) -> Option<&Dependency> {
        self.deps.get(import_path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.deps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deps.is_empty()
    }

    /// Iterates nodes in import-path order.
    pub fn iter(&self) -> impl Iterator<Item = &Dependency> {
        self.deps.values()
    }

    /// Inserts a node, merging with any existing node of the same import
    /// path: the from/import sets union and the most recent insert's error
    /// value is kept, even when it is absent.
    pub fn add(&mut self, dep: Dependency) {
        match self.deps.entry(dep.import_path.clone()) {
            Entry::Vacant(v) => {
                v.insert(dep);
            }
            Entry::Occupied(mut o) => {
                let existing = o.get_mut();
                existing.imported_from.extend(dep.imported_from);
                existing.imports.extend(dep.imports);
                existing.err = dep.err;
            }
        }
    }

    /// Ensures a node exists for `import_path` and records that `from`
    /// imports it.
    pub fn add_import_edge(&mut self, import_path: &str, from: &str) {
        let dep = self
            .deps
            .entry(import_path.to_string())
            .or_insert_with(|| Dependency::new(import_path));
        dep.imported_from.insert(from.to_string());
    }
}

impl fmt::Display for Dependencies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for dep in self.deps.values() {
            writeln!(f, "{}: {:?}", dep.import_path, dep)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_merges_duplicate_nodes() {
        let mut deps = Dependencies::new();

        let mut a = Dependency::new("example.org/x/lib");
        a.imported_from.insert("example.org/proj".to_string());
        deps.add(a);

        let mut b = Dependency::new("example.org/x/lib");
        b.imported_from.insert("example.org/proj/sub".to_string());
        b.imports.insert("example.org/y/util".to_string());
        b.err = Some("read failed".to_string());
        deps.add(b);

        assert_eq!(deps.len(), 1);
        let merged = deps.get("example.org/x/lib").unwrap();
        assert_eq!(merged.imported_from.len(), 2);
        assert_eq!(merged.imports.len(), 1);
        assert_eq!(merged.err.as_deref(), Some("read failed"));
    }

    #[test]
    fn merge_takes_the_most_recent_error_value() {
        let mut deps = Dependencies::new();
        let mut a = Dependency::new("example.org/x/lib");
        a.err = Some("first".to_string());
        deps.add(a);

        // A later merge with no error clears the earlier one.
        deps.add(Dependency::new("example.org/x/lib"));
        assert_eq!(deps.get("example.org/x/lib").unwrap().err, None);

        let mut b = Dependency::new("example.org/x/lib");
        b.err = Some("second".to_string());
        deps.add(b);
        assert_eq!(deps.get("example.org/x/lib").unwrap().err.as_deref(), Some("second"));
    }

    #[test]
    fn add_import_edge_creates_node() {
        let mut deps = Dependencies::new();
        deps.add_import_edge("example.org/x/lib", "example.org/proj");
        let dep = deps.get("example.org/x/lib").unwrap();
        assert!(dep.imported_from.contains("example.org/proj"));
    }

    #[test]
    fn iteration_is_ordered() {
        let mut deps = Dependencies::new();
        deps.add(Dependency::new("z.org/z"));
        deps.add(Dependency::new("a.org/a"));
        let order: Vec<_> = deps.iter().map(|d| d.import_path.as_str()).collect();
        assert_eq!(order, vec!["a.org/a", "z.org/z"]);
    }
}
