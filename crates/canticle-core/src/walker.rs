//! Cycle-safe breadth-first traversal of the dependency graph.
//!
//! The walker is parameterised over a [`NodeHandler`]: "what to do at each
//! node" plus "how to read a node's children". Save and restore supply
//! different handlers and share the traversal. The walk is single-threaded
//! and deterministic: children are sorted before they are enqueued, and
//! every node is handled at most once.

use std::collections::{HashSet, VecDeque};

/// What the handler wants done with a node's children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    /// Read and enqueue the node's children.
    Descend,
    /// Do not descend into this node; the walk continues elsewhere.
    Skip,
}

/// The two callbacks a walk needs, kept on one object so a handler can
/// derive a node's children from state it recorded while handling it.
pub trait NodeHandler {
    type Error;

    /// Called exactly once per reachable node.
    fn handle(&mut self, pkg: &str) -> Result<Visit, Self::Error>;

    /// A node's children; only consulted after `handle` chose
    /// [`Visit::Descend`].
    fn children(&mut self, pkg: &str) -> Result<Vec<String>, Self::Error>;
}

impl<H: NodeHandler + ?Sized> NodeHandler for &mut H {
    type Error = H::Error;

    fn handle(&mut self, pkg: &str) -> Result<Visit, Self::Error> {
        (**self).handle(pkg)
    }

    fn children(&mut self, pkg: &str) -> Result<Vec<String>, Self::Error> {
        (**self).children(pkg)
    }
}

/// Breadth-first dependency walker.
pub struct DependencyWalker<H: NodeHandler> {
    queue: VecDeque<String>,
    visited: HashSet<String>,
    handler: H,
}

impl<H: NodeHandler> DependencyWalker<H> {
    pub fn new(handler: H) -> Self {
        DependencyWalker {
            queue: VecDeque::new(),
            visited: HashSet::new(),
            handler,
        }
    }

    /// Walks every node reachable from `root`.
    ///
    /// # Errors
    ///
    /// Propagates the first error returned by the handler; the walk aborts
    /// there.
    pub fn traverse_dependencies(&mut self, root: &str) -> Result<(), H::Error> {
        self.queue.push_back(root.to_string());
        self.visited.insert(root.to_string());

        while let Some(pkg) = self.queue.pop_front() {
            match self.handler.handle(&pkg)? {
                Visit::Skip => continue,
                Visit::Descend => {}
            }

            let mut children = self.handler.children(&pkg)?;
            children.sort();
            for child in children {
                if self.visited.contains(&child) {
                    continue;
                }
                self.visited.insert(child.clone());
                self.queue.push_back(child);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    /// Walks a static adjacency map, recording handled nodes; nodes in
    /// `skip` are not descended into, nodes in `fail` abort.
    struct MapHandler {
        graph: BTreeMap<&'static str, Vec<&'static str>>,
        skip: Vec<&'static str>,
        fail: Vec<&'static str>,
        handled: Vec<String>,
    }

    impl MapHandler {
        fn new(graph: BTreeMap<&'static str, Vec<&'static str>>) -> Self {
            MapHandler {
                graph,
                skip: Vec::new(),
                fail: Vec::new(),
                handled: Vec::new(),
            }
        }
    }

    impl NodeHandler for MapHandler {
        type Error = String;

        fn handle(&mut self, pkg: &str) -> Result<Visit, String> {
            self.handled.push(pkg.to_string());
            if self.fail.contains(&pkg) {
                return Err(format!("failed on {pkg}"));
            }
            Ok(if self.skip.contains(&pkg) {
                Visit::Skip
            } else {
                Visit::Descend
            })
        }

        fn children(&mut self, pkg: &str) -> Result<Vec<String>, String> {
            Ok(self
                .graph
                .get(pkg)
                .map(|children| children.iter().map(|c| c.to_string()).collect())
                .unwrap_or_default())
        }
    }

    #[test]
    fn linear_chain_is_visited_in_order() {
        let mut handler = MapHandler::new(BTreeMap::from([("a", vec!["b"]), ("b", vec!["c"])]));
        DependencyWalker::new(&mut handler)
            .traverse_dependencies("a")
            .unwrap();
        assert_eq!(handler.handled, vec!["a", "b", "c"]);
    }

    #[test]
    fn cycles_terminate_with_each_node_once() {
        let mut handler = MapHandler::new(BTreeMap::from([("a", vec!["b"]), ("b", vec!["a"])]));
        DependencyWalker::new(&mut handler)
            .traverse_dependencies("a")
            .unwrap();
        assert_eq!(handler.handled, vec!["a", "b"]);
    }

    #[test]
    fn children_are_walked_in_sorted_order() {
        let mut handler = MapHandler::new(BTreeMap::from([("root", vec!["z", "a", "m"])]));
        DependencyWalker::new(&mut handler)
            .traverse_dependencies("root")
            .unwrap();
        assert_eq!(handler.handled, vec!["root", "a", "m", "z"]);
    }

    #[test]
    fn traversal_is_deterministic_across_runs() {
        let graph = BTreeMap::from([
            ("a", vec!["d", "b", "c"]),
            ("b", vec!["e", "a"]),
            ("c", vec!["e"]),
            ("d", vec![]),
            ("e", vec!["b"]),
        ]);
        let run = || {
            let mut handler = MapHandler::new(graph.clone());
            DependencyWalker::new(&mut handler)
                .traverse_dependencies("a")
                .unwrap();
            handler.handled
        };
        let first = run();
        for _ in 0..5 {
            assert_eq!(run(), first);
        }
    }

    #[test]
    fn skip_excludes_children_but_keeps_walking() {
        let mut handler = MapHandler::new(BTreeMap::from([
            ("a", vec!["b", "c"]),
            ("b", vec!["d"]),
            ("c", vec!["e"]),
        ]));
        handler.skip.push("b");
        DependencyWalker::new(&mut handler)
            .traverse_dependencies("a")
            .unwrap();
        // d is unreachable through the skipped b; e still walks.
        assert_eq!(handler.handled, vec!["a", "b", "c", "e"]);
    }

    #[test]
    fn skipped_node_stays_visited() {
        // b is skipped on first sight and reachable again through c; it
        // must not be handled a second time.
        let mut handler =
            MapHandler::new(BTreeMap::from([("a", vec!["b", "c"]), ("c", vec!["b"])]));
        handler.skip.push("b");
        DependencyWalker::new(&mut handler)
            .traverse_dependencies("a")
            .unwrap();
        assert_eq!(handler.handled.iter().filter(|p| p.as_str() == "b").count(), 1);
    }

    #[test]
    fn handler_error_aborts_the_walk() {
        let mut handler = MapHandler::new(BTreeMap::from([("a", vec!["b"]), ("b", vec!["c"])]));
        handler.fail.push("b");
        let err = DependencyWalker::new(&mut handler)
            .traverse_dependencies("a")
            .unwrap_err();
        assert_eq!(err, "failed on b");
        assert_eq!(handler.handled, vec!["a", "b"]);
    }
}
