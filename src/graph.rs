//! Persistent "depends on" graph between documents.
//!
//! A forward edge `A -> B` means the most recently accepted scan of `A` declared a dependency on
//! `B`. [`DependencyGraph`] keeps both the forward adjacency (a document's own dependencies) and
//! the reverse adjacency (who depends on a document), so transitive dependant queries never have
//! to scan the whole edge set.
//!
//! The graph has value semantics. Both adjacency maps sit behind [`Arc`]s: cloning is cheap, and
//! the first mutation of a clone copies the maps ([`Arc::make_mut`]), leaving every other holder
//! untouched. [`DependencyGraph::invalidate_paths`] returns a new graph and never mutates the
//! receiver.

use petgraph::{algo::tarjan_scc, graphmap::DiGraphMap};
use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    sync::Arc,
};

use crate::document::DocumentId;

type Adjacency = BTreeMap<DocumentId, BTreeSet<DocumentId>>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    dependencies: Arc<Adjacency>,
    dependants: Arc<Adjacency>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_edges<I, A, B>(edges: I) -> Self
    where
        I: IntoIterator<Item = (A, B)>,
        A: Into<DocumentId>,
        B: Into<DocumentId>,
    {
        let mut grouped = BTreeMap::<DocumentId, BTreeSet<DocumentId>>::new();
        for (source, sink) in edges {
            grouped
                .entry(source.into())
                .or_default()
                .insert(sink.into());
        }
        let mut graph = DependencyGraph::default();
        for (source, sinks) in grouped {
            graph.set_dependencies(source, sinks);
        }
        graph
    }

    /// Replace `id`'s outgoing edges with `dependency_ids`. Idempotent; called each time `id` is
    /// (re)scanned.
    pub fn set_dependencies<I, D>(&mut self, id: impl Into<DocumentId>, dependency_ids: I)
    where
        I: IntoIterator<Item = D>,
        D: Into<DocumentId>,
    {
        let id = id.into();
        let new_deps: BTreeSet<DocumentId> = dependency_ids.into_iter().map(Into::into).collect();
        if self.dependencies.get(&id).map_or(new_deps.is_empty(), |old| *old == new_deps) {
            return;
        }

        let dependencies = Arc::make_mut(&mut self.dependencies);
        let dependants = Arc::make_mut(&mut self.dependants);
        if let Some(old_deps) = dependencies.remove(&id) {
            for old in old_deps.iter() {
                unlink(dependants, old.as_str(), id.as_str());
            }
        }
        for dep in new_deps.iter() {
            dependants.entry(dep.clone()).or_default().insert(id.clone());
        }
        if !new_deps.is_empty() {
            dependencies.insert(id, new_deps);
        }
    }

    /// The ids `id` directly depends on.
    pub fn dependencies_of(&self, id: &str) -> BTreeSet<DocumentId> {
        self.dependencies.get(id).cloned().unwrap_or_default()
    }

    /// The ids that directly depend on `id`.
    pub fn direct_dependants_of(&self, id: &str) -> BTreeSet<DocumentId> {
        self.dependants.get(id).cloned().unwrap_or_default()
    }

    /// Every id that reaches `id` by following reverse edges, excluding `id` itself.
    ///
    /// Breadth-first with a visited set, so it terminates on cycles and reports each dependant
    /// once regardless of how many paths lead to it.
    pub fn get_all_dependants(&self, id: &str) -> BTreeSet<DocumentId> {
        let mut found = BTreeSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(id);
        while let Some(current) = queue.pop_front() {
            let Some(direct) = self.dependants.get(current) else {
                continue;
            };
            for dependant in direct.iter() {
                if dependant.as_str() != id && found.insert(dependant.clone()) {
                    queue.push_back(dependant.as_str());
                }
            }
        }
        found
    }

    /// A new graph with every edge touching `ids` or any of their transitive dependants removed.
    ///
    /// The affected set is computed against this graph's current edges. Edges between unaffected
    /// documents are kept.
    pub fn invalidate_paths<I, D>(&self, ids: I) -> DependencyGraph
    where
        I: IntoIterator<Item = D>,
        D: AsRef<str>,
    {
        let mut affected = BTreeSet::new();
        for id in ids {
            let id = id.as_ref();
            affected.extend(self.get_all_dependants(id));
            affected.insert(DocumentId::from(id));
        }

        let mut next = self.clone();
        for id in affected.iter() {
            next.remove_document(id.as_str());
        }
        next
    }

    /// Drop every edge in which `id` is the source or the sink.
    pub fn remove_document(&mut self, id: &str) {
        if !self.dependencies.contains_key(id) && !self.dependants.contains_key(id) {
            return;
        }
        let dependencies = Arc::make_mut(&mut self.dependencies);
        let dependants = Arc::make_mut(&mut self.dependants);
        if let Some(outgoing) = dependencies.remove(id) {
            for sink in outgoing.iter() {
                unlink(dependants, sink.as_str(), id);
            }
        }
        if let Some(incoming) = dependants.remove(id) {
            for source in incoming.iter() {
                unlink(dependencies, source.as_str(), id);
            }
        }
    }

    pub fn contains_edge(&self, source: &str, sink: &str) -> bool {
        self.dependencies
            .get(source)
            .is_some_and(|sinks| sinks.contains(sink))
    }

    /// Every document that is the source or sink of at least one edge.
    pub fn documents(&self) -> BTreeSet<DocumentId> {
        self.dependencies
            .keys()
            .chain(self.dependants.keys())
            .cloned()
            .collect()
    }

    pub fn edges(&self) -> impl Iterator<Item = (&DocumentId, &DocumentId)> + '_ {
        self.dependencies
            .iter()
            .flat_map(|(source, sinks)| sinks.iter().map(move |sink| (source, sink)))
    }

    pub fn edge_count(&self) -> usize {
        self.dependencies.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// Groups of documents that depend on each other, directly or transitively.
    ///
    /// Cycles are legal in a document corpus; this is for reporting, not validation.
    pub fn cycles(&self) -> Vec<BTreeSet<DocumentId>> {
        let view = DiGraphMap::<&str, ()>::from_edges(
            self.edges()
                .map(|(source, sink)| (source.as_str(), sink.as_str())),
        );
        tarjan_scc(&view)
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || component
                        .first()
                        .is_some_and(|node| view.contains_edge(*node, *node))
            })
            .map(|component| component.into_iter().map(DocumentId::from).collect())
            .collect()
    }
}

fn unlink(adjacency: &mut Adjacency, key: &str, member: &str) {
    if let Some(members) = adjacency.get_mut(key) {
        members.remove(member);
        if members.is_empty() {
            adjacency.remove(key);
        }
    }
}
