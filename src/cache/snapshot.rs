use parking_lot::Mutex;
use serde::Serialize;
use std::{
    collections::{BTreeSet, HashMap},
    fmt,
    future::Future,
    sync::Arc,
};

use crate::{
    document::{DocumentId, ScannedDocument, Stage},
    error::AnalysisError,
    graph::DependencyGraph,
    work_cache::{Computation, WorkCache},
};

/// Entry counts for one snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub generation: u64,
    pub parsed: usize,
    pub scanned: usize,
    pub dependencies_scanned: usize,
    pub analyzed: usize,
    pub published_scanned: usize,
    pub published_analyzed: usize,
    pub edges: usize,
}

/// Synchronously published results plus the dependency graph. Kept under one lock so that a
/// publish updates the mapping, the graph, and the stage work cache as one step.
struct Published<Sc, An> {
    scanned: HashMap<DocumentId, Arc<Sc>>,
    analyzed: HashMap<DocumentId, Arc<An>>,
    graph: DependencyGraph,
}

impl<Sc, An> Published<Sc, An> {
    fn empty(graph: DependencyGraph) -> Self {
        Published {
            scanned: HashMap::new(),
            analyzed: HashMap::new(),
            graph,
        }
    }

    fn copy_with_graph(&self, graph: DependencyGraph) -> Self {
        Published {
            scanned: self.scanned.clone(),
            analyzed: self.analyzed.clone(),
            graph,
        }
    }
}

/// One snapshot of the analysis pipeline's cached state.
///
/// A snapshot composes four [`WorkCache`]s, one per [`Stage`], two mappings of synchronously
/// published scanned and analyzed results, and the [`DependencyGraph`] built from accepted scans.
///
/// Snapshots form a linear history through [`AnalysisCache::invalidate`], which never touches the
/// receiver: it builds a successor that shares every still-valid computation with its
/// predecessor. A caller holding an older snapshot keeps a frozen, consistent view; work that
/// completes later is only published into the snapshot that observed it.
///
/// Every publishing path goes through one lock, so a document present in both a published mapping
/// and the matching work cache always maps to the identical value.
pub struct AnalysisCache<Pa, Sc, An> {
    generation: u64,
    parsed: WorkCache<DocumentId, Arc<Pa>>,
    scanned: WorkCache<DocumentId, Arc<Sc>>,
    dependencies_scanned: WorkCache<DocumentId, Arc<Sc>>,
    analyzed: WorkCache<DocumentId, Arc<An>>,
    published: Mutex<Published<Sc, An>>,
}

impl<Pa, Sc, An> Default for AnalysisCache<Pa, Sc, An>
where
    Pa: Send + Sync + 'static,
    Sc: ScannedDocument + Send + Sync + 'static,
    An: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::fork(None, None)
    }
}

impl<Pa, Sc, An> fmt::Debug for AnalysisCache<Pa, Sc, An>
where
    Pa: Send + Sync + 'static,
    Sc: ScannedDocument + Send + Sync + 'static,
    An: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisCache")
            .field("stats", &self.stats())
            .finish()
    }
}

impl<Pa, Sc, An> AnalysisCache<Pa, Sc, An>
where
    Pa: Send + Sync + 'static,
    Sc: ScannedDocument + Send + Sync + 'static,
    An: Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a snapshot from `from`'s current state, or an empty one.
    ///
    /// The work caches are forked (entries shared, maps independent) and the published mappings
    /// copied. The graph is `graph` when supplied and a fresh empty graph otherwise; `invalidate`
    /// uses the parameter to hand over the graph it already computed.
    pub fn fork(from: Option<&Self>, graph: Option<DependencyGraph>) -> Self {
        match from {
            Some(source) => {
                let published = source.published.lock();
                source.fork_locked(&published, graph.unwrap_or_default())
            }
            None => AnalysisCache {
                generation: 0,
                parsed: WorkCache::new(),
                scanned: WorkCache::new(),
                dependencies_scanned: WorkCache::new(),
                analyzed: WorkCache::new(),
                published: Mutex::new(Published::empty(graph.unwrap_or_default())),
            },
        }
    }

    fn fork_locked(&self, published: &Published<Sc, An>, graph: DependencyGraph) -> Self {
        AnalysisCache {
            generation: self.generation,
            parsed: self.parsed.fork(),
            scanned: self.scanned.fork(),
            dependencies_scanned: self.dependencies_scanned.fork(),
            analyzed: self.analyzed.fork(),
            published: Mutex::new(published.copy_with_graph(graph)),
        }
    }

    /// The successor snapshot after the documents in `ids` changed.
    ///
    /// Changed documents lose every stage result. Their transitive dependants, computed against
    /// this snapshot's graph, lose their dependency-scan and analysis results but keep parse and
    /// scan results, since their own text did not change. The analyzed work cache is then rebuilt
    /// from published analysis results only: an analysis still in flight may have read
    /// cross-document state that no longer holds.
    ///
    /// Runs to completion without suspending, so no query can observe a half-invalidated
    /// snapshot.
    pub fn invalidate<I>(&self, ids: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<DocumentId>,
    {
        let ids: Vec<DocumentId> = ids.into_iter().map(Into::into).collect();
        let published = self.published.lock();
        let original = &published.graph;

        let mut next = self.fork_locked(&published, original.invalidate_paths(&ids));
        next.generation = self.generation + 1;

        let next_published = next.published.get_mut();
        let mut dependants_total = BTreeSet::new();
        for id in ids.iter() {
            // The new graph has already dropped `id`'s edges, so ask the original.
            let dependants = original.get_all_dependants(id.as_str());

            next.parsed.delete(id);
            next.scanned.delete(id);
            next.dependencies_scanned.delete(id);
            next.analyzed.delete(id);
            next_published.scanned.remove(id);
            next_published.analyzed.remove(id);

            for dependant in dependants.iter() {
                next.dependencies_scanned.delete(dependant);
                next.analyzed.delete(dependant);
                next_published.analyzed.remove(dependant);
            }
            dependants_total.extend(dependants);
        }

        next.analyzed.clear();
        for (id, value) in next_published.analyzed.iter() {
            next.analyzed.set(id.clone(), value.clone());
        }

        tracing::debug!(
            "[AnalysisCache] generation {} -> {}: invalidated {:?} and {} dependants",
            self.generation,
            next.generation,
            ids,
            dependants_total.len()
        );
        next
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The parse computation for `id`, registering `compute` if no entry exists.
    ///
    /// Like every stage accessor, the entry is registered before this returns, so a second
    /// request issued before the first is polled still shares the same computation.
    pub fn parsed<F, Fut>(&self, id: &DocumentId, compute: F) -> Computation<Arc<Pa>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Pa, AnalysisError>> + Send + 'static,
    {
        self.parsed.get_or_compute(id.clone(), move || async move {
            compute().await.map(Arc::new)
        })
    }

    /// The scan result for `id`, registering `compute` if no entry exists.
    ///
    /// A successful scan is accepted into this snapshot (published and recorded as graph edges)
    /// only if this snapshot's entry is still the computation that produced it.
    pub fn scanned<F, Fut>(
        &self,
        id: &DocumentId,
        compute: F,
    ) -> impl Future<Output = Result<Arc<Sc>, AnalysisError>> + Send + '_
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Sc, AnalysisError>> + Send + 'static,
    {
        let entry = self.scanned.get_or_compute(id.clone(), move || async move {
            compute().await.map(Arc::new)
        });
        let id = id.clone();
        async move {
            let scanned = entry.clone().await?;
            self.accept_scanned(&id, &entry, &scanned);
            Ok(scanned)
        }
    }

    /// The dependency-scan computation for `id`, registering `compute` if no entry exists.
    pub fn dependencies_scanned<F, Fut>(&self, id: &DocumentId, compute: F) -> Computation<Arc<Sc>>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Arc<Sc>, AnalysisError>> + Send + 'static,
    {
        self.dependencies_scanned.get_or_compute(id.clone(), compute)
    }

    /// The analysis result for `id`, registering `compute` if no entry exists.
    ///
    /// Published into this snapshot under the same rule as [`AnalysisCache::scanned`].
    pub fn analyzed<F, Fut>(
        &self,
        id: &DocumentId,
        compute: F,
    ) -> impl Future<Output = Result<Arc<An>, AnalysisError>> + Send + '_
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<An, AnalysisError>> + Send + 'static,
    {
        let entry = self.analyzed.get_or_compute(id.clone(), move || async move {
            compute().await.map(Arc::new)
        });
        let id = id.clone();
        async move {
            let analyzed = entry.clone().await?;
            self.accept_analyzed(&id, &entry, &analyzed);
            Ok(analyzed)
        }
    }

    fn accept_scanned(&self, id: &DocumentId, entry: &Computation<Arc<Sc>>, scanned: &Arc<Sc>) {
        let mut published = self.published.lock();
        if !self.scanned.is_current(id, entry) {
            tracing::trace!("[AnalysisCache] scan of {id} was superseded, not publishing");
            return;
        }
        published
            .graph
            .set_dependencies(id.clone(), scanned.dependency_ids());
        published.scanned.insert(id.clone(), scanned.clone());
    }

    fn accept_analyzed(&self, id: &DocumentId, entry: &Computation<Arc<An>>, analyzed: &Arc<An>) {
        let mut published = self.published.lock();
        if !self.analyzed.is_current(id, entry) {
            tracing::trace!("[AnalysisCache] analysis of {id} was superseded, not publishing");
            return;
        }
        published.analyzed.insert(id.clone(), analyzed.clone());
    }

    /// Publish a scan result: the published mapping, the scanned work cache, and `id`'s graph
    /// edges are updated together.
    pub fn publish_scanned(&self, id: impl Into<DocumentId>, value: impl Into<Arc<Sc>>) {
        let id = id.into();
        let value = value.into();
        let mut published = self.published.lock();
        published
            .graph
            .set_dependencies(id.clone(), value.dependency_ids());
        self.scanned.set(id.clone(), value.clone());
        published.scanned.insert(id, value);
    }

    /// Publish an analysis result into both the published mapping and the analyzed work cache.
    pub fn publish_analyzed(&self, id: impl Into<DocumentId>, value: impl Into<Arc<An>>) {
        let id = id.into();
        let value = value.into();
        let mut published = self.published.lock();
        self.analyzed.set(id.clone(), value.clone());
        published.analyzed.insert(id, value);
    }

    pub fn set_parsed(&self, id: impl Into<DocumentId>, value: impl Into<Arc<Pa>>) {
        self.parsed.set(id.into(), value.into());
    }

    pub fn set_dependencies_scanned(&self, id: impl Into<DocumentId>, value: impl Into<Arc<Sc>>) {
        self.dependencies_scanned.set(id.into(), value.into());
    }

    /// Whether the work cache for `stage` holds an entry (in flight or settled) for `id`.
    pub fn contains(&self, stage: Stage, id: &str) -> bool {
        match stage {
            Stage::Parse => self.parsed.contains_key(id),
            Stage::Scan => self.scanned.contains_key(id),
            Stage::ScanDependencies => self.dependencies_scanned.contains_key(id),
            Stage::Analyze => self.analyzed.contains_key(id),
        }
    }

    /// The settled parse result for `id`, if there is one.
    pub fn peek_parsed(&self, id: &str) -> Option<Result<Arc<Pa>, AnalysisError>> {
        self.parsed.peek(id)
    }

    /// The settled dependency-scan result for `id`, if there is one.
    pub fn peek_dependencies_scanned(&self, id: &str) -> Option<Result<Arc<Sc>, AnalysisError>> {
        self.dependencies_scanned.peek(id)
    }

    /// The settled analysis result for `id` held by the analyzed work cache, if there is one.
    pub fn peek_analyzed(&self, id: &str) -> Option<Result<Arc<An>, AnalysisError>> {
        self.analyzed.peek(id)
    }

    pub fn published_scanned(&self, id: &str) -> Option<Arc<Sc>> {
        self.published.lock().scanned.get(id).cloned()
    }

    pub fn published_analyzed(&self, id: &str) -> Option<Arc<An>> {
        self.published.lock().analyzed.get(id).cloned()
    }

    pub fn published_scanned_ids(&self) -> BTreeSet<DocumentId> {
        self.published.lock().scanned.keys().cloned().collect()
    }

    pub fn published_analyzed_ids(&self) -> BTreeSet<DocumentId> {
        self.published.lock().analyzed.keys().cloned().collect()
    }

    /// Every document whose results would be invalidated, beyond `id` itself, if `id` changed.
    pub fn dependants_of(&self, id: &str) -> BTreeSet<DocumentId> {
        self.published.lock().graph.get_all_dependants(id)
    }

    pub fn dependencies_of(&self, id: &str) -> BTreeSet<DocumentId> {
        self.published.lock().graph.dependencies_of(id)
    }

    /// A copy of this snapshot's dependency graph. Cheap: the adjacency maps are shared until
    /// either side changes.
    pub fn graph(&self) -> DependencyGraph {
        self.published.lock().graph.clone()
    }

    pub fn stats(&self) -> CacheStats {
        let published = self.published.lock();
        CacheStats {
            generation: self.generation,
            parsed: self.parsed.len(),
            scanned: self.scanned.len(),
            dependencies_scanned: self.dependencies_scanned.len(),
            analyzed: self.analyzed.len(),
            published_scanned: published.scanned.len(),
            published_analyzed: published.analyzed.len(),
            edges: published.graph.edge_count(),
        }
    }
}
