//! Stage orchestration on top of [`AnalysisCache`] snapshots.
//!
//! An [`Analyzer`] owns the current snapshot and drives documents through the four stages
//! (parse, scan, scan dependencies, analyze) by handing the stage logic of an
//! [`AnalysisPipeline`] to the snapshot's work caches. When documents change, the editing session
//! calls [`Analyzer::files_changed`], which swaps in the snapshot returned by
//! [`AnalysisCache::invalidate`]. There is no ambient "current cache": every computation captures
//! the snapshot it was requested from.
//!
//! ## Dependency scanning
//!
//! Scanning a document's dependencies walks the declared dependency ids breadth-first with a
//! visited set and only ever waits on *scan* entries, which never depend on other documents. A
//! dependency cycle therefore never makes a document wait on itself.
//!
//! A dependency that fails to parse or scan does not fail its importer: the failure is recorded
//! in the [`AnalysisContext`] handed to [`AnalysisPipeline::analyze`], which decides how to
//! report it.

use futures::future::join_all;
use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    future::Future,
    sync::Arc,
};
use tokio::sync::mpsc::UnboundedSender;

use crate::{
    cache::AnalysisCache,
    config::AnalyzerConfig,
    document::{DocumentId, ScannedDocument, Stage},
    error::AnalysisError,
    event::AnalysisEvent,
    work_cache::Computation,
};

/// The stage logic owned by the surrounding engine: language-specific parsers, scanners, and the
/// cross-document resolver.
pub trait AnalysisPipeline: Send + Sync + 'static {
    type Parsed: Send + Sync + 'static;
    type Scanned: ScannedDocument + Send + Sync + 'static;
    type Analyzed: Send + Sync + 'static;

    fn parse(
        &self,
        id: &DocumentId,
    ) -> impl Future<Output = Result<Self::Parsed, AnalysisError>> + Send;

    fn scan(
        &self,
        id: &DocumentId,
        parsed: &Self::Parsed,
    ) -> impl Future<Output = Result<Self::Scanned, AnalysisError>> + Send;

    /// Resolve a scanned document against the scanned results of its transitive dependencies.
    fn analyze(
        &self,
        id: &DocumentId,
        scanned: &Self::Scanned,
        context: &AnalysisContext<Self::Scanned>,
    ) -> impl Future<Output = Result<Self::Analyzed, AnalysisError>> + Send;
}

/// The snapshot type for a pipeline.
pub type Snapshot<P> = AnalysisCache<
    <P as AnalysisPipeline>::Parsed,
    <P as AnalysisPipeline>::Scanned,
    <P as AnalysisPipeline>::Analyzed,
>;

/// The scanned results of a document and everything it transitively depends on.
#[derive(Debug)]
pub struct AnalysisContext<Sc> {
    root: DocumentId,
    documents: BTreeMap<DocumentId, Arc<Sc>>,
    failed: BTreeMap<DocumentId, AnalysisError>,
    truncated: bool,
}

impl<Sc> AnalysisContext<Sc> {
    pub fn root(&self) -> &DocumentId {
        &self.root
    }

    /// The scanned result of `id`, if it is the root or a successfully scanned dependency.
    pub fn get(&self, id: &str) -> Option<&Arc<Sc>> {
        self.documents.get(id)
    }

    /// The root and every successfully scanned transitive dependency.
    pub fn documents(&self) -> impl Iterator<Item = (&DocumentId, &Arc<Sc>)> + '_ {
        self.documents.iter()
    }

    /// Transitive dependencies, excluding the root.
    pub fn dependencies(&self) -> impl Iterator<Item = (&DocumentId, &Arc<Sc>)> + '_ {
        self.documents.iter().filter(|(id, _)| **id != self.root)
    }

    /// Dependencies that could not be parsed or scanned, with the cached failure.
    pub fn failed(&self) -> &BTreeMap<DocumentId, AnalysisError> {
        &self.failed
    }

    /// Whether the walk stopped at the configured depth before reaching every dependency.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// Everything a stage computation needs, captured by value so the computation can outlive the
/// request that started it.
struct StageRunner<P: AnalysisPipeline> {
    pipeline: Arc<P>,
    snapshot: Arc<Snapshot<P>>,
    config: Arc<AnalyzerConfig>,
    events: Option<UnboundedSender<AnalysisEvent>>,
}

impl<P: AnalysisPipeline> Clone for StageRunner<P> {
    fn clone(&self) -> Self {
        StageRunner {
            pipeline: self.pipeline.clone(),
            snapshot: self.snapshot.clone(),
            config: self.config.clone(),
            events: self.events.clone(),
        }
    }
}

impl<P: AnalysisPipeline> StageRunner<P> {
    fn emit(&self, event: AnalysisEvent) {
        if !self.config.emit_events {
            return;
        }
        if let Some(tx) = self.events.as_ref() {
            if let Err(err) = tx.send(event) {
                tracing::warn!("[Analyzer] {}", AnalysisError::from(err));
            }
        }
    }

    /// Normalize a pipeline failure into a stage failure and report it.
    fn settle<T>(
        &self,
        stage: Stage,
        id: &DocumentId,
        result: Result<T, AnalysisError>,
    ) -> Result<T, AnalysisError> {
        result.map_err(|err| {
            let err = match err {
                err @ AnalysisError::Stage { .. } => err,
                other => AnalysisError::stage(stage, id.as_str(), other.to_string()),
            };
            tracing::debug!("[Analyzer] {err}");
            self.emit(AnalysisEvent::StageFailed {
                stage,
                id: id.clone(),
                message: err.to_string(),
            });
            err
        })
    }

    fn parse(&self, id: &DocumentId) -> Computation<Arc<P::Parsed>> {
        let runner = self.clone();
        let id_owned = id.clone();
        self.snapshot.parsed(id, move || async move {
            let parsed = runner.pipeline.parse(&id_owned).await;
            let parsed = runner.settle(Stage::Parse, &id_owned, parsed)?;
            runner.emit(AnalysisEvent::Parsed(id_owned));
            Ok(parsed)
        })
    }

    fn scan<'a>(
        &'a self,
        id: &DocumentId,
    ) -> impl Future<Output = Result<Arc<P::Scanned>, AnalysisError>> + Send + 'a {
        let runner = self.clone();
        let id_owned = id.clone();
        self.snapshot.scanned(id, move || async move {
            let parsed = runner.parse(&id_owned).await?;
            let scanned = runner.pipeline.scan(&id_owned, &parsed).await;
            let scanned = runner.settle(Stage::Scan, &id_owned, scanned)?;
            let dependencies = scanned.dependency_ids();
            if runner.config.warn_on_cycles {
                runner.report_cycles(&id_owned, &dependencies);
            }
            runner.emit(AnalysisEvent::Scanned {
                id: id_owned,
                dependencies,
            });
            Ok(scanned)
        })
    }

    fn report_cycles(&self, id: &DocumentId, dependencies: &BTreeSet<DocumentId>) {
        let mut graph = self.snapshot.graph();
        graph.set_dependencies(id.clone(), dependencies.iter().cloned());
        for cycle in graph.cycles().into_iter().filter(|cycle| cycle.contains(id)) {
            tracing::warn!("[Analyzer] {id} is part of a dependency cycle: {cycle:?}");
        }
    }

    fn scan_dependencies(&self, id: &DocumentId) -> Computation<Arc<P::Scanned>> {
        let runner = self.clone();
        let id_owned = id.clone();
        self.snapshot.dependencies_scanned(id, move || async move {
            let context = runner.collect_context(&id_owned).await?;
            context
                .get(id_owned.as_str())
                .cloned()
                .ok_or_else(|| AnalysisError::UnknownDocument(id_owned.to_string()))
        })
    }

    /// Scan `id` and every document it transitively depends on.
    async fn collect_context(
        &self,
        id: &DocumentId,
    ) -> Result<AnalysisContext<P::Scanned>, AnalysisError> {
        let root = self.scan(id).await?;
        let mut context = AnalysisContext {
            root: id.clone(),
            documents: BTreeMap::from([(id.clone(), root.clone())]),
            failed: BTreeMap::new(),
            truncated: false,
        };
        let mut visited = BTreeSet::from([id.clone()]);
        let mut queue = VecDeque::from([(root, 0usize)]);

        while let Some((scanned, depth)) = queue.pop_front() {
            let unvisited: Vec<DocumentId> = scanned
                .dependency_ids()
                .into_iter()
                .filter(|dep| !visited.contains(dep))
                .collect();
            if unvisited.is_empty() {
                continue;
            }
            if depth >= self.config.max_dependency_depth {
                tracing::warn!(
                    "[Analyzer] dependency scan of {id} stopped at depth {depth}; \
                     {} dependencies not scanned",
                    unvisited.len()
                );
                context.truncated = true;
                continue;
            }

            visited.extend(unvisited.iter().cloned());
            let results = join_all(unvisited.iter().map(|dep| self.scan(dep))).await;
            for (dep, result) in unvisited.into_iter().zip(results) {
                match result {
                    Ok(dep_scanned) => {
                        context.documents.insert(dep, dep_scanned.clone());
                        queue.push_back((dep_scanned, depth + 1));
                    }
                    Err(err) => {
                        tracing::debug!("[Analyzer] dependency {dep} of {id} unavailable: {err}");
                        context.failed.insert(dep, err);
                    }
                }
            }
        }
        Ok(context)
    }

    fn analyze<'a>(
        &'a self,
        id: &DocumentId,
    ) -> impl Future<Output = Result<Arc<P::Analyzed>, AnalysisError>> + Send + 'a {
        let runner = self.clone();
        let id_owned = id.clone();
        self.snapshot.analyzed(id, move || async move {
            let scanned = runner.scan_dependencies(&id_owned).await?;
            // Every scan below is already settled by the dependency scan.
            let context = runner.collect_context(&id_owned).await?;
            let analyzed = runner
                .pipeline
                .analyze(&id_owned, &scanned, &context)
                .await;
            let analyzed = runner.settle(Stage::Analyze, &id_owned, analyzed)?;
            runner.emit(AnalysisEvent::Analyzed(id_owned));
            Ok(analyzed)
        })
    }
}

/// Owns the current snapshot for an editing session and drives documents through the pipeline.
pub struct Analyzer<P: AnalysisPipeline> {
    pipeline: Arc<P>,
    config: Arc<AnalyzerConfig>,
    events: Option<UnboundedSender<AnalysisEvent>>,
    current: Arc<Snapshot<P>>,
}

impl<P: AnalysisPipeline> Analyzer<P> {
    pub fn new(pipeline: P, config: AnalyzerConfig) -> Self {
        Analyzer {
            pipeline: Arc::new(pipeline),
            config: Arc::new(config),
            events: None,
            current: Arc::new(Snapshot::<P>::default()),
        }
    }

    /// Send [`AnalysisEvent`]s to `tx`. A closed receiver never fails an analysis.
    pub fn with_event_sender(mut self, tx: UnboundedSender<AnalysisEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Continue from an existing snapshot instead of an empty one.
    pub fn with_snapshot(mut self, snapshot: Arc<Snapshot<P>>) -> Self {
        self.current = snapshot;
        self
    }

    pub fn pipeline(&self) -> &P {
        &self.pipeline
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// The current snapshot. It stays a frozen, valid view after later invalidations.
    pub fn snapshot(&self) -> Arc<Snapshot<P>> {
        self.current.clone()
    }

    fn runner(&self) -> StageRunner<P> {
        StageRunner {
            pipeline: self.pipeline.clone(),
            snapshot: self.current.clone(),
            config: self.config.clone(),
            events: self.events.clone(),
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn parse(&self, id: &DocumentId) -> Result<Arc<P::Parsed>, AnalysisError> {
        self.runner().parse(id).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn scan(&self, id: &DocumentId) -> Result<Arc<P::Scanned>, AnalysisError> {
        let runner = self.runner();
        runner.scan(id).await
    }

    /// Scan `id` and its transitive dependencies, returning `id`'s scan result.
    #[tracing::instrument(skip(self))]
    pub async fn scan_dependencies(
        &self,
        id: &DocumentId,
    ) -> Result<Arc<P::Scanned>, AnalysisError> {
        self.runner().scan_dependencies(id).await
    }

    /// The scanned closure of `id` as seen by the current snapshot.
    pub async fn context(
        &self,
        id: &DocumentId,
    ) -> Result<AnalysisContext<P::Scanned>, AnalysisError> {
        let runner = self.runner();
        runner.collect_context(id).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn analyze(&self, id: &DocumentId) -> Result<Arc<P::Analyzed>, AnalysisError> {
        let runner = self.runner();
        runner.analyze(id).await
    }

    /// Analyze several documents concurrently against the current snapshot.
    pub async fn analyze_all<I>(
        &self,
        ids: I,
    ) -> Vec<(DocumentId, Result<Arc<P::Analyzed>, AnalysisError>)>
    where
        I: IntoIterator,
        I::Item: Into<DocumentId>,
    {
        let ids: Vec<DocumentId> = ids.into_iter().map(Into::into).collect();
        let runner = self.runner();
        let results = join_all(ids.iter().map(|id| runner.analyze(id))).await;
        ids.into_iter().zip(results).collect()
    }

    /// Replace the current snapshot with one in which `ids` and their dependants are stale.
    ///
    /// Returns the new snapshot. Computations already running against the previous snapshot
    /// complete there and are not published into the new one.
    pub fn files_changed<I>(&mut self, ids: I) -> Arc<Snapshot<P>>
    where
        I: IntoIterator,
        I::Item: Into<DocumentId>,
    {
        let ids: Vec<DocumentId> = ids.into_iter().map(Into::into).collect();
        let dependants: BTreeSet<DocumentId> = ids
            .iter()
            .flat_map(|id| self.current.dependants_of(id.as_str()))
            .collect();

        let next = Arc::new(self.current.invalidate(ids.iter()));
        tracing::info!(
            "[Analyzer] {} documents changed, {} dependants invalidated (generation {})",
            ids.len(),
            dependants.len(),
            next.generation()
        );
        self.current = next.clone();
        self.runner().emit(AnalysisEvent::Invalidated {
            generation: next.generation(),
            ids,
            dependants,
        });
        next
    }

    /// Preview which documents [`Analyzer::files_changed`] would invalidate besides `id`.
    pub fn dependants_of(&self, id: &str) -> BTreeSet<DocumentId> {
        self.current.dependants_of(id)
    }
}
