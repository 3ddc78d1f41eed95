//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```
//!
//! [`SourcePipeline`] is a tiny line-oriented language over in-memory documents:
//!
//! ```text
//! import other-doc
//! define name
//! fail scan
//! ```
//!
//! `import` declares a dependency, `define` introduces a name visible to importers, and
//! `fail <stage>` makes that stage fail for the document.

use noet_analysis::{
    analyzer::{AnalysisContext, AnalysisPipeline},
    document::{DocumentId, ScannedDocument, Stage},
    AnalysisError,
};
use parking_lot::Mutex;
use std::{
    collections::{BTreeSet, HashMap},
    sync::atomic::{AtomicUsize, Ordering},
};

/// Initialize tracing for tests, respecting RUST_LOG env var.
///
/// Safe to call multiple times: subsequent calls are no-ops.
#[allow(dead_code)]
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSource {
    pub lines: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedSource {
    pub imports: BTreeSet<DocumentId>,
    pub definitions: BTreeSet<String>,
}

impl ScannedDocument for ScannedSource {
    fn dependency_ids(&self) -> BTreeSet<DocumentId> {
        self.imports.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzedSource {
    /// Every name defined by the document or anything it transitively imports
    pub visible: BTreeSet<String>,
    /// Imports that could not be parsed or scanned
    pub missing: BTreeSet<DocumentId>,
    pub truncated: bool,
}

/// Per-stage call counts, one per pipeline invocation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Calls {
    pub parse: usize,
    pub scan: usize,
    pub analyze: usize,
}

#[derive(Default)]
pub struct SourcePipeline {
    sources: Mutex<HashMap<DocumentId, String>>,
    parse_calls: AtomicUsize,
    scan_calls: AtomicUsize,
    analyze_calls: AtomicUsize,
}

#[allow(dead_code)]
impl SourcePipeline {
    pub fn new(documents: &[(&str, &str)]) -> Self {
        let pipeline = SourcePipeline::default();
        for (id, text) in documents {
            pipeline.set_source(id, text);
        }
        pipeline
    }

    pub fn set_source(&self, id: &str, text: &str) {
        self.sources
            .lock()
            .insert(DocumentId::from(id), text.to_string());
    }

    pub fn calls(&self) -> Calls {
        Calls {
            parse: self.parse_calls.load(Ordering::SeqCst),
            scan: self.scan_calls.load(Ordering::SeqCst),
            analyze: self.analyze_calls.load(Ordering::SeqCst),
        }
    }

    fn directive<'a>(lines: &'a [String], keyword: &str) -> impl Iterator<Item = &'a str> + 'a {
        let prefix = format!("{keyword} ");
        lines
            .iter()
            .filter_map(move |line| line.trim().strip_prefix(prefix.as_str()))
            .map(str::trim)
    }

    fn check_failure(id: &DocumentId, lines: &[String], stage: Stage) -> Result<(), AnalysisError> {
        if Self::directive(lines, "fail").any(|failing| failing == stage.as_str()) {
            return Err(AnalysisError::stage(stage, id.as_str(), "requested failure"));
        }
        Ok(())
    }
}

impl AnalysisPipeline for SourcePipeline {
    type Parsed = ParsedSource;
    type Scanned = ScannedSource;
    type Analyzed = AnalyzedSource;

    async fn parse(&self, id: &DocumentId) -> Result<ParsedSource, AnalysisError> {
        self.parse_calls.fetch_add(1, Ordering::SeqCst);
        let text = self
            .sources
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| AnalysisError::UnknownDocument(id.to_string()))?;
        tokio::task::yield_now().await;
        let lines: Vec<String> = text.lines().map(str::to_string).collect();
        Self::check_failure(id, &lines, Stage::Parse)?;
        Ok(ParsedSource { lines })
    }

    async fn scan(
        &self,
        id: &DocumentId,
        parsed: &ParsedSource,
    ) -> Result<ScannedSource, AnalysisError> {
        self.scan_calls.fetch_add(1, Ordering::SeqCst);
        Self::check_failure(id, &parsed.lines, Stage::Scan)?;
        Ok(ScannedSource {
            imports: Self::directive(&parsed.lines, "import")
                .map(DocumentId::from)
                .collect(),
            definitions: Self::directive(&parsed.lines, "define")
                .map(str::to_string)
                .collect(),
        })
    }

    async fn analyze(
        &self,
        id: &DocumentId,
        scanned: &ScannedSource,
        context: &AnalysisContext<ScannedSource>,
    ) -> Result<AnalyzedSource, AnalysisError> {
        self.analyze_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if scanned.definitions.contains("fail-analysis") {
            return Err(AnalysisError::Custom(format!("{id} asked to fail")));
        }
        Ok(AnalyzedSource {
            visible: context
                .documents()
                .flat_map(|(_, doc)| doc.definitions.iter().cloned())
                .collect(),
            missing: context.failed().keys().cloned().collect(),
            truncated: context.is_truncated(),
        })
    }
}

#[allow(dead_code)]
pub fn ids(names: &[&str]) -> BTreeSet<DocumentId> {
    names.iter().map(|name| DocumentId::from(*name)).collect()
}

#[allow(dead_code)]
pub fn names(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|name| name.to_string()).collect()
}
