//! # noet-analysis
//!
//! Incremental, snapshot-based caching for a multi-stage document analysis pipeline.
//!
//! ## Overview
//!
//! Documents flow through four stages: **parse**, **scan** (discover the documents a document
//! depends on), **scan dependencies** (scan everything it transitively depends on), and
//! **analyze** (resolve the document against that context). Every stage result is memoized per
//! document in a [`work_cache::WorkCache`] that deduplicates concurrent requests for the same
//! key: the first request starts the work, every later request awaits the same computation.
//!
//! Edits never mutate cached state. Instead, [`cache::AnalysisCache::invalidate`] produces a new
//! snapshot that drops exactly the results made stale by the changed documents:
//!
//! - a changed document loses every stage result;
//! - its transitive dependants, found through the [`graph::DependencyGraph`], lose only their
//!   dependency-scan and analysis results, since their own text did not change;
//! - analyses still in flight are not carried over.
//!
//! Older snapshots remain valid, frozen views for anyone still holding them.
//!
//! ## Architecture
//!
//! - **[`document`]**: document identities, the [`document::Stage`] enum, and the
//!   [`document::ScannedDocument`] capability the cache needs from scan results
//! - **[`work_cache`]**: memoizing async computation cache
//! - **[`graph`]**: persistent dependency graph with transitive dependant queries
//! - **[`cache`]**: the versioned snapshot and the invalidation algorithm
//! - **[`analyzer`]**: orchestration of an [`analyzer::AnalysisPipeline`] over snapshots
//! - **[`event`]**: progress events for observers
//! - **[`config`]**: analyzer tunables, loadable from TOML
//!
//! ## Quick Start
//!
//! ```rust
//! use noet_analysis::{
//!     analyzer::{AnalysisContext, AnalysisPipeline, Analyzer},
//!     config::AnalyzerConfig,
//!     document::{DocumentId, ScannedDocument},
//!     AnalysisError,
//! };
//! use std::collections::BTreeSet;
//!
//! struct Imports(BTreeSet<DocumentId>);
//!
//! impl ScannedDocument for Imports {
//!     fn dependency_ids(&self) -> BTreeSet<DocumentId> {
//!         self.0.clone()
//!     }
//! }
//!
//! struct LinePipeline;
//!
//! impl AnalysisPipeline for LinePipeline {
//!     type Parsed = Vec<String>;
//!     type Scanned = Imports;
//!     type Analyzed = usize;
//!
//!     async fn parse(&self, id: &DocumentId) -> Result<Vec<String>, AnalysisError> {
//!         match id.as_str() {
//!             "main" => Ok(vec!["import util".to_string()]),
//!             "util" => Ok(vec![]),
//!             other => Err(AnalysisError::UnknownDocument(other.to_string())),
//!         }
//!     }
//!
//!     async fn scan(&self, _id: &DocumentId, lines: &Vec<String>) -> Result<Imports, AnalysisError> {
//!         Ok(Imports(
//!             lines
//!                 .iter()
//!                 .filter_map(|line| line.strip_prefix("import "))
//!                 .map(DocumentId::from)
//!                 .collect(),
//!         ))
//!     }
//!
//!     async fn analyze(
//!         &self,
//!         _id: &DocumentId,
//!         _scanned: &Imports,
//!         context: &AnalysisContext<Imports>,
//!     ) -> Result<usize, AnalysisError> {
//!         Ok(context.len())
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), AnalysisError> {
//!     let mut analyzer = Analyzer::new(LinePipeline, AnalyzerConfig::default());
//!     let main = DocumentId::from("main");
//!
//!     assert_eq!(*analyzer.analyze(&main).await?, 2);
//!
//!     // util was edited: main's analysis is stale, its scan is not.
//!     let next = analyzer.files_changed(["util"]);
//!     assert!(next.published_analyzed("main").is_none());
//!     assert!(next.published_scanned("main").is_some());
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Deduplicated work**: concurrent requests for the same stage and document share one
//!   computation
//! - **Sticky failures**: a failed stage stays failed until its document is invalidated
//! - **Cycle tolerant**: dependency cycles are reported, never deadlocked on
//! - **Event streaming**: optional [`event::AnalysisEvent`] channel for progress reporting

pub mod analyzer;
pub mod cache;
pub mod config;
pub mod document;
pub mod error;
pub mod event;
pub mod graph;
#[cfg(test)]
mod tests;
pub mod work_cache;

pub use analyzer::{AnalysisContext, AnalysisPipeline, Analyzer};
pub use cache::{AnalysisCache, CacheStats};
pub use document::{DocumentId, ScannedDocument, Stage};
pub use error::*;
pub use graph::DependencyGraph;
