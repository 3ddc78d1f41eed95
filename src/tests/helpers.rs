//! Shared test utilities for snapshot testing

use crate::{
    cache::AnalysisCache,
    document::{DocumentId, ScannedDocument},
};
use std::collections::BTreeSet;

/// Initialize logging for tests
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// A scan result that only knows its own id and the ids it imports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestScanned {
    pub id: DocumentId,
    pub imports: BTreeSet<DocumentId>,
}

impl TestScanned {
    pub fn new(id: &str, imports: &[&str]) -> Self {
        TestScanned {
            id: DocumentId::from(id),
            imports: imports.iter().map(|import| DocumentId::from(*import)).collect(),
        }
    }
}

impl ScannedDocument for TestScanned {
    fn dependency_ids(&self) -> BTreeSet<DocumentId> {
        self.imports.clone()
    }
}

pub type TestCache = AnalysisCache<String, TestScanned, String>;

/// A snapshot where `a` imports `b` and `b` imports `c`.
///
/// Every document has parsed, scanned (published) and analyzed (published) results; `a` and `b`
/// also have dependencies-scanned results.
pub fn create_chain_cache() -> TestCache {
    init_logging();

    let cache = TestCache::new();
    for (id, imports) in [("a", vec!["b"]), ("b", vec!["c"]), ("c", vec![])] {
        let scanned = TestScanned::new(id, &imports);
        cache.set_parsed(id, format!("parsed {id}"));
        if !imports.is_empty() {
            cache.set_dependencies_scanned(id, scanned.clone());
        }
        cache.publish_scanned(id, scanned);
        cache.publish_analyzed(id, format!("analyzed {id}"));
    }
    cache
}

pub fn ids(names: &[&str]) -> BTreeSet<DocumentId> {
    names.iter().map(|name| DocumentId::from(*name)).collect()
}
