//! Document identities and the pipeline stages every document flows through.

use serde::{Deserialize, Serialize};
use std::{
    borrow::Borrow,
    collections::BTreeSet,
    fmt::{self, Display, Formatter},
};

/// An already-resolved document identity.
///
/// Equality is exact string equality. Path normalization and URL resolution happen before an id
/// ever reaches this crate.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        DocumentId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for DocumentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(id: &str) -> Self {
        DocumentId(id.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(id: String) -> Self {
        DocumentId(id)
    }
}

impl From<&DocumentId> for DocumentId {
    fn from(id: &DocumentId) -> Self {
        id.clone()
    }
}

impl Borrow<str> for DocumentId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for DocumentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The one capability the cache needs from a scanned document: the ids it depends on.
///
/// A scan's declared dependencies are the sole source of truth for dependency graph edges.
pub trait ScannedDocument {
    fn dependency_ids(&self) -> BTreeSet<DocumentId>;
}

/// One phase of the analysis pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    Parse,
    Scan,
    ScanDependencies,
    Analyze,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Parse,
        Stage::Scan,
        Stage::ScanDependencies,
        Stage::Analyze,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Parse => "parse",
            Stage::Scan => "scan",
            Stage::ScanDependencies => "scan-dependencies",
            Stage::Analyze => "analyze",
        }
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
