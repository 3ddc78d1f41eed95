use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    fmt::{Display, Formatter},
};

use crate::{
    document::{DocumentId, Stage},
    error::AnalysisError,
};

/// Progress notifications from an [`Analyzer`](crate::analyzer::Analyzer).
///
/// Events are emitted once per computation, not once per request: a document whose scan is
/// served from the cache does not produce a second `Scanned` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalysisEvent {
    Parsed(DocumentId),
    /// Scanned document, the dependency ids its scan declared
    Scanned {
        id: DocumentId,
        dependencies: BTreeSet<DocumentId>,
    },
    Analyzed(DocumentId),
    StageFailed {
        stage: Stage,
        id: DocumentId,
        message: String,
    },
    /// New snapshot generation, the changed ids, and every transitive dependant of them
    Invalidated {
        generation: u64,
        ids: Vec<DocumentId>,
        dependants: BTreeSet<DocumentId>,
    },
}

impl AnalysisEvent {
    /// The document this event is about, if it concerns exactly one.
    pub fn document(&self) -> Option<&DocumentId> {
        match self {
            AnalysisEvent::Parsed(id)
            | AnalysisEvent::Analyzed(id)
            | AnalysisEvent::Scanned { id, .. }
            | AnalysisEvent::StageFailed { id, .. } => Some(id),
            AnalysisEvent::Invalidated { .. } => None,
        }
    }

    /// One JSON line, for forwarding events to out-of-process observers.
    pub fn to_json(&self) -> Result<String, AnalysisError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(line: &str) -> Result<Self, AnalysisError> {
        Ok(serde_json::from_str(line)?)
    }
}

impl Display for AnalysisEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalysisEvent::Parsed(id) => write!(f, "parsed {id}"),
            AnalysisEvent::Scanned { id, dependencies } => {
                write!(f, "scanned {id} ({} dependencies)", dependencies.len())
            }
            AnalysisEvent::Analyzed(id) => write!(f, "analyzed {id}"),
            AnalysisEvent::StageFailed { stage, id, message } => {
                write!(f, "{stage} failed for {id}: {message}")
            }
            AnalysisEvent::Invalidated {
                generation,
                ids,
                dependants,
            } => write!(
                f,
                "generation {generation}: invalidated {} documents and {} dependants",
                ids.len(),
                dependants.len()
            ),
        }
    }
}
