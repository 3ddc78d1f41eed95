//! Versioned snapshots of the whole analysis pipeline's cached state.
//!
//! # Module Organization
//!
//! - [`snapshot`]: [`AnalysisCache`], one immutable snapshot per edit generation, and the
//!   invalidation algorithm that produces its successor
//!
//! An editing session holds one "current" snapshot and replaces it with the value returned by
//! [`AnalysisCache::invalidate`] whenever documents change. Older snapshots stay valid for
//! anyone still holding them.

mod snapshot;


pub use snapshot::{AnalysisCache, CacheStats};
