use serde::{Deserialize, Serialize};
use std::{
    fs::{read_to_string, write},
    path::Path,
};

use crate::error::AnalysisError;

/// Default cutoff for walking a document's transitive dependencies.
pub const DEFAULT_MAX_DEPENDENCY_DEPTH: usize = 64;

/// Tunables for an [`Analyzer`](crate::analyzer::Analyzer).
///
/// ```toml
/// max_dependency_depth = 32
/// warn_on_cycles = false
/// emit_events = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// How many dependency hops the dependency scan follows before it stops descending.
    pub max_dependency_depth: usize,
    /// Log dependency cycles that include a freshly scanned document.
    pub warn_on_cycles: bool,
    /// Send [`AnalysisEvent`](crate::event::AnalysisEvent)s when an event sender is attached.
    pub emit_events: bool,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        AnalyzerConfig {
            max_dependency_depth: DEFAULT_MAX_DEPENDENCY_DEPTH,
            warn_on_cycles: true,
            emit_events: true,
        }
    }
}

impl AnalyzerConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, AnalysisError> {
        let config: AnalyzerConfig = toml::from_str(content)?;
        if config.max_dependency_depth == 0 {
            return Err(AnalysisError::Config(
                "max_dependency_depth must be at least 1".to_string(),
            ));
        }
        Ok(config)
    }

    /// Read the config at `path`, falling back to defaults when the file does not exist.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, AnalysisError> {
        let path = path.as_ref();
        tracing::debug!("Attempting to read analyzer config from: {:?}", path);
        if !path.exists() {
            tracing::debug!("Config file not found, using default analyzer config.");
            return Ok(AnalyzerConfig::default());
        }
        let content = read_to_string(path)?;
        AnalyzerConfig::from_toml_str(&content)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), AnalysisError> {
        tracing::debug!("Writing analyzer config to: {:?}", path.as_ref());
        let toml_string = toml::to_string(self)?;
        write(path, toml_string)?;
        Ok(())
    }
}
