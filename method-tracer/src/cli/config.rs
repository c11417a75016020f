//! Filter configuration file

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::domain::Modification;
use crate::filter::Filter;

/// Filter lists as stored in a JSON config file:
///
/// ```json
/// { "trace": ["com.example.Foo"], "timing": ["::run"] }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilterConfig {
    pub trace: Vec<String>,
    pub timing: Vec<String>,
}

impl FilterConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read filter config {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Invalid filter config {}", path.display()))
    }

    /// Append `other`'s filters after this config's.
    pub fn merge(&mut self, other: Self) {
        self.trace.extend(other.trace);
        self.timing.extend(other.timing);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.trace.is_empty() && self.timing.is_empty()
    }

    /// Texts that do not parse as filters, with the list they came from.
    #[must_use]
    pub fn invalid(&self) -> Vec<(Modification, &str)> {
        let trace = self.trace.iter().map(|t| (Modification::TRACING, t.as_str()));
        let timing = self.timing.iter().map(|t| (Modification::TIMING, t.as_str()));
        trace.chain(timing).filter(|(_, text)| !Filter::is_valid(text)).collect()
    }
}
