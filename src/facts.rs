//! Fact provider contract
//!
//! Every data-gathering unit implements [`FactProvider`]. The assembler only
//! depends on this trait; how a provider talks to the operating system is
//! its own business.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ProbeError, ProviderError, ProviderErrorKind};

/// Facts gathered by one provider, keyed by fact name
pub type FactSet = Map<String, Value>;

/// A data-gathering unit
pub trait FactProvider {
    /// Provider name, used in failure records and logs
    fn name(&self) -> &str;

    /// Envelope key the facts are filed under
    fn topic(&self) -> &str {
        self.name()
    }

    /// Gather facts. Every failure must come back as a [`ProviderError`].
    fn collect(&self) -> Result<FactSet, ProviderError>;
}

/// Failure record carried in the envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionFailure {
    pub provider: String,
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl From<ProviderError> for CollectionFailure {
    fn from(err: ProviderError) -> Self {
        Self {
            provider: err.provider,
            kind: err.source.kind,
            message: err.source.message,
        }
    }
}

/// Result of one provider invocation
#[derive(Debug, Clone, PartialEq)]
pub enum CollectorOutcome {
    Collected { topic: String, facts: FactSet },
    Failed(CollectionFailure),
}

impl CollectorOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Collected { .. })
    }
}

/// Accumulates independent checks inside a single provider.
///
/// A failed check is recorded in place as `{"error": ...}`; the provider
/// only fails when no check succeeded at all.
#[derive(Debug, Default)]
pub struct CheckSet {
    facts: FactSet,
    succeeded: usize,
    first_error: Option<ProbeError>,
}

impl CheckSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, key: &str, result: Result<Value, ProbeError>) {
        match result {
            Ok(value) => {
                self.succeeded += 1;
                self.facts.insert(key.into(), value);
            }
            Err(e) => {
                log::warn!("check {} failed: {}", key, e);
                self.facts
                    .insert(key.into(), serde_json::json!({ "error": e.to_string() }));
                if self.first_error.is_none() {
                    self.first_error = Some(e);
                }
            }
        }
    }

    /// Insert a fact that is not a check (always counted as present)
    pub fn insert(&mut self, key: &str, value: Value) {
        self.facts.insert(key.into(), value);
    }

    pub fn succeeded(&self) -> usize {
        self.succeeded
    }

    pub fn finish(self, provider: &str) -> Result<FactSet, ProviderError> {
        match (self.succeeded, self.first_error) {
            (0, Some(e)) => Err(e.for_provider(provider)),
            _ => Ok(self.facts),
        }
    }
}
