//! Telemetry assembly
//!
//! Runs every enabled provider in configuration order and folds the results
//! into one [`TelemetryEnvelope`]. A failing (or panicking) provider becomes
//! a failure record; the cycle always yields an envelope.

use std::collections::{BTreeMap, HashSet};
use std::panic::{self, AssertUnwindSafe};

use crate::command::CommandRunner;
use crate::context::{AgentContext, AGENT_VERSION};
use crate::envelope::{HostDescriptor, TelemetryEnvelope, RESERVED_KEYS};
use crate::error::{AgentError, ProbeError, Result};
use crate::facts::{CollectionFailure, CollectorOutcome, FactProvider};

type HostProbe = Box<dyn Fn() -> HostDescriptor>;

/// Builds envelopes from a provider list
pub struct TelemetryAssembler {
    host_probe: HostProbe,
}

impl TelemetryAssembler {
    pub fn new(runner: CommandRunner) -> Self {
        Self {
            host_probe: Box::new(move || HostDescriptor::detect(&runner)),
        }
    }

    /// Use a fixed host probe instead of the live one
    pub fn with_host_probe(probe: impl Fn() -> HostDescriptor + 'static) -> Self {
        Self {
            host_probe: Box::new(probe),
        }
    }

    /// Reject provider lists whose topics collide with each other or with
    /// the envelope header.
    pub fn check_topics(providers: &[Box<dyn FactProvider>]) -> Result<()> {
        let mut seen = HashSet::new();
        for provider in providers {
            let topic = provider.topic();
            if RESERVED_KEYS.contains(&topic) {
                return Err(AgentError::TopicCollision(format!(
                    "{} uses reserved envelope key {}",
                    provider.name(),
                    topic
                )));
            }
            if !seen.insert(topic) {
                return Err(AgentError::TopicCollision(format!(
                    "topic {} registered twice",
                    topic
                )));
            }
        }
        Ok(())
    }

    /// Run one provider, converting a panic into a failure record
    pub fn run_provider(provider: &dyn FactProvider) -> CollectorOutcome {
        log::debug!("running {}", provider.name());
        let result = panic::catch_unwind(AssertUnwindSafe(|| provider.collect()));
        match result {
            Ok(Ok(facts)) => CollectorOutcome::Collected {
                topic: provider.topic().to_string(),
                facts,
            },
            Ok(Err(e)) => {
                log::error!("{}", e);
                CollectorOutcome::Failed(e.into())
            }
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "provider panicked".into());
                log::error!("{} panicked: {}", provider.name(), message);
                CollectorOutcome::Failed(
                    ProbeError::unknown(format!("panicked: {}", message))
                        .for_provider(provider.name())
                        .into(),
                )
            }
        }
    }

    /// Run every provider and assemble the envelope
    pub fn collect_all(
        &self,
        context: &AgentContext,
        providers: &[Box<dyn FactProvider>],
    ) -> Result<TelemetryEnvelope> {
        Self::check_topics(providers)?;

        let collection_time = chrono::Utc::now().to_rfc3339();
        let mut topics = BTreeMap::new();
        let mut failures: Vec<CollectionFailure> = Vec::new();

        for provider in providers {
            match Self::run_provider(provider.as_ref()) {
                CollectorOutcome::Collected { topic, facts } => {
                    topics.insert(topic, serde_json::Value::Object(facts));
                }
                CollectorOutcome::Failed(failure) => failures.push(failure),
            }
        }

        let host = (self.host_probe)();
        log::info!(
            "collected {} of {} topics ({} failed)",
            topics.len(),
            providers.len(),
            failures.len()
        );

        Ok(TelemetryEnvelope {
            device_id: context.identity().id().to_string(),
            agent_version: AGENT_VERSION.to_string(),
            collection_time,
            hostname: host.hostname,
            os_type: host.os_type,
            os_version: host.os_version,
            device_name: context.config().device_name.clone(),
            topics,
            collection_errors: failures,
        })
    }
}
