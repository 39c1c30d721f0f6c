//! Posture Agent: endpoint telemetry collection and delivery
//!
//! The agent runs a set of [`FactProvider`]s on a fixed interval, folds
//! their output into a single [`TelemetryEnvelope`] and POSTs it to a
//! collection service with bounded retry. A provider that fails never
//! aborts a cycle; its failure travels in the envelope instead.
//!
//! # Pipeline
//!
//! ```text
//! Scheduler -> TelemetryAssembler -> [FactProvider ...] -> TelemetryEnvelope -> DeliveryClient
//!                                       |
//!                                       +-> HybridSourceResolver (Munki report | direct probe)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use posturelib::{providers, AgentConfig, AgentContext, CommandRunner, DeliveryClient,
//!     Scheduler, TelemetryAssembler};
//!
//! let config = AgentConfig::load(posturelib::config::DEFAULT_CONFIG_PATH).config;
//! let runner = CommandRunner::new(config.command_timeout());
//! let providers = providers::default_providers(&config);
//! let delivery = DeliveryClient::from_config(&config).unwrap();
//! let context = AgentContext::new(config);
//!
//! let mut scheduler = Scheduler::new(context, providers, TelemetryAssembler::new(runner), delivery);
//! let report = scheduler.run_once().unwrap();
//! println!("delivered: {}", report.delivered);
//! ```

pub mod assembler;
pub mod command;
pub mod config;
pub mod context;
pub mod delivery;
pub mod envelope;
pub mod error;
pub mod facts;
pub mod hybrid;
pub mod identity;
pub mod munki;
pub mod providers;
pub mod scheduler;

pub use assembler::TelemetryAssembler;
pub use command::CommandRunner;
pub use config::{AgentConfig, CollectorToggles, LoadedConfig};
pub use context::{AgentContext, AGENT_VERSION};
pub use delivery::{Deliver, DeliveryClient, DeliveryReceipt, HttpTransport, RetryPolicy};
pub use envelope::{HostDescriptor, TelemetryEnvelope};
pub use error::{AgentError, ConfigError, DeliveryError, ProviderError, ProviderErrorKind, Result};
pub use facts::{CollectionFailure, CollectorOutcome, FactProvider, FactSet};
pub use hybrid::{FactSource, HybridSourceResolver};
pub use identity::{DeviceIdentity, IdentitySource};
pub use munki::MunkiSource;
pub use providers::ProviderKind;
pub use scheduler::{AgentState, CycleReport, Scheduler, StopSignal};
