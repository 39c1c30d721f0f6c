// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Process-wide agent context: configuration and identity, resolved once

use crate::command::CommandRunner;
use crate::config::AgentConfig;
use crate::identity::DeviceIdentity;

/// Agent version reported in every envelope
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Read-only state shared by reference with the assembler and delivery
#[derive(Debug, Clone)]
pub struct AgentContext {
    config: AgentConfig,
    identity: DeviceIdentity,
}

impl AgentContext {
    /// Resolve the device identity for `config` using the real probes
    pub fn new(config: AgentConfig) -> Self {
        let runner = CommandRunner::new(config.command_timeout());
        let identity = DeviceIdentity::resolve(config.device_id.as_deref(), &runner);
        log::info!("device id {} (from {})", identity.id(), identity.source());
        Self { config, identity }
    }

    pub fn with_identity(config: AgentConfig, identity: DeviceIdentity) -> Self {
        Self { config, identity }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }
}
