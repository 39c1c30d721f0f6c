// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! Collection scheduler
//!
//! Drives the cycle: assemble an envelope from every provider, hand it to
//! delivery, then wait out the interval. The wait is cancellable, so a stop
//! request ends the loop without sitting through the rest of the interval.
//!
//! States move `Idle -> Running -> Stopped | Crashed` and never go back.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::assembler::TelemetryAssembler;
use crate::context::AgentContext;
use crate::delivery::Deliver;
use crate::envelope::TelemetryEnvelope;
use crate::error::{AgentError, Result};
use crate::facts::FactProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Idle,
    Running,
    Stopped,
    Crashed,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::Crashed => write!(f, "crashed"),
        }
    }
}

/// Cross-thread stop request; clones share the same flag
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        let (flag, cvar) = &*self.inner;
        *flag.lock().unwrap_or_else(|e| e.into_inner()) = true;
        cvar.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Block for up to `timeout`; returns `true` once a stop was requested
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, cvar) = &*self.inner;
        let guard = flag.lock().unwrap_or_else(|e| e.into_inner());
        let (guard, _) = cvar
            .wait_timeout_while(guard, timeout, |stopped| !*stopped)
            .unwrap_or_else(|e| e.into_inner());
        *guard
    }
}

/// Summary of one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub delivered: bool,
    /// Topics present in the envelope
    pub collected: usize,
    /// Failure records in the envelope
    pub failed: usize,
}

pub struct Scheduler<D: Deliver> {
    context: AgentContext,
    providers: Vec<Box<dyn FactProvider>>,
    assembler: TelemetryAssembler,
    delivery: D,
    state: AgentState,
    stop: StopSignal,
    cycles: u64,
}

impl<D: Deliver> Scheduler<D> {
    pub fn new(
        context: AgentContext,
        providers: Vec<Box<dyn FactProvider>>,
        assembler: TelemetryAssembler,
        delivery: D,
    ) -> Self {
        Self {
            context,
            providers,
            assembler,
            delivery,
            state: AgentState::Idle,
            stop: StopSignal::new(),
            cycles: 0,
        }
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    /// Handle for requesting a stop from another thread
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn context(&self) -> &AgentContext {
        &self.context
    }

    pub fn delivery(&self) -> &D {
        &self.delivery
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Assemble an envelope without delivering it
    pub fn collect(&self) -> Result<TelemetryEnvelope> {
        self.assembler.collect_all(&self.context, &self.providers)
    }

    /// One collect + send. Provider and delivery failures are reported,
    /// not raised.
    pub fn run_once(&mut self) -> Result<CycleReport> {
        let envelope = self.collect()?;
        let delivered = self.delivery.send(&envelope);
        self.cycles += 1;

        let report = CycleReport {
            delivered,
            collected: envelope.topics.len(),
            failed: envelope.collection_errors.len(),
        };
        log::info!(
            "cycle {} complete: {} collected, {} failed, delivered: {}",
            self.cycles,
            report.collected,
            report.failed,
            report.delivered
        );
        Ok(report)
    }

    /// Run cycles until stopped. Only valid from `Idle`.
    pub fn run(&mut self) -> Result<()> {
        if self.state != AgentState::Idle {
            return Err(AgentError::InvalidState {
                action: "run",
                state: self.state.to_string(),
            });
        }

        let interval = self.context.config().interval();
        self.state = AgentState::Running;
        log::info!(
            "agent running: {} providers, interval {}s",
            self.providers.len(),
            interval.as_secs()
        );

        while !self.stop.is_stopped() {
            if let Err(e) = self.run_once() {
                log::error!("fatal error, stopping: {}", e);
                self.state = AgentState::Crashed;
                return Err(e);
            }
            if self.stop.wait_timeout(interval) {
                break;
            }
        }

        self.state = AgentState::Stopped;
        log::info!("agent stopped after {} cycle(s)", self.cycles);
        Ok(())
    }
}
