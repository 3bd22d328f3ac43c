// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! State shared between the simulation agent and the debug server.
//!
//! One mutex-guarded record plus a condition variable. The wake frequency is
//! low and the critical sections are tiny, so nothing fancier is warranted.
//! Every transition calls `notify_all`; every wait states its predicate.

use std::sync::{Condvar, Mutex, MutexGuard};

use crate::spool::DiagnosticSet;
use crate::time::TimePoint;

/// Lifecycle of the simulation, as seen by the server.
///
/// Transitions follow `Initializing → Running → Paused ⇄ Running →
/// Finished`; `Paused → Running` only ever happens through a server-set
/// `unpause`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationStatus {
    /// No samples have been recorded yet.
    Initializing,
    /// Samples are being actively recorded.
    Running,
    /// No samples will be recorded until the simulation is unpaused.
    Paused,
    /// The stimulus has ended; no further samples will be recorded.
    Finished,
}

/// Why the agent paused the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseCause {
    /// The current time advanced past `run_until_time`.
    Time,
    /// A diagnostic listed in `run_until_diagnostics` was emitted.
    Diagnostic,
}

/// The record behind the mutex. Field ownership:
///
/// | field                      | writer | reader |
/// |----------------------------|--------|--------|
/// | status, latest_time,       | agent  | server |
/// | next_sample_time, cause    |        |        |
/// | run_until_time,            | server | agent  |
/// | run_until_diagnostics      |        |        |
/// | unpause (set)              | server | agent  |
/// | unpause (clear)            | agent  | server |
#[derive(Debug)]
pub struct Shared {
    pub status: SimulationStatus,
    /// Timestamp of the last sample in the recorder.
    pub latest_time: TimePoint,
    /// Timestamp of the next sample to be recorded; valid only when paused.
    pub next_sample_time: TimePoint,
    /// Time at which the agent should pause.
    pub run_until_time: TimePoint,
    /// Diagnostics at which the agent should pause.
    pub run_until_diagnostics: DiagnosticSet,
    pub cause: PauseCause,
    /// Set by the server to resume the simulation, cleared by the agent once
    /// it has resumed. Synchronizes the `run_simulation` command.
    pub unpause: bool,
}

/// Shared record plus its condition variable.
pub struct SharedState {
    state: Mutex<Shared>,
    condvar: Condvar,
}

impl Default for SharedState {
    fn default() -> SharedState {
        SharedState {
            state: Mutex::new(Shared {
                status: SimulationStatus::Initializing,
                latest_time: TimePoint::ZERO,
                next_sample_time: TimePoint::ZERO,
                run_until_time: TimePoint::MAXIMUM,
                run_until_diagnostics: DiagnosticSet::EMPTY,
                cause: PauseCause::Time,
                unpause: false,
            }),
            condvar: Condvar::new(),
        }
    }
}

impl SharedState {
    pub fn new() -> SharedState {
        SharedState::default()
    }

    pub fn lock(&self) -> MutexGuard<'_, Shared> {
        self.state.lock().unwrap()
    }

    pub fn notify_all(&self) {
        self.condvar.notify_all();
    }

    /// Block until `predicate` holds, re-checking on every notification.
    pub fn wait_while<'a>(
        &self,
        mut guard: MutexGuard<'a, Shared>,
        mut predicate: impl FnMut(&Shared) -> bool,
    ) -> MutexGuard<'a, Shared> {
        while !predicate(&guard) {
            guard = self.condvar.wait(guard).unwrap();
        }
        guard
    }
}
