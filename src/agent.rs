// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Simulation agent.
//!
//! The agent is embedded in the user defined stimulus code and tracks
//! timeline advancement: it evaluates the toplevel, records samples into
//! the spool, reports progress to the debug server, and pauses whenever the
//! server asked it to: at a target time, or at matching diagnostics.
//!
//! The agent runs on the simulation thread. [`Agent::start_debugging`]
//! spawns the server on its own thread; from then on the two communicate
//! only through the shared state record and the spool.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::design::{DebugItems, MetadataMap};
use crate::eval::{CheckKind, Performer, StderrPerformer, Toplevel};
use crate::server::state::{PauseCause, SharedState, SimulationStatus};
use crate::server::transport::Link;
use crate::server::Server;
use crate::spool::{Diagnostic, DiagnosticKind, DiagnosticSet, Recorder, Spool};
use crate::time::TimePoint;

/// Performer wrapper observing which diagnostics a step emitted while
/// forwarding every call unchanged.
struct WrappingPerformer<'a> {
    next: &'a mut dyn Performer,
    emitted: DiagnosticSet,
}

impl Performer for WrappingPerformer<'_> {
    fn on_print(&mut self, message: &str, attrs: &MetadataMap) {
        self.emitted.insert(DiagnosticKind::Print);
        self.next.on_print(message, attrs);
    }

    fn on_check(&mut self, kind: CheckKind, condition: bool, message: &str, attrs: &MetadataMap) {
        if !condition {
            match kind {
                CheckKind::Assert => self.emitted.insert(DiagnosticKind::Assert),
                CheckKind::Assume => self.emitted.insert(DiagnosticKind::Assume),
                CheckKind::AssertEventually | CheckKind::AssumeEventually | CheckKind::Cover => {}
            }
        }
        self.next.on_check(kind, condition, message, attrs);
    }
}

/// Simulation-side peer of the debug server.
pub struct Agent<T: Toplevel> {
    toplevel: T,
    items: DebugItems,
    recorder: Recorder,
    // Moved into the server thread by `start_debugging`.
    spool: Option<Spool>,
    top_path: Option<String>,
    thread: Option<JoinHandle<()>>,
    shared: Arc<SharedState>,
}

impl<T: Toplevel> Agent<T> {
    /// Wrap `toplevel` for debugging. `top_path` prefixes every item and
    /// scope path and must be empty or end with the hierarchical separator.
    pub fn new(spool: Spool, mut toplevel: T, top_path: &str) -> Agent<T> {
        assert!(
            top_path.is_empty() || top_path.ends_with(' '),
            "top path must be empty or end with a space"
        );
        let mut items = DebugItems::new();
        toplevel.debug_info(&mut items, None, top_path);
        let mut recorder = spool.recorder();
        recorder.start(&items);
        Agent {
            toplevel,
            items,
            recorder,
            spool: Some(spool),
            top_path: Some(top_path.to_string()),
            thread: None,
            shared: Arc::new(SharedState::new()),
        }
    }

    /// The wrapped toplevel.
    pub fn toplevel_mut(&mut self) -> &mut T {
        &mut self.toplevel
    }

    /// The design's debug surface; stimulus pokes inputs through this.
    pub fn items_mut(&mut self) -> &mut DebugItems {
        &mut self.items
    }

    pub fn items(&self) -> &DebugItems {
        &self.items
    }

    pub fn is_debugging(&self) -> bool {
        self.thread.is_some()
    }

    pub(crate) fn shared_state(&self) -> Arc<SharedState> {
        Arc::clone(&self.shared)
    }

    pub(crate) fn spool_handle(&self) -> Spool {
        self.spool.clone().expect("spool already moved to the server thread")
    }

    /// Spawn the debug server on its own thread, transferring the spool,
    /// the link, and the hierarchy path. Returns the link's URI for the
    /// embedder to announce.
    pub fn start_debugging<L: Link + 'static>(&mut self, link: L) -> String
    where
        T: Default,
    {
        assert!(!self.is_debugging(), "debug server already started");
        let uri = link.uri();
        self.shared.lock().run_until_time = TimePoint::ZERO;
        let shared = Arc::clone(&self.shared);
        let spool = self.spool.take().expect("spool already moved");
        let top_path = self.top_path.take().expect("top path already moved");
        let thread = thread::Builder::new()
            .name("heddle-server".into())
            .spawn(move || Server::<L, T>::start(shared, spool, link, top_path))
            .expect("failed to spawn debug server thread");
        self.thread = Some(thread);
        clilog::info!("debug server started at {}", uri);
        uri
    }

    /// Evaluate one timestep, recording it into the spool. Returns the
    /// number of delta cycles it took to converge.
    ///
    /// The first call captures the initial state as a complete snapshot and
    /// moves the simulation out of `Initializing`. If the step emits a
    /// diagnostic the server asked to pause on, the call blocks until the
    /// server resumes the simulation.
    pub fn step_with(&mut self, performer: &mut dyn Performer) -> usize {
        let mut wrapping = WrappingPerformer { next: performer, emitted: DiagnosticSet::EMPTY };
        let mut deltas = 0;
        let mut guard = self.shared.lock();
        if guard.status == SimulationStatus::Initializing {
            loop {
                self.toplevel.eval(&mut self.items, &mut wrapping);
                deltas += 1;
                if !self.toplevel.commit(&mut self.items) {
                    break;
                }
            }
            self.recorder.record_complete(&self.items);
            self.recorder.flush();
            guard.status = SimulationStatus::Running;
            self.shared.notify_all();
        } else {
            loop {
                self.toplevel.eval(&mut self.items, &mut wrapping);
                deltas += 1;
                self.toplevel.commit(&mut self.items);
                if !self.recorder.record_incremental(&self.items) {
                    break;
                }
            }
        }
        if guard.run_until_diagnostics.intersects(wrapping.emitted) {
            self.recorder.flush();
            guard.next_sample_time = self.recorder.latest_time();
            guard.status = SimulationStatus::Paused;
            guard.cause = PauseCause::Diagnostic;
            self.shared.notify_all();
            let mut guard = self.shared.wait_while(guard, |s| s.unpause);
            guard.unpause = false;
            guard.status = SimulationStatus::Running;
            self.shared.notify_all();
        }
        deltas
    }

    /// [`Agent::step_with`] under a performer that reports failed checks on
    /// standard error and never aborts.
    pub fn step(&mut self) -> usize {
        self.step_with(&mut StderrPerformer)
    }

    /// Advance the simulated time by `delta`. If this crosses the time the
    /// server asked to pause at, the call flushes the spool and blocks
    /// until the server resumes the simulation.
    pub fn advance(&mut self, delta: TimePoint) {
        let mut guard = self.shared.lock();
        assert!(
            guard.status != SimulationStatus::Initializing,
            "call `step` once to capture the initial state before `advance`"
        );
        let advanced_time = self.recorder.latest_time() + delta;
        if advanced_time > guard.run_until_time {
            self.recorder.flush();
            // A degenerate resume can leave `run_until_time` behind the
            // already-advanced clock; stay paused until it really moved.
            while advanced_time > guard.run_until_time {
                guard.next_sample_time = advanced_time;
                guard.status = SimulationStatus::Paused;
                guard.cause = PauseCause::Time;
                self.shared.notify_all();
                guard = self.shared.wait_while(guard, |s| s.unpause);
                guard.unpause = false;
            }
            guard.status = SimulationStatus::Running;
            self.shared.notify_all();
        }
        guard.latest_time = self.recorder.advance_time(delta);
    }

    /// Record and flush a complete snapshot, establishing a restart point
    /// for replays regardless of how far the incremental chain has grown.
    pub fn snapshot(&mut self) {
        self.recorder.record_complete(&self.items);
        self.recorder.flush();
    }

    // Diagnostic helpers. Usage: `agent.print("message", here!());`

    /// Record a print diagnostic on the timeline.
    pub fn print(&mut self, message: impl Into<String>, location: (&str, u32)) {
        self.recorder
            .record_diagnostic(Diagnostic::new(DiagnosticKind::Print, message, location.0, location.1));
    }

    /// Record a breakpoint diagnostic on the timeline.
    pub fn breakpoint(&mut self, message: impl Into<String>, location: (&str, u32)) {
        self.recorder
            .record_diagnostic(Diagnostic::new(DiagnosticKind::Break, message, location.0, location.1));
    }

    /// Record an assertion diagnostic if `condition` does not hold.
    pub fn assertion(&mut self, condition: bool, message: impl Into<String>, location: (&str, u32)) {
        if !condition {
            self.recorder
                .record_diagnostic(Diagnostic::new(DiagnosticKind::Assert, message, location.0, location.1));
        }
    }

    /// Record an assumption diagnostic if `condition` does not hold.
    pub fn assumption(&mut self, condition: bool, message: impl Into<String>, location: (&str, u32)) {
        if !condition {
            self.recorder
                .record_diagnostic(Diagnostic::new(DiagnosticKind::Assume, message, location.0, location.1));
        }
    }
}

impl<T: Toplevel> Drop for Agent<T> {
    fn drop(&mut self) {
        {
            let mut guard = self.shared.lock();
            guard.status = SimulationStatus::Finished;
            self.shared.notify_all();
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
