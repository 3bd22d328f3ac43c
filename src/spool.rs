// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Replayable sample spool.
//!
//! The spool is an append-only timeline of simulation samples: complete
//! snapshots of the value slab interleaved with incremental deltas, tagged
//! with weakly monotonic timestamps, plus diagnostics emitted at particular
//! times. The simulation side writes through a [`Recorder`]; the server side
//! reads through a [`Player`] that can rewind to any recorded time and step
//! forward sample by sample.
//!
//! Records become visible to the player only at [`Recorder::flush`]. The
//! agent flushes before publishing a pause, which is what makes "paused at
//! time t" imply "all samples up to t are readable".

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::design::{Chunk, DebugItems};
use crate::time::TimePoint;

// ── Diagnostics ─────────────────────────────────────────────────────────────

/// Kind of a recorded diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    Break,
    Print,
    Assert,
    Assume,
}

impl DiagnosticKind {
    fn bit(self) -> u32 {
        match self {
            DiagnosticKind::Break => 1 << 0,
            DiagnosticKind::Print => 1 << 1,
            DiagnosticKind::Assert => 1 << 2,
            DiagnosticKind::Assume => 1 << 3,
        }
    }

    /// Wire name of the kind.
    pub fn label(self) -> &'static str {
        match self {
            DiagnosticKind::Break => "break",
            DiagnosticKind::Print => "print",
            DiagnosticKind::Assert => "assert",
            DiagnosticKind::Assume => "assume",
        }
    }

    pub fn from_label(label: &str) -> Option<DiagnosticKind> {
        match label {
            "break" => Some(DiagnosticKind::Break),
            "print" => Some(DiagnosticKind::Print),
            "assert" => Some(DiagnosticKind::Assert),
            "assume" => Some(DiagnosticKind::Assume),
            _ => None,
        }
    }
}

/// Set of diagnostic kinds, used for "pause on these diagnostics" masks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagnosticSet(u32);

impl DiagnosticSet {
    pub const EMPTY: DiagnosticSet = DiagnosticSet(0);

    pub fn insert(&mut self, kind: DiagnosticKind) {
        self.0 |= kind.bit();
    }

    pub fn contains(self, kind: DiagnosticKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn intersects(self, other: DiagnosticSet) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl FromIterator<DiagnosticKind> for DiagnosticSet {
    fn from_iter<I: IntoIterator<Item = DiagnosticKind>>(iter: I) -> DiagnosticSet {
        let mut set = DiagnosticSet::EMPTY;
        for kind in iter {
            set.insert(kind);
        }
        set
    }
}

/// A diagnostic emitted during simulation: a rendered message plus the
/// source location it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    /// Source location, rendered `file:line`. Empty if unknown.
    pub src: String,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>, file: &str, line: u32) -> Diagnostic {
        Diagnostic { kind, message: message.into(), src: format!("{}:{}", file, line) }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}: {}", self.kind.label(), self.src, self.message)
    }
}

/// Expands to the current source location as `(file, line)` arguments for
/// the agent's diagnostic helpers.
#[macro_export]
macro_rules! here {
    () => {
        (file!(), line!())
    };
}

// ── Records ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Record {
    /// Full copy of the value slab.
    Complete { time: TimePoint, values: Vec<Chunk> },
    /// Changed slab words since the previous sample.
    Incremental { time: TimePoint, changes: Vec<(u32, Chunk)> },
    /// Diagnostic attached to the preceding sample.
    Diagnostic { diagnostic: Diagnostic },
}

impl Record {
    fn sample_time(&self) -> Option<TimePoint> {
        match self {
            Record::Complete { time, .. } | Record::Incremental { time, .. } => Some(*time),
            Record::Diagnostic { .. } => None,
        }
    }
}

#[derive(Default)]
struct SpoolShared {
    records: Mutex<Vec<Record>>,
}

/// Handle to a shared append-only timeline. Cloning is cheap; one clone
/// feeds a [`Recorder`], another feeds a [`Player`] on the server thread.
#[derive(Clone, Default)]
pub struct Spool {
    shared: Arc<SpoolShared>,
}

impl Spool {
    pub fn new() -> Spool {
        Spool::default()
    }

    pub fn recorder(&self) -> Recorder {
        Recorder {
            shared: self.shared.clone(),
            pending: Vec::new(),
            shadow: Vec::new(),
            latest_time: TimePoint::ZERO,
            started: false,
        }
    }

    pub fn player(&self) -> Player {
        Player {
            shared: self.shared.clone(),
            records: Vec::new(),
            samples: Vec::new(),
            completes: Vec::new(),
            cursor: None,
        }
    }
}

// ── Recorder ────────────────────────────────────────────────────────────────

/// Write end of the spool. Owned by the simulation thread.
pub struct Recorder {
    shared: Arc<SpoolShared>,
    pending: Vec<Record>,
    /// Copy of the slab as of the last recorded sample, for diffing.
    shadow: Vec<Chunk>,
    latest_time: TimePoint,
    started: bool,
}

impl Recorder {
    /// Bind the recorder to the design's value image. Must be called before
    /// any recording.
    pub fn start(&mut self, items: &DebugItems) {
        self.shadow = items.words().to_vec();
        self.started = true;
    }

    pub fn latest_time(&self) -> TimePoint {
        self.latest_time
    }

    /// Record a complete snapshot at the current time.
    pub fn record_complete(&mut self, items: &DebugItems) {
        assert!(self.started, "recorder not started");
        self.shadow.copy_from_slice(items.words());
        self.pending.push(Record::Complete { time: self.latest_time, values: self.shadow.clone() });
    }

    /// Record the slab words that changed since the last recorded sample.
    /// Returns false (and records nothing) if nothing changed, which doubles
    /// as the convergence signal for delta-cycle loops.
    pub fn record_incremental(&mut self, items: &DebugItems) -> bool {
        assert!(self.started, "recorder not started");
        let words = items.words();
        debug_assert_eq!(words.len(), self.shadow.len());
        let mut changes = Vec::new();
        for (index, (&now, then)) in words.iter().zip(self.shadow.iter_mut()).enumerate() {
            if now != *then {
                changes.push((index as u32, now));
                *then = now;
            }
        }
        if changes.is_empty() {
            return false;
        }
        self.pending.push(Record::Incremental { time: self.latest_time, changes });
        true
    }

    /// Record a diagnostic at the current time. It attaches to the most
    /// recently recorded sample.
    pub fn record_diagnostic(&mut self, diagnostic: Diagnostic) {
        self.pending.push(Record::Diagnostic { diagnostic });
    }

    /// Advance the timeline; subsequent samples carry the new timestamp.
    pub fn advance_time(&mut self, delta: TimePoint) -> TimePoint {
        self.latest_time += delta;
        self.latest_time
    }

    /// Publish all pending records to readers. Durability point: a status
    /// transition to paused must happen after this returns.
    pub fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let mut records = self.shared.records.lock().unwrap();
        records.append(&mut self.pending);
    }
}

// ── Player ──────────────────────────────────────────────────────────────────

/// Read end of the spool. Owned by the server thread; replays recorded
/// values into its own copy of the design's value slab.
pub struct Player {
    shared: Arc<SpoolShared>,
    /// Locally synced copy of the published records.
    records: Vec<Record>,
    /// Record indices of samples, in order.
    samples: Vec<usize>,
    /// Indices into `samples` of complete snapshots, in order.
    completes: Vec<usize>,
    /// Index into `samples` of the current position.
    cursor: Option<usize>,
}

impl Player {
    /// Pull newly published records into the local index.
    fn sync(&mut self) {
        let records = self.shared.records.lock().unwrap();
        while self.records.len() < records.len() {
            let record = records[self.records.len()].clone();
            if record.sample_time().is_some() {
                if matches!(record, Record::Complete { .. }) {
                    self.completes.push(self.samples.len());
                }
                self.samples.push(self.records.len());
            }
            self.records.push(record);
        }
    }

    /// Bind the player to the design's value image and position it on the
    /// first recorded sample. The writer must have flushed an initial
    /// complete snapshot by the time this is called.
    pub fn start(&mut self, items: &mut DebugItems) {
        self.sync();
        assert!(!self.samples.is_empty(), "player started before any sample was flushed");
        self.apply_sample(0, items);
        self.cursor = Some(0);
    }

    /// Timestamp of the sample the player is positioned on.
    pub fn current_time(&self) -> TimePoint {
        let at = self.cursor.expect("player not started");
        self.records[self.samples[at]].sample_time().unwrap()
    }

    /// Timestamp of the next recorded sample, if one exists.
    pub fn get_next_time(&mut self) -> Option<TimePoint> {
        self.sync();
        let at = self.cursor.expect("player not started");
        self.samples
            .get(at + 1)
            .and_then(|&index| self.records[index].sample_time())
    }

    /// Step forward one sample, applying its values to `items` and
    /// collecting its diagnostics. Returns false at the end of the timeline.
    pub fn replay(&mut self, items: &mut DebugItems, mut diagnostics: Option<&mut Vec<Diagnostic>>) -> bool {
        self.sync();
        let at = self.cursor.expect("player not started");
        if at + 1 >= self.samples.len() {
            return false;
        }
        self.apply_sample(at + 1, items);
        self.collect_diagnostics(at + 1, diagnostics.as_deref_mut());
        self.cursor = Some(at + 1);
        true
    }

    /// Reposition on the latest sample with timestamp ≤ `time`, rebuilding
    /// the value image from the nearest complete snapshot. Returns false if
    /// no such sample exists.
    pub fn rewind_to_or_before(
        &mut self,
        time: TimePoint,
        items: &mut DebugItems,
        mut diagnostics: Option<&mut Vec<Diagnostic>>,
    ) -> bool {
        self.sync();
        let target = self
            .samples
            .partition_point(|&index| self.records[index].sample_time().unwrap() <= time);
        if target == 0 {
            return false;
        }
        let target = target - 1;
        // Latest complete snapshot at or before the target sample.
        let base = match self.completes.partition_point(|&sample| sample <= target) {
            0 => {
                // The first sample is always a complete snapshot.
                debug_assert!(false, "no complete snapshot precedes sample {}", target);
                return false;
            }
            n => self.completes[n - 1],
        };
        for sample in base..=target {
            self.apply_sample(sample, items);
        }
        self.collect_diagnostics(target, diagnostics.as_deref_mut());
        self.cursor = Some(target);
        true
    }

    fn apply_sample(&self, sample: usize, items: &mut DebugItems) {
        let slab = items.words_mut();
        match &self.records[self.samples[sample]] {
            Record::Complete { values, .. } => {
                debug_assert_eq!(values.len(), slab.len());
                slab.copy_from_slice(values);
            }
            Record::Incremental { changes, .. } => {
                for &(index, value) in changes {
                    slab[index as usize] = value;
                }
            }
            Record::Diagnostic { .. } => unreachable!("sample index points at a diagnostic"),
        }
    }

    /// Collect the diagnostics recorded after `sample` and before the next
    /// sample.
    fn collect_diagnostics(&self, sample: usize, diagnostics: Option<&mut Vec<Diagnostic>>) {
        let Some(out) = diagnostics else { return };
        let from = self.samples[sample] + 1;
        let to = self.samples.get(sample + 1).copied().unwrap_or(self.records.len());
        for record in &self.records[from..to] {
            if let Record::Diagnostic { diagnostic } = record {
                out.push(diagnostic.clone());
            }
        }
    }
}
