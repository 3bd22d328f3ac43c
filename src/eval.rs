// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Contract between this library and the cycle evaluator.
//!
//! The simulation kernel itself lives elsewhere; it plugs in through
//! [`Toplevel`], which exposes exactly what the recorder and the debug
//! server need: a description of the design's debug surface, and
//! evaluate/commit over the shared value slab. User stimulus observes
//! prints and checks through a [`Performer`].

use crate::design::{DebugItems, DebugScopes, MetadataMap, MetadataValue};

/// Flavor of a check reported through [`Performer::on_check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckKind {
    Assert,
    Assume,
    AssertEventually,
    AssumeEventually,
    Cover,
}

/// Callback family invoked by the evaluator for non-synthesizable
/// observations. All methods default to ignoring the call.
pub trait Performer {
    /// A `$display`-style print was executed.
    fn on_print(&mut self, message: &str, attrs: &MetadataMap) {
        let _ = (message, attrs);
    }

    /// A check was evaluated; `condition` is its outcome.
    fn on_check(&mut self, kind: CheckKind, condition: bool, message: &str, attrs: &MetadataMap) {
        let _ = (kind, condition, message, attrs);
    }
}

/// Performer that reports failed asserts and assumes on standard error and
/// otherwise keeps going. Unlike a bare evaluator run, a failed check under
/// the debug agent must not abort the process; it gets recorded instead.
#[derive(Debug, Default)]
pub struct StderrPerformer;

impl Performer for StderrPerformer {
    fn on_check(&mut self, kind: CheckKind, condition: bool, message: &str, _attrs: &MetadataMap) {
        if matches!(kind, CheckKind::Assert | CheckKind::Assume) && !condition {
            eprint!("{}", message);
        }
    }
}

/// The toplevel of a simulated design.
///
/// Implementations own their internal evaluator state; all debug-visible
/// state lives in the [`DebugItems`] slab that `debug_info` populates. The
/// same type backs two instances at runtime: the agent's (driven forward by
/// the stimulus) and the server's (rebuilt from the replay spool).
pub trait Toplevel: Send + 'static {
    /// Describe the design: register every item (and scope, when a scope
    /// table is given) under `top_path`. `top_path` is either empty or ends
    /// with the hierarchical separator. Called once per instance, before
    /// any `eval`; implementations may cache path lookups here.
    fn debug_info(&mut self, items: &mut DebugItems, scopes: Option<&mut DebugScopes>, top_path: &str);

    /// Evaluate combinational logic once, reading and staging against the
    /// slab; report prints and checks to `performer`.
    fn eval(&mut self, items: &mut DebugItems, performer: &mut dyn Performer);

    /// Commit staged state into the slab. Returns true if anything changed,
    /// i.e. another delta cycle is needed.
    fn commit(&mut self, items: &mut DebugItems) -> bool;
}

/// Fetch the `src` attribute if it is a string.
pub(crate) fn src_of(attrs: &MetadataMap) -> Option<&str> {
    attrs.get("src").and_then(MetadataValue::as_str)
}
