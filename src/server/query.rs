// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Timeline interval queries.
//!
//! The `query_interval` reply is by far the biggest the server sends, so
//! this path avoids overhead: readout goes straight from the value slab
//! into a reused chunk buffer, and the fast path skips rewinding entirely
//! when the debugger re-examines the point in time the player is already
//! parked on.

use std::collections::BTreeSet;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Map, Value};

use crate::design::{Chunk, DebugItems, MetadataMap, OutlineId, CHUNK_BITS};
use crate::eval::{src_of, CheckKind, Performer, Toplevel};
use crate::server::protocol::{build_error, ErrorCode};
use crate::spool::{Diagnostic, DiagnosticKind, Player};
use crate::time::TimePoint;

/// One selected item window inside a reference, resolved to slab storage.
#[derive(Debug, Clone)]
pub(crate) struct RefVariable {
    pub width: usize,
    pub chunks: usize,
    /// Word offset of row 0 in the slab.
    pub offset: usize,
    pub first_index: u64,
    pub last_index: u64,
}

/// A debugger-named selection of item windows plus the outlines that must
/// be refreshed before reading them out.
#[derive(Debug, Clone, Default)]
pub(crate) struct Reference {
    pub variables: Vec<RefVariable>,
    pub outlines: BTreeSet<OutlineId>,
}

/// Append the value of `var` (all rows of its window) to `out`, masking
/// the padding bits of each row's top chunk. The evaluator is allowed to
/// leave junk there to save an instruction or two.
fn read_variable(var: &RefVariable, items: &DebugItems, out: &mut Vec<Chunk>) {
    let words = items.words();
    let mut index = var.first_index;
    loop {
        let at = out.len();
        let from = var.offset + var.chunks * index as usize;
        out.extend_from_slice(&words[from..from + var.chunks]);
        if var.width % CHUNK_BITS != 0 {
            out[at + var.chunks - 1] &= Chunk::MAX >> (CHUNK_BITS - var.width % CHUNK_BITS);
        }
        if index == var.last_index {
            break;
        }
        index = if var.first_index < var.last_index { index + 1 } else { index - 1 };
    }
}

/// Encode the reference's current values as `base64(u32)`: all chunks in
/// reference order, concatenated as little-endian words.
pub(crate) fn encode_reference_values(
    reference: &Reference,
    items: &DebugItems,
    scratch: &mut Vec<Chunk>,
) -> String {
    scratch.clear();
    for var in &reference.variables {
        read_variable(var, items, scratch);
    }
    let mut bytes = Vec::with_capacity(scratch.len() * 4);
    for chunk in scratch.iter() {
        bytes.extend_from_slice(&chunk.to_le_bytes());
    }
    BASE64.encode(bytes)
}

fn build_diagnostic(kind: &str, text: &str, src: Value) -> Value {
    json!({
        "type": kind,
        "text": text,
        "src": src,
    })
}

/// Performer that collects live diagnostics emitted while the server
/// re-evaluates the toplevel during a query.
struct CollectingPerformer<'a> {
    sink: Option<&'a mut Vec<Value>>,
}

impl Performer for CollectingPerformer<'_> {
    fn on_print(&mut self, message: &str, attrs: &MetadataMap) {
        if let Some(sink) = self.sink.as_deref_mut() {
            sink.push(build_diagnostic("print", message, json!(src_of(attrs))));
        }
    }

    fn on_check(&mut self, kind: CheckKind, condition: bool, message: &str, attrs: &MetadataMap) {
        let Some(sink) = self.sink.as_deref_mut() else { return };
        if condition {
            return;
        }
        match kind {
            CheckKind::Assert => sink.push(build_diagnostic("assert", message, json!(src_of(attrs)))),
            CheckKind::Assume => sink.push(build_diagnostic("assume", message, json!(src_of(attrs)))),
            _ => {}
        }
    }
}

fn replayed_diagnostic(diagnostic: &Diagnostic) -> Value {
    let kind = match diagnostic.kind {
        DiagnosticKind::Break => "break",
        DiagnosticKind::Print => "print",
        DiagnosticKind::Assert => "assert",
        DiagnosticKind::Assume => "assume",
    };
    build_diagnostic(kind, &diagnostic.message, json!(diagnostic.src))
}

/// Execute `query_interval` over the closed interval `[begin, end]`.
///
/// Walks the spool from the latest sample at or before `begin`, emitting
/// one output sample per recorded sample (or per distinct timestamp when
/// `collapse` coalesces delta cycles), re-evaluating the toplevel at each
/// stop to refresh computed items and capture live diagnostics.
#[allow(clippy::too_many_arguments)]
pub(crate) fn query_interval<T: Toplevel>(
    player: &mut Player,
    toplevel: &mut T,
    items: &mut DebugItems,
    reference: Option<&Reference>,
    begin: TimePoint,
    end: TimePoint,
    collapse: bool,
    with_diagnostics: bool,
) -> Result<Value, Value> {
    let mut diagnostics: Vec<Diagnostic> = Vec::new();

    // When only item values at one point in time are wanted and the player
    // is already parked there, skip the rewind. This massively speeds up
    // repeated examination of the same point in time, as well as stepping
    // forward, regardless of when the last complete snapshot was taken.
    let parked = collapse
        && !with_diagnostics
        && player.current_time() == begin
        && player.get_next_time().is_some_and(|next| next > begin);
    if !parked {
        let collected = with_diagnostics.then_some(&mut diagnostics);
        if !player.rewind_to_or_before(begin, items, collected) {
            return Err(build_error(
                ErrorCode::InvalidArgs,
                "The interval begins before the first recorded sample.",
            ));
        }
    }

    let mut samples = Vec::new();
    let mut scratch: Vec<Chunk> = Vec::new();
    loop {
        if collapse {
            // Replay through every following sample that shares the current
            // timestamp; distinct delta cycles are wasted bandwidth for a
            // client that cannot display them.
            while player.get_next_time() == Some(player.current_time()) {
                let collected = with_diagnostics.then_some(&mut diagnostics);
                let replayed = player.replay(items, collected);
                debug_assert!(replayed);
            }
        }

        let mut sample = Map::new();
        sample.insert("time".into(), json!(player.current_time()));

        let mut sample_diagnostics: Vec<Value> =
            diagnostics.iter().map(replayed_diagnostic).collect();

        // Evaluate: refresh values of computed items and emit live
        // diagnostics for this point on the timeline.
        let mut performer =
            CollectingPerformer { sink: with_diagnostics.then_some(&mut sample_diagnostics) };
        toplevel.eval(items, &mut performer);

        if let Some(reference) = reference {
            for &outline in &reference.outlines {
                items.eval_outline(outline);
            }
            sample.insert(
                "item_values".into(),
                json!(encode_reference_values(reference, items, &mut scratch)),
            );
        }

        if with_diagnostics {
            sample.insert("diagnostics".into(), Value::Array(sample_diagnostics));
        }
        samples.push(Value::Object(sample));

        // Do not advance past the end of the interval; staying parked keeps
        // the next query of the same point fast.
        match player.get_next_time() {
            Some(next) if next <= end => {
                diagnostics.clear();
                let collected = with_diagnostics.then_some(&mut diagnostics);
                let replayed = player.replay(items, collected);
                debug_assert!(replayed);
            }
            _ => break,
        }
    }
    Ok(Value::Array(samples))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::NodeFlags;

    fn items_with(width: usize, value: u64) -> (DebugItems, Reference) {
        let mut items = DebugItems::new();
        items.add_node("top v", width, 0, NodeFlags::default());
        items.set_u64("top v", value);
        let item = items.get("top v").unwrap();
        let reference = Reference {
            variables: vec![RefVariable {
                width,
                chunks: item.chunks(),
                offset: 0,
                first_index: 0,
                last_index: 0,
            }],
            outlines: BTreeSet::new(),
        };
        (items, reference)
    }

    fn decode(encoded: &str) -> Vec<u8> {
        BASE64.decode(encoded).unwrap()
    }

    #[test]
    fn test_encode_single_chunk() {
        let (items, reference) = items_with(32, 0x0403_0201);
        let mut scratch = Vec::new();
        let encoded = encode_reference_values(&reference, &items, &mut scratch);
        assert_eq!(decode(&encoded), vec![0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_encode_masks_padding_bits() {
        // A 5-bit node whose top slab bits hold junk.
        let (mut items, reference) = items_with(5, 0);
        items.words_mut()[0] = 0xffff_ffff;
        let mut scratch = Vec::new();
        let encoded = encode_reference_values(&reference, &items, &mut scratch);
        assert_eq!(decode(&encoded), vec![0x1f, 0, 0, 0]);
    }

    #[test]
    fn test_encode_length_is_four_bytes_per_chunk() {
        for width in [1, 31, 32, 33, 64, 65] {
            let (items, reference) = items_with(width, 1);
            let mut scratch = Vec::new();
            let encoded = encode_reference_values(&reference, &items, &mut scratch);
            assert_eq!(decode(&encoded).len(), width.div_ceil(32) * 4, "width {}", width);
        }
    }

    #[test]
    fn test_encode_memory_window_direction() {
        let mut items = DebugItems::new();
        items.add_memory("top mem", 8, 4, 0);
        for row in 0..4 {
            items.set_u64_at("top mem", row, 0x10 + row as u64);
        }
        let item = items.get("top mem").unwrap();
        let forward = Reference {
            variables: vec![RefVariable {
                width: 8,
                chunks: item.chunks(),
                offset: 0,
                first_index: 1,
                last_index: 3,
            }],
            outlines: BTreeSet::new(),
        };
        let mut scratch = Vec::new();
        let bytes = decode(&encode_reference_values(&forward, &items, &mut scratch));
        assert_eq!(bytes.len(), 12);
        assert_eq!((bytes[0], bytes[4], bytes[8]), (0x11, 0x12, 0x13));

        let backward = Reference {
            variables: vec![RefVariable {
                width: 8,
                chunks: item.chunks(),
                offset: 0,
                first_index: 3,
                last_index: 1,
            }],
            outlines: BTreeSet::new(),
        };
        let bytes = decode(&encode_reference_values(&backward, &items, &mut scratch));
        assert_eq!((bytes[0], bytes[4], bytes[8]), (0x13, 0x12, 0x11));
    }

    #[test]
    fn test_encode_concatenates_variables_in_reference_order() {
        let mut items = DebugItems::new();
        items.add_node("top a", 8, 0, NodeFlags::default());
        items.add_node("top b", 8, 0, NodeFlags::default());
        items.set_u64("top a", 0xaa);
        items.set_u64("top b", 0xbb);
        let var = |name: &str| {
            let item = items.get(name).unwrap();
            RefVariable {
                width: 8,
                chunks: item.chunks(),
                offset: if name == "top a" { 0 } else { 1 },
                first_index: 0,
                last_index: 0,
            }
        };
        let reference = Reference {
            variables: vec![var("top b"), var("top a")],
            outlines: BTreeSet::new(),
        };
        let mut scratch = Vec::new();
        let bytes = decode(&encode_reference_values(&reference, &items, &mut scratch));
        assert_eq!((bytes[0], bytes[4]), (0xbb, 0xaa));
    }
}
