// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Read-only debug model of a simulated design.
//!
//! The model describes the design's *items* (scalar nodes and memories) and
//! *scopes* (module instances), keyed by hierarchical path. Paths use a
//! single space as the separator (`"top cpu regs"`). Item values live in one
//! contiguous `u32` slab owned by [`DebugItems`]; the spool diffs and
//! replays that slab, and evaluators read and write it through the typed
//! accessors.

use std::collections::BTreeMap;

use compact_str::CompactString;

/// Machine word used to pack signal bits.
pub type Chunk = u32;

/// Bit width of a [`Chunk`].
pub const CHUNK_BITS: usize = 32;

/// Number of chunks needed to hold `width` bits.
pub fn chunks_for(width: usize) -> usize {
    width.div_ceil(CHUNK_BITS)
}

/// Hierarchical path separator.
pub const PATH_SEPARATOR: char = ' ';

// ── Attributes ──────────────────────────────────────────────────────────────

/// A typed attribute value attached to an item or scope.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    UnsignedInt(u64),
    SignedInt(i64),
    String(String),
    Double(f64),
}

impl MetadataValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Attribute map, ordered by attribute name.
pub type MetadataMap = BTreeMap<CompactString, MetadataValue>;

// ── Items ───────────────────────────────────────────────────────────────────

/// Kind of a debug item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    /// A scalar signal.
    Node,
    /// An addressable array of rows.
    Memory,
}

/// Driver flags of a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeFlags {
    pub input: bool,
    pub output: bool,
    pub driven_sync: bool,
    pub undriven: bool,
}

/// Handle to a registered outline (see [`DebugItems::add_outline`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OutlineId(usize);

/// A named signal or memory in the design.
#[derive(Debug)]
pub struct DebugItem {
    pub kind: ItemKind,
    /// Width of one row, in bits.
    pub width: usize,
    pub lsb_at: usize,
    /// Number of rows; 1 for nodes.
    pub depth: usize,
    pub zero_at: usize,
    pub flags: NodeFlags,
    pub attrs: MetadataMap,
    /// Recompute-before-readout handle, if this item's value is derived.
    pub outline: Option<OutlineId>,
    /// Word offset of this item's value in the slab.
    pub(crate) offset: usize,
}

impl DebugItem {
    /// Chunks per row.
    pub fn chunks(&self) -> usize {
        chunks_for(self.width)
    }

    pub fn is_memory(&self) -> bool {
        self.kind == ItemKind::Memory
    }

    /// Whether a debugger may set this item's value.
    ///
    /// Memories are always settable. For nodes this is a first
    /// approximation: synchronously driven parts can be overridden at the
    /// next clock edge, and undriven inputs are free for the taking. Inputs
    /// deep in the hierarchy are not necessarily undriven, so this can
    /// misclassify; the protocol documents the field as advisory.
    pub fn settable(&self) -> bool {
        match self.kind {
            ItemKind::Memory => true,
            ItemKind::Node => {
                self.flags.driven_sync || (self.flags.undriven && self.flags.input)
            }
        }
    }
}

/// Recomputation callback refreshing derived item values in the slab.
pub struct Outline {
    eval: Box<dyn FnMut(&mut [Chunk]) + Send>,
}

/// Item table plus the value slab backing every item.
///
/// Iteration is sorted by path, which puts all items of one scope in a
/// contiguous run; the scope listing relies on this.
#[derive(Default)]
pub struct DebugItems {
    table: BTreeMap<CompactString, DebugItem>,
    slab: Vec<Chunk>,
    outlines: Vec<Outline>,
}

impl DebugItems {
    pub fn new() -> DebugItems {
        DebugItems::default()
    }

    /// Register a scalar node under `path`.
    pub fn add_node(&mut self, path: &str, width: usize, lsb_at: usize, flags: NodeFlags) {
        self.insert(path, ItemKind::Node, width, lsb_at, 1, 0, flags);
    }

    /// Register a memory of `depth` rows under `path`.
    pub fn add_memory(&mut self, path: &str, width: usize, depth: usize, zero_at: usize) {
        assert!(depth > 0, "memory {} must have at least one row", path);
        self.insert(path, ItemKind::Memory, width, 0, depth, zero_at, NodeFlags::default());
    }

    fn insert(
        &mut self,
        path: &str,
        kind: ItemKind,
        width: usize,
        lsb_at: usize,
        depth: usize,
        zero_at: usize,
        flags: NodeFlags,
    ) {
        let offset = self.slab.len();
        self.slab.resize(offset + chunks_for(width) * depth, 0);
        let prev = self.table.insert(
            CompactString::from(path),
            DebugItem {
                kind,
                width,
                lsb_at,
                depth,
                zero_at,
                flags,
                attrs: MetadataMap::new(),
                outline: None,
                offset,
            },
        );
        assert!(prev.is_none(), "duplicate debug item {}", path);
    }

    /// Attach an attribute to a registered item.
    pub fn set_attr(&mut self, path: &str, name: &str, value: MetadataValue) {
        let item = self.table.get_mut(path).expect("no such debug item");
        item.attrs.insert(CompactString::from(name), value);
    }

    /// Register an outline and return its handle. The callback receives the
    /// whole slab and must refresh the values of the items attached to it.
    pub fn add_outline(&mut self, eval: impl FnMut(&mut [Chunk]) + Send + 'static) -> OutlineId {
        self.outlines.push(Outline { eval: Box::new(eval) });
        OutlineId(self.outlines.len() - 1)
    }

    /// Mark a registered item as computed by `outline`.
    pub fn set_outline(&mut self, path: &str, outline: OutlineId) {
        let item = self.table.get_mut(path).expect("no such debug item");
        item.outline = Some(outline);
    }

    /// Run one outline over the slab.
    pub fn eval_outline(&mut self, id: OutlineId) {
        let outline = &mut self.outlines[id.0];
        (outline.eval)(&mut self.slab);
    }

    pub fn get(&self, path: &str) -> Option<&DebugItem> {
        self.table.get(path)
    }

    /// Word offset of the item's row 0 in the slab. Outline callbacks
    /// receive the raw slab and address values through these offsets.
    pub fn offset_of(&self, path: &str) -> usize {
        self.table.get(path).expect("no such debug item").offset
    }

    pub fn contains(&self, path: &str) -> bool {
        self.table.contains_key(path)
    }

    /// Items in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &DebugItem)> {
        self.table.iter().map(|(name, item)| (name.as_str(), item))
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// The canonical value image. The spool records and replays this.
    pub fn words(&self) -> &[Chunk] {
        &self.slab
    }

    pub(crate) fn words_mut(&mut self) -> &mut [Chunk] {
        &mut self.slab
    }

    /// Value chunks of row `index` of the item at `path`.
    pub fn value(&self, path: &str, index: usize) -> &[Chunk] {
        let item = self.table.get(path).expect("no such debug item");
        assert!(index < item.depth, "row {} out of range for {}", index, path);
        let chunks = item.chunks();
        let at = item.offset + chunks * index;
        &self.slab[at..at + chunks]
    }

    /// Read row 0 of a node or memory as a `u64` (width ≤ 64).
    pub fn get_u64(&self, path: &str) -> u64 {
        self.get_u64_at(path, 0)
    }

    pub fn get_u64_at(&self, path: &str, index: usize) -> u64 {
        let value = self.value(path, index);
        let mut out = 0u64;
        for (i, &word) in value.iter().take(2).enumerate() {
            out |= (word as u64) << (i * CHUNK_BITS);
        }
        out
    }

    /// Write row 0, masking to the item's width.
    pub fn set_u64(&mut self, path: &str, value: u64) {
        self.set_u64_at(path, 0, value);
    }

    pub fn set_u64_at(&mut self, path: &str, index: usize, value: u64) {
        let item = self.table.get(path).expect("no such debug item");
        assert!(index < item.depth, "row {} out of range for {}", index, path);
        let chunks = item.chunks();
        let width = item.width;
        let at = item.offset + chunks * index;
        let mut rest = if width < 64 && width > 0 {
            value & (u64::MAX >> (64 - width))
        } else {
            value
        };
        for word in self.slab[at..at + chunks].iter_mut() {
            *word = rest as Chunk;
            rest >>= CHUNK_BITS;
        }
    }
}

// ── Scopes ──────────────────────────────────────────────────────────────────

/// Description of one module instantiation.
#[derive(Debug, Clone, Default)]
pub struct DebugScope {
    /// Name of the module this scope instantiates.
    pub module_name: String,
    /// Attributes of the module definition.
    pub module_attrs: MetadataMap,
    /// Attributes of the instantiating cell.
    pub cell_attrs: MetadataMap,
}

/// Scope table. Scopes can be missing for items (e.g. flattened designs);
/// listings emit null descriptors for those.
#[derive(Default)]
pub struct DebugScopes {
    table: BTreeMap<CompactString, DebugScope>,
}

impl DebugScopes {
    pub fn new() -> DebugScopes {
        DebugScopes::default()
    }

    pub fn add(&mut self, path: &str, scope: DebugScope) {
        self.table.insert(CompactString::from(path), scope);
    }

    pub fn get(&self, path: &str) -> Option<&DebugScope> {
        self.table.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.table.contains_key(path)
    }
}

/// Scope prefix of an item path: everything before the last separator, or
/// `""` for root-level items.
pub fn scope_of(path: &str) -> &str {
    match path.rfind(PATH_SEPARATOR) {
        Some(pos) => &path[..pos],
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_items() -> DebugItems {
        let mut items = DebugItems::new();
        items.add_node(
            "top clk",
            1,
            0,
            NodeFlags { input: true, undriven: true, ..Default::default() },
        );
        items.add_node(
            "top count",
            40,
            0,
            NodeFlags { driven_sync: true, ..Default::default() },
        );
        items.add_node("top sum", 8, 0, NodeFlags { output: true, ..Default::default() });
        items.add_memory("top mem", 12, 4, 0);
        items
    }

    #[test]
    fn test_settable_derivation() {
        let items = sample_items();
        // undriven input
        assert!(items.get("top clk").unwrap().settable());
        // synchronously driven
        assert!(items.get("top count").unwrap().settable());
        // plain output
        assert!(!items.get("top sum").unwrap().settable());
        // memories always
        assert!(items.get("top mem").unwrap().settable());
    }

    #[test]
    fn test_slab_layout() {
        let items = sample_items();
        // 1 + 2 + 1 chunks for the nodes, 1 * 4 for the memory
        assert_eq!(items.words().len(), 8);
        assert_eq!(items.get("top count").unwrap().chunks(), 2);
        assert_eq!(items.value("top mem", 3).len(), 1);
    }

    #[test]
    fn test_u64_access_masks_to_width() {
        let mut items = sample_items();
        items.set_u64("top count", u64::MAX);
        assert_eq!(items.get_u64("top count"), (1u64 << 40) - 1);
        items.set_u64("top sum", 0x1ff);
        assert_eq!(items.get_u64("top sum"), 0xff);
        items.set_u64_at("top mem", 2, 0xffff);
        assert_eq!(items.get_u64_at("top mem", 2), 0xfff);
        assert_eq!(items.get_u64_at("top mem", 1), 0);
    }

    #[test]
    fn test_outline_refresh() {
        let mut items = sample_items();
        items.set_u64("top count", 7);
        let count_at = items.get("top count").unwrap().offset;
        let sum_at = items.get("top sum").unwrap().offset;
        let id = items.add_outline(move |slab| {
            slab[sum_at] = slab[count_at].wrapping_mul(2) & 0xff;
        });
        items.set_outline("top sum", id);
        assert_eq!(items.get("top sum").unwrap().outline, Some(id));
        items.eval_outline(id);
        assert_eq!(items.get_u64("top sum"), 14);
    }

    #[test]
    fn test_scope_of() {
        assert_eq!(scope_of("top cpu regs x1"), "top cpu regs");
        assert_eq!(scope_of("top"), "");
        assert_eq!(scope_of(""), "");
    }

    #[test]
    fn test_iteration_is_path_sorted() {
        let items = sample_items();
        let names: Vec<&str> = items.iter().map(|(name, _)| name).collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);
    }
}
