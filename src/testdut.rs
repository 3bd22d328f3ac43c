// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Toy design used by tests across the crate.
//!
//! A small counter-shaped toplevel: `clk` and `count` are driven by the
//! stimulus, `sum = count + 1` settles combinationally in the eval/commit
//! loop, `twice = 2 * count` is an outlined (computed-on-readout) item, and
//! `mem` is a 4-row memory. The design checks `count != 7` and prints when
//! `count == 3`, giving diagnostics something to chew on. `blk leaf` lives
//! in a nested scope with no scope record, covering lost-scope listings.

use crate::design::{DebugItems, DebugScope, DebugScopes, MetadataMap, MetadataValue, NodeFlags};
use crate::eval::{CheckKind, Performer, Toplevel};

#[derive(Default)]
pub(crate) struct TestDesign {
    count_path: String,
    sum_path: String,
    staged_sum: Option<u64>,
}

impl Toplevel for TestDesign {
    fn debug_info(&mut self, items: &mut DebugItems, scopes: Option<&mut DebugScopes>, top_path: &str) {
        let path = |name: &str| format!("{}{}", top_path, name);
        items.add_node(
            &path("clk"),
            1,
            0,
            NodeFlags { input: true, undriven: true, ..Default::default() },
        );
        items.add_node(&path("count"), 8, 0, NodeFlags { driven_sync: true, ..Default::default() });
        items.set_attr(&path("count"), "src", MetadataValue::String("counter.v:14".into()));
        items.set_attr(&path("count"), "init", MetadataValue::UnsignedInt(0));
        items.add_node(&path("sum"), 8, 0, NodeFlags { output: true, ..Default::default() });
        items.add_node(&path("twice"), 8, 0, NodeFlags::default());
        items.add_memory(&path("mem"), 8, 4, 0);
        items.add_node(&path("blk leaf"), 1, 0, NodeFlags::default());

        let count_at = items.offset_of(&path("count"));
        let twice_at = items.offset_of(&path("twice"));
        let outline = items.add_outline(move |slab| {
            slab[twice_at] = slab[count_at].wrapping_mul(2) & 0xff;
        });
        items.set_outline(&path("twice"), outline);

        if let Some(scopes) = scopes {
            if let Some(root) = top_path.strip_suffix(' ') {
                let mut module_attrs = MetadataMap::new();
                module_attrs.insert("src".into(), MetadataValue::String("counter.v:1".into()));
                scopes.add(
                    root,
                    DebugScope {
                        module_name: "counter".into(),
                        module_attrs,
                        cell_attrs: MetadataMap::new(),
                    },
                );
            }
        }

        // Cache the paths the evaluator touches every delta cycle.
        // (`debug_info` is the only place the prefix is known.)
        self.count_path = path("count");
        self.sum_path = path("sum");
    }

    fn eval(&mut self, items: &mut DebugItems, performer: &mut dyn Performer) {
        let count = items.get_u64(&self.count_path);
        self.staged_sum = Some((count + 1) & 0xff);

        let mut attrs = MetadataMap::new();
        attrs.insert("src".into(), MetadataValue::String("counter.v:21".into()));
        performer.on_check(
            CheckKind::Assert,
            count != 7,
            "count hit seven\n",
            &attrs,
        );
        if count == 3 {
            performer.on_print("count is three\n", &attrs);
        }
    }

    fn commit(&mut self, items: &mut DebugItems) -> bool {
        let Some(sum) = self.staged_sum.take() else { return false };
        if items.get_u64(&self.sum_path) != sum {
            items.set_u64(&self.sum_path, sum);
            true
        } else {
            false
        }
    }
}
