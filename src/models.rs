// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Clocked peripheral helpers.
//!
//! Peripheral models are simple state machines stepped once per simulation
//! tick against the design's debug items; they consume queued actions from
//! an [`EventSink`]'s script and log what they observe back into it. This
//! module carries the step contract and the two models test harnesses lean
//! on; fuller models (SPI flash, I²C, hyperram) live with the harnesses
//! that need them.

use serde_json::json;

use crate::design::DebugItems;
use crate::events::EventSink;

/// A peripheral model attached to items of the simulated design.
pub trait Peripheral {
    /// Advance the model by one tick: read the design's outputs, drive its
    /// inputs, consume pending actions and log events.
    fn step(&mut self, timestamp: u64, items: &mut DebugItems, io: &mut dyn EventSink);
}

// ── GPIO ────────────────────────────────────────────────────────────────────

/// GPIO bank model: resolves output/enable pairs against externally driven
/// input bits, logs every pad-level change, and accepts `set` actions whose
/// payload is a binary string, MSB first.
pub struct Gpio {
    name: String,
    pin_count: usize,
    o_path: String,
    oe_path: String,
    i_path: String,
    input_data: u64,
    o_last: u64,
    oe_last: u64,
}

impl Gpio {
    /// `o`, `oe` and `i` name the output, output-enable and input items of
    /// the bank.
    pub fn new(name: &str, pin_count: usize, o: &str, oe: &str, i: &str) -> Gpio {
        assert!(pin_count <= 64);
        Gpio {
            name: name.to_string(),
            pin_count,
            o_path: o.to_string(),
            oe_path: oe.to_string(),
            i_path: i.to_string(),
            input_data: 0,
            o_last: 0,
            oe_last: 0,
        }
    }

    /// Pad state rendered MSB first: driven pins show their level, others
    /// show `Z`.
    fn format_pads(&self, o: u64, oe: u64) -> String {
        (0..self.pin_count)
            .rev()
            .map(|pin| {
                if oe & (1 << pin) != 0 {
                    if o & (1 << pin) != 0 {
                        '1'
                    } else {
                        '0'
                    }
                } else {
                    'Z'
                }
            })
            .collect()
    }
}

impl Peripheral for Gpio {
    fn step(&mut self, timestamp: u64, items: &mut DebugItems, io: &mut dyn EventSink) {
        let o = items.get_u64(&self.o_path);
        let oe = items.get_u64(&self.oe_path);

        for action in io.take_pending_actions(&self.name) {
            if action.event == "set" {
                let Some(bits) = action.payload.as_str() else { continue };
                self.input_data = 0;
                for (pin, bit) in bits.chars().rev().take(self.pin_count).enumerate() {
                    if bit == '1' {
                        self.input_data |= 1 << pin;
                    }
                }
            }
        }

        if o != self.o_last || oe != self.oe_last {
            io.log_event(timestamp, &self.name, "change", json!(self.format_pads(o, oe)));
        }

        items.set_u64(&self.i_path, (self.input_data & !oe) | (o & oe));
        self.o_last = o;
        self.oe_last = oe;
    }
}

// ── UART ────────────────────────────────────────────────────────────────────

/// UART model: decodes the design's 8N1 TX line into `tx` byte events, and
/// serializes `tx` actions onto the design's RX line.
pub struct Uart {
    name: String,
    tx_path: String,
    rx_path: String,
    baud_div: u64,
    // Receive (design TX) state.
    tx_last: bool,
    rx_counter: u64,
    rx_sr: u8,
    // Transmit (design RX) state.
    tx_active: bool,
    tx_counter: u64,
    tx_data: u8,
}

impl Uart {
    /// `baud_div` is the number of ticks per bit, e.g. clock / baud rate.
    pub fn new(name: &str, tx: &str, rx: &str, baud_div: u64) -> Uart {
        assert!(baud_div >= 2);
        Uart {
            name: name.to_string(),
            tx_path: tx.to_string(),
            rx_path: rx.to_string(),
            baud_div,
            tx_last: true,
            rx_counter: 0,
            rx_sr: 0,
            tx_active: false,
            tx_counter: 0,
            tx_data: 0,
        }
    }
}

impl Peripheral for Uart {
    fn step(&mut self, timestamp: u64, items: &mut DebugItems, io: &mut dyn EventSink) {
        let tx = items.get_u64(&self.tx_path) & 1 != 0;

        for action in io.take_pending_actions(&self.name) {
            if action.event == "tx" {
                self.tx_active = true;
                self.tx_counter = 0;
                self.tx_data = action.payload.as_u64().unwrap_or(0) as u8;
            }
        }

        // Decode the design's TX line, sampling at bit centers.
        if self.rx_counter == 0 {
            if self.tx_last && !tx {
                self.rx_counter = 1;
            }
        } else {
            self.rx_counter += 1;
            let half = self.baud_div / 2;
            if self.rx_counter > half && (self.rx_counter - half) % self.baud_div == 0 {
                let bit = (self.rx_counter - half) / self.baud_div;
                if (1..=8).contains(&bit) {
                    self.rx_sr = (if tx { 0x80 } else { 0x00 }) | (self.rx_sr >> 1);
                }
                if bit == 8 {
                    io.log_event(timestamp, &self.name, "tx", json!(self.rx_sr));
                }
                if bit == 9 {
                    self.rx_counter = 0;
                }
            }
        }
        self.tx_last = tx;

        // Serialize the queued byte onto the design's RX line.
        if self.tx_active {
            self.tx_counter += 1;
            let bit = self.tx_counter / self.baud_div;
            match bit {
                0 => items.set_u64(&self.rx_path, 0),
                1..=8 => items.set_u64(&self.rx_path, ((self.tx_data >> (bit - 1)) & 1) as u64),
                9 => items.set_u64(&self.rx_path, 1),
                _ => self.tx_active = false,
            }
        } else {
            self.tx_counter = 0;
            items.set_u64(&self.rx_path, 1);
        }
    }
}
