// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Peripheral event logs and input command scripts.
//!
//! Two JSON file schemas connect a simulation run to offline tooling:
//!
//! - the **event log**, `{"events": [{timestamp, peripheral, event,
//!   payload}, ...]}`, records what the peripheral models observed;
//! - the **input commands**, `{"commands": [{type: "action"|"wait",
//!   peripheral, event, payload}, ...]}`, replay stimulus into them.
//!
//! Playback is barrier-driven: actions are queued per peripheral up to the
//! next `wait`; when a logged event matches the head barrier, the barrier
//! passes and the following burst of actions is queued.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventsError {
    #[error("event log I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("malformed command file: {0}")]
    Json(#[from] serde_json::Error),
}

/// One recorded peripheral event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedEvent {
    pub timestamp: u64,
    pub peripheral: String,
    pub event: String,
    pub payload: Value,
}

/// One entry of an input command file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputCommand {
    /// Deliver stimulus to a peripheral.
    Action { peripheral: String, event: String, payload: Value },
    /// Hold back the following actions until this event is logged.
    Wait { peripheral: String, event: String, payload: Value },
}

#[derive(Debug, Deserialize)]
struct CommandFile {
    commands: Vec<InputCommand>,
}

/// A queued action, ready for a peripheral to consume.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub event: String,
    pub payload: Value,
}

/// Input command playback with wait barriers.
#[derive(Debug, Default)]
pub struct CommandScript {
    commands: Vec<InputCommand>,
    cursor: usize,
    queued: HashMap<String, Vec<Action>>,
}

impl CommandScript {
    pub fn new(commands: Vec<InputCommand>) -> CommandScript {
        let mut script = CommandScript { commands, cursor: 0, queued: HashMap::new() };
        script.fetch_into_queue();
        script
    }

    pub fn from_json(text: &str) -> Result<CommandScript, EventsError> {
        let file: CommandFile = serde_json::from_str(text)?;
        Ok(CommandScript::new(file.commands))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<CommandScript, EventsError> {
        let file: CommandFile = serde_json::from_reader(File::open(path)?)?;
        Ok(CommandScript::new(file.commands))
    }

    /// Queue every action up to the next wait barrier.
    fn fetch_into_queue(&mut self) {
        while let Some(InputCommand::Action { peripheral, event, payload }) =
            self.commands.get(self.cursor)
        {
            self.queued
                .entry(peripheral.clone())
                .or_default()
                .push(Action { event: event.clone(), payload: payload.clone() });
            self.cursor += 1;
        }
    }

    /// Feed a logged event through the head barrier. A match (peripheral,
    /// event and payload all equal) passes the barrier and queues the next
    /// burst of actions.
    pub fn observe(&mut self, peripheral: &str, event: &str, payload: &Value) {
        // `fetch_into_queue` never leaves the cursor on an action.
        if let Some(InputCommand::Wait { peripheral: p, event: e, payload: pl }) =
            self.commands.get(self.cursor)
        {
            if p == peripheral && e == event && pl == payload {
                self.cursor += 1;
                self.fetch_into_queue();
            }
        }
    }

    /// Drain the actions queued for `peripheral`.
    pub fn take_pending_actions(&mut self, peripheral: &str) -> Vec<Action> {
        self.queued.remove(peripheral).unwrap_or_default()
    }

    /// Number of commands not yet executed.
    pub fn remaining(&self) -> usize {
        self.commands.len() - self.cursor
    }
}

/// Destination for peripheral events; what the models write to.
pub trait EventSink {
    fn log_event(&mut self, timestamp: u64, peripheral: &str, event: &str, payload: Value);
    fn take_pending_actions(&mut self, peripheral: &str) -> Vec<Action>;
}

/// In-memory sink, mostly for tests and programmatic inspection.
impl EventSink for Vec<LoggedEvent> {
    fn log_event(&mut self, timestamp: u64, peripheral: &str, event: &str, payload: Value) {
        self.push(LoggedEvent {
            timestamp,
            peripheral: peripheral.to_string(),
            event: event.to_string(),
            payload,
        });
    }

    fn take_pending_actions(&mut self, _peripheral: &str) -> Vec<Action> {
        Vec::new()
    }
}

/// Streaming event log writer, optionally coupled to a [`CommandScript`]
/// whose barriers it feeds.
///
/// Events are written entry by entry rather than serialized wholesale at
/// the end, so a crashed simulation still leaves a readable prefix of the
/// log on disk.
pub struct EventLog<W: Write> {
    out: W,
    had_event: bool,
    script: Option<CommandScript>,
}

impl EventLog<BufWriter<File>> {
    pub fn create(path: impl AsRef<Path>) -> Result<EventLog<BufWriter<File>>, EventsError> {
        EventLog::new(BufWriter::new(File::create(path)?))
    }
}

impl<W: Write> EventLog<W> {
    pub fn new(mut out: W) -> Result<EventLog<W>, EventsError> {
        writeln!(out, "{{")?;
        writeln!(out, "\"events\": [")?;
        Ok(EventLog { out, had_event: false, script: None })
    }

    /// Couple an input command script; logged events drive its barriers.
    pub fn attach_script(&mut self, script: CommandScript) {
        self.script = Some(script);
    }

    /// Append one event and feed it through the attached script's barrier.
    pub fn log(
        &mut self,
        timestamp: u64,
        peripheral: &str,
        event: &str,
        payload: Value,
    ) -> Result<(), EventsError> {
        if self.had_event {
            writeln!(self.out, ",")?;
        }
        let entry = LoggedEvent {
            timestamp,
            peripheral: peripheral.to_string(),
            event: event.to_string(),
            payload,
        };
        let line = serde_json::to_string(&entry)?;
        write!(self.out, "{}", line)?;
        self.had_event = true;
        if let Some(script) = &mut self.script {
            script.observe(&entry.peripheral, &entry.event, &entry.payload);
        }
        Ok(())
    }

    /// Close the JSON structure and hand the writer back.
    pub fn finish(mut self) -> Result<W, EventsError> {
        writeln!(self.out)?;
        writeln!(self.out, "]")?;
        writeln!(self.out, "}}")?;
        self.out.flush()?;
        if let Some(script) = &self.script {
            if script.remaining() != 0 {
                clilog::warn!(
                    "not all input actions were executed ({} remain)",
                    script.remaining()
                );
            }
        }
        Ok(self.out)
    }
}

impl<W: Write> EventSink for EventLog<W> {
    fn log_event(&mut self, timestamp: u64, peripheral: &str, event: &str, payload: Value) {
        if let Err(err) = self.log(timestamp, peripheral, event, payload) {
            clilog::error!("failed to append to the event log: {}", err);
        }
    }

    fn take_pending_actions(&mut self, peripheral: &str) -> Vec<Action> {
        match &mut self.script {
            Some(script) => script.take_pending_actions(peripheral),
            None => Vec::new(),
        }
    }
}
