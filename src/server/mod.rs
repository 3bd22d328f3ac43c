// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Debug server.
//!
//! Exposes a running simulation over the CXXRTL debug protocol
//! (<https://cxxrtl.org/protocol.html>): JSON packets, NUL framing, carried
//! by an abstract [`transport::Link`]. The server runs on its own thread,
//! owns a rebuilt copy of the design's debug model, and answers listing,
//! reference and timeline queries against the replay spool while the agent
//! keeps recording on the simulation thread.

pub mod protocol;
pub(crate) mod query;
pub mod state;
pub mod transport;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use serde_json::{json, Map, Value};

use crate::design::{scope_of, DebugItems, DebugScope, DebugScopes, PATH_SEPARATOR};
use crate::eval::Toplevel;
use crate::spool::{Player, Spool};
use crate::time::TimePoint;

use protocol::{
    build_error, build_event_simulation_finished, build_event_simulation_paused, build_greeting,
    build_response, build_response_list_items, build_response_list_scopes, parse_command,
    parse_command_name, parse_greeting, parse_packet, Command, Designator, ErrorCode,
};
use query::{query_interval, RefVariable, Reference};
use state::{SharedState, SimulationStatus};
use transport::Link;

/// Main-loop poll timeout. Bounds the latency of event emission when no
/// packets are arriving.
const POLL_TIMEOUT: Duration = Duration::from_millis(200);

/// One debug protocol session over one link.
pub struct Server<L: Link, T: Toplevel> {
    shared: Arc<SharedState>,

    // Link state.
    link: L,
    got_greeting: bool,
    emit_simulation_paused: bool,
    emit_simulation_finished: bool,

    // Simulation state, rebuilt from the spool.
    toplevel: T,
    items: DebugItems,
    scopes: DebugScopes,
    player: Player,

    // Protocol state.
    references: IndexMap<String, Reference>,
}

impl<L: Link, T: Toplevel + Default> Server<L, T> {
    pub(crate) fn new(shared: Arc<SharedState>, spool: Spool, link: L, top_path: &str) -> Server<L, T> {
        assert!(
            top_path.is_empty() || top_path.ends_with(PATH_SEPARATOR),
            "top path must be empty or end with a space"
        );
        let mut toplevel = T::default();
        let mut items = DebugItems::new();
        let mut scopes = DebugScopes::new();
        toplevel.debug_info(&mut items, Some(&mut scopes), top_path);
        let mut player = spool.player();
        player.start(&mut items);
        Server {
            shared,
            link,
            got_greeting: false,
            emit_simulation_paused: false,
            emit_simulation_finished: false,
            toplevel,
            items,
            scopes,
            player,
            references: IndexMap::new(),
        }
    }

    /// Entry point for the server thread: waits for the agent to capture
    /// the initial state, then serves the link until it fails.
    pub fn start(shared: Arc<SharedState>, spool: Spool, link: L, top_path: String) {
        {
            let guard = shared.lock();
            shared.wait_while(guard, |s| s.status != SimulationStatus::Initializing);
        }
        Server::<L, T>::new(shared, spool, link, &top_path).run();
    }

    /// Handle packets until an I/O error occurs.
    pub fn run(&mut self) {
        while self.link.poll(POLL_TIMEOUT) {
            // Drain complete packets; every processed packet immediately
            // produces one reply, errors included.
            while let Some(packet) = self.link.recv_packet() {
                clilog::debug!("C>S: {}", packet);
                let reply = self.process_packet(&packet);
                self.send(reply);
            }
            self.emit_pending_events();
        }
        clilog::error!(
            "debug server encountered an I/O error '{}'; exiting",
            self.link.poll_error()
        );
    }

    fn send(&mut self, packet: Value) {
        let raw = packet.to_string();
        clilog::debug!("S>C: {}", raw);
        self.link.send_packet(&raw);
    }

    /// Emit latched events once the agent has actually transitioned.
    fn emit_pending_events(&mut self) {
        let mut events = Vec::new();
        {
            let guard = self.shared.lock();
            if self.emit_simulation_paused && guard.status == SimulationStatus::Paused {
                self.emit_simulation_paused = false;
                events.push(build_event_simulation_paused(guard.latest_time, guard.cause));
            }
            if self.emit_simulation_finished && guard.status == SimulationStatus::Finished {
                self.emit_simulation_finished = false;
                events.push(build_event_simulation_finished(guard.latest_time));
            }
        }
        for event in events {
            self.send(event);
        }
    }

    /// Parse and dispatch one packet, returning the reply packet.
    pub(crate) fn process_packet(&mut self, raw: &str) -> Value {
        let packet: Value = match serde_json::from_str(raw) {
            Ok(packet) => packet,
            Err(_) => {
                return build_error(ErrorCode::InvalidJson, "The received JSON could not be parsed.")
            }
        };
        let (kind, mut rest) = match parse_packet(packet) {
            Ok(parsed) => parsed,
            Err(error) => return error,
        };
        match kind.as_str() {
            "greeting" => match parse_greeting(rest) {
                Ok(()) => {
                    self.got_greeting = true;
                    build_greeting()
                }
                Err(error) => error,
            },
            "command" => {
                if !self.got_greeting {
                    return build_error(
                        ErrorCode::ProtocolError,
                        "A command was received before greetings were exchanged.",
                    );
                }
                let name = match parse_command_name(&mut rest) {
                    Ok(name) => name,
                    Err(error) => return error,
                };
                let command =
                    match parse_command(&name, rest, |name| self.references.contains_key(name)) {
                        Ok(command) => command,
                        Err(error) => return error,
                    };
                self.perform(command)
            }
            _ => build_error(ErrorCode::InvalidPacket, "The received packet has an unrecognized type."),
        }
    }

    fn perform(&mut self, command: Command) -> Value {
        match command {
            Command::ListScopes { all, scope } => self.perform_list_scopes(all, &scope),
            Command::ListItems { all, scope } => self.perform_list_items(all, &scope),
            Command::ReferenceItems { reference, erase, designators } => {
                self.perform_reference_items(reference, erase, designators)
            }
            Command::QueryInterval { begin, end, collapse, items, diagnostics } => {
                self.perform_query_interval(begin, end, collapse, items.as_deref(), diagnostics)
            }
            Command::GetSimulationStatus => self.perform_get_simulation_status(),
            Command::RunSimulation { until_time, until_diagnostics } => {
                self.perform_run_simulation(until_time, until_diagnostics)
            }
            Command::PauseSimulation => self.perform_pause_simulation(),
        }
    }

    /// Whether `candidate` is selected by the `scope` argument: null picks
    /// everything, `""` picks root scopes, anything else picks scopes whose
    /// parent is exactly the given path.
    fn scope_selected(all: bool, scope: &str, candidate: &str) -> bool {
        all || (scope.is_empty() && !candidate.contains(PATH_SEPARATOR))
            || (!scope.is_empty()
                && candidate.contains(PATH_SEPARATOR)
                && scope_of(candidate) == scope)
    }

    fn perform_list_scopes(&self, all: bool, scope: &str) -> Value {
        let mut selected: BTreeMap<&str, Option<&DebugScope>> = BTreeMap::new();
        // All items of one scope sit in one contiguous run of the sorted
        // item table, so collapsing runs enumerates each scope once.
        let mut current_scope: Option<&str> = None;
        for (name, _) in self.items.iter() {
            let item_scope = scope_of(name);
            if Some(item_scope) == current_scope {
                continue;
            }
            if Self::scope_selected(all, scope, item_scope) {
                selected.insert(item_scope, self.scopes.get(item_scope));
            }
            current_scope = Some(item_scope);
        }
        build_response_list_scopes(selected)
    }

    fn perform_list_items(&self, all: bool, scope: &str) -> Value {
        let names = self
            .items
            .iter()
            .map(|(name, _)| name)
            .filter(|&name| Self::scope_selected(all, scope, name));
        build_response_list_items(names, &self.items)
    }

    fn perform_reference_items(
        &mut self,
        reference: String,
        erase: bool,
        designators: Vec<Designator>,
    ) -> Value {
        if erase {
            self.references.swap_remove(&reference);
            return build_response("reference_items", Map::new());
        }
        let mut resolved = Reference::default();
        for designator in designators {
            let Some(item) = self.items.get(&designator.name) else {
                return build_error(
                    ErrorCode::ItemNotFound,
                    &format!("The item `{}` is not present in the simulation.", designator.name),
                );
            };
            if designator.indexed && !item.is_memory() {
                return build_error(
                    ErrorCode::WrongItemType,
                    &format!("The item `{}` is referenced as a memory but is a node.", designator.name),
                );
            }
            if !designator.indexed && item.is_memory() {
                return build_error(
                    ErrorCode::WrongItemType,
                    &format!("The item `{}` is referenced as a node but is a memory.", designator.name),
                );
            }
            if designator.first_index >= item.depth as u64 || designator.last_index >= item.depth as u64 {
                return build_error(
                    ErrorCode::InvalidArgs,
                    &format!("The indices for the item `{}` are out of range.", designator.name),
                );
            }
            resolved.variables.push(RefVariable {
                width: item.width,
                chunks: item.chunks(),
                offset: item.offset,
                first_index: designator.first_index,
                last_index: designator.last_index,
            });
            if let Some(outline) = item.outline {
                resolved.outlines.insert(outline);
            }
        }
        // Replace atomically: a failed designator above leaves any previous
        // reference of this name untouched.
        self.references.insert(reference, resolved);
        build_response("reference_items", Map::new())
    }

    fn perform_query_interval(
        &mut self,
        begin: TimePoint,
        end: TimePoint,
        collapse: bool,
        items_reference: Option<&str>,
        diagnostics: bool,
    ) -> Value {
        let reference = items_reference.map(|name| {
            self.references
                .get(name)
                .expect("reference existence was checked during parsing")
        });
        let samples = query_interval(
            &mut self.player,
            &mut self.toplevel,
            &mut self.items,
            reference,
            begin,
            end,
            collapse,
            diagnostics,
        );
        match samples {
            Ok(samples) => {
                let mut args = Map::new();
                args.insert("samples".into(), samples);
                build_response("query_interval", args)
            }
            Err(error) => error,
        }
    }

    fn perform_get_simulation_status(&mut self) -> Value {
        let (status, latest_time, next_sample_time) = {
            let guard = self.shared.lock();
            (guard.status, guard.latest_time, guard.next_sample_time)
        };
        let mut args = Map::new();
        match status {
            SimulationStatus::Initializing => {}
            SimulationStatus::Running => {
                args.insert("status".into(), json!("running"));
            }
            SimulationStatus::Paused => {
                args.insert("status".into(), json!("paused"));
                args.insert("next_sample_time".into(), json!(next_sample_time));
            }
            SimulationStatus::Finished => {
                args.insert("status".into(), json!("finished"));
            }
        }
        args.insert("latest_time".into(), json!(latest_time));
        build_response("get_simulation_status", args)
    }

    fn perform_run_simulation(
        &mut self,
        until_time: TimePoint,
        until_diagnostics: crate::spool::DiagnosticSet,
    ) -> Value {
        let mut guard = self.shared.lock();
        if guard.status != SimulationStatus::Paused {
            return build_error(ErrorCode::InvalidStatus, "Cannot run simulation with the current status.");
        }
        guard.run_until_time = until_time;
        guard.run_until_diagnostics = until_diagnostics;
        // A bounded run pauses by itself and gets announced; an unbounded
        // one only ever stops through `pause_simulation`, which replies
        // directly. Finishing is always announced.
        self.emit_simulation_paused =
            until_time < TimePoint::MAXIMUM || !until_diagnostics.is_empty();
        self.emit_simulation_finished = true;
        guard.unpause = true;
        self.shared.notify_all();
        let _guard = self.shared.wait_while(guard, |s| !s.unpause);
        build_response("run_simulation", Map::new())
    }

    fn perform_pause_simulation(&mut self) -> Value {
        let mut guard = self.shared.lock();
        guard.run_until_time = TimePoint::ZERO;
        self.shared.notify_all();
        let guard = self.shared.wait_while(guard, |s| s.status != SimulationStatus::Running);
        let mut args = Map::new();
        args.insert("time".into(), json!(guard.latest_time));
        build_response("pause_simulation", args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use crate::testdut::TestDesign;
    use super::transport::LoopbackLink;

    /// Agent with a few recorded samples plus a server sharing its state,
    /// driven synchronously through `process_packet`. The returned peer is
    /// the debugger's end of the loopback link.
    fn fixture() -> (Agent<TestDesign>, Server<LoopbackLink, TestDesign>, LoopbackLink) {
        let mut agent = Agent::new(Spool::new(), TestDesign::default(), "top ");
        agent.step();
        for value in [5u64, 7u64, 9u64] {
            agent.advance(TimePoint::from_nanos(1));
            agent.items_mut().set_u64("top count", value);
            agent.step();
        }
        agent.snapshot();
        let (link, peer) = LoopbackLink::pair();
        let server = Server::new(agent.shared_state(), agent.spool_handle(), link, "top ");
        (agent, server, peer)
    }

    fn greeted_fixture() -> (Agent<TestDesign>, Server<LoopbackLink, TestDesign>, LoopbackLink) {
        let (agent, mut server, peer) = fixture();
        let reply = server.process_packet(r#"{"type":"greeting","version":0}"#);
        assert_eq!(reply["type"], "greeting");
        (agent, server, peer)
    }

    fn command(server: &mut Server<LoopbackLink, TestDesign>, json: Value) -> Value {
        server.process_packet(&json.to_string())
    }

    #[test]
    fn test_greeting_gates_commands() {
        let (_agent, mut server, _peer) = fixture();
        let reply = command(
            &mut server,
            json!({"type": "command", "command": "get_simulation_status"}),
        );
        assert_eq!(reply["error"], "protocol_error");

        let reply = server.process_packet(r#"{"type":"greeting","version":1}"#);
        assert_eq!(reply["error"], "unknown_version");
        let reply = server.process_packet(r#"{"type":"greeting","version":0}"#);
        assert_eq!(reply["type"], "greeting");
        assert_eq!(reply["features"]["item_values_encoding"], json!(["base64(u32)"]));

        let reply = command(
            &mut server,
            json!({"type": "command", "command": "get_simulation_status"}),
        );
        assert_eq!(reply["type"], "response");
    }

    #[test]
    fn test_malformed_packets() {
        let (_agent, mut server, _peer) = greeted_fixture();
        assert_eq!(server.process_packet("{not json")["error"], "invalid_json");
        assert_eq!(server.process_packet("17")["error"], "invalid_packet");
        assert_eq!(server.process_packet(r#"{"type":"telegram"}"#)["error"], "invalid_packet");
        let reply = command(&mut server, json!({"type": "command"}));
        assert_eq!(reply["error"], "invalid_command");
        let reply = command(&mut server, json!({"type": "command", "command": "dance"}));
        assert_eq!(reply["error"], "invalid_command");
    }

    #[test]
    fn test_list_scopes_selection() {
        let (_agent, mut server, _peer) = greeted_fixture();
        // Root listing: only scopes without a separator in the name.
        let reply = command(
            &mut server,
            json!({"type": "command", "command": "list_scopes", "scope": ""}),
        );
        let scopes = reply["scopes"].as_object().unwrap();
        assert!(scopes.keys().all(|name| !name.contains(' ')));
        assert!(scopes.contains_key("top"));
        assert!(!scopes.contains_key("top blk"));
        // The recorded scope carries its module description...
        assert_eq!(scopes["top"]["definition"]["name"], "counter");

        // ...and a scope with no record gets null descriptors.
        let reply = command(
            &mut server,
            json!({"type": "command", "command": "list_scopes", "scope": "top"}),
        );
        let scopes = reply["scopes"].as_object().unwrap();
        assert_eq!(scopes.len(), 1);
        assert_eq!(scopes["top blk"]["definition"]["name"], Value::Null);

        // Null selects every scope regardless of depth.
        let reply = command(
            &mut server,
            json!({"type": "command", "command": "list_scopes", "scope": null}),
        );
        let scopes = reply["scopes"].as_object().unwrap();
        assert!(scopes.contains_key("top"));
        assert!(scopes.contains_key("top blk"));
    }

    #[test]
    fn test_list_items_descriptions() {
        let (_agent, mut server, _peer) = greeted_fixture();
        let reply = command(
            &mut server,
            json!({"type": "command", "command": "list_items", "scope": "top"}),
        );
        let items = reply["items"].as_object().unwrap();
        assert!(items.contains_key("top clk"));
        assert!(!items.contains_key("top blk leaf"));

        let count = &items["top count"];
        assert_eq!(count["type"], "node");
        assert_eq!(count["width"], 8);
        assert_eq!(count["settable"], true);
        assert_eq!(count["src"], "counter.v:14");

        let clk = &items["top clk"];
        assert_eq!(clk["input"], true);
        assert_eq!(clk["settable"], true);

        let sum = &items["top sum"];
        assert_eq!(sum["output"], true);
        assert_eq!(sum["settable"], false);

        let mem = &items["top mem"];
        assert_eq!(mem["type"], "memory");
        assert_eq!(mem["depth"], 4);
        assert_eq!(mem["zero_at"], 0);
        assert_eq!(mem["settable"], true);
        assert!(mem.get("input").is_none());
    }

    #[test]
    fn test_reference_items_lifecycle() {
        let (_agent, mut server, _peer) = greeted_fixture();
        let reply = command(
            &mut server,
            json!({"type": "command", "command": "reference_items", "reference": "A",
                   "items": [["top count"], ["top mem", 0, 3]]}),
        );
        assert_eq!(reply["type"], "response");
        assert_eq!(server.references["A"].variables.len(), 2);

        // Redefinition replaces the designators.
        let reply = command(
            &mut server,
            json!({"type": "command", "command": "reference_items", "reference": "A",
                   "items": [["top clk"]]}),
        );
        assert_eq!(reply["type"], "response");
        assert_eq!(server.references["A"].variables.len(), 1);

        // A failed redefinition leaves the previous contents in place.
        let reply = command(
            &mut server,
            json!({"type": "command", "command": "reference_items", "reference": "A",
                   "items": [["top nope"]]}),
        );
        assert_eq!(reply["error"], "item_not_found");
        assert_eq!(server.references["A"].variables.len(), 1);

        // Wrong-type designators in both directions.
        let reply = command(
            &mut server,
            json!({"type": "command", "command": "reference_items", "reference": "B",
                   "items": [["top count", 0, 0]]}),
        );
        assert_eq!(reply["error"], "wrong_item_type");
        let reply = command(
            &mut server,
            json!({"type": "command", "command": "reference_items", "reference": "B",
                   "items": [["top mem"]]}),
        );
        assert_eq!(reply["error"], "wrong_item_type");
        let reply = command(
            &mut server,
            json!({"type": "command", "command": "reference_items", "reference": "B",
                   "items": [["top mem", 0, 4]]}),
        );
        assert_eq!(reply["error"], "invalid_args");
        assert!(!server.references.contains_key("B"));

        // Erase by defining with null.
        let reply = command(
            &mut server,
            json!({"type": "command", "command": "reference_items", "reference": "A", "items": null}),
        );
        assert_eq!(reply["type"], "response");
        assert!(!server.references.contains_key("A"));
    }

    #[test]
    fn test_query_interval_samples() {
        let (_agent, mut server, _peer) = greeted_fixture();
        command(
            &mut server,
            json!({"type": "command", "command": "reference_items", "reference": "A",
                   "items": [["top count"]]}),
        );
        let reply = command(
            &mut server,
            json!({"type": "command", "command": "query_interval",
                   "interval": ["0s", "10ns"], "collapse": true, "items": "A",
                   "item_values_encoding": "base64(u32)", "diagnostics": false}),
        );
        let samples = reply["samples"].as_array().unwrap();
        assert_eq!(samples.len(), 4);
        let begin: TimePoint = "0s".parse().unwrap();
        let end: TimePoint = "10ns".parse().unwrap();
        let mut decoded = Vec::new();
        for sample in samples {
            let time: TimePoint = sample["time"].as_str().unwrap().parse().unwrap();
            assert!(begin <= time && time <= end);
            assert!(sample.get("diagnostics").is_none());
            let values = sample["item_values"].as_str().unwrap();
            use base64::Engine as _;
            let bytes = base64::engine::general_purpose::STANDARD.decode(values).unwrap();
            assert_eq!(bytes.len(), 4);
            decoded.push(bytes[0] as u64);
        }
        assert_eq!(decoded, vec![0, 5, 7, 9]);
    }

    #[test]
    fn test_query_interval_is_idempotent_across_fast_path() {
        let (_agent, mut server, _peer) = greeted_fixture();
        command(
            &mut server,
            json!({"type": "command", "command": "reference_items", "reference": "A",
                   "items": [["top count"]]}),
        );
        let query = json!({"type": "command", "command": "query_interval",
                           "interval": ["1ns", "1ns"], "collapse": true, "items": "A",
                           "item_values_encoding": "base64(u32)", "diagnostics": false});
        let first = command(&mut server, query.clone());
        // The second run hits the parked-player fast path and must be
        // byte-identical.
        let second = command(&mut server, query.clone());
        let third = command(&mut server, query);
        assert_eq!(first.to_string(), second.to_string());
        assert_eq!(first.to_string(), third.to_string());
        assert_eq!(first["samples"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_query_interval_diagnostics() {
        let (_agent, mut server, _peer) = greeted_fixture();
        let reply = command(
            &mut server,
            json!({"type": "command", "command": "query_interval",
                   "interval": ["2ns", "2ns"], "collapse": true, "items": null,
                   "item_values_encoding": null, "diagnostics": true}),
        );
        let samples = reply["samples"].as_array().unwrap();
        assert_eq!(samples.len(), 1);
        // At 2ns the replayed count is 7, and re-evaluating the design
        // fails its `count != 7` check live.
        let diagnostics = samples[0]["diagnostics"].as_array().unwrap();
        assert!(diagnostics
            .iter()
            .any(|d| d["type"] == "assert" && d["text"].as_str().unwrap().contains("seven")));
    }

    #[test]
    fn test_query_interval_outline_refresh() {
        let (_agent, mut server, _peer) = greeted_fixture();
        command(
            &mut server,
            json!({"type": "command", "command": "reference_items", "reference": "O",
                   "items": [["top twice"]]}),
        );
        let reply = command(
            &mut server,
            json!({"type": "command", "command": "query_interval",
                   "interval": ["3ns", "3ns"], "collapse": true, "items": "O",
                   "item_values_encoding": "base64(u32)", "diagnostics": false}),
        );
        let samples = reply["samples"].as_array().unwrap();
        use base64::Engine as _;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(samples[0]["item_values"].as_str().unwrap())
            .unwrap();
        // twice = 2 * count, recomputed by the outline during readout.
        assert_eq!(bytes[0], 18);
    }

    #[test]
    fn test_query_unknown_reference() {
        let (_agent, mut server, _peer) = greeted_fixture();
        let reply = command(
            &mut server,
            json!({"type": "command", "command": "query_interval",
                   "interval": ["0s", "1ns"], "collapse": true, "items": "nope",
                   "item_values_encoding": "base64(u32)", "diagnostics": false}),
        );
        assert_eq!(reply["error"], "invalid_reference");
    }

    #[test]
    fn test_get_simulation_status_shapes() {
        let (agent, mut server, _peer) = greeted_fixture();
        let reply = command(
            &mut server,
            json!({"type": "command", "command": "get_simulation_status"}),
        );
        assert_eq!(reply["status"], "running");
        assert_eq!(reply["latest_time"], "3ns");
        assert!(reply.get("next_sample_time").is_none());

        {
            let shared_state = agent.shared_state();
            let mut guard = shared_state.lock();
            guard.status = SimulationStatus::Paused;
            guard.next_sample_time = TimePoint::from_nanos(4);
        }
        let reply = command(
            &mut server,
            json!({"type": "command", "command": "get_simulation_status"}),
        );
        assert_eq!(reply["status"], "paused");
        assert_eq!(reply["next_sample_time"], "4ns");
    }

    #[test]
    fn test_run_simulation_requires_paused() {
        let (_agent, mut server, _peer) = greeted_fixture();
        let reply = command(
            &mut server,
            json!({"type": "command", "command": "run_simulation", "until_time": null,
                   "until_diagnostics": [], "sample_item_values": true}),
        );
        assert_eq!(reply["error"], "invalid_status");
    }

    #[test]
    fn test_event_latch_waits_for_transition() {
        let (agent, mut server, mut peer) = greeted_fixture();
        server.emit_simulation_paused = true;
        // Agent still running: nothing must be sent.
        server.emit_pending_events();
        assert!(server.emit_simulation_paused);
        {
            let shared_state = agent.shared_state();
            let mut guard = shared_state.lock();
            guard.status = SimulationStatus::Paused;
            guard.cause = state::PauseCause::Diagnostic;
            guard.latest_time = TimePoint::from_nanos(3);
        }
        server.emit_pending_events();
        assert!(!server.emit_simulation_paused);
        assert!(server.link.poll(Duration::from_millis(1)));
        assert!(peer.poll(Duration::from_millis(100)));
        let event: Value = serde_json::from_str(&peer.recv_packet().unwrap()).unwrap();
        assert_eq!(event["type"], "event");
        assert_eq!(event["event"], "simulation_paused");
        assert_eq!(event["cause"], "until_diagnostics");
        assert_eq!(event["time"], "3ns");
        // The latch is one-shot: nothing further comes out.
        server.emit_pending_events();
        assert!(server.link.poll(Duration::from_millis(1)));
        assert!(peer.poll(Duration::from_millis(10)));
        assert_eq!(peer.recv_packet(), None);
    }
}
