// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Wire protocol: packet grammar, command parsing, response building.
//!
//! Every packet is a JSON object with a `type` discriminator (`greeting`,
//! `command`, `response`, `error`, `event`). Parsing is strict about
//! argument keys: each parser removes the keys it consumes and rejects the
//! packet if anything is left over, so a typo'd argument never silently
//! disappears. Parse failures are themselves packets (`type: "error"`),
//! never process failures.

use serde_json::{json, Map, Value};

use crate::design::{DebugItems, DebugScope, MetadataMap, MetadataValue};
use crate::server::state::PauseCause;
use crate::spool::{DiagnosticKind, DiagnosticSet};
use crate::time::TimePoint;

/// The only protocol version this server speaks.
pub const PROTOCOL_VERSION: u64 = 0;

/// Commands advertised in the server greeting.
pub const COMMANDS: [&str; 7] = [
    "list_scopes",
    "list_items",
    "reference_items",
    "query_interval",
    "get_simulation_status",
    "run_simulation",
    "pause_simulation",
];

/// Events advertised in the server greeting.
pub const EVENTS: [&str; 2] = ["simulation_paused", "simulation_finished"];

/// The only supported item values encoding.
pub const ITEM_VALUES_ENCODING: &str = "base64(u32)";

/// Error codes of the `error` packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidJson,
    InvalidPacket,
    InvalidCommand,
    InvalidGreeting,
    UnknownVersion,
    ProtocolError,
    InvalidArgs,
    InvalidReference,
    ItemNotFound,
    WrongItemType,
    InvalidItemValuesEncoding,
    InvalidStatus,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidJson => "invalid_json",
            ErrorCode::InvalidPacket => "invalid_packet",
            ErrorCode::InvalidCommand => "invalid_command",
            ErrorCode::InvalidGreeting => "invalid_greeting",
            ErrorCode::UnknownVersion => "unknown_version",
            ErrorCode::ProtocolError => "protocol_error",
            ErrorCode::InvalidArgs => "invalid_args",
            ErrorCode::InvalidReference => "invalid_reference",
            ErrorCode::ItemNotFound => "item_not_found",
            ErrorCode::WrongItemType => "wrong_item_type",
            ErrorCode::InvalidItemValuesEncoding => "invalid_item_values_encoding",
            ErrorCode::InvalidStatus => "invalid_status",
        }
    }
}

// ── Packet builders ─────────────────────────────────────────────────────────

pub fn build_response(command: &str, mut arguments: Map<String, Value>) -> Value {
    arguments.insert("type".into(), json!("response"));
    arguments.insert("command".into(), json!(command));
    Value::Object(arguments)
}

pub fn build_error(code: ErrorCode, message: &str) -> Value {
    json!({
        "type": "error",
        "error": code.as_str(),
        "message": message,
    })
}

pub fn build_event(name: &str, mut arguments: Map<String, Value>) -> Value {
    arguments.insert("type".into(), json!("event"));
    arguments.insert("event".into(), json!(name));
    Value::Object(arguments)
}

pub fn build_greeting() -> Value {
    json!({
        "type": "greeting",
        "version": PROTOCOL_VERSION,
        "commands": COMMANDS,
        "events": EVENTS,
        "features": {
            "item_values_encoding": [ITEM_VALUES_ENCODING],
        },
    })
}

pub fn build_event_simulation_paused(time: TimePoint, cause: PauseCause) -> Value {
    let cause = match cause {
        PauseCause::Time => "until_time",
        PauseCause::Diagnostic => "until_diagnostics",
    };
    json!({
        "type": "event",
        "event": "simulation_paused",
        "time": time,
        "cause": cause,
    })
}

pub fn build_event_simulation_finished(time: TimePoint) -> Value {
    json!({
        "type": "event",
        "event": "simulation_finished",
        "time": time,
    })
}

/// Export an attribute map through the typed attribute builder. The `src`
/// attribute is not an attribute on the wire; callers strip it into a
/// dedicated field.
pub fn build_attributes(attrs: &MetadataMap) -> Value {
    let mut out = Map::new();
    for (name, value) in attrs {
        if name.as_str() == "src" {
            continue;
        }
        let desc = match value {
            MetadataValue::UnsignedInt(v) => json!({
                "type": "unsigned_int",
                "value": v.to_string(),
            }),
            MetadataValue::SignedInt(v) => json!({
                "type": "signed_int",
                "value": v,
            }),
            MetadataValue::String(v) => json!({
                "type": "string",
                "value": v,
            }),
            MetadataValue::Double(v) => json!({
                "type": "double",
                "value": v,
            }),
        };
        out.insert(name.to_string(), desc);
    }
    Value::Object(out)
}

fn src_attr(attrs: &MetadataMap) -> Value {
    match attrs.get("src").and_then(MetadataValue::as_str) {
        Some(src) => json!(src),
        None => Value::Null,
    }
}

/// Describe scopes for `list_scopes`. Scopes can be lost (flattened
/// designs, stale tooling); those are emitted with null descriptors.
pub fn build_response_list_scopes<'a>(
    scopes: impl IntoIterator<Item = (&'a str, Option<&'a DebugScope>)>,
) -> Value {
    let mut descs = Map::new();
    for (path, scope) in scopes {
        let desc = match scope {
            Some(scope) => json!({
                "type": "module",
                "definition": {
                    "name": scope.module_name,
                    "src": src_attr(&scope.module_attrs),
                    "attributes": build_attributes(&scope.module_attrs),
                },
                "instantiation": {
                    "src": src_attr(&scope.cell_attrs),
                    "attributes": build_attributes(&scope.cell_attrs),
                },
            }),
            None => json!({
                "type": "module",
                "definition": {
                    "name": Value::Null,
                    "src": Value::Null,
                    "attributes": {},
                },
                "instantiation": {
                    "src": Value::Null,
                    "attributes": {},
                },
            }),
        };
        descs.insert(path.to_string(), desc);
    }
    let mut args = Map::new();
    args.insert("scopes".into(), Value::Object(descs));
    build_response("list_scopes", args)
}

/// Describe items for `list_items`.
pub fn build_response_list_items<'a>(
    names: impl IntoIterator<Item = &'a str>,
    items: &DebugItems,
) -> Value {
    let mut descs = Map::new();
    for name in names {
        let item = items.get(name).expect("listed item vanished");
        let mut desc = Map::new();
        desc.insert("src".into(), src_attr(&item.attrs));
        if item.is_memory() {
            desc.insert("type".into(), json!("memory"));
            desc.insert("lsb_at".into(), json!(item.lsb_at));
            desc.insert("width".into(), json!(item.width));
            desc.insert("zero_at".into(), json!(item.zero_at));
            desc.insert("depth".into(), json!(item.depth));
            // ROMs are not distinguished; an overwritable ROM is still
            // useful for swapping a resident program.
            desc.insert("settable".into(), json!(true));
        } else {
            desc.insert("type".into(), json!("node"));
            desc.insert("lsb_at".into(), json!(item.lsb_at));
            desc.insert("width".into(), json!(item.width));
            desc.insert("input".into(), json!(item.flags.input));
            desc.insert("output".into(), json!(item.flags.output));
            desc.insert("settable".into(), json!(item.settable()));
        }
        desc.insert("attributes".into(), build_attributes(&item.attrs));
        descs.insert(name.to_string(), Value::Object(desc));
    }
    let mut args = Map::new();
    args.insert("items".into(), Value::Object(descs));
    build_response("list_items", args)
}

// ── Command parsing ─────────────────────────────────────────────────────────

/// One entry of a `reference_items` selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Designator {
    pub name: String,
    pub first_index: u64,
    pub last_index: u64,
    /// Whether indices were spelled out (memory designator) or implied
    /// (node designator).
    pub indexed: bool,
}

/// A parsed command, arguments checked for shape but not yet resolved
/// against the design.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    ListScopes {
        all: bool,
        scope: String,
    },
    ListItems {
        all: bool,
        scope: String,
    },
    ReferenceItems {
        reference: String,
        erase: bool,
        designators: Vec<Designator>,
    },
    QueryInterval {
        begin: TimePoint,
        end: TimePoint,
        collapse: bool,
        items: Option<String>,
        diagnostics: bool,
    },
    GetSimulationStatus,
    RunSimulation {
        until_time: TimePoint,
        until_diagnostics: DiagnosticSet,
    },
    PauseSimulation,
}

type ParseResult<T> = Result<T, Value>;

fn invalid_args(message: &str) -> Value {
    build_error(ErrorCode::InvalidArgs, message)
}

/// Split a packet into its `type` and remaining keys.
pub fn parse_packet(packet: Value) -> ParseResult<(String, Map<String, Value>)> {
    let Value::Object(mut map) = packet else {
        return Err(build_error(
            ErrorCode::InvalidPacket,
            "The received packet does not contain a `type` key.",
        ));
    };
    match map.remove("type") {
        Some(Value::String(kind)) => Ok((kind, map)),
        _ => Err(build_error(
            ErrorCode::InvalidPacket,
            "The received packet does not contain a `type` key.",
        )),
    }
}

/// Validate a client greeting.
pub fn parse_greeting(mut packet: Map<String, Value>) -> ParseResult<()> {
    let Some(version) = packet.remove("version") else {
        return Err(build_error(
            ErrorCode::InvalidGreeting,
            "The greeting does not contain a `version` key.",
        ));
    };
    if version != json!(PROTOCOL_VERSION) {
        return Err(build_error(ErrorCode::UnknownVersion, "The client version is not 0."));
    }
    Ok(())
}

/// Extract the command name.
pub fn parse_command_name(packet: &mut Map<String, Value>) -> ParseResult<String> {
    match packet.remove("command") {
        Some(Value::String(name)) => Ok(name),
        _ => Err(build_error(
            ErrorCode::InvalidCommand,
            "The received command does not contain a `command` key.",
        )),
    }
}

/// Parse the arguments of the named command. `reference_exists` resolves
/// `query_interval`'s reference existence check, which precedes the
/// encoding check.
pub fn parse_command(
    name: &str,
    mut args: Map<String, Value>,
    reference_exists: impl Fn(&str) -> bool,
) -> ParseResult<Command> {
    match name {
        "list_scopes" => {
            let (all, scope) = parse_scope_arg(&mut args, "list_scopes")?;
            expect_no_leftovers(&args, "The `list_scopes` command takes no arguments besides `scope`.")?;
            Ok(Command::ListScopes { all, scope })
        }
        "list_items" => {
            let (all, scope) = parse_scope_arg(&mut args, "list_items")?;
            expect_no_leftovers(&args, "The `list_items` command takes no arguments besides `scope`.")?;
            Ok(Command::ListItems { all, scope })
        }
        "reference_items" => parse_reference_items(args),
        "query_interval" => parse_query_interval(args, reference_exists),
        "get_simulation_status" => {
            expect_no_leftovers(&args, "The `get_simulation_status` command takes no arguments.")?;
            Ok(Command::GetSimulationStatus)
        }
        "run_simulation" => parse_run_simulation(args),
        "pause_simulation" => {
            expect_no_leftovers(&args, "The `pause_simulation` command takes no arguments.")?;
            Ok(Command::PauseSimulation)
        }
        _ => Err(build_error(
            ErrorCode::InvalidCommand,
            "The received command has an unrecognized name.",
        )),
    }
}

fn expect_no_leftovers(args: &Map<String, Value>, message: &str) -> ParseResult<()> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(invalid_args(message))
    }
}

fn parse_scope_arg(args: &mut Map<String, Value>, command: &str) -> ParseResult<(bool, String)> {
    match args.remove("scope") {
        Some(Value::Null) => Ok((true, String::new())),
        Some(Value::String(scope)) => Ok((false, scope)),
        _ => Err(invalid_args(&format!(
            "The `{}` command requires the `scope` argument to be `null` or a string.",
            command
        ))),
    }
}

fn parse_reference_items(mut args: Map<String, Value>) -> ParseResult<Command> {
    let reference = match args.remove("reference") {
        Some(Value::String(name)) if !name.is_empty() => name,
        _ => {
            return Err(invalid_args(
                "The `reference_items` command requires the `reference` argument to be a non-empty string.",
            ))
        }
    };
    let (erase, designators) = match args.remove("items") {
        Some(Value::Null) => (true, Vec::new()),
        Some(Value::Array(entries)) => {
            let mut designators = Vec::with_capacity(entries.len());
            for entry in &entries {
                designators.push(parse_designator(entry)?);
            }
            (false, designators)
        }
        _ => {
            return Err(invalid_args(
                "The `reference_items` command requires the `items` argument to be an array or null.",
            ))
        }
    };
    expect_no_leftovers(
        &args,
        "The `reference_items` command takes no arguments besides `reference` and `items`.",
    )?;
    Ok(Command::ReferenceItems { reference, erase, designators })
}

fn parse_designator(entry: &Value) -> ParseResult<Designator> {
    const SHAPE: &str = "The `reference_items` command requires the item designator to be \
                         an array of a single string, or a string and two integers.";
    let Value::Array(parts) = entry else {
        return Err(invalid_args(SHAPE));
    };
    let Some(Value::String(name)) = parts.first() else {
        return Err(invalid_args(SHAPE));
    };
    match parts.len() {
        1 => Ok(Designator { name: name.clone(), first_index: 0, last_index: 0, indexed: false }),
        3 => match (parts[1].as_u64(), parts[2].as_u64()) {
            (Some(first_index), Some(last_index)) => {
                Ok(Designator { name: name.clone(), first_index, last_index, indexed: true })
            }
            _ => Err(invalid_args(SHAPE)),
        },
        _ => Err(invalid_args(SHAPE)),
    }
}

fn parse_query_interval(
    mut args: Map<String, Value>,
    reference_exists: impl Fn(&str) -> bool,
) -> ParseResult<Command> {
    let (begin, end) = match args.remove("interval") {
        Some(Value::Array(bounds)) if bounds.len() == 2 => {
            let begin = bounds[0]
                .as_str()
                .and_then(|text| text.parse::<TimePoint>().ok())
                .ok_or_else(|| invalid_args("The begin time point has incorrect format."))?;
            let end = bounds[1]
                .as_str()
                .and_then(|text| text.parse::<TimePoint>().ok())
                .ok_or_else(|| invalid_args("The end time point has incorrect format."))?;
            (begin, end)
        }
        _ => {
            return Err(invalid_args(
                "The `query_interval` command requires the `interval` argument to be an array of two strings.",
            ))
        }
    };
    let collapse = match args.remove("collapse") {
        Some(Value::Bool(collapse)) => collapse,
        _ => {
            return Err(invalid_args(
                "The `query_interval` command requires the `collapse` argument to be a boolean.",
            ))
        }
    };
    let items = match args.remove("items") {
        Some(Value::Null) => None,
        Some(Value::String(name)) if !name.is_empty() => {
            if !reference_exists(&name) {
                return Err(build_error(
                    ErrorCode::InvalidReference,
                    "The reference passed to the `query_interval` command does not exist.",
                ));
            }
            Some(name)
        }
        _ => {
            return Err(invalid_args(
                "The `query_interval` command requires the `items` argument to be a non-empty string or null.",
            ))
        }
    };
    let encoding = match args.remove("item_values_encoding") {
        Some(Value::Null) => None,
        Some(Value::String(encoding)) => {
            if encoding != ITEM_VALUES_ENCODING {
                return Err(build_error(
                    ErrorCode::InvalidItemValuesEncoding,
                    "The only supported item values encoding is `base64(u32)`.",
                ));
            }
            Some(encoding)
        }
        _ => {
            return Err(invalid_args(
                "The `query_interval` command requires the `item_values_encoding` argument to be a string or null.",
            ))
        }
    };
    let diagnostics = match args.remove("diagnostics") {
        Some(Value::Bool(diagnostics)) => diagnostics,
        _ => {
            return Err(invalid_args(
                "The `query_interval` command requires the `diagnostics` argument to be a boolean.",
            ))
        }
    };
    expect_no_leftovers(
        &args,
        "The `query_interval` command takes no arguments besides `interval`, `collapse`, `items`, \
         `item_values_encoding`, and `diagnostics`.",
    )?;
    if items.is_some() && encoding.is_none() {
        return Err(invalid_args(
            "The `query_interval` command requires `item_values_encoding` when `items` is given.",
        ));
    }
    Ok(Command::QueryInterval { begin, end, collapse, items, diagnostics })
}

fn parse_run_simulation(mut args: Map<String, Value>) -> ParseResult<Command> {
    let until_time = match args.remove("until_time") {
        Some(Value::Null) => TimePoint::MAXIMUM,
        Some(Value::String(text)) => text
            .parse()
            .map_err(|_| invalid_args("The time point has incorrect format."))?,
        _ => {
            return Err(invalid_args(
                "The `run_simulation` command requires the `until_time` argument to be null or a string.",
            ))
        }
    };
    let until_diagnostics = match args.remove("until_diagnostics") {
        Some(Value::Array(kinds)) => {
            let mut set = DiagnosticSet::EMPTY;
            for kind in &kinds {
                let known = kind.as_str().and_then(DiagnosticKind::from_label);
                match known {
                    Some(kind) => set.insert(kind),
                    None => {
                        return Err(invalid_args(
                            "The `run_simulation` command supports the following diagnostic types: \
                             `break`, `print`, `assert`, `assume`.",
                        ))
                    }
                }
            }
            set
        }
        _ => {
            return Err(invalid_args(
                "The `run_simulation` command requires the `until_diagnostics` argument to be an array.",
            ))
        }
    };
    let sample_item_values = match args.remove("sample_item_values") {
        Some(Value::Bool(sample)) => sample,
        _ => {
            return Err(invalid_args(
                "The `run_simulation` command requires the `sample_item_values` argument to be a boolean.",
            ))
        }
    };
    expect_no_leftovers(
        &args,
        "The `run_simulation` command takes no arguments besides `until_time`, `until_diagnostics`, \
         and `sample_item_values`.",
    )?;
    // Running without sampling would record a timeline with holes; nothing
    // implements that, so reject it up front.
    if !sample_item_values {
        return Err(invalid_args(
            "The `run_simulation` command does not support `sample_item_values` set to false.",
        ));
    }
    Ok(Command::RunSimulation { until_time, until_diagnostics })
}
