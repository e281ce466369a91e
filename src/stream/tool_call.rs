//! Tool-call reconstruction from streamed argument fragments.
//!
//! Two layers:
//! - [`RawToolCallTracker`] turns index-addressed `tool_call_partial` chunks into
//!   id-keyed start/delta/end events. Providers send the id and name on the
//!   first fragment of an index and omit them afterwards; argument fragments
//!   that arrive before the name is known are buffered.
//! - [`ToolCallAssembler`] consumes those events, keeps one argument buffer per
//!   open call and produces live params (best-effort partial parse) and one
//!   finalized, strictly parsed tool call per id.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde_json::Value;
use tracing::{debug, warn};

use crate::stream::content::ToolUseBlock;
use crate::stream::partial_json::parse_partial_json;

/// Id-keyed lifecycle event of a streamed tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCallEvent {
    Start { id: String, name: String },
    Delta { id: String, fragment: String },
    End { id: String },
}

#[derive(Debug)]
struct RawCall {
    id: String,
    name: Option<String>,
    started: bool,
    pending: String,
}

/// Index-addressed tracker for `tool_call_partial` chunks.
#[derive(Debug, Default)]
pub struct RawToolCallTracker {
    by_index: BTreeMap<u32, RawCall>,
}

impl RawToolCallTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one partial chunk and return the events it produces, in order.
    pub fn process(
        &mut self,
        index: u32,
        id: Option<&str>,
        name: Option<&str>,
        arguments: Option<&str>,
    ) -> Vec<ToolCallEvent> {
        let mut events = Vec::new();

        if let Some(id) = id.filter(|id| !id.is_empty()) {
            let is_new = self
                .by_index
                .get(&index)
                .map_or(true, |existing| existing.id != id);
            if is_new {
                if let Some(previous) = self.by_index.remove(&index) {
                    debug!(index, previous = %previous.id, next = %id, "Index reused by a new tool call");
                    if previous.started {
                        events.push(ToolCallEvent::End { id: previous.id });
                    }
                }
                self.by_index.insert(
                    index,
                    RawCall {
                        id: id.to_string(),
                        name: None,
                        started: false,
                        pending: String::new(),
                    },
                );
            }
        }

        let Some(call) = self.by_index.get_mut(&index) else {
            warn!(index, "Tool call fragment for unknown index dropped");
            return events;
        };

        if let Some(name) = name.filter(|n| !n.is_empty()) {
            if call.name.is_none() {
                call.name = Some(name.to_string());
            }
        }

        if !call.started {
            if let Some(name) = call.name.clone() {
                call.started = true;
                events.push(ToolCallEvent::Start {
                    id: call.id.clone(),
                    name,
                });
                if !call.pending.is_empty() {
                    events.push(ToolCallEvent::Delta {
                        id: call.id.clone(),
                        fragment: std::mem::take(&mut call.pending),
                    });
                }
            }
        }

        if let Some(fragment) = arguments.filter(|a| !a.is_empty()) {
            if call.started {
                events.push(ToolCallEvent::Delta {
                    id: call.id.clone(),
                    fragment: fragment.to_string(),
                });
            } else {
                call.pending.push_str(fragment);
            }
        }

        events
    }

    /// The provider closed the call with this id.
    pub fn end(&mut self, id: &str) -> Option<ToolCallEvent> {
        let index = self
            .by_index
            .iter()
            .find_map(|(index, call)| (call.id == id).then_some(*index))?;
        let call = self.by_index.remove(&index)?;
        call.started.then(|| ToolCallEvent::End { id: call.id })
    }

    /// Close every tracked call (stream end, abort, or a new block began).
    pub fn finalize_all(&mut self) -> Vec<ToolCallEvent> {
        std::mem::take(&mut self.by_index)
            .into_values()
            .filter_map(|call| {
                if call.started {
                    Some(ToolCallEvent::End { id: call.id })
                } else {
                    warn!(id = %call.id, "Tool call never received a name; dropped");
                    None
                }
            })
            .collect()
    }

    pub fn has_open_calls(&self) -> bool {
        !self.by_index.is_empty()
    }
}

/// A tool call whose argument stream has ended.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizedToolCall {
    pub id: String,
    pub name: String,
    pub raw_arguments: String,
    /// Strictly parsed arguments, or the parse error message
    pub params: Result<Value, String>,
}

#[derive(Debug)]
struct OpenCall {
    name: String,
    arguments: String,
}

/// Id-keyed argument buffers for open tool calls.
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    open: HashMap<String, OpenCall>,
    finalized: HashSet<String>,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a call. Returns the initial partial block, or `None` if the id is
    /// already open (or was finalized earlier in this turn).
    pub fn start(&mut self, id: &str, name: &str) -> Option<ToolUseBlock> {
        if self.open.contains_key(id) || self.finalized.contains(id) {
            debug!(id, name, "Duplicate tool call start ignored");
            return None;
        }
        self.open.insert(
            id.to_string(),
            OpenCall {
                name: name.to_string(),
                arguments: String::new(),
            },
        );
        Some(ToolUseBlock::streaming(id, name))
    }

    /// Append a fragment. Returns the live params view when the buffer
    /// partially parses to an object.
    pub fn delta(&mut self, id: &str, fragment: &str) -> Option<Value> {
        let Some(call) = self.open.get_mut(id) else {
            debug!(id, "Delta for unknown tool call ignored");
            return None;
        };
        call.arguments.push_str(fragment);
        parse_partial_json(&call.arguments).filter(Value::is_object)
    }

    /// Finalize a call with a strict parse. Clears the id whatever the outcome.
    pub fn end(&mut self, id: &str) -> Option<FinalizedToolCall> {
        let call = self.open.remove(id)?;
        self.finalized.insert(id.to_string());
        let params = parse_arguments(&call.arguments);
        if let Err(e) = &params {
            warn!(id, name = %call.name, error = %e, "Tool call arguments are not valid JSON");
        }
        Some(FinalizedToolCall {
            id: id.to_string(),
            name: call.name,
            raw_arguments: call.arguments,
            params,
        })
    }

    /// Build a finished block from a non-streamed tool call.
    pub fn complete(&mut self, id: &str, name: &str, arguments: &str) -> ToolUseBlock {
        self.finalized.insert(id.to_string());
        let (params, parse_error) = match parse_arguments(arguments) {
            Ok(params) => (params, None),
            Err(e) => {
                warn!(id, name, error = %e, "Tool call arguments are not valid JSON");
                (Value::Object(Default::default()), Some(e))
            }
        };
        ToolUseBlock {
            id: id.to_string(),
            name: name.to_string(),
            params,
            partial: false,
            parse_error,
        }
    }

    pub fn name(&self, id: &str) -> Option<&str> {
        self.open.get(id).map(|c| c.name.as_str())
    }

    pub fn arguments(&self, id: &str) -> Option<&str> {
        self.open.get(id).map(|c| c.arguments.as_str())
    }

    pub fn is_open(&self, id: &str) -> bool {
        self.open.contains_key(id)
    }

    pub fn open_ids(&self) -> Vec<String> {
        self.open.keys().cloned().collect()
    }
}

fn parse_arguments(arguments: &str) -> Result<Value, String> {
    if arguments.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(arguments).map_err(|e| e.to_string())
}
