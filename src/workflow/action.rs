// SPDX-License-Identifier: MIT

//! Typed actions and step-result references
//!
//! The platform describes every step as an `actionId` plus a loose parameter
//! list. Known action kinds are parsed into [`Action`] variants with a fixed
//! parameter schema so malformed steps are caught when the graph is built,
//! not when the platform runs it. Unknown kinds are kept as [`Action::Opaque`].

use serde_json::{json, Value};
use std::fmt;

use super::decision::DecisionRule;
use super::graph::ParameterDef;
use crate::error::{ComposeError, Result};

pub const SEND_COMMAND: &str = "command.send";
pub const FETCH_OUTPUT: &str = "command.fetch-output";
pub const EVALUATE: &str = "function.evaluate";
pub const SEND_MESSAGE: &str = "chat.send";

/// Name of the only decision function the composer emits
pub const RETRY_DECISION: &str = "retryDecision";

/// Reserved parameter tagging steps emitted by the generator with their anchor
pub const GENERATED_FOR: &str = "generatedFor";

/// Reference to a field of another step's recorded result,
/// written `{{Steps.<step>.<field>}}` inside parameter values
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StepRef {
    pub step: String,
    pub field: String,
}

impl StepRef {
    pub fn new(step: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            field: field.into(),
        }
    }

    /// Parse a value that is exactly one reference, e.g. `{{Steps.Fetch_1.output}}`
    pub fn parse(text: &str) -> Option<Self> {
        let inner = text.trim().strip_prefix("{{")?.strip_suffix("}}")?;
        if inner.contains("{{") || inner.contains("}}") {
            return None;
        }
        Self::from_path(inner.trim())
    }

    /// Parse a dotted path such as `Steps.Fetch_1.output`
    pub fn from_path(path: &str) -> Option<Self> {
        let rest = path.strip_prefix("Steps.")?;
        let (step, field) = rest.split_once('.')?;
        if step.is_empty() || field.is_empty() {
            return None;
        }
        Some(Self::new(step, field))
    }

    /// Dotted path used by edge conditions
    pub fn path(&self) -> String {
        format!("Steps.{}.{}", self.step, self.field)
    }
}

impl fmt::Display for StepRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{{{}}}}}", self.path())
    }
}

/// All references embedded in a template string
pub fn refs_in(text: &str) -> Vec<StepRef> {
    let mut refs = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            break;
        };
        if let Some(r) = StepRef::from_path(after[..end].trim()) {
            refs.push(r);
        }
        rest = &after[end + 2..];
    }
    refs
}

/// All references embedded anywhere in a JSON value
pub fn refs_in_value(value: &Value) -> Vec<StepRef> {
    match value {
        Value::String(s) => refs_in(s),
        Value::Array(items) => items.iter().flat_map(refs_in_value).collect(),
        Value::Object(obj) => obj.values().flat_map(refs_in_value).collect(),
        _ => vec![],
    }
}

/// Binding of the retry decision function to its inputs
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Raw health-check output
    pub input: StepRef,
    /// Prior decisions, most recent first; the first one recorded wins
    pub previous: Vec<StepRef>,
    pub rule: DecisionRule,
}

/// Outcome of [`Action::parse`]
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedAction {
    pub action: Action,
    /// Anchor named by a `generatedFor` tag
    pub generated_for: Option<String>,
    /// Parameters outside the action's schema, in their original order
    pub extra: Vec<ParameterDef>,
}

/// What a step does, with its parameters validated per kind
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Send a shell command to a remote target
    SendCommand { target: Value, command: String },
    /// Retrieve the output of a previously issued command
    FetchOutput { command: StepRef },
    /// Evaluate the retry decision function
    Evaluate(Evaluation),
    /// Post a chat message
    SendMessage { channel: String, text: String },
    /// Any other platform action, passed through untouched
    Opaque {
        action_id: String,
        parameters: Vec<ParameterDef>,
    },
}

impl Action {
    /// Platform identifier of this action
    pub fn action_id(&self) -> &str {
        match self {
            Action::SendCommand { .. } => SEND_COMMAND,
            Action::FetchOutput { .. } => FETCH_OUTPUT,
            Action::Evaluate(_) => EVALUATE,
            Action::SendMessage { .. } => SEND_MESSAGE,
            Action::Opaque { action_id, .. } => action_id,
        }
    }

    /// Result fields this action records once it has run; `None` when the
    /// platform action is not known
    pub fn result_fields(&self) -> Option<&'static [&'static str]> {
        match self {
            Action::SendCommand { .. } => Some(&["commandId"]),
            Action::FetchOutput { .. } => Some(&["output"]),
            Action::Evaluate(_) => Some(&[
                "success",
                "healthStatus",
                "retryCount",
                "maxRetries",
                "shouldRetry",
                "message",
            ]),
            Action::SendMessage { .. } => Some(&["text"]),
            Action::Opaque { .. } => None,
        }
    }

    /// Build a typed action from a wire step
    pub fn parse(step: &str, action_id: &str, parameters: &[ParameterDef]) -> Result<ParsedAction> {
        let params = Params { step, parameters };
        let generated_for = match params.get(GENERATED_FOR) {
            None => None,
            Some(Value::String(anchor)) => Some(anchor.clone()),
            Some(_) => {
                return Err(ComposeError::invalid_step(
                    step,
                    format!("parameter '{}' must be a string", GENERATED_FOR),
                ))
            }
        };

        let action = match action_id {
            SEND_COMMAND => {
                let target = params.required("target")?;
                if target.is_null() {
                    return Err(ComposeError::invalid_step(step, "target must not be null"));
                }
                Action::SendCommand {
                    target: target.clone(),
                    command: params.string("command")?,
                }
            }
            FETCH_OUTPUT => Action::FetchOutput {
                command: params.step_ref("commandId")?,
            },
            EVALUATE => {
                let function = params.string("function")?;
                if function != RETRY_DECISION {
                    return Err(ComposeError::invalid_step(
                        step,
                        format!("unknown decision function '{}'", function),
                    ));
                }
                Action::Evaluate(Evaluation {
                    input: params.step_ref("input")?,
                    previous: params.step_refs("previous")?,
                    rule: DecisionRule {
                        healthy_marker: params.string("healthyMarker")?,
                        max_retries: params.u32("maxRetries")?,
                    },
                })
            }
            SEND_MESSAGE => Action::SendMessage {
                channel: params.string("channel")?,
                text: params.string("text")?,
            },
            other => Action::Opaque {
                action_id: other.to_string(),
                parameters: parameters
                    .iter()
                    .filter(|p| p.name != GENERATED_FOR)
                    .cloned()
                    .collect(),
            },
        };

        let extra = match schema_of(&action) {
            Some(schema) => parameters
                .iter()
                .filter(|p| p.name != GENERATED_FOR && !schema.contains(&p.name.as_str()))
                .cloned()
                .collect(),
            None => Vec::new(),
        };

        Ok(ParsedAction {
            action,
            generated_for,
            extra,
        })
    }

    /// Render the parameter list for the wire format
    pub fn to_parameters(&self) -> Vec<ParameterDef> {
        match self {
            Action::SendCommand { target, command } => vec![
                ParameterDef::new("target", target.clone()),
                ParameterDef::new("command", json!(command)),
            ],
            Action::FetchOutput { command } => {
                vec![ParameterDef::new("commandId", json!(command.to_string()))]
            }
            Action::Evaluate(eval) => vec![
                ParameterDef::new("function", json!(RETRY_DECISION)),
                ParameterDef::new("input", json!(eval.input.to_string())),
                ParameterDef::new(
                    "previous",
                    Value::Array(
                        eval.previous
                            .iter()
                            .map(|r| Value::String(r.to_string()))
                            .collect(),
                    ),
                ),
                ParameterDef::new("healthyMarker", json!(eval.rule.healthy_marker)),
                ParameterDef::new("maxRetries", json!(eval.rule.max_retries)),
            ],
            Action::SendMessage { channel, text } => vec![
                ParameterDef::new("channel", json!(channel)),
                ParameterDef::new("text", json!(text)),
            ],
            Action::Opaque { parameters, .. } => parameters.clone(),
        }
    }
}

/// Parameter names owned by a typed action; everything else on the step is
/// carried through untouched. Opaque actions keep their whole list.
fn schema_of(action: &Action) -> Option<&'static [&'static str]> {
    match action {
        Action::SendCommand { .. } => Some(&["target", "command"]),
        Action::FetchOutput { .. } => Some(&["commandId"]),
        Action::Evaluate(_) => Some(&["function", "input", "previous", "healthyMarker", "maxRetries"]),
        Action::SendMessage { .. } => Some(&["channel", "text"]),
        Action::Opaque { .. } => None,
    }
}

/// Lookup helper over a wire parameter list
struct Params<'a> {
    step: &'a str,
    parameters: &'a [ParameterDef],
}

impl<'a> Params<'a> {
    fn get(&self, name: &str) -> Option<&'a Value> {
        self.parameters
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.value)
    }

    fn required(&self, name: &str) -> Result<&'a Value> {
        self.get(name).ok_or_else(|| {
            ComposeError::invalid_step(self.step, format!("missing parameter '{}'", name))
        })
    }

    fn string(&self, name: &str) -> Result<String> {
        match self.required(name)? {
            Value::String(s) => Ok(s.clone()),
            _ => Err(self.mistyped(name, "a string")),
        }
    }

    fn u32(&self, name: &str) -> Result<u32> {
        self.required(name)?
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| self.mistyped(name, "a non-negative integer"))
    }

    fn step_ref(&self, name: &str) -> Result<StepRef> {
        self.required(name)?
            .as_str()
            .and_then(StepRef::parse)
            .ok_or_else(|| self.mistyped(name, "a {{Steps.<name>.<field>}} reference"))
    }

    fn step_refs(&self, name: &str) -> Result<Vec<StepRef>> {
        match self.get(name) {
            None => Ok(vec![]),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .and_then(StepRef::parse)
                        .ok_or_else(|| self.mistyped(name, "a list of step references"))
                })
                .collect(),
            Some(_) => Err(self.mistyped(name, "a list of step references")),
        }
    }

    fn mistyped(&self, name: &str, expected: &str) -> ComposeError {
        ComposeError::invalid_step(
            self.step,
            format!("parameter '{}' must be {}", name, expected),
        )
    }
}
