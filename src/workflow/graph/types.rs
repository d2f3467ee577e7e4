//! Step graph wire types
//!
//! This module defines the JSON shape the automation platform returns and
//! accepts: `{ "steps": [ { "name", "actionId", "parameters", "outboundEdges" } ] }`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A workflow as exchanged with the automation platform
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct WorkflowDef {
    /// Steps of the workflow
    #[serde(default)]
    pub steps: Vec<StepDef>,
    /// Any other top-level fields, kept as-is for the round trip
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A step as exchanged with the automation platform
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepDef {
    /// Unique name of the step
    pub name: String,
    /// Identifier of the action the platform runs
    pub action_id: String,
    /// Ordered parameters
    #[serde(default)]
    pub parameters: Vec<ParameterDef>,
    /// Transitions, evaluated first-match-wins
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outbound_edges: Vec<EdgeDef>,
}

/// A named parameter value
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ParameterDef {
    pub name: String,
    #[serde(default)]
    pub value: Value,
}

/// A transition between two steps
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EdgeDef {
    /// Name of the step to run next
    pub next_step_name: String,
    /// Informational label
    #[serde(default)]
    pub branch_name: String,
    /// Guard expression; `None` means an unconditional transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl WorkflowDef {
    /// Parse a workflow from its JSON representation
    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    /// Render the workflow as pretty-printed JSON
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Names of all steps, in definition order
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }
}

impl ParameterDef {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}
