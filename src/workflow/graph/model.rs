// SPDX-License-Identifier: MIT

//! Typed in-memory step graph

use serde_json::{json, Map, Value};
use std::collections::HashMap;

use super::types::{EdgeDef, ParameterDef, StepDef, WorkflowDef};
use crate::error::{ComposeError, Result};
use crate::workflow::action::{Action, GENERATED_FOR};
use crate::workflow::validator::{ValidationReport, Violation};

/// A transition to another step
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub target: String,
    pub branch: String,
    /// Condition source; `None` is the unconditional ("main") transition
    pub condition: Option<String>,
}

impl Edge {
    /// Unconditional transition
    pub fn main(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            branch: "main".to_string(),
            condition: None,
        }
    }

    /// Guarded transition
    pub fn when(
        target: impl Into<String>,
        branch: impl Into<String>,
        condition: impl Into<String>,
    ) -> Self {
        Self {
            target: target.into(),
            branch: branch.into(),
            condition: Some(condition.into()),
        }
    }

    pub fn is_unconditional(&self) -> bool {
        self.condition.is_none()
    }
}

/// A named node of the graph
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub name: String,
    pub action: Action,
    pub edges: Vec<Edge>,
    /// Anchor this step was generated for, if the composer emitted it
    pub generated_for: Option<String>,
    /// Parameters the action does not own, written back unchanged
    pub extra: Vec<ParameterDef>,
}

impl Step {
    pub fn new(name: impl Into<String>, action: Action) -> Self {
        Self {
            name: name.into(),
            action,
            edges: Vec::new(),
            generated_for: None,
            extra: Vec::new(),
        }
    }

    pub fn with_edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    /// A step without outbound edges ends the run
    pub fn is_terminal(&self) -> bool {
        self.edges.is_empty()
    }

    /// Names of the steps this one can transition to
    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.edges.iter().map(|e| e.target.as_str())
    }

    /// Replace the first unconditional edge, or append one.
    ///
    /// Returns the previous main target.
    pub fn set_main_edge(&mut self, edge: Edge) -> Option<String> {
        match self.edges.iter_mut().find(|e| e.is_unconditional()) {
            Some(existing) => Some(std::mem::replace(existing, edge).target),
            None => {
                self.edges.push(edge);
                None
            }
        }
    }

    /// Build a typed step from its wire form
    pub fn try_from_def(def: &StepDef) -> Result<Self> {
        let parsed = Action::parse(&def.name, &def.action_id, &def.parameters)?;
        let edges = def
            .outbound_edges
            .iter()
            .map(|e| Edge {
                target: e.next_step_name.clone(),
                branch: e.branch_name.clone(),
                condition: e.condition.clone(),
            })
            .collect();

        Ok(Self {
            name: def.name.clone(),
            action: parsed.action,
            edges,
            generated_for: parsed.generated_for,
            extra: parsed.extra,
        })
    }

    /// Render the wire form
    pub fn to_def(&self) -> StepDef {
        let mut parameters = self.action.to_parameters();
        parameters.extend(self.extra.iter().cloned());
        if let Some(anchor) = &self.generated_for {
            parameters.push(ParameterDef::new(GENERATED_FOR, json!(anchor)));
        }

        StepDef {
            name: self.name.clone(),
            action_id: self.action.action_id().to_string(),
            parameters,
            outbound_edges: self
                .edges
                .iter()
                .map(|e| EdgeDef {
                    next_step_name: e.target.clone(),
                    branch_name: e.branch.clone(),
                    condition: e.condition.clone(),
                })
                .collect(),
        }
    }
}

/// Steps keyed by name, with a stable order for diffing and output
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepGraph {
    steps: HashMap<String, Step>,
    order: Vec<String>,
    extra: Map<String, Value>,
}

impl StepGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the typed graph from a wire workflow.
    ///
    /// Duplicate step names are rejected rather than silently collapsed.
    pub fn try_from_def(def: &WorkflowDef) -> Result<Self> {
        let mut graph = Self {
            extra: def.extra.clone(),
            ..Self::default()
        };

        let mut duplicates: Vec<Violation> = Vec::new();
        for step_def in &def.steps {
            if graph.contains(&step_def.name) {
                if !duplicates.iter().any(|v| {
                    matches!(v, Violation::DuplicateStep { name, .. } if name == &step_def.name)
                }) {
                    let count = def.steps.iter().filter(|s| s.name == step_def.name).count();
                    duplicates.push(Violation::DuplicateStep {
                        name: step_def.name.clone(),
                        count,
                    });
                }
                continue;
            }
            graph.upsert(Step::try_from_def(step_def)?);
        }

        if !duplicates.is_empty() {
            return Err(ComposeError::StructuralViolation(ValidationReport {
                violations: duplicates,
                warnings: vec![],
            }));
        }

        Ok(graph)
    }

    /// Render the wire workflow
    pub fn to_def(&self) -> WorkflowDef {
        WorkflowDef {
            steps: self.all().map(Step::to_def).collect(),
            extra: self.extra.clone(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Step> {
        self.steps.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Step> {
        self.steps.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.steps.contains_key(name)
    }

    /// Insert or replace a step by name.
    ///
    /// A replaced step keeps its position. Returns the step it replaced.
    pub fn upsert(&mut self, step: Step) -> Option<Step> {
        let name = step.name.clone();
        let previous = self.steps.insert(name.clone(), step);
        if previous.is_none() {
            self.order.push(name);
        }
        previous
    }

    pub fn remove(&mut self, name: &str) -> Option<Step> {
        let removed = self.steps.remove(name)?;
        self.order.retain(|n| n != name);
        Some(removed)
    }

    /// All steps in stable order
    pub fn all(&self) -> impl Iterator<Item = &Step> {
        self.order.iter().filter_map(|name| self.steps.get(name))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Distinct steps with an edge targeting `name`, in graph order
    pub fn producers(&self, name: &str) -> Vec<&str> {
        self.all()
            .filter(|s| s.targets().any(|t| t == name))
            .map(|s| s.name.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message(name: &str) -> Step {
        Step::new(
            name,
            Action::SendMessage {
                channel: "ops".to_string(),
                text: format!("{} done", name),
            },
        )
    }

    #[test]
    fn test_upsert_appends_then_replaces_in_place() {
        let mut graph = StepGraph::new();
        assert!(graph.upsert(message("a")).is_none());
        assert!(graph.upsert(message("b")).is_none());
        assert!(graph.upsert(message("c")).is_none());

        let replaced = graph.upsert(message("b").with_edge(Edge::main("c")));
        assert!(replaced.is_some());
        assert_eq!(graph.names().collect::<Vec<_>>(), vec!["a", "b", "c"]);
        assert_eq!(graph.get("b").unwrap().edges.len(), 1);
        assert_eq!(graph.len(), 3);
    }

    #[test]
    fn test_remove() {
        let mut graph = StepGraph::new();
        graph.upsert(message("a"));
        graph.upsert(message("b"));

        assert!(graph.remove("a").is_some());
        assert!(graph.remove("a").is_none());
        assert!(graph.get("a").is_none());
        assert_eq!(graph.names().collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn test_producers() {
        let mut graph = StepGraph::new();
        graph.upsert(message("a").with_edge(Edge::main("c")));
        graph.upsert(message("b").with_edge(Edge::when("c", "x", "true")));
        graph.upsert(message("c"));

        assert_eq!(graph.producers("c"), vec!["a", "b"]);
        assert!(graph.producers("a").is_empty());
    }

    #[test]
    fn test_set_main_edge() {
        let mut step = message("a")
            .with_edge(Edge::when("x", "fail", "Steps.a.ok == false"))
            .with_edge(Edge::main("old"));

        let previous = step.set_main_edge(Edge::main("new"));
        assert_eq!(previous.as_deref(), Some("old"));
        assert_eq!(step.edges[0].target, "x");
        assert_eq!(step.edges[1].target, "new");

        let mut bare = message("b");
        assert!(bare.set_main_edge(Edge::main("next")).is_none());
        assert_eq!(bare.edges.len(), 1);
    }

    #[test]
    fn test_round_trip_keeps_order_and_tags() {
        let json = r#"{
            "steps": [
                { "name": "Restart", "actionId": "command.send",
                  "parameters": [ { "name": "target", "value": "host-1" },
                                  { "name": "command", "value": "systemctl restart tomcat" } ],
                  "outboundEdges": [ { "nextStepName": "Done", "branchName": "main" } ] },
                { "name": "Done", "actionId": "chat.send",
                  "parameters": [ { "name": "channel", "value": "ops" },
                                  { "name": "text", "value": "ok" },
                                  { "name": "generatedFor", "value": "Restart" } ] }
            ]
        }"#;
        let def = WorkflowDef::from_json(json).unwrap();
        let graph = StepGraph::try_from_def(&def).unwrap();

        assert_eq!(graph.get("Done").unwrap().generated_for.as_deref(), Some("Restart"));
        assert_eq!(graph.to_def(), def);
    }

    #[test]
    fn test_round_trip_keeps_unknown_parameters() {
        let json = r#"{
            "steps": [
                { "name": "Restart", "actionId": "command.send",
                  "parameters": [ { "name": "target", "value": "host-1" },
                                  { "name": "command", "value": "systemctl restart tomcat" },
                                  { "name": "timeoutSeconds", "value": 30 } ] },
                { "name": "Page", "actionId": "chat.send",
                  "parameters": [ { "name": "channel", "value": "ops" },
                                  { "name": "text", "value": "paged" },
                                  { "name": "mentions", "value": ["@oncall"] } ] }
            ]
        }"#;
        let def = WorkflowDef::from_json(json).unwrap();
        let graph = StepGraph::try_from_def(&def).unwrap();

        assert_eq!(graph.get("Page").unwrap().extra.len(), 1);
        assert_eq!(graph.to_def(), def);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let step = json!({ "name": "A", "actionId": "custom" });
        let def: WorkflowDef = serde_json::from_value(json!({ "steps": [step, step, step] })).unwrap();

        let err = StepGraph::try_from_def(&def).unwrap_err();
        let report = err.report().unwrap();
        assert_eq!(
            report.violations,
            vec![Violation::DuplicateStep {
                name: "A".to_string(),
                count: 3
            }]
        );
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        let def: WorkflowDef = serde_json::from_value(json!({
            "steps": [{ "name": "Fetch", "actionId": "command.fetch-output",
                        "parameters": [{ "name": "commandId", "value": "not-a-ref" }] }]
        }))
        .unwrap();

        match StepGraph::try_from_def(&def) {
            Err(ComposeError::InvalidStep { step, .. }) => assert_eq!(step, "Fetch"),
            other => panic!("Expected InvalidStep, got {:?}", other),
        }
    }
}
