// SPDX-License-Identifier: MIT

//! Invariant validator
//!
//! Checks a workflow against the structural contract before it is handed to
//! the platform:
//! - step names are unique and well-formed
//! - every step has at most one distinct producer
//! - every step reachable from the roots can reach a terminal step
//! - every cycle passes through a counter-guarded decision
//!
//! A *guarded loop edge* leaves a decision step, stays inside the decision's
//! cycle, and requires that decision's own `shouldRetry` flag. Removing all
//! guarded loop edges must leave the graph acyclic.

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::{Dfs, EdgeRef, IntoNeighbors, Reversed, Visitable};
use petgraph::Direction;
use std::collections::{HashMap, HashSet};
use std::fmt;
use thiserror::Error;

use super::action::{refs_in_value, Action, StepRef};
use super::condition::{parse, Expression};
use super::graph::{StepDef, WorkflowDef};
use crate::error::ComposeError;

/// Validation settings
#[derive(Debug, Clone, Default)]
pub struct ValidationOptions {
    /// Steps every path is checked from; the entry steps when empty
    pub roots: Vec<String>,
    /// Do not count guarded loop edges as producers (cyclic layouts)
    pub allow_back_edges: bool,
}

/// A broken invariant
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("step '{name}' is defined {count} times")]
    DuplicateStep { name: String, count: usize },

    #[error("step name '{name}' is invalid: {reason}")]
    InvalidStepName { name: String, reason: String },

    #[error("step '{step}' has invalid parameters: {message}")]
    InvalidParameters { step: String, message: String },

    #[error("step '{from}' has an edge to unknown step '{to}'")]
    DanglingEdge { from: String, to: String },

    #[error("step '{step}' references unknown step '{target}' in {reference}")]
    DanglingReference {
        step: String,
        reference: String,
        target: String,
    },

    #[error("step '{step}' has an invalid condition '{condition}': {message}")]
    InvalidCondition {
        step: String,
        condition: String,
        message: String,
    },

    #[error("step '{step}' has {} producers: {}", .producers.len(), .producers.join(", "))]
    MultipleProducers { step: String, producers: Vec<String> },

    #[error("no terminal step is reachable from '{step}'")]
    NoReachableTerminal { step: String },

    #[error("step '{step}' reads {reference} but '{target}' records no '{field}'")]
    UnknownResultField {
        step: String,
        reference: String,
        target: String,
        field: String,
    },

    #[error("cycle through {} is not guarded by a retry counter", .steps.join(", "))]
    UnboundedCycle { steps: Vec<String> },

    #[error("root step '{step}' does not exist")]
    UnknownRoot { step: String },
}

/// A suspicious but legal construct
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Lint {
    #[error("step '{step}' is never targeted and is not the entry step")]
    Unreferenced { step: String },

    #[error("step '{step}' lost its only producer when '{anchor}' was rewired")]
    OrphanedSuccessor { step: String, anchor: String },
}

/// Outcome of a validation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub violations: Vec<Violation>,
    pub warnings: Vec<Lint>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} violation(s)", self.violations.len())?;
        for (i, v) in self.violations.iter().enumerate() {
            write!(f, "{}{}", if i == 0 { ": " } else { "; " }, v)?;
        }
        Ok(())
    }
}

/// Validate a workflow
pub fn validate(def: &WorkflowDef, options: &ValidationOptions) -> ValidationReport {
    let mut report = ValidationReport::default();

    // Unique names
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for step in &def.steps {
        *counts.entry(step.name.as_str()).or_default() += 1;
    }
    let mut steps: Vec<&StepDef> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for step in &def.steps {
        if index.contains_key(step.name.as_str()) {
            continue;
        }
        let count = counts[step.name.as_str()];
        if count > 1 {
            report.violations.push(Violation::DuplicateStep {
                name: step.name.clone(),
                count,
            });
        }
        if let Some(reason) = name_problem(&step.name) {
            report.violations.push(Violation::InvalidStepName {
                name: step.name.clone(),
                reason: reason.to_string(),
            });
        }
        index.insert(step.name.as_str(), steps.len());
        steps.push(step);
    }
    let n = steps.len();

    // Parameter schemas
    let mut actions: Vec<Option<Action>> = Vec::with_capacity(n);
    for step in &steps {
        match Action::parse(&step.name, &step.action_id, &step.parameters) {
            Ok(parsed) => actions.push(Some(parsed.action)),
            Err(err) => {
                let message = match err {
                    ComposeError::InvalidStep { message, .. } => message,
                    other => other.to_string(),
                };
                report.violations.push(Violation::InvalidParameters {
                    step: step.name.clone(),
                    message,
                });
                actions.push(None);
            }
        }
    }

    // References and edges; node `i` is `steps[i]`
    let mut graph: DiGraph<(), Option<Expression>> = DiGraph::with_capacity(n, n);
    for _ in 0..n {
        graph.add_node(());
    }
    for (i, step) in steps.iter().enumerate() {
        for param in &step.parameters {
            for r in refs_in_value(&param.value) {
                report
                    .violations
                    .extend(check_reference(&step.name, &r, &index, &actions));
            }
        }

        for edge in &step.outbound_edges {
            let condition = match edge.condition.as_deref().map(parse) {
                None => None,
                Some(Ok(expr)) => Some(expr),
                Some(Err(err)) => {
                    report.violations.push(Violation::InvalidCondition {
                        step: step.name.clone(),
                        condition: edge.condition.clone().unwrap_or_default(),
                        message: match err {
                            ComposeError::Condition(message) => message,
                            other => other.to_string(),
                        },
                    });
                    None
                }
            };
            if let Some(expr) = &condition {
                for r in expr.paths().into_iter().filter_map(StepRef::from_path) {
                    report
                        .violations
                        .extend(check_reference(&step.name, &r, &index, &actions));
                }
            }
            match index.get(edge.next_step_name.as_str()) {
                Some(&to) => {
                    graph.add_edge(NodeIndex::new(i), NodeIndex::new(to), condition);
                }
                None => report.violations.push(Violation::DanglingEdge {
                    from: step.name.clone(),
                    to: edge.next_step_name.clone(),
                }),
            }
        }
    }

    // Guarded loop edges
    let mut component = vec![0usize; n];
    for (c, members) in tarjan_scc(&graph).iter().enumerate() {
        for node in members {
            component[node.index()] = c;
        }
    }
    let mut guarded: HashSet<EdgeIndex> = HashSet::new();
    for edge in graph.edge_references() {
        let (i, j) = (edge.source().index(), edge.target().index());
        if component[i] != component[j] {
            continue;
        }
        let Some(Action::Evaluate(eval)) = &actions[i] else {
            continue;
        };
        let flag = format!("Steps.{}.shouldRetry", steps[i].name);
        let requires_flag = edge
            .weight()
            .as_ref()
            .map_or(false, |c| c.requires_true(&flag));
        // The counter must come from a decision on the same cycle
        let carries_counter = eval.previous.iter().any(|r| {
            r.field == "retryCount"
                && index.get(r.step.as_str()).map_or(false, |&p| {
                    component[p] == component[i] && matches!(actions[p], Some(Action::Evaluate(_)))
                })
        });
        if requires_flag && carries_counter {
            guarded.insert(edge.id());
        }
    }

    // Single producer
    for node in graph.node_indices() {
        let mut sources: Vec<usize> = graph
            .edges_directed(node, Direction::Incoming)
            .filter(|e| !(options.allow_back_edges && guarded.contains(&e.id())))
            .map(|e| e.source().index())
            .collect();
        sources.sort_unstable();
        sources.dedup();
        if sources.len() > 1 {
            report.violations.push(Violation::MultipleProducers {
                step: steps[node.index()].name.clone(),
                producers: sources.iter().map(|&i| steps[i].name.clone()).collect(),
            });
        }
    }

    // Every path can end
    let has_producer: Vec<bool> = graph
        .node_indices()
        .map(|node| {
            graph
                .neighbors_directed(node, Direction::Incoming)
                .next()
                .is_some()
        })
        .collect();
    let mut roots: Vec<NodeIndex> = Vec::new();
    if options.roots.is_empty() {
        roots.extend(graph.node_indices().filter(|node| !has_producer[node.index()]));
        if roots.is_empty() && n > 0 {
            roots.push(NodeIndex::new(0));
        }
    } else {
        for root in &options.roots {
            match index.get(root.as_str()) {
                Some(&i) => roots.push(NodeIndex::new(i)),
                None => report
                    .violations
                    .push(Violation::UnknownRoot { step: root.clone() }),
            }
        }
    }

    let terminals: Vec<NodeIndex> = graph
        .node_indices()
        .filter(|&node| graph.neighbors(node).next().is_none())
        .collect();
    let reachable = reach(&graph, &roots, n);
    let can_terminate = reach(Reversed(&graph), &terminals, n);
    for i in 0..n {
        if reachable[i] && !can_terminate[i] {
            report.violations.push(Violation::NoReachableTerminal {
                step: steps[i].name.clone(),
            });
        }
    }

    // Cycles need a guard
    let unguarded = graph.filter_map(
        |_, _| Some(()),
        |e, _| (!guarded.contains(&e)).then_some(()),
    );
    let mut cycles: Vec<Vec<usize>> = tarjan_scc(&unguarded)
        .into_iter()
        .filter(|members| members.len() > 1 || unguarded.contains_edge(members[0], members[0]))
        .map(|members| {
            let mut members: Vec<usize> = members.iter().map(|node| node.index()).collect();
            members.sort_unstable();
            members
        })
        .collect();
    cycles.sort_unstable();
    for members in cycles {
        report.violations.push(Violation::UnboundedCycle {
            steps: members.iter().map(|&i| steps[i].name.clone()).collect(),
        });
    }

    // Lints
    for i in 0..n {
        if i != 0 && !has_producer[i] && !roots.contains(&NodeIndex::new(i)) {
            report.warnings.push(Lint::Unreferenced {
                step: steps[i].name.clone(),
            });
        }
    }

    if !report.is_valid() {
        log::debug!("Validation failed: {}", report);
    }
    report
}

fn name_problem(name: &str) -> Option<&'static str> {
    if name.is_empty() {
        Some("name is empty")
    } else if name.contains('.') {
        Some("name contains '.'")
    } else if name.contains(char::is_whitespace) {
        Some("name contains whitespace")
    } else if name.contains('{') || name.contains('}') {
        Some("name contains braces")
    } else {
        None
    }
}

/// Check that `r` names an existing step and a field that step records.
/// Fields of opaque actions are not known and always pass.
fn check_reference(
    step: &str,
    r: &StepRef,
    index: &HashMap<&str, usize>,
    actions: &[Option<Action>],
) -> Option<Violation> {
    let Some(&target) = index.get(r.step.as_str()) else {
        return Some(Violation::DanglingReference {
            step: step.to_string(),
            reference: r.to_string(),
            target: r.step.clone(),
        });
    };
    let fields = actions[target].as_ref()?.result_fields()?;
    let field = r.field.split('.').next().unwrap_or_default();
    (!fields.contains(&field)).then(|| Violation::UnknownResultField {
        step: step.to_string(),
        reference: r.to_string(),
        target: r.step.clone(),
        field: field.to_string(),
    })
}

/// Nodes reachable from any of `starts`
fn reach<G>(graph: G, starts: &[NodeIndex], n: usize) -> Vec<bool>
where
    G: IntoNeighbors<NodeId = NodeIndex> + Visitable<NodeId = NodeIndex>,
{
    let mut seen = vec![false; n];
    let mut dfs = Dfs::empty(graph);
    for &start in starts {
        dfs.move_to(start);
        while let Some(node) = dfs.next(graph) {
            seen[node.index()] = true;
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::action::{EVALUATE, FETCH_OUTPUT};
    use crate::workflow::graph::EdgeDef;
    use serde_json::json;

    fn step(name: &str, edges: Vec<(&str, Option<&str>)>) -> serde_json::Value {
        json!({
            "name": name,
            "actionId": "custom.noop",
            "outboundEdges": edges
                .into_iter()
                .map(|(to, cond)| match cond {
                    Some(c) => json!({"nextStepName": to, "branchName": "x", "condition": c}),
                    None => json!({"nextStepName": to, "branchName": "main"}),
                })
                .collect::<Vec<_>>(),
        })
    }

    fn decision(name: &str, edges: Vec<(&str, Option<&str>)>) -> serde_json::Value {
        let mut value = step(name, edges);
        value["actionId"] = json!(EVALUATE);
        value["parameters"] = json!([
            {"name": "function", "value": "retryDecision"},
            {"name": "input", "value": "{{Steps.Fetch.output}}"},
            {"name": "previous", "value": [format!("{{{{Steps.{}.retryCount}}}}", name)]},
            {"name": "healthyMarker", "value": "active"},
            {"name": "maxRetries", "value": 3}
        ]);
        value
    }

    fn workflow(steps: Vec<serde_json::Value>) -> WorkflowDef {
        serde_json::from_value(json!({ "steps": steps })).unwrap()
    }

    fn check(def: &WorkflowDef) -> ValidationReport {
        validate(def, &ValidationOptions::default())
    }

    #[test]
    fn test_linear_graph_is_valid() {
        let def = workflow(vec![
            step("a", vec![("b", None)]),
            step("b", vec![("c", None)]),
            step("c", vec![]),
        ]);
        let report = check(&def);
        assert!(report.is_valid(), "{}", report);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_duplicates_and_names() {
        let def = workflow(vec![
            step("a", vec![]),
            step("a", vec![]),
            step("bad.name", vec![]),
            step("with space", vec![]),
        ]);
        let report = check(&def);
        assert!(report.violations.contains(&Violation::DuplicateStep {
            name: "a".to_string(),
            count: 2
        }));
        assert_eq!(
            report
                .violations
                .iter()
                .filter(|v| matches!(v, Violation::InvalidStepName { .. }))
                .count(),
            2
        );
    }

    #[test]
    fn test_dangling_edge_and_reference() {
        let mut b = step("b", vec![]);
        b["parameters"] = json!([{"name": "text", "value": "see {{Steps.ghost.output}}"}]);
        let def = workflow(vec![step("a", vec![("nowhere", None), ("b", Some("true"))]), b]);

        let report = check(&def);
        assert!(report.violations.contains(&Violation::DanglingEdge {
            from: "a".to_string(),
            to: "nowhere".to_string()
        }));
        assert!(report.violations.contains(&Violation::DanglingReference {
            step: "b".to_string(),
            reference: "{{Steps.ghost.output}}".to_string(),
            target: "ghost".to_string()
        }));
    }

    #[test]
    fn test_invalid_condition_and_parameters() {
        let mut b = step("b", vec![]);
        b["actionId"] = json!("command.send");
        let def = workflow(vec![step("a", vec![("b", Some("a ==="))]), b]);

        let report = check(&def);
        assert!(report
            .violations
            .iter()
            .any(|v| matches!(v, Violation::InvalidCondition { step, .. } if step == "a")));
        assert!(report.violations.iter().any(|v| matches!(
            v,
            Violation::InvalidParameters { step, message } if step == "b" && message.contains("target")
        )));
    }

    #[test]
    fn test_multiple_producers() {
        let def = workflow(vec![
            step("a", vec![("b", Some("true")), ("c", None)]),
            step("b", vec![("done", None)]),
            step("c", vec![("done", None)]),
            step("done", vec![]),
        ]);
        let report = check(&def);
        assert_eq!(
            report.violations,
            vec![Violation::MultipleProducers {
                step: "done".to_string(),
                producers: vec!["b".to_string(), "c".to_string()]
            }]
        );
    }

    #[test]
    fn test_two_edges_from_one_source_is_one_producer() {
        let def = workflow(vec![
            step("a", vec![("b", Some("true")), ("b", None)]),
            step("b", vec![]),
        ]);
        assert!(check(&def).is_valid());
    }

    #[test]
    fn test_unguarded_cycle() {
        let def = workflow(vec![
            step("start", vec![("a", None)]),
            step("a", vec![("b", None)]),
            step("b", vec![("a", Some("true")), ("end", None)]),
            step("end", vec![]),
        ]);
        let report = check(&def);
        assert!(report.violations.contains(&Violation::UnboundedCycle {
            steps: vec!["a".to_string(), "b".to_string()]
        }));
        // a also has two producers
        assert!(report
            .violations
            .iter()
            .any(|v| matches!(v, Violation::MultipleProducers { step, .. } if step == "a")));
    }

    #[test]
    fn test_guarded_cycle_with_back_edges_allowed() {
        let def = workflow(vec![
            step("start", vec![("issue", None)]),
            step("issue", vec![("decide", None)]),
            decision(
                "decide",
                vec![
                    ("ok", Some("Steps.decide.success == true")),
                    ("issue", Some("Steps.decide.shouldRetry == true")),
                    ("fail", Some("Steps.decide.success == false and Steps.decide.shouldRetry == false")),
                ],
            ),
            step("ok", vec![]),
            step("fail", vec![]),
            step("Fetch", vec![]),
        ]);

        let strict = check(&def);
        assert!(!strict.violations.iter().any(|v| matches!(v, Violation::UnboundedCycle { .. })));
        assert!(strict
            .violations
            .iter()
            .any(|v| matches!(v, Violation::MultipleProducers { step, .. } if step == "issue")));

        let relaxed = validate(
            &def,
            &ValidationOptions {
                roots: vec!["start".to_string()],
                allow_back_edges: true,
            },
        );
        assert!(relaxed.is_valid(), "{}", relaxed);
        assert_eq!(
            relaxed.warnings,
            vec![Lint::Unreferenced {
                step: "Fetch".to_string()
            }]
        );
    }

    #[test]
    fn test_retry_edge_on_other_decision_is_not_a_guard() {
        let def = workflow(vec![
            step("start", vec![("issue", None)]),
            step("issue", vec![("decide", None)]),
            decision(
                "decide",
                vec![
                    ("ok", Some("Steps.decide.success == true")),
                    ("issue", Some("Steps.other.shouldRetry == true")),
                ],
            ),
            step("ok", vec![]),
            step("Fetch", vec![]),
        ]);
        let report = validate(
            &def,
            &ValidationOptions {
                roots: vec![],
                allow_back_edges: true,
            },
        );
        assert!(report
            .violations
            .iter()
            .any(|v| matches!(v, Violation::UnboundedCycle { .. })));
    }

    #[test]
    fn test_counter_must_come_from_the_cycle() {
        let mut decide = decision(
            "decide",
            vec![
                ("ok", Some("Steps.decide.success == true")),
                ("issue", Some("Steps.decide.shouldRetry == true")),
            ],
        );
        decide["parameters"][2]["value"] = json!(["{{Steps.start.retryCount}}"]);
        let def = workflow(vec![
            step("start", vec![("issue", None)]),
            step("issue", vec![("decide", None)]),
            decide,
            step("ok", vec![]),
            step("Fetch", vec![]),
        ]);
        let report = check(&def);
        assert!(report.violations.contains(&Violation::UnboundedCycle {
            steps: vec!["issue".to_string(), "decide".to_string()]
        }));
    }

    #[test]
    fn test_retry_flag_under_or_is_not_a_guard() {
        let def = workflow(vec![
            step("start", vec![("issue", None)]),
            step("issue", vec![("decide", None)]),
            decision(
                "decide",
                vec![
                    ("ok", Some("Steps.decide.success == true")),
                    (
                        "issue",
                        Some("Steps.decide.shouldRetry == true and Steps.decide.success == false or true"),
                    ),
                ],
            ),
            step("ok", vec![]),
            step("Fetch", vec![]),
        ]);
        let report = check(&def);
        assert!(report.violations.contains(&Violation::UnboundedCycle {
            steps: vec!["issue".to_string(), "decide".to_string()]
        }));
    }

    #[test]
    fn test_unknown_result_field() {
        let mut fetch = step("fetch", vec![("decide", None)]);
        fetch["actionId"] = json!(FETCH_OUTPUT);
        fetch["parameters"] = json!([{"name": "commandId", "value": "{{Steps.run.commandId}}"}]);
        let mut decide = decision(
            "decide",
            vec![
                ("ok", Some("Steps.decide.succeeded == true")),
                ("ok", Some("Steps.decide.success == false")),
            ],
        );
        decide["parameters"][1]["value"] = json!("{{Steps.fetch.stdout}}");
        let def = workflow(vec![
            step("run", vec![("fetch", None)]),
            fetch,
            decide,
            step("ok", vec![]),
        ]);

        let report = check(&def);
        assert_eq!(
            report.violations,
            vec![
                Violation::UnknownResultField {
                    step: "decide".to_string(),
                    reference: "{{Steps.fetch.stdout}}".to_string(),
                    target: "fetch".to_string(),
                    field: "stdout".to_string(),
                },
                Violation::UnknownResultField {
                    step: "decide".to_string(),
                    reference: "{{Steps.decide.succeeded}}".to_string(),
                    target: "decide".to_string(),
                    field: "succeeded".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_condition_on_unknown_step() {
        let def = workflow(vec![
            step("a", vec![("b", Some("Steps.ghost.ok == true"))]),
            step("b", vec![]),
        ]);
        assert_eq!(
            check(&def).violations,
            vec![Violation::DanglingReference {
                step: "a".to_string(),
                reference: "{{Steps.ghost.ok}}".to_string(),
                target: "ghost".to_string(),
            }]
        );
    }

    #[test]
    fn test_long_chain() {
        let n = 100_000;
        let steps = (0..n)
            .map(|i| StepDef {
                name: format!("s{}", i),
                action_id: "custom.noop".to_string(),
                parameters: vec![],
                outbound_edges: if i + 1 < n {
                    vec![EdgeDef {
                        next_step_name: format!("s{}", i + 1),
                        branch_name: "main".to_string(),
                        condition: None,
                    }]
                } else {
                    vec![]
                },
            })
            .collect();
        let def = WorkflowDef {
            steps,
            ..Default::default()
        };
        let report = check(&def);
        assert!(report.is_valid(), "{}", report);
    }

    #[test]
    fn test_self_loop_is_unbounded() {
        let def = workflow(vec![step("a", vec![("a", Some("true")), ("b", None)]), step("b", vec![])]);
        let report = check(&def);
        assert!(report.violations.contains(&Violation::UnboundedCycle {
            steps: vec!["a".to_string()]
        }));
    }

    #[test]
    fn test_no_reachable_terminal() {
        let def = workflow(vec![
            step("start", vec![("a", None)]),
            step("a", vec![("b", None)]),
            step("b", vec![("a", None)]),
        ]);
        let report = validate(
            &def,
            &ValidationOptions {
                roots: vec!["start".to_string(), "missing".to_string()],
                allow_back_edges: false,
            },
        );
        for name in ["start", "a", "b"] {
            assert!(
                report.violations.contains(&Violation::NoReachableTerminal {
                    step: name.to_string()
                }),
                "{} should be reported",
                name
            );
        }
        assert!(report.violations.contains(&Violation::UnknownRoot {
            step: "missing".to_string()
        }));
    }

    #[test]
    fn test_report_display() {
        let report = ValidationReport {
            violations: vec![
                Violation::MultipleProducers {
                    step: "x".to_string(),
                    producers: vec!["a".to_string(), "b".to_string()],
                },
                Violation::UnboundedCycle {
                    steps: vec!["c".to_string(), "d".to_string()],
                },
            ],
            warnings: vec![],
        };
        assert_eq!(
            report.to_string(),
            "2 violation(s): step 'x' has 2 producers: a, b; cycle through c, d is not guarded by a retry counter"
        );
    }
}
