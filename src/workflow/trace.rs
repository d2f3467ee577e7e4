// SPDX-License-Identifier: MIT

//! Route tracer
//!
//! Walks a composed graph the way the hosting platform runs it: one step at
//! a time along a single path, recording each step's result and following
//! the first outbound edge whose condition holds. Health-check output comes
//! from a [`HealthSource`], so a scenario can be replayed without a live host.

use serde_json::{json, Value};
use std::collections::VecDeque;

use super::action::Action;
use super::condition::{evaluate, parse};
use super::decision::{decide, RetryState};
use super::graph::{Step, StepGraph};
use super::state::StepResults;
use crate::error::{ComposeError, Result};

/// Source of health-check output
pub trait HealthSource {
    /// Output returned to the given fetch step
    fn output(&mut self, fetch_step: &str) -> String;
}

impl<F> HealthSource for F
where
    F: FnMut(&str) -> String,
{
    fn output(&mut self, fetch_step: &str) -> String {
        self(fetch_step)
    }
}

/// Replays a fixed list of outputs, then repeats the last one
#[derive(Debug, Clone, Default)]
pub struct ScriptedOutputs {
    outputs: VecDeque<String>,
    last: String,
}

impl ScriptedOutputs {
    pub fn new<I, S>(outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            outputs: outputs.into_iter().map(Into::into).collect(),
            last: String::new(),
        }
    }

    pub fn always(output: impl Into<String>) -> Self {
        Self::new([output.into()])
    }
}

impl HealthSource for ScriptedOutputs {
    fn output(&mut self, _fetch_step: &str) -> String {
        if let Some(next) = self.outputs.pop_front() {
            self.last = next;
        }
        self.last.clone()
    }
}

/// How a trace ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceOutcome {
    /// Reached a step without outbound edges
    Terminal(String),
    /// No outbound edge of this step matched
    Stalled(String),
    /// Gave up after the hop limit
    HopLimit,
}

/// Path taken through a graph
#[derive(Debug, Clone)]
pub struct RouteTrace {
    pub visited: Vec<String>,
    pub outcome: TraceOutcome,
    /// Every decision taken, in order
    pub decisions: Vec<(String, RetryState)>,
    pub results: StepResults,
}

impl RouteTrace {
    /// State of the last decision taken
    pub fn final_decision(&self) -> Option<&RetryState> {
        self.decisions.last().map(|(_, state)| state)
    }

    /// Number of times `step` was visited
    pub fn visits(&self, step: &str) -> usize {
        self.visited.iter().filter(|s| *s == step).count()
    }
}

/// Trace the path from `start`, visiting at most `max_hops` steps
pub fn trace(
    graph: &StepGraph,
    start: &str,
    health: &mut dyn HealthSource,
    max_hops: usize,
) -> Result<RouteTrace> {
    let mut current = graph.get(start).ok_or_else(|| ComposeError::missing(start))?;
    let mut visited = Vec::new();
    let mut decisions = Vec::new();
    let mut results = StepResults::empty();

    let outcome = loop {
        if visited.len() >= max_hops {
            log::warn!("Trace from '{}' stopped after {} hops", start, max_hops);
            break TraceOutcome::HopLimit;
        }
        visited.push(current.name.clone());

        let result = run(current, &results, health, &mut decisions)?;
        results.record(&current.name, result);

        if current.is_terminal() {
            break TraceOutcome::Terminal(current.name.clone());
        }

        let next = current.edges.iter().find(|edge| match &edge.condition {
            None => true,
            Some(source) => match parse(source) {
                Ok(expr) => evaluate(&expr, &results),
                Err(e) => {
                    log::warn!("Skipping edge of '{}': {}", current.name, e);
                    false
                }
            },
        });

        match next {
            Some(edge) => {
                log::debug!("{} -> {} ({})", current.name, edge.target, edge.branch);
                current = graph
                    .get(&edge.target)
                    .ok_or_else(|| ComposeError::missing(&edge.target))?;
            }
            None => break TraceOutcome::Stalled(current.name.clone()),
        }
    };

    Ok(RouteTrace {
        visited,
        outcome,
        decisions,
        results,
    })
}

/// Result a step records when it runs
fn run(
    step: &Step,
    results: &StepResults,
    health: &mut dyn HealthSource,
    decisions: &mut Vec<(String, RetryState)>,
) -> Result<Value> {
    let value = match &step.action {
        Action::SendCommand { .. } => json!({ "commandId": step.name }),
        Action::FetchOutput { .. } => json!({ "output": health.output(&step.name) }),
        Action::Evaluate(eval) => {
            let output = match results.resolve(&eval.input) {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            };
            let prior: Option<RetryState> = eval.previous.iter().find_map(|r| {
                results
                    .get(&r.step)
                    .and_then(|v| serde_json::from_value(v.clone()).ok())
            });

            let state = decide(&output, prior.as_ref(), &eval.rule);
            log::debug!("{}: {}", step.name, state.message);
            let value = serde_json::to_value(&state)?;
            decisions.push((step.name.clone(), state));
            value
        }
        Action::SendMessage { text, .. } => json!({ "text": results.render(text) }),
        Action::Opaque { .. } => json!({}),
    };
    Ok(value)
}
