// SPDX-License-Identifier: MIT

//! Retry subgraph generator
//!
//! Builds the chain of steps that verifies an anchor step and retries the
//! remediation until the service is healthy or the retry ceiling is hit.
//! One attempt is five steps:
//!
//! ```text
//! IssueCommand_n -> FetchResult_n -> Decide_n -+-> Notify_Success_n   (success)
//!                                              +-> IssueCommand_n+1   (retry)
//!                                              +-> Notify_Failure_n   (failure)
//! ```
//!
//! Notification steps carry the attempt suffix too. Sharing one terminal
//! between attempts would give it several producers.

use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

use super::action::{refs_in, refs_in_value, Action, StepRef};
use super::decision::{evaluation_step, BranchConditions, DecisionRule};
use super::graph::{Edge, Step, StepGraph};
use super::policy::{LoopStrategy, RetryPolicy};
use crate::error::{ComposeError, Result};

/// Attempt a generated step belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Iteration {
    /// The n-th attempt, starting at 1
    Attempt(u32),
    /// The shared loop chain of the cyclic strategy
    Loop,
}

impl fmt::Display for Iteration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Iteration::Attempt(n) => write!(f, "{}", n),
            Iteration::Loop => write!(f, "Loop"),
        }
    }
}

/// Naming scheme for generated steps
#[derive(Debug, Clone)]
pub struct ChainNames {
    prefix: String,
}

impl ChainNames {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn name(&self, base: &str, it: Iteration) -> String {
        format!("{}{}_{}", self.prefix, base, it)
    }

    pub fn issue(&self, it: Iteration) -> String {
        self.name("IssueCommand", it)
    }

    pub fn fetch(&self, it: Iteration) -> String {
        self.name("FetchResult", it)
    }

    pub fn decide(&self, it: Iteration) -> String {
        self.name("Decide", it)
    }

    pub fn notify_success(&self, it: Iteration) -> String {
        self.name("Notify_Success", it)
    }

    pub fn notify_failure(&self, it: Iteration) -> String {
        self.name("Notify_Failure", it)
    }
}

/// Steps generated for one anchor
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedChain {
    pub anchor: String,
    /// First verification step; the anchor's main edge points here
    pub entry: String,
    pub strategy: LoopStrategy,
    pub steps: Vec<Step>,
}

impl GeneratedChain {
    /// Names of all generated steps
    pub fn names(&self) -> BTreeSet<String> {
        self.steps.iter().map(|s| s.name.clone()).collect()
    }
}

/// Generate the retry chain for `policy` against `graph`.
///
/// Fails with `MissingDependency` when the anchor, or a step referenced by
/// the command target or the commands, does not exist.
pub fn generate(graph: &StepGraph, policy: &RetryPolicy) -> Result<GeneratedChain> {
    policy.validate()?;

    let anchor = graph
        .get(&policy.anchor_step_name)
        .ok_or_else(|| ComposeError::missing(&policy.anchor_step_name))?;
    let target = resolve_target(anchor, policy)?;
    check_references(graph, policy, &target)?;

    let builder = AttemptBuilder {
        names: ChainNames::new(policy.prefix()),
        anchor: &anchor.name,
        policy,
        target,
        rule: policy.decision_rule(),
    };
    let names = &builder.names;

    let mut steps = Vec::new();
    match policy.loop_strategy {
        LoopStrategy::Unrolled => {
            // maxRetries + 1 decisions; the last one can only succeed or fail
            let last = policy.max_retries + 1;
            for n in 1..=last {
                let previous = if n == 1 {
                    vec![]
                } else {
                    vec![names.decide(Iteration::Attempt(n - 1))]
                };
                let retry_to = (n < last).then(|| names.issue(Iteration::Attempt(n + 1)));
                steps.extend(builder.attempt(Iteration::Attempt(n), &previous, retry_to));
            }
        }
        LoopStrategy::Cyclic => {
            let first = Iteration::Attempt(1);
            let looped = policy.max_retries > 0;
            steps.extend(builder.attempt(
                first,
                &[],
                looped.then(|| names.issue(Iteration::Loop)),
            ));
            if looped {
                // On the first pass the loop decision has no record of its own yet
                let previous = vec![names.decide(Iteration::Loop), names.decide(first)];
                steps.extend(builder.attempt(
                    Iteration::Loop,
                    &previous,
                    Some(names.issue(Iteration::Loop)),
                ));
            }
        }
    }

    if steps.iter().any(|s| s.name == anchor.name) {
        return Err(ComposeError::policy(format!(
            "anchor '{}' collides with a generated step name",
            anchor.name
        )));
    }

    for step in &mut steps {
        step.generated_for = Some(anchor.name.clone());
    }

    log::debug!(
        "Generated {} steps for anchor '{}' ({:?}, maxRetries={})",
        steps.len(),
        anchor.name,
        policy.loop_strategy,
        policy.max_retries
    );

    Ok(GeneratedChain {
        anchor: anchor.name.clone(),
        entry: names.issue(Iteration::Attempt(1)),
        strategy: policy.loop_strategy,
        steps,
    })
}

fn resolve_target(anchor: &Step, policy: &RetryPolicy) -> Result<Value> {
    if let Some(target) = &policy.target {
        return Ok(target.clone());
    }
    match &anchor.action {
        Action::SendCommand { target, .. } => Ok(target.clone()),
        _ => Err(ComposeError::policy(format!(
            "anchor '{}' is not a command step and the policy names no target",
            anchor.name
        ))),
    }
}

fn check_references(graph: &StepGraph, policy: &RetryPolicy, target: &Value) -> Result<()> {
    let refs = refs_in_value(target)
        .into_iter()
        .chain(refs_in(&policy.health_check_command))
        .chain(refs_in(&policy.remediation_command));

    for r in refs {
        if !graph.contains(&r.step) {
            return Err(ComposeError::missing(r.step));
        }
    }
    Ok(())
}

struct AttemptBuilder<'a> {
    names: ChainNames,
    anchor: &'a str,
    policy: &'a RetryPolicy,
    target: Value,
    rule: DecisionRule,
}

impl AttemptBuilder<'_> {
    /// Five steps of one attempt; `retry_to` is the retry branch target
    fn attempt(&self, it: Iteration, previous: &[String], retry_to: Option<String>) -> Vec<Step> {
        let issue = self.names.issue(it);
        let fetch = self.names.fetch(it);
        let decide = self.names.decide(it);
        let success = self.names.notify_success(it);
        let failure = self.names.notify_failure(it);

        // The anchor has just remediated; the first attempt only checks
        let command = match it {
            Iteration::Attempt(1) => self.policy.health_check_command.clone(),
            _ => format!(
                "{}\n{}",
                self.policy.remediation_command, self.policy.health_check_command
            ),
        };

        let issue_step = Step::new(
            issue.as_str(),
            Action::SendCommand {
                target: self.target.clone(),
                command,
            },
        )
        .with_edge(Edge::main(fetch.as_str()));

        let fetch_step = Step::new(
            fetch.as_str(),
            Action::FetchOutput {
                command: StepRef::new(issue.as_str(), "commandId"),
            },
        )
        .with_edge(Edge::main(decide.as_str()));

        let branches = BranchConditions::for_step(&decide);
        let mut decide_step = evaluation_step(&decide, &fetch, previous, &self.rule)
            .with_edge(Edge::when(success.as_str(), "success", branches.success.to_string()));
        if let Some(next) = retry_to {
            decide_step = decide_step.with_edge(Edge::when(next, "retry", branches.retry.to_string()));
        }
        decide_step = decide_step.with_edge(Edge::when(
            failure.as_str(),
            "failure",
            branches.failure.to_string(),
        ));

        let success_step = Step::new(
            success,
            Action::SendMessage {
                channel: self.policy.notify_channel.clone(),
                text: format!(
                    "{} verified: {}",
                    self.anchor,
                    StepRef::new(decide.as_str(), "message")
                ),
            },
        );

        let failure_step = Step::new(
            failure,
            Action::SendMessage {
                channel: self.policy.notify_channel.clone(),
                text: format!(
                    "{} remediation failed after {} retries: {}",
                    self.anchor,
                    StepRef::new(decide.as_str(), "retryCount"),
                    StepRef::new(decide.as_str(), "message")
                ),
            },
        );

        vec![issue_step, fetch_step, decide_step, success_step, failure_step]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn graph_with_anchor() -> StepGraph {
        let mut graph = StepGraph::new();
        graph.upsert(
            Step::new(
                "Find_Agent",
                Action::Opaque {
                    action_id: "inventory.lookup".to_string(),
                    parameters: vec![],
                },
            )
            .with_edge(Edge::main("Restart_Service")),
        );
        graph.upsert(Step::new(
            "Restart_Service",
            Action::SendCommand {
                target: json!("{{Steps.Find_Agent.agentId}}"),
                command: "systemctl restart tomcat".to_string(),
            },
        ));
        graph
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(
            "Restart_Service",
            "systemctl is-active tomcat",
            "systemctl restart tomcat",
        )
    }

    fn step<'a>(chain: &'a GeneratedChain, name: &str) -> &'a Step {
        chain
            .steps
            .iter()
            .find(|s| s.name == name)
            .unwrap_or_else(|| panic!("step {} not generated", name))
    }

    #[test]
    fn test_unrolled_generates_one_chain_per_attempt() {
        let chain = generate(&graph_with_anchor(), &policy()).unwrap();

        // maxRetries = 3 -> 4 attempts of 5 steps
        assert_eq!(chain.steps.len(), 20);
        assert_eq!(chain.entry, "IssueCommand_1");
        assert!(chain.names().contains("Notify_Failure_4"));
        assert!(!chain.names().contains("IssueCommand_5"));
        assert!(chain
            .steps
            .iter()
            .all(|s| s.generated_for.as_deref() == Some("Restart_Service")));
    }

    #[test]
    fn test_decide_edges_and_counter_wiring() {
        let chain = generate(&graph_with_anchor(), &policy()).unwrap();

        let d2 = step(&chain, "Decide_2");
        let targets: Vec<_> = d2.targets().collect();
        assert_eq!(targets, vec!["Notify_Success_2", "IssueCommand_3", "Notify_Failure_2"]);
        match &d2.action {
            Action::Evaluate(eval) => {
                assert_eq!(eval.input, StepRef::new("FetchResult_2", "output"));
                assert_eq!(eval.previous, vec![StepRef::new("Decide_1", "retryCount")]);
            }
            other => panic!("Expected Evaluate, got {:?}", other),
        }

        let d1 = step(&chain, "Decide_1");
        match &d1.action {
            Action::Evaluate(eval) => assert!(eval.previous.is_empty()),
            other => panic!("Expected Evaluate, got {:?}", other),
        }

        // Last attempt has no retry branch
        let d4 = step(&chain, "Decide_4");
        assert_eq!(
            d4.targets().collect::<Vec<_>>(),
            vec!["Notify_Success_4", "Notify_Failure_4"]
        );
    }

    #[test]
    fn test_commands_per_attempt() {
        let chain = generate(&graph_with_anchor(), &policy()).unwrap();

        match &step(&chain, "IssueCommand_1").action {
            Action::SendCommand { target, command } => {
                assert_eq!(target, &json!("{{Steps.Find_Agent.agentId}}"));
                assert_eq!(command, "systemctl is-active tomcat");
            }
            other => panic!("Expected SendCommand, got {:?}", other),
        }
        match &step(&chain, "IssueCommand_2").action {
            Action::SendCommand { command, .. } => {
                assert_eq!(command, "systemctl restart tomcat\nsystemctl is-active tomcat");
            }
            other => panic!("Expected SendCommand, got {:?}", other),
        }
    }

    #[test]
    fn test_cyclic_layout() {
        let chain = generate(
            &graph_with_anchor(),
            &policy().with_strategy(LoopStrategy::Cyclic),
        )
        .unwrap();

        assert_eq!(chain.steps.len(), 10);
        let d1 = step(&chain, "Decide_1");
        assert!(d1.targets().any(|t| t == "IssueCommand_Loop"));

        let loop_decide = step(&chain, "Decide_Loop");
        assert!(loop_decide.targets().any(|t| t == "IssueCommand_Loop"));
        match &loop_decide.action {
            Action::Evaluate(eval) => assert_eq!(
                eval.previous,
                vec![
                    StepRef::new("Decide_Loop", "retryCount"),
                    StepRef::new("Decide_1", "retryCount"),
                ]
            ),
            other => panic!("Expected Evaluate, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_retries() {
        for strategy in [LoopStrategy::Unrolled, LoopStrategy::Cyclic] {
            let chain = generate(
                &graph_with_anchor(),
                &policy().with_max_retries(0).with_strategy(strategy),
            )
            .unwrap();
            assert_eq!(chain.steps.len(), 5);
            assert_eq!(step(&chain, "Decide_1").edges.len(), 2);
        }
    }

    #[test]
    fn test_prefix_applies_to_every_step() {
        let chain = generate(&graph_with_anchor(), &policy().with_prefix("Tomcat_")).unwrap();
        assert_eq!(chain.entry, "Tomcat_IssueCommand_1");
        assert!(chain.steps.iter().all(|s| s.name.starts_with("Tomcat_")));
    }

    #[test]
    fn test_missing_anchor() {
        let err = generate(&StepGraph::new(), &policy()).unwrap_err();
        match err {
            ComposeError::MissingDependency { step } => assert_eq!(step, "Restart_Service"),
            other => panic!("Expected MissingDependency, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_upstream_target_step() {
        let mut graph = graph_with_anchor();
        graph.remove("Find_Agent");
        match generate(&graph, &policy()).unwrap_err() {
            ComposeError::MissingDependency { step } => assert_eq!(step, "Find_Agent"),
            other => panic!("Expected MissingDependency, got {:?}", other),
        }
    }

    #[test]
    fn test_anchor_without_target() {
        let mut graph = StepGraph::new();
        graph.upsert(Step::new(
            "Restart_Service",
            Action::Opaque {
                action_id: "rmm.script.run".to_string(),
                parameters: vec![],
            },
        ));

        assert!(matches!(
            generate(&graph, &policy()),
            Err(ComposeError::InvalidPolicy(_))
        ));

        let chain = generate(&graph, &policy().with_target(json!("host-7"))).unwrap();
        match &chain.steps[0].action {
            Action::SendCommand { target, .. } => assert_eq!(target, &json!("host-7")),
            other => panic!("Expected SendCommand, got {:?}", other),
        }
    }

    #[test]
    fn test_iteration_display() {
        assert_eq!(Iteration::Attempt(3).to_string(), "3");
        assert_eq!(Iteration::Loop.to_string(), "Loop");
        assert_eq!(ChainNames::new("").notify_success(Iteration::Loop), "Notify_Success_Loop");
    }
}
