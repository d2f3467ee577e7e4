// SPDX-License-Identifier: MIT

//! Retry decision function
//!
//! [`decide`] turns a raw health-check output and the previous attempt's
//! [`RetryState`] into the next state. It is total: any string, including
//! empty or garbage output, yields a well-formed state.
//!
//! The synthesizer half of this module builds the evaluation step that binds
//! the function to the preceding fetch and decision steps, together with the
//! three mutually exclusive branch conditions.

use serde::{Deserialize, Serialize};

use super::action::{Action, Evaluation, StepRef};
use super::condition::Expression;
use super::graph::Step;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_HEALTHY_MARKER: &str = "active";

/// Health predicate result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Active,
    Inactive,
}

/// Result recorded by a decision step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryState {
    pub success: bool,
    pub health_status: HealthStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub should_retry: bool,
    pub message: String,
}

/// Which branch a decision takes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Success,
    Retry,
    Failure,
}

impl RetryState {
    pub fn verdict(&self) -> Verdict {
        if self.success {
            Verdict::Success
        } else if self.should_retry {
            Verdict::Retry
        } else {
            Verdict::Failure
        }
    }
}

/// Fixed parameters of the decision function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionRule {
    /// Trimmed output that means "healthy"
    pub healthy_marker: String,
    /// Retry ceiling
    pub max_retries: u32,
}

impl Default for DecisionRule {
    fn default() -> Self {
        Self {
            healthy_marker: DEFAULT_HEALTHY_MARKER.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Compute the next retry state.
///
/// `prior` is the state of the immediately preceding decision, `None` on the
/// first attempt. The retry count only grows on a retry verdict.
pub fn decide(output: &str, prior: Option<&RetryState>, rule: &DecisionRule) -> RetryState {
    let carried = prior.map(|p| p.retry_count).unwrap_or(0);
    let max_retries = rule.max_retries;

    if output.trim() == rule.healthy_marker {
        return RetryState {
            success: true,
            health_status: HealthStatus::Active,
            retry_count: carried,
            max_retries,
            should_retry: false,
            message: format!("Service is healthy after {} retries", carried),
        };
    }

    if carried < max_retries {
        let retry_count = carried + 1;
        RetryState {
            success: false,
            health_status: HealthStatus::Inactive,
            retry_count,
            max_retries,
            should_retry: true,
            message: format!(
                "Service is not healthy, starting retry {} of {}",
                retry_count, max_retries
            ),
        }
    } else {
        RetryState {
            success: false,
            health_status: HealthStatus::Inactive,
            retry_count: carried,
            max_retries,
            should_retry: false,
            message: format!("Service is still not healthy after {} retries", carried),
        }
    }
}

/// Branch conditions of a decision step, in edge order
#[derive(Debug, Clone, PartialEq)]
pub struct BranchConditions {
    pub success: Expression,
    pub retry: Expression,
    pub failure: Expression,
}

impl BranchConditions {
    pub fn for_step(decide_step: &str) -> Self {
        let success = format!("Steps.{}.success", decide_step);
        let retry = format!("Steps.{}.shouldRetry", decide_step);
        Self {
            success: Expression::is(success.clone(), true),
            retry: Expression::is(retry.clone(), true),
            failure: Expression::is(success, false).and(Expression::is(retry, false)),
        }
    }
}

/// Build the evaluation step for one attempt.
///
/// `fetch_step` supplies the raw output; `previous` lists the decision steps
/// whose state is carried over, most recent first. Edges are added by the
/// caller.
pub fn evaluation_step(
    name: &str,
    fetch_step: &str,
    previous: &[String],
    rule: &DecisionRule,
) -> Step {
    Step::new(
        name,
        Action::Evaluate(Evaluation {
            input: StepRef::new(fetch_step, "output"),
            previous: previous
                .iter()
                .map(|p| StepRef::new(p.as_str(), "retryCount"))
                .collect(),
            rule: rule.clone(),
        }),
    )
}
