// SPDX-License-Identifier: MIT

//! Retry policy configuration
//!
//! A policy names the anchor step, the commands to run and how the retry
//! loop is laid out. Policies are caller-supplied and never persisted.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::decision::{DecisionRule, DEFAULT_HEALTHY_MARKER, DEFAULT_MAX_RETRIES};
use crate::error::{ComposeError, Result};

/// Upper bound accepted for `maxRetries`
pub const MAX_RETRY_CEILING: u32 = 50;

/// How retry attempts are laid out in the graph
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LoopStrategy {
    /// One chain of steps per attempt; every step has a single producer
    #[default]
    Unrolled,
    /// One loop chain revisited through a counter-guarded back-edge
    Cyclic,
}

/// Retry policy for one anchor step
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Step after which health verification starts
    pub anchor_step_name: String,
    /// Command whose trimmed output equals `healthy_marker` when healthy
    pub health_check_command: String,
    /// Command re-run before each retry
    pub remediation_command: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub loop_strategy: LoopStrategy,
    #[serde(default = "default_healthy_marker")]
    pub healthy_marker: String,
    /// Command target; defaults to the anchor's own target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Value>,
    /// Prefix for every generated step name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_prefix: Option<String>,
    /// Chat channel for success/failure notifications
    #[serde(default = "default_notify_channel")]
    pub notify_channel: String,
    /// Legacy steps to delete when composing
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub obsolete_steps: Vec<String>,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_healthy_marker() -> String {
    DEFAULT_HEALTHY_MARKER.to_string()
}

fn default_notify_channel() -> String {
    "ops".to_string()
}

impl RetryPolicy {
    /// Create a policy with default retry settings
    pub fn new(
        anchor_step_name: impl Into<String>,
        health_check_command: impl Into<String>,
        remediation_command: impl Into<String>,
    ) -> Self {
        Self {
            anchor_step_name: anchor_step_name.into(),
            health_check_command: health_check_command.into(),
            remediation_command: remediation_command.into(),
            max_retries: default_max_retries(),
            loop_strategy: LoopStrategy::default(),
            healthy_marker: default_healthy_marker(),
            target: None,
            step_prefix: None,
            notify_channel: default_notify_channel(),
            obsolete_steps: Vec::new(),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_strategy(mut self, strategy: LoopStrategy) -> Self {
        self.loop_strategy = strategy;
        self
    }

    pub fn with_target(mut self, target: Value) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.step_prefix = Some(prefix.into());
        self
    }

    pub fn with_obsolete(mut self, steps: &[&str]) -> Self {
        self.obsolete_steps = steps.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Rule baked into every generated decision step
    pub fn decision_rule(&self) -> DecisionRule {
        DecisionRule {
            healthy_marker: self.healthy_marker.clone(),
            max_retries: self.max_retries,
        }
    }

    /// Prefix for generated names, empty when unset
    pub fn prefix(&self) -> &str {
        self.step_prefix.as_deref().unwrap_or("")
    }

    /// Reject policies that cannot produce a usable graph
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("anchorStepName", &self.anchor_step_name),
            ("healthCheckCommand", &self.health_check_command),
            ("remediationCommand", &self.remediation_command),
            ("healthyMarker", &self.healthy_marker),
            ("notifyChannel", &self.notify_channel),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ComposeError::policy(format!("{} must not be blank", field)));
            }
        }

        if self.max_retries > MAX_RETRY_CEILING {
            return Err(ComposeError::policy(format!(
                "maxRetries {} exceeds the ceiling of {}",
                self.max_retries, MAX_RETRY_CEILING
            )));
        }

        if let Some(prefix) = &self.step_prefix {
            if prefix.contains(|c: char| c == '.' || c.is_whitespace()) {
                return Err(ComposeError::policy(format!(
                    "stepPrefix '{}' must not contain dots or whitespace",
                    prefix
                )));
            }
        }

        if self.obsolete_steps.contains(&self.anchor_step_name) {
            return Err(ComposeError::policy(format!(
                "anchor '{}' is listed as obsolete",
                self.anchor_step_name
            )));
        }

        if matches!(self.target, Some(Value::Null)) {
            return Err(ComposeError::policy("target must not be null"));
        }

        Ok(())
    }
}
