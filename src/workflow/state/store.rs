// SPDX-License-Identifier: MIT

//! Runtime storage of step results

use serde_json::Value;
use std::collections::HashMap;

use crate::workflow::action::StepRef;

/// Results recorded per step, addressed as `Steps.<step>.<field>`
#[derive(Debug, Clone, Default)]
pub struct StepResults {
    steps: HashMap<String, Value>,
}

impl StepResults {
    /// Create an empty record
    pub fn empty() -> Self {
        Self::default()
    }

    /// Record the result of a step, replacing an earlier visit
    pub fn record(&mut self, step: &str, value: Value) {
        self.steps.insert(step.to_string(), value);
    }

    /// Get the whole result of a step
    pub fn get(&self, step: &str) -> Option<&Value> {
        self.steps.get(step)
    }

    /// Get a nested value using dot notation (e.g., "Steps.Decide_1.retryCount")
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        if parts.next()? != "Steps" {
            return None;
        }

        let mut current = self.steps.get(parts.next()?)?;
        for part in parts {
            current = current.get(part)?;
        }
        Some(current)
    }

    /// Resolve a typed reference
    pub fn resolve(&self, r: &StepRef) -> Option<&Value> {
        self.get_path(&r.path())
    }

    /// Substitute every `{{Steps.<step>.<field>}}` in a template.
    ///
    /// Unresolvable references render as an empty string.
    pub fn render(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find("}}") else {
                out.push_str(&rest[start..]);
                return out;
            };
            let inner = after[..end].trim();
            if let Some(r) = StepRef::from_path(inner) {
                if let Some(value) = self.resolve(&r) {
                    match value {
                        Value::String(s) => out.push_str(s),
                        Value::Null => {}
                        other => out.push_str(&other.to_string()),
                    }
                }
            } else {
                out.push_str(&rest[start..start + 2 + end + 2]);
            }
            rest = &after[end + 2..];
        }
        out.push_str(rest);
        out
    }
}
