// SPDX-License-Identifier: MIT

//! Typed error handling for remedy-rs
//!
//! Every fallible operation of the composer returns [`ComposeError`]. Structural
//! problems are collected into a [`ValidationReport`] instead of being raised one
//! at a time, so a caller can show all of them in one pass.

use thiserror::Error;

use crate::workflow::validator::ValidationReport;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, ComposeError>;

/// Top-level error type for remedy-rs
#[derive(Debug, Error)]
pub enum ComposeError {
    /// An anchor or upstream step the composition depends on is absent
    #[error("Missing dependency: step '{step}' does not exist")]
    MissingDependency { step: String },

    /// The graph breaks one or more structural invariants
    #[error("Structural violation: {0}")]
    StructuralViolation(ValidationReport),

    /// Two policies generate the same step with different content
    #[error("Policy conflict on step '{step}': {reason}")]
    DuplicatePolicyConflict { step: String, reason: String },

    /// A step's parameters do not match the schema of its action
    #[error("Invalid step '{step}': {message}")]
    InvalidStep { step: String, message: String },

    /// Retry policy is unusable (blank commands, out-of-range limits, ...)
    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    /// Edge condition could not be parsed
    #[error("Condition error: {0}")]
    Condition(String),

    /// I/O errors
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl ComposeError {
    /// Create a missing dependency error
    pub fn missing(step: impl Into<String>) -> Self {
        Self::MissingDependency { step: step.into() }
    }

    /// Create an invalid step error
    pub fn invalid_step(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidStep {
            step: step.into(),
            message: message.into(),
        }
    }

    /// Create an invalid policy error
    pub fn policy(message: impl Into<String>) -> Self {
        Self::InvalidPolicy(message.into())
    }

    /// Create a condition error
    pub fn condition(message: impl Into<String>) -> Self {
        Self::Condition(message.into())
    }

    /// The validation report carried by a structural violation, if any
    pub fn report(&self) -> Option<&ValidationReport> {
        match self {
            Self::StructuralViolation(report) => Some(report),
            _ => None,
        }
    }
}
