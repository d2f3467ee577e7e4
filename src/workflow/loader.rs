//! Policy loader - YAML/JSON file loading and parsing
//!
//! This module handles loading retry policies from configuration files. A
//! file holds either a single policy or a list of them.

use serde::Deserialize;
use std::fs;
use std::path::Path;

use super::policy::RetryPolicy;
use crate::error::Result;

#[derive(Deserialize)]
#[serde(untagged)]
enum PolicyFile {
    Many(Vec<RetryPolicy>),
    One(Box<RetryPolicy>),
}

/// Loads retry policies from YAML (or JSON) files
pub struct PolicyLoader;

impl PolicyLoader {
    pub fn new() -> Self {
        Self
    }

    /// Load policies from a file
    pub fn load_policies<P: AsRef<Path>>(&self, path: P) -> Result<Vec<RetryPolicy>> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let policies = Self::parse_yaml(&content)?;
        log::debug!(
            "Loaded {} retry policies from {}",
            policies.len(),
            path.display()
        );
        Ok(policies)
    }

    /// Parse policies from a YAML string; JSON is accepted as well
    pub fn parse_yaml(content: &str) -> Result<Vec<RetryPolicy>> {
        let file: PolicyFile = serde_yaml::from_str(content)?;
        let policies = match file {
            PolicyFile::Many(list) => list,
            PolicyFile::One(policy) => vec![*policy],
        };

        for policy in &policies {
            policy.validate()?;
        }
        Ok(policies)
    }
}

impl Default for PolicyLoader {
    fn default() -> Self {
        Self::new()
    }
}
