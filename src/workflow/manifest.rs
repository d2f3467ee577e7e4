// SPDX-License-Identifier: MIT

//! Generation manifest
//!
//! Records which steps were generated for which anchor, rebuilt from the
//! `generatedFor` tags carried by the steps themselves. Re-composing an
//! anchor compares the recorded set with the fresh one and removes whatever
//! the new generation no longer produces.

use std::collections::{BTreeMap, BTreeSet};

use super::graph::StepGraph;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationManifest {
    chains: BTreeMap<String, BTreeSet<String>>,
}

impl GenerationManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect the tagged steps of a graph
    pub fn from_graph(graph: &StepGraph) -> Self {
        let mut manifest = Self::new();
        for step in graph.all() {
            if let Some(anchor) = &step.generated_for {
                manifest.record(anchor, std::iter::once(step.name.clone()));
            }
        }
        manifest
    }

    /// Add step names to an anchor's chain
    pub fn record(&mut self, anchor: &str, names: impl IntoIterator<Item = String>) {
        self.chains
            .entry(anchor.to_string())
            .or_default()
            .extend(names);
    }

    /// Steps recorded for an anchor
    pub fn steps_for(&self, anchor: &str) -> Option<&BTreeSet<String>> {
        self.chains.get(anchor)
    }

    /// Recorded steps of `anchor` missing from `fresh`
    pub fn stale(&self, anchor: &str, fresh: &BTreeSet<String>) -> Vec<String> {
        self.steps_for(anchor)
            .map(|recorded| recorded.difference(fresh).cloned().collect())
            .unwrap_or_default()
    }
}
