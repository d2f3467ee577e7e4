// SPDX-License-Identifier: MIT

//! Graph merger
//!
//! Integrates a generated chain into the working graph:
//! - generated steps replace same-named steps
//! - steps of an earlier generation that the new one no longer produces are
//!   removed, as are the policy's obsolete steps
//! - unrelated steps are left untouched
//! - the anchor's main edge is redirected to the chain's entry

use super::generator::GeneratedChain;
use super::graph::{Edge, StepGraph};
use super::manifest::GenerationManifest;
use crate::error::{ComposeError, Result};

/// What a merge changed, by step name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub added: Vec<String>,
    pub replaced: Vec<String>,
    pub removed: Vec<String>,
    /// Former successors of an anchor left without any producer
    pub orphaned: Vec<(String, String)>,
}

impl ChangeSet {
    /// True when no step was added or removed
    pub fn is_structurally_unchanged(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    pub fn extend(&mut self, other: ChangeSet) {
        self.added.extend(other.added);
        self.replaced.extend(other.replaced);
        self.removed.extend(other.removed);
        self.orphaned.extend(other.orphaned);
    }
}

/// Merge `chain` into `graph`.
///
/// `obsolete` lists legacy steps to delete regardless of the manifest.
pub fn merge(graph: &mut StepGraph, chain: GeneratedChain, obsolete: &[String]) -> Result<ChangeSet> {
    let manifest = GenerationManifest::from_graph(graph);
    let fresh = chain.names();

    for step in &chain.steps {
        let Some(existing) = graph.get(&step.name) else {
            continue;
        };
        if let Some(owner) = existing.generated_for.as_deref() {
            if owner != chain.anchor && existing != step {
                return Err(ComposeError::DuplicatePolicyConflict {
                    step: step.name.clone(),
                    reason: format!(
                        "already generated for anchor '{}' with different parameters",
                        owner
                    ),
                });
            }
        }
    }

    let mut changes = ChangeSet::default();

    let mut doomed = manifest.stale(&chain.anchor, &fresh);
    for name in obsolete {
        if !fresh.contains(name) && !doomed.contains(name) {
            doomed.push(name.clone());
        }
    }
    for name in doomed {
        if graph.remove(&name).is_some() {
            log::info!("Removed obsolete step '{}'", name);
            changes.removed.push(name);
        }
    }

    for step in chain.steps {
        let name = step.name.clone();
        match graph.upsert(step) {
            Some(_) => changes.replaced.push(name),
            None => changes.added.push(name),
        }
    }

    let anchor = graph
        .get_mut(&chain.anchor)
        .ok_or_else(|| ComposeError::missing(&chain.anchor))?;
    let previous = anchor.set_main_edge(Edge::main(chain.entry.as_str()));

    if let Some(prev) = previous {
        if prev != chain.entry
            && !fresh.contains(&prev)
            && graph.contains(&prev)
            && graph.producers(&prev).is_empty()
        {
            log::warn!(
                "Step '{}' lost its only producer when '{}' was rewired",
                prev,
                chain.anchor
            );
            changes.orphaned.push((prev, chain.anchor.clone()));
        }
    }

    log::debug!(
        "Merged chain for '{}': {} added, {} replaced, {} removed",
        chain.anchor,
        changes.added.len(),
        changes.replaced.len(),
        changes.removed.len()
    );

    Ok(changes)
}
