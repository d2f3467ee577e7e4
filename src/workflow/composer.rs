// SPDX-License-Identifier: MIT

//! Workflow composer
//!
//! Applies retry policies to a workflow: generate each chain, merge it into a
//! working copy, then validate the result. The input workflow is never
//! mutated; a composition that breaks an invariant is returned as an error.

use std::collections::HashMap;

use super::generator::generate;
use super::graph::{Step, StepGraph, WorkflowDef};
use super::merger::{merge, ChangeSet};
use super::policy::{LoopStrategy, RetryPolicy};
use super::validator::{validate, Lint, ValidationOptions, ValidationReport};
use crate::error::{ComposeError, Result};

/// Result of a successful composition
#[derive(Debug, Clone)]
pub struct Composition {
    pub workflow: WorkflowDef,
    /// Warnings only; violations abort the composition
    pub report: ValidationReport,
    pub changes: ChangeSet,
}

/// Composes retry chains into workflows
pub struct Composer;

impl Composer {
    /// Apply `policies` in order to a copy of `def`
    pub fn compose(def: &WorkflowDef, policies: &[RetryPolicy]) -> Result<Composition> {
        if policies.is_empty() {
            return Err(ComposeError::policy("at least one retry policy is required"));
        }

        let mut graph = StepGraph::try_from_def(def)?;
        let mut changes = ChangeSet::default();
        // Steps generated earlier in this call
        let mut claimed: HashMap<String, Step> = HashMap::new();

        for policy in policies {
            let chain = generate(&graph, policy)?;
            for step in &chain.steps {
                if let Some(earlier) = claimed.get(&step.name) {
                    if earlier != step {
                        let earlier_anchor = earlier.generated_for.as_deref().unwrap_or_default();
                        let reason = if earlier_anchor == chain.anchor {
                            format!(
                                "generated differently by two policies for '{}'",
                                chain.anchor
                            )
                        } else {
                            format!(
                                "generated differently by the policies for '{}' and '{}'",
                                earlier_anchor, chain.anchor
                            )
                        };
                        return Err(ComposeError::DuplicatePolicyConflict {
                            step: step.name.clone(),
                            reason,
                        });
                    }
                }
            }
            for step in &chain.steps {
                claimed.insert(step.name.clone(), step.clone());
            }

            log::debug!(
                "Applying {:?} policy to '{}' (maxRetries={})",
                policy.loop_strategy,
                policy.anchor_step_name,
                policy.max_retries
            );
            changes.extend(merge(&mut graph, chain, &policy.obsolete_steps)?);
        }

        let composed = graph.to_def();
        let options = ValidationOptions {
            roots: roots(&graph, policies),
            allow_back_edges: policies
                .iter()
                .any(|p| p.loop_strategy == LoopStrategy::Cyclic),
        };
        let mut report = validate(&composed, &options);

        for (step, anchor) in &changes.orphaned {
            if graph.contains(step) && graph.producers(step).is_empty() {
                report.warnings.push(Lint::OrphanedSuccessor {
                    step: step.clone(),
                    anchor: anchor.clone(),
                });
            }
        }

        if !report.is_valid() {
            log::error!("Composition rejected: {}", report);
            return Err(ComposeError::StructuralViolation(report));
        }
        for warning in &report.warnings {
            log::warn!("{}", warning);
        }

        log::info!(
            "Composed {} policies: {} steps ({} added, {} replaced, {} removed)",
            policies.len(),
            graph.len(),
            changes.added.len(),
            changes.replaced.len(),
            changes.removed.len()
        );

        Ok(Composition {
            workflow: composed,
            report,
            changes,
        })
    }
}

/// Entry steps of the graph followed by every anchor
fn roots(graph: &StepGraph, policies: &[RetryPolicy]) -> Vec<String> {
    let mut roots: Vec<String> = graph
        .names()
        .filter(|name| graph.producers(name).is_empty())
        .map(str::to_string)
        .collect();
    for policy in policies {
        if !roots.contains(&policy.anchor_step_name) {
            roots.push(policy.anchor_step_name.clone());
        }
    }
    roots
}
