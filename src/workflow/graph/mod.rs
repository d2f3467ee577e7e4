// SPDX-License-Identifier: MIT

//! Automation step graph
//!
//! `types` holds the wire shape exchanged with the platform, `model` the
//! typed in-memory graph the composer transforms.

mod model;
pub mod types;

pub use model::{Edge, Step, StepGraph};
pub use types::{EdgeDef, ParameterDef, StepDef, WorkflowDef};
