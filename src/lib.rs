// SPDX-License-Identifier: MIT

//! Step-graph composer for health-check-and-remediate retry loops.
//!
//! Takes an automation graph, synthesizes a bounded retry sub-graph after an
//! anchor step, merges it back and validates the result before it is handed
//! to a [`store::GraphStore`].

pub mod error;
pub mod store;
pub mod workflow;

pub use error::{ComposeError, Result};
