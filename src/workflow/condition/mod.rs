// SPDX-License-Identifier: MIT

//! Edge condition language
//!
//! Conditions guard outbound edges and read recorded step results:
//! - `Steps.Decide_1.success == true`
//! - `Steps.Decide_1.retryCount < 3`
//! - `Steps.Decide_1.success == false and Steps.Decide_1.shouldRetry == false`
//!
//! The generator builds conditions as [`Expression`] values and renders them
//! with `Display`; the validator and the route tracer parse them back.

mod ast;
mod evaluator;
mod parser;

pub use ast::{CompareOp, Expression, Literal};
pub use evaluator::evaluate;
pub use parser::parse;
