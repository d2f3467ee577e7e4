// SPDX-License-Identifier: MIT

//! Recorded step results
//!
//! Under the single-path execution model every step records one result
//! object once it completes; a step visited again overwrites its previous
//! result. Edge conditions and message templates read from this record.

mod store;

pub use store::StepResults;
