// SPDX-License-Identifier: MIT

pub mod action;
pub mod composer;
pub mod condition;
pub mod decision;
pub mod generator;
pub mod graph;
pub mod loader;
pub mod manifest;
pub mod merger;
pub mod policy;
pub mod state;
pub mod trace;
pub mod validator;
