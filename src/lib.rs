//! Batch runner for prompt workflows
//!
//! A workflow is a small program of control-flow and prompt steps. It runs
//! once, a fixed number of times, or once per dataset row, on a bounded pool
//! of workers with per-item status tracking and cancellation of pending work.

pub mod cli;
pub mod config;
pub mod engine;
pub mod job;
pub mod logging;
pub mod parser;
pub mod provider;
pub mod store;
pub mod template;
