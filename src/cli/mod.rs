//! CLI module for prompt-batch
//!
//! This module provides:
//! - Command implementations (run, validate, providers)
//! - Output handlers (console, JSON, quiet)
//! - Signal handling that cancels pending items
//!
//! # Example
//!
//! ```ignore
//! use prompt_batch::cli::{RunOptions, create_handler, run_workflow, OutputMode};
//!
//! let handler = create_handler(OutputMode::Console, false);
//! let options = RunOptions { workflow: "grader".into(), repeat: Some(3), ..Default::default() };
//! let exit_code = run_workflow(options, None, &config, &*handler).await?;
//! ```

pub mod commands;
pub mod output;
pub mod signals;

pub use commands::{
    EXIT_INTERRUPTED, RunOptions, list_providers, resolve_db_path, run_workflow, validate_workflow,
};
pub use output::{OutputEvent, OutputHandler, OutputMode, create_handler};
pub use signals::{CancellationToken, cancel_job_on_shutdown, setup_signal_handlers};
