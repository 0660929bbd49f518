//! Workflow engine
//!
//! A workflow is a flat list of tagged steps. [`Program::compile`] checks
//! that blocks nest, resolves labels, parses every expression and records a
//! jump target for each control-flow step. [`Interpreter::run`] then executes
//! the program for one item, following those targets with a program counter.
//!
//! ```ignore
//! let program = Program::compile(&definition)?;
//! let outcome = interpreter.run(&program, bindings).await;
//! for row in &outcome.output_rows {
//!     println!("{row:?}");
//! }
//! ```

mod env;
mod error;
mod expr;
mod interpreter;
mod program;

pub use env::{Environment, LOOP_NAMESPACE, PARSED_NAMESPACE, RESERVED_NAMES, ROW_NAMESPACE};
pub use error::{
    ErrorCategory, ErrorDetail, FailureKind, RuntimeError, StepFailure, ValidationError,
    ValidationFailure,
};
pub use expr::{Expr, SyntaxError, is_truthy, parse as parse_expression, type_name, values_equal};
pub use interpreter::{DEFAULT_MAX_STEPS, Interpreter, ItemOutcome};
pub use program::{Instruction, JumpTable, Program};
