//! Error types for workflow validation and execution

use crate::parser::ParseError;
use crate::provider::ProviderError;
use crate::template::TemplateError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A structural or syntactic problem found before any item runs
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("step {step}: '{kind}' has no open '{expected}'")]
    Unopened {
        step: usize,
        kind: &'static str,
        expected: &'static str,
    },

    #[error("step {step}: '{kind}' closes the '{open_kind}' opened at step {opened_at}")]
    Crossed {
        step: usize,
        kind: &'static str,
        open_kind: &'static str,
        opened_at: usize,
    },

    #[error("step {step}: second 'else' in the 'if' opened at step {opened_at}")]
    DuplicateElse { step: usize, opened_at: usize },

    #[error("step {step}: '{kind}' is never closed")]
    Unclosed { step: usize, kind: &'static str },

    #[error("step {step}: label '{label}' already defined at step {first}")]
    DuplicateLabel {
        step: usize,
        label: String,
        first: usize,
    },

    #[error("step {step}: goto targets unknown label '{label}'")]
    DanglingGoto { step: usize, label: String },

    #[error("step {step}: goto jumps into the loop around label '{label}'")]
    GotoIntoLoop { step: usize, label: String },

    #[error("step {step}: '{name}' is reserved and cannot be assigned")]
    ReservedName { step: usize, name: String },

    #[error("step {step}: invalid expression '{source_text}': {message}")]
    Expression {
        step: usize,
        source_text: String,
        message: String,
    },

    #[error("step {step}: unknown prompt '{prompt}'")]
    UnknownPrompt { step: usize, prompt: String },

    #[error("prompt '{prompt}': {message}")]
    InvalidPrompt { prompt: String, message: String },

    #[error("step {step}: output lists no fields")]
    EmptyOutput { step: usize },
}

/// Every validation error found in one workflow
#[derive(Debug, Clone, Error)]
#[error("workflow '{workflow}' is invalid:\n  {}", .errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n  "))]
pub struct ValidationFailure {
    pub workflow: String,
    pub errors: Vec<ValidationError>,
}

/// Expression evaluation failures; each is fatal for the affected item
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RuntimeError {
    #[error("undefined variable '{name}'")]
    UndefinedVariable { name: String },

    #[error("'{op}' needs numeric operands, got {left} and {right}")]
    NonNumericComparison {
        op: &'static str,
        left: String,
        right: String,
    },

    #[error("'{op}' cannot be applied to {found}")]
    TypeMismatch { op: &'static str, found: String },

    #[error("division by zero")]
    DivisionByZero,

    #[error("index {index} out of range for list of length {len}")]
    IndexOutOfRange { index: i64, len: usize },

    #[error("cannot iterate over {found}")]
    NotIterable { found: String },

    #[error("result of '{op}' is not a finite number")]
    NotFinite { op: &'static str },

    #[error("step budget of {limit} exhausted")]
    StepLimitExceeded { limit: usize },
}

/// The collaborator or evaluation error that stopped an item
#[derive(Debug, Error)]
pub enum FailureKind {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl FailureKind {
    pub fn category(&self) -> ErrorCategory {
        match self {
            FailureKind::Runtime(_) => ErrorCategory::Runtime,
            FailureKind::Template(_) => ErrorCategory::Template,
            FailureKind::Provider(_) => ErrorCategory::Provider,
            FailureKind::Parse(_) => ErrorCategory::Parse,
        }
    }
}

/// Full context for an item failure
#[derive(Debug, Error)]
#[error("step {step} ({step_kind}) failed: {kind}")]
pub struct StepFailure {
    pub step: usize,
    pub step_kind: &'static str,
    #[source]
    pub kind: FailureKind,
}

impl StepFailure {
    pub fn new(step: usize, step_kind: &'static str, kind: impl Into<FailureKind>) -> Self {
        Self {
            step,
            step_kind,
            kind: kind.into(),
        }
    }

    /// Flatten into the record kept by the job tracker
    pub fn to_detail(&self) -> ErrorDetail {
        ErrorDetail {
            category: self.kind.category(),
            step: Some(self.step),
            message: self.kind.to_string(),
        }
    }
}

/// Error families recorded per item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Runtime,
    Template,
    Provider,
    Parse,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCategory::Runtime => "runtime",
            ErrorCategory::Template => "template",
            ErrorCategory::Provider => "provider",
            ErrorCategory::Parse => "parse",
        };
        f.write_str(name)
    }
}

/// Serializable failure record stored with a job item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub category: ErrorCategory,
    pub step: Option<usize>,
    pub message: String,
}

impl std::fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.step {
            Some(step) => write!(f, "[{}] step {}: {}", self.category, step, self.message),
            None => write!(f, "[{}] {}", self.category, self.message),
        }
    }
}
