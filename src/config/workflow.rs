//! Workflow definitions and the definition store

use crate::engine::{Program, ValidationFailure};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// One step of a workflow program
///
/// Steps are tagged by `kind` so a definition reads as a flat list:
///
/// ```toml
/// [[steps]]
/// kind = "for_each"
/// var = "row"
/// collection = "[{a: 1}, {a: 2}]"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum Step {
    /// Assign the value of an expression to a variable
    Set { name: String, expr: String },
    /// Render, execute and parse a prompt from the workflow's prompt library
    Prompt { prompt: String },
    /// Start a conditional block
    If { condition: String },
    /// Start the alternative branch of the enclosing `If`
    Else,
    EndIf,
    /// Iterate a list, binding each element to `var`
    ForEach { var: String, collection: String },
    EndForEach,
    /// Jump to the step carrying the named label
    Goto { label: String },
    Label { name: String },
    /// Append one result row holding the named variables
    Output { fields: Vec<String> },
}

impl Step {
    /// Short name used in logs and error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Step::Set { .. } => "set",
            Step::Prompt { .. } => "prompt",
            Step::If { .. } => "if",
            Step::Else => "else",
            Step::EndIf => "end_if",
            Step::ForEach { .. } => "for_each",
            Step::EndForEach => "end_for_each",
            Step::Goto { .. } => "goto",
            Step::Label { .. } => "label",
            Step::Output { .. } => "output",
        }
    }
}

/// How raw provider text is turned into fields
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParserKind {
    /// Whole trimmed response under the `TEXT` field
    #[default]
    Text,
    /// JSON object found in the response (bare or fenced)
    Json,
    /// Named capture groups of `pattern`
    Regex,
}

/// Response parsing configuration for one prompt
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ParserConfig {
    #[serde(default)]
    pub kind: ParserKind,

    /// Fields that must be present in the parsed result
    #[serde(default)]
    pub fields: Vec<String>,

    /// Regular expression with named groups (regex parser only)
    pub pattern: Option<String>,
}

/// A reusable prompt referenced by `Prompt` steps
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PromptDefinition {
    /// Template text with `{{name}}` or `{{name:type}}` placeholders
    pub template: String,

    /// Provider name (falls back to the configured default)
    pub provider: Option<String>,

    /// Model name passed to the provider
    pub model: Option<String>,

    /// Free-form provider parameters (temperature, max_tokens, ...)
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,

    #[serde(default)]
    pub parser: ParserConfig,
}

/// Full workflow definition
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct WorkflowDefinition {
    /// Workflow name
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Upper bound on executed steps per item
    pub max_steps: Option<usize>,

    /// Prompt library, keyed by name
    #[serde(default)]
    pub prompts: HashMap<String, PromptDefinition>,

    /// Program steps in execution order
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl WorkflowDefinition {
    /// Run the static validation pass without keeping the compiled program
    pub fn validate(&self) -> Result<(), ValidationFailure> {
        Program::compile(self).map(|_| ())
    }
}

/// Source of workflow definitions
pub trait DefinitionStore: Send + Sync {
    /// Load and validate the workflow identified by `id`
    fn load(&self, id: &str) -> Result<WorkflowDefinition>;
}

/// Loads workflows from TOML files
///
/// Search order (first match wins):
/// 1. `id` itself, when it names an existing file
/// 2. `.prompt-batch/workflows/{id}.toml` (project)
/// 3. `~/.config/prompt-batch/workflows/{id}.toml` (user)
#[derive(Debug, Clone, Default)]
pub struct FileDefinitionStore {
    project_dir: Option<PathBuf>,
}

impl FileDefinitionStore {
    pub fn new(project_dir: Option<&Path>) -> Self {
        Self {
            project_dir: project_dir.map(Path::to_path_buf),
        }
    }

    fn candidates(&self, id: &str) -> Vec<PathBuf> {
        let filename = format!("{}.toml", id);
        let mut paths = vec![PathBuf::from(shellexpand::tilde(id).as_ref())];

        let project = self
            .project_dir
            .as_ref()
            .map(|p| p.join(".prompt-batch/workflows"))
            .unwrap_or_else(|| PathBuf::from(".prompt-batch/workflows"));
        paths.push(project.join(&filename));

        if let Some(user_dir) = dirs::config_dir() {
            paths.push(user_dir.join("prompt-batch/workflows").join(&filename));
        }

        paths
    }
}

impl DefinitionStore for FileDefinitionStore {
    fn load(&self, id: &str) -> Result<WorkflowDefinition> {
        let path = self
            .candidates(id)
            .into_iter()
            .find(|p| p.is_file())
            .ok_or_else(|| anyhow::anyhow!("workflow '{}' not found", id))?;

        load_workflow_file(&path)
    }
}

/// Parse and validate a single workflow file
pub fn load_workflow_file(path: &Path) -> Result<WorkflowDefinition> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let workflow: WorkflowDefinition = toml::from_str(&contents)
        .with_context(|| format!("parsing {}", path.display()))?;

    workflow
        .validate()
        .with_context(|| format!("validating {}", path.display()))?;

    tracing::debug!(
        workflow = %workflow.name,
        path = %path.display(),
        steps = workflow.steps.len(),
        "Loaded workflow"
    );

    Ok(workflow)
}
