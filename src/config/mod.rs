//! Configuration types and loading

mod loader;
mod provider;
mod workflow;

pub use loader::{BatchConfig, Defaults};
pub use provider::ProviderConfig;
pub use workflow::{
    DefinitionStore, FileDefinitionStore, ParserConfig, ParserKind, PromptDefinition, Step,
    WorkflowDefinition, load_workflow_file,
};
