//! Prompt templating
//!
//! Jinja-compatible templates rendered with minijinja. Prompts may write
//! placeholders as `{{name}}` or with a type hint as `{{name:type}}`; the
//! hint is stripped before rendering and each name binds one value from the
//! item's environment.
//!
//! # Example
//!
//! ```ignore
//! use prompt_batch::template::{TemplateEngine, TemplateRenderer};
//!
//! let engine = TemplateEngine::new();
//! let prompt = engine.render("Grade this answer: {{ answer:str }}", &variables)?;
//! ```

mod engine;
mod errors;
mod filters;

pub use engine::{TemplateEngine, TemplateRenderer, normalize_placeholders, validate_template};
pub use errors::{SourceLocation, TemplateError, suggest_correction};
