//! Prompt execution
//!
//! Providers for OpenAI-compatible HTTP APIs and local CLI tools, plus the
//! registry the interpreter talks to.
//!
//! # Example
//!
//! ```ignore
//! use prompt_batch::provider::{PromptExecutor, PromptRequest, ProviderRegistry};
//!
//! let registry = ProviderRegistry::from_config(&config)?;
//! let response = registry
//!     .execute(&PromptRequest::new("What is 2+2?").with_provider("openai"))
//!     .await?;
//! println!("{} ({} ms)", response.raw_text, response.turnaround_ms);
//! ```

mod cli;
mod echo;
mod http;
mod registry;
mod types;

pub use cli::CliProvider;
pub use echo::{ECHO_PROVIDER, EchoProvider};
pub use http::HttpProvider;
pub use registry::{ProviderRegistry, create_provider};
pub use types::{PromptExecutor, PromptRequest, PromptResponse, ProviderError, ProviderErrorKind};
