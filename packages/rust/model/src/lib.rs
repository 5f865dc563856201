//! Model invocation: the [`ModelInvoker`] seam, its Ollama HTTP
//! implementation, and versioned prompt templates.
//!
//! The invoker returns model text untouched. Interpreting it is the schema
//! validator's job.

mod ollama;
mod prompt;

use async_trait::async_trait;
use intake_shared::{RawModelOutput, Result};

pub use ollama::OllamaInvoker;
pub use prompt::PromptTemplate;

/// Sends a prompt to a language model and returns its raw output.
///
/// Implementations enforce their own timeout and report it as
/// [`IntakeError::InvocationTimeout`](intake_shared::IntakeError::InvocationTimeout);
/// every other transport failure is
/// [`IntakeError::Invocation`](intake_shared::IntakeError::Invocation).
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    async fn invoke(&self, prompt: &str) -> Result<RawModelOutput>;
}
