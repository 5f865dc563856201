//! Intent extraction: prompt, invoke under retry, validate.

use std::sync::Arc;

use intake_model::{ModelInvoker, PromptTemplate};
use intake_schema::SchemaValidator;
use intake_shared::{
    ExtractionRequest, RawModelOutput, Result, RetryPolicy, SafeExtractionResult, ValidatedIntent,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::retry::RetryExecutor;

/// Composes the model invoker, retry policy, and schema validator.
///
/// Only the model call is retried. Parsing and schema validation run once
/// on the output of the successful attempt, so a schema failure surfaces
/// immediately instead of burning the retry budget.
pub struct IntentPipeline {
    invoker: Arc<dyn ModelInvoker>,
    validator: Arc<SchemaValidator>,
    prompt: PromptTemplate,
    retry: RetryExecutor,
}

impl IntentPipeline {
    pub fn new(
        invoker: Arc<dyn ModelInvoker>,
        validator: Arc<SchemaValidator>,
        prompt: PromptTemplate,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            invoker,
            validator,
            prompt,
            retry: RetryExecutor::new(policy),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.retry = self.retry.with_cancellation(token);
        self
    }

    /// Extract a validated intent, propagating any typed failure
    /// (`RetryExhausted`, `SchemaValidation`, `InvalidRequest`, `Cancelled`).
    #[instrument(skip_all, fields(schema = %self.validator.version(), prompt = %self.prompt.version()))]
    pub async fn extract_intent(&self, question: &str) -> Result<ValidatedIntent> {
        let raw = self.invoke(question).await?;
        let intent = self.validator.validate_or_throw(&raw)?;
        info!(intent = intent.get_str("intent").unwrap_or("?"), "intent extracted");
        Ok(intent)
    }

    /// Extract an intent without ever failing.
    ///
    /// Invocation failures become a single `system` violation; schema
    /// failures are reported field by field.
    #[instrument(skip_all, fields(schema = %self.validator.version(), prompt = %self.prompt.version()))]
    pub async fn extract_intent_safe(&self, question: &str) -> SafeExtractionResult {
        match self.invoke(question).await {
            Ok(raw) => self.validator.validate(&raw),
            Err(err) => {
                warn!(error = %err, "extraction failed");
                SafeExtractionResult::system_failure(&err)
            }
        }
    }

    async fn invoke(&self, question: &str) -> Result<RawModelOutput> {
        let request = ExtractionRequest::new(question)?;
        let prompt = self.prompt.render(&request);
        self.retry
            .execute(|| self.invoker.invoke(&prompt))
            .await
    }
}
