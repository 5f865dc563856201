//! Versioned prompt templates.

use intake_shared::{ExtractionRequest, IntakeError, PromptLocation, Result};
use tracing::debug;

/// Placeholder replaced with the user's question.
const QUESTION_PLACEHOLDER: &str = "{{question}}";

const BUILTIN_INTENT_V1: &str = r#"You are an intent classifier for a product catalog assistant.
Read the customer question and answer with a single JSON object, no prose.

Fields:
- "intent": one of "product_search", "price_inquiry", "stock_check",
  "datasheet_request", "warranty_lookup", "order_status", "other"
- "product": product name or SKU mentioned, if any
- "category": product category mentioned, if any
- "quantity": integer quantity mentioned, if any
- "confidence": number between 0 and 1

Question: {{question}}
JSON:"#;

/// A prompt template with a `{{question}}` slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    version: String,
    text: String,
}

impl PromptTemplate {
    /// Parse a template, rejecting text without a question slot.
    pub fn new(version: impl Into<String>, text: impl Into<String>) -> Result<Self> {
        let version = version.into();
        let text = text.into();
        if !text.contains(QUESTION_PLACEHOLDER) {
            return Err(IntakeError::config(format!(
                "prompt template {version} has no {QUESTION_PLACEHOLDER} placeholder"
            )));
        }
        Ok(Self { version, text })
    }

    /// Load `<dir>/<name>.<version>.txt`, falling back to the built-in
    /// template when the file does not exist.
    pub fn load(location: &PromptLocation) -> Result<Self> {
        let path = location.file_path();
        match std::fs::read_to_string(&path) {
            Ok(text) => {
                debug!(path = %path.display(), "loaded prompt template");
                Self::new(location.version.clone(), text)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "prompt file missing, using built-in template");
                Ok(Self::builtin())
            }
            Err(e) => Err(IntakeError::io(&path, e)),
        }
    }

    /// The built-in v1 intent template.
    pub fn builtin() -> Self {
        Self {
            version: "v1".into(),
            text: BUILTIN_INTENT_V1.into(),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn render(&self, request: &ExtractionRequest) -> String {
        self.text
            .replace(QUESTION_PLACEHOLDER, request.question().trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn renders_question_into_slot() {
        let template = PromptTemplate::new("v9", "Q: {{question}}\nA:").unwrap();
        let request = ExtractionRequest::new("  What is the warranty period? ").unwrap();
        assert_eq!(template.render(&request), "Q: What is the warranty period?\nA:");
    }

    #[test]
    fn template_without_slot_rejected() {
        let err = PromptTemplate::new("v2", "no slot here").unwrap_err();
        assert!(matches!(err, IntakeError::Config { .. }));
    }

    #[test]
    fn missing_file_falls_back_to_builtin() {
        let location = PromptLocation {
            dir: PathBuf::from("/nonexistent/prompts"),
            name: "intent".into(),
            version: "v1".into(),
        };
        let template = PromptTemplate::load(&location).unwrap();
        assert_eq!(template, PromptTemplate::builtin());
        assert!(template.text.contains("warranty_lookup"));
    }

    #[test]
    fn loads_versioned_file() {
        let dir = std::env::temp_dir().join(format!("intake_prompts_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("intent.v2.txt"), "v2 says {{question}}").unwrap();

        let location = PromptLocation {
            dir: dir.clone(),
            name: "intent".into(),
            version: "v2".into(),
        };
        let template = PromptTemplate::load(&location).unwrap();
        assert_eq!(template.version(), "v2");

        let request = ExtractionRequest::new("hello").unwrap();
        assert_eq!(template.render(&request), "v2 says hello");

        std::fs::remove_dir_all(&dir).ok();
    }
}
