use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};
use crate::llm::{CompletionModel, CompletionRequest, GenerationConfig};
use crate::policy::PromptPolicy;
use crate::vector_db::RetrievedContext;

/// Composes policy, context and question into one completion call.
#[derive(Clone)]
pub struct AnswerGenerator {
    model: Arc<dyn CompletionModel>,
    policy: PromptPolicy,
    config: GenerationConfig,
}

impl AnswerGenerator {
    pub fn new(model: Arc<dyn CompletionModel>, policy: PromptPolicy, config: GenerationConfig) -> Self {
        Self {
            model,
            policy,
            config,
        }
    }

    pub fn policy(&self) -> &PromptPolicy {
        &self.policy
    }

    pub fn build_request(&self, question: &str, context: &RetrievedContext) -> CompletionRequest {
        CompletionRequest {
            system: self.policy.system_prompt(context),
            user: question.to_string(),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        }
    }

    /// Returns the model output as is, minus surrounding whitespace.
    pub async fn generate(&self, question: &str, context: &RetrievedContext) -> Result<String> {
        if question.trim().is_empty() {
            return Err(Error::InvalidInput("question cannot be empty".into()));
        }

        let request = self.build_request(question, context);
        debug!(
            "Generating with {} from {} context chunks",
            self.model.model_id(),
            context.len()
        );
        let answer = self.model.complete(&request).await?;
        Ok(answer.trim().to_string())
    }
}
