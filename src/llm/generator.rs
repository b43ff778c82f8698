use std::sync::Arc;

use super::provider::LlmProvider;
use super::retry::RetryPolicy;
use super::types::{ChatMessage, ChatRequest};
use crate::core::config::GeneratorSettings;
use crate::rag::RagError;

/// Sentence the model must use when the context does not answer the question.
pub const INSUFFICIENT_CONTEXT_REPLY: &str =
    "I don't have enough information in our policies to answer that question.";

/// Turns a question plus assembled context into a grounded answer.
pub struct AnswerGenerator {
    provider: Arc<dyn LlmProvider>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    max_answer_words: usize,
    retry: RetryPolicy,
}

impl AnswerGenerator {
    pub fn new(provider: Arc<dyn LlmProvider>, settings: &GeneratorSettings) -> Self {
        Self {
            provider,
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            max_answer_words: settings.max_answer_words,
            retry: RetryPolicy::from_settings(settings),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn system_prompt(&self) -> String {
        format!(
            "You are a helpful HR assistant for Acme Corporation. You answer questions about \
company policies and procedures using ONLY the provided context.\n\n\
Rules:\n\
1. Use only the information in the context. Never invent policies.\n\
2. If the context does not contain the answer, reply exactly: \"{INSUFFICIENT_CONTEXT_REPLY}\"\n\
3. Cite every policy document you used as [Source: document_name], where document_name is \
the file name shown in the context header.\n\
4. Keep the answer clear and professional, under {} words.\n\
5. For topics outside company policy, politely redirect the user to HR.",
            self.max_answer_words
        )
    }

    /// Sends one chat completion and returns the model's text verbatim.
    ///
    /// Transient provider failures are retried per the retry policy; running
    /// out of retries or a permanent failure is a [`RagError::Generation`].
    pub async fn generate(
        &self,
        system: &str,
        context: &str,
        question: &str,
    ) -> Result<String, RagError> {
        let request = ChatRequest::new(vec![
            ChatMessage::system(system),
            ChatMessage::user(user_prompt(context, question)),
        ])
        .with_sampling(self.temperature, self.max_tokens);

        let label = format!("{} chat completion", self.provider.name());
        self.retry
            .run(&label, |_| self.provider.chat(request.clone(), &self.model))
            .await
            .map_err(|e| RagError::Generation(e.to_string()))
    }
}

fn user_prompt(context: &str, question: &str) -> String {
    format!(
        "Answer the user's question from the policy documents below.\n\n\
CONTEXT:\n{context}\n\n\
USER QUESTION: {question}\n\n\
Cite your sources."
    )
}
