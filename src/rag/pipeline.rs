//! Per-request chat pipeline.
//!
//! `Received → Embedding → Retrieving → OffTopic → Responding → Done`, or
//! `… → Retrieving → OnTopic → Assembling → Generating → Responding → Done`.
//! Off-topic questions never reach the generator.

use std::fmt;
use std::time::Instant;

use serde::Serialize;

use super::context_builder::{ContextBuilder, SourceRef};
use super::error::RagError;
use super::retriever::{Retrieval, Retriever};
use crate::llm::AnswerGenerator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Embedding,
    Retrieving,
    OffTopic,
    OnTopic,
    Assembling,
    Generating,
    Responding,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Received => "received",
            Stage::Embedding => "embedding",
            Stage::Retrieving => "retrieving",
            Stage::OffTopic => "off_topic",
            Stage::OnTopic => "on_topic",
            Stage::Assembling => "assembling",
            Stage::Generating => "generating",
            Stage::Responding => "responding",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

/// One answered question.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatResponse {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub latency_ms: u64,
}

pub struct ChatPipeline {
    retriever: Retriever,
    context_builder: ContextBuilder,
    generator: AnswerGenerator,
    refusal_message: String,
    system_prompt: String,
}

impl ChatPipeline {
    pub fn new(
        retriever: Retriever,
        context_builder: ContextBuilder,
        generator: AnswerGenerator,
        refusal_message: impl Into<String>,
    ) -> Self {
        let system_prompt = generator.system_prompt();
        Self {
            retriever,
            context_builder,
            generator,
            refusal_message: refusal_message.into(),
            system_prompt,
        }
    }

    pub fn model(&self) -> &str {
        self.generator.model()
    }

    pub async fn answer(&self, question: &str) -> Result<ChatResponse, RagError> {
        let started = Instant::now();
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::InvalidInput("question is empty".to_string()));
        }
        trace_stage(Stage::Received);

        trace_stage(Stage::Embedding);
        let vector = self.retriever.embed_query(question).await?;

        trace_stage(Stage::Retrieving);
        let (answer, sources) = match self.retriever.search(question, &vector).await? {
            Retrieval::OffTopic { best_score } => {
                trace_stage(Stage::OffTopic);
                tracing::info!("Refusing off-topic question (best score {:.3})", best_score);
                (self.refusal_message.clone(), Vec::new())
            }
            Retrieval::OnTopic(result) => {
                trace_stage(Stage::OnTopic);
                tracing::debug!(
                    "Retrieved {} chunks (best score {:.3})",
                    result.hits.len(),
                    result.best_score
                );

                trace_stage(Stage::Assembling);
                let context = self.context_builder.build(&result)?;
                let sources = self.context_builder.sources(&result);

                trace_stage(Stage::Generating);
                let answer = self
                    .generator
                    .generate(&self.system_prompt, &context, question)
                    .await?;
                (answer, sources)
            }
        };

        trace_stage(Stage::Responding);
        let response = ChatResponse {
            answer,
            sources,
            latency_ms: started.elapsed().as_millis() as u64,
        };
        trace_stage(Stage::Done);
        Ok(response)
    }
}

fn trace_stage(stage: Stage) {
    tracing::debug!(stage = %stage, "chat pipeline");
}
