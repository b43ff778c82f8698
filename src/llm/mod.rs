//! Text generation: provider abstraction, retry policy, answer generator.

pub mod generator;
pub mod openai;
pub mod provider;
pub mod retry;
pub mod types;

pub use generator::{AnswerGenerator, INSUFFICIENT_CONTEXT_REPLY};
pub use openai::OpenAiCompatProvider;
pub use provider::{LlmProvider, ProviderError};
pub use retry::RetryPolicy;
pub use types::{ChatMessage, ChatRequest};
