//! Generation service trait.

use async_trait::async_trait;

use crate::error::ServiceError;
use crate::models::Message;

/// Turns a chat-formatted prompt into a completion.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Model identifier (e.g. `"gemma3:4b"`).
    fn model_name(&self) -> &str;

    /// Complete the conversation in `messages`, returning the assistant's
    /// reply text.
    async fn complete(&self, messages: &[Message]) -> Result<String, ServiceError>;
}
