//! Generation service clients.
//!
//! [`OllamaGenerator`] calls `POST {url}/api/chat` with `stream: false`;
//! [`OpenAIGenerator`] calls `POST {url}/v1/chat/completions`. Both send the
//! composed message list as-is and return the assistant text.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use knowledge_chat_core::error::ServiceError;
use knowledge_chat_core::generation::Generator;
use knowledge_chat_core::models::Message;

use crate::config::ModelsConfig;
use crate::http::JsonClient;

const SERVICE: &str = "generation";

fn wire_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
        .collect()
}

pub struct OllamaGenerator {
    http: JsonClient,
    url: String,
    model: String,
    temperature: Option<f32>,
}

impl OllamaGenerator {
    pub fn new(config: &ModelsConfig) -> Result<Self> {
        Ok(Self {
            http: JsonClient::new(SERVICE, config.request_timeout_secs)?,
            url: format!("{}/api/chat", config.base_url()),
            model: config.generation_model.clone(),
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[Message]) -> Result<String, ServiceError> {
        let mut body = json!({
            "model": self.model,
            "messages": wire_messages(messages),
            "stream": false,
        });
        if let Some(t) = self.temperature {
            body["options"] = json!({ "temperature": t });
        }
        let resp = self.http.post(&self.url, &body).await?;
        parse_ollama_chat(&resp)
    }
}

pub struct OpenAIGenerator {
    http: JsonClient,
    url: String,
    model: String,
    temperature: Option<f32>,
}

impl OpenAIGenerator {
    pub fn new(config: &ModelsConfig) -> Result<Self> {
        let key = match std::env::var("OPENAI_API_KEY") {
            Ok(k) if !k.trim().is_empty() => k,
            _ => bail!("OPENAI_API_KEY environment variable not set"),
        };
        Ok(Self {
            http: JsonClient::new(SERVICE, config.request_timeout_secs)?.with_bearer(key),
            url: format!("{}/v1/chat/completions", config.base_url()),
            model: config.generation_model.clone(),
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl Generator for OpenAIGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[Message]) -> Result<String, ServiceError> {
        let mut body = json!({
            "model": self.model,
            "messages": wire_messages(messages),
        });
        if let Some(t) = self.temperature {
            body["temperature"] = json!(t);
        }
        let resp = self.http.post(&self.url, &body).await?;
        parse_openai_chat(&resp)
    }
}

pub struct DisabledGenerator {
    model: String,
}

impl DisabledGenerator {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }
}

#[async_trait]
impl Generator for DisabledGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, _messages: &[Message]) -> Result<String, ServiceError> {
        Err(ServiceError::Disabled {
            service: SERVICE.to_string(),
        })
    }
}

pub fn create_generator(config: &ModelsConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        "openai" => Ok(Arc::new(OpenAIGenerator::new(config)?)),
        "disabled" => Ok(Arc::new(DisabledGenerator::new(&config.generation_model))),
        other => bail!("Unknown model provider: {}", other),
    }
}

fn non_empty(text: &str) -> Result<String, ServiceError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ServiceError::malformed(SERVICE, "empty completion"));
    }
    Ok(text.to_string())
}

/// `{"message": {"role": "assistant", "content": "..."}, "done": true}`
pub fn parse_ollama_chat(json: &Value) -> Result<String, ServiceError> {
    let content = json
        .pointer("/message/content")
        .and_then(|c| c.as_str())
        .ok_or_else(|| ServiceError::malformed(SERVICE, "missing message.content"))?;
    non_empty(content)
}

/// `{"choices": [{"message": {"content": "..."}}]}`
pub fn parse_openai_chat(json: &Value) -> Result<String, ServiceError> {
    let content = json
        .pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .ok_or_else(|| ServiceError::malformed(SERVICE, "missing choices[0].message.content"))?;
    non_empty(content)
}
