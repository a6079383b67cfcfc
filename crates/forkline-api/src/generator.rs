use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use forkline_core::{GenerationContext, Reply, ReplyGenerator};

/// Reply generator that calls an OpenAI-compatible chat completions endpoint.
pub struct HttpGenerator {
    client: Client,
    url: String,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u64>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    completion_tokens: u32,
}

impl HttpGenerator {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ReplyGenerator for HttpGenerator {
    async fn generate(&self, context: &GenerationContext) -> Result<Reply> {
        let config = &context.model_config;
        let request = CompletionRequest {
            model: &context.model_name,
            messages: context
                .turns
                .iter()
                .map(|(role, content)| ChatMessage {
                    role: role.as_str(),
                    content,
                })
                .collect(),
            temperature: config.get("temperature").and_then(|v| v.as_f64()),
            max_tokens: config.get("maxTokens").and_then(|v| v.as_u64()),
        };
        debug!(
            session_id = context.session_id,
            model = %context.model_name,
            turns = request.messages.len(),
            "Requesting completion"
        );

        let response = self.client.post(&self.url).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Generator returned {}: {}", status, body));
        }

        let body: CompletionResponse = response.json().await?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("Generator response has no content"))?;
        Ok(Reply {
            content,
            token_count: body.usage.map(|u| u.completion_tokens),
        })
    }
}
