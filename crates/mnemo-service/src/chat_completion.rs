//! Transform and filter backed by an OpenAI-compatible chat completions API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, header};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, ServiceError};
use crate::filter::{FilterCandidate, ResultFilter};
use crate::transform::TextTransform;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_TIMEOUT_SECS: u64 = 60;

const PII_PROMPT: &str = "Rewrite the user's text with all personally identifying information \
(names, email addresses, phone numbers, street addresses, account numbers) replaced by \
placeholders such as [NAME] or [EMAIL]. Keep everything else exactly as written. \
Reply with the rewritten text only.";

const FILTER_PROMPT: &str = "You select which stored memories are relevant to a search query. \
You receive the query, optional context, and a JSON array of candidates with ids. \
Reply with a JSON array containing only the ids of relevant candidates, e.g. [\"mem_1\"]. \
Reply with [] if none are relevant.";

// ─────────────────────────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────────────────────────

/// Connection settings for a chat completions endpoint.
#[derive(Debug, Clone)]
pub struct ChatCompletionConfig {
    /// Bearer token; optional for local servers.
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

impl Default for ChatCompletionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl ChatCompletionConfig {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key,
            ..Self::default()
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

/// Minimal single-turn chat completions client.
#[derive(Debug, Clone)]
pub struct ChatCompletionClient {
    client: Client,
    config: ChatCompletionConfig,
}

impl ChatCompletionClient {
    pub fn new(config: ChatCompletionConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ServiceError::Transform(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    /// Send one system + user exchange and return the reply text.
    pub async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: 0.0,
        };

        debug!(model = %self.config.model, "Sending chat completion request");

        let mut builder = self
            .client
            .post(self.completions_url())
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(ref api_key) = self.config.api_key {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {api_key}"));
        }

        let response = builder
            .json(&request)
            .send()
            .await
            .map_err(|e| ServiceError::Transform(format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Transform(format!("HTTP {status}: {body}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Transform(format!("Bad response body: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ServiceError::Transform("Response has no content".to_string()))
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Transform and filter
// ─────────────────────────────────────────────────────────────────────────────

/// Strips personal data by asking the model to rewrite the text.
#[derive(Debug, Clone)]
pub struct ChatCompletionTransform {
    client: ChatCompletionClient,
}

impl ChatCompletionTransform {
    pub fn new(client: ChatCompletionClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TextTransform for ChatCompletionTransform {
    async fn transform(&self, text: &str) -> Result<String> {
        let rewritten = self.client.complete(PII_PROMPT, text).await?;
        let rewritten = rewritten.trim();
        if rewritten.is_empty() {
            return Err(ServiceError::Transform("Model returned empty text".to_string()));
        }
        Ok(rewritten.to_string())
    }

    fn name(&self) -> &str {
        "chat-completion"
    }
}

/// Asks the model which candidates are relevant.
#[derive(Debug, Clone)]
pub struct ChatCompletionFilter {
    client: ChatCompletionClient,
}

impl ChatCompletionFilter {
    pub fn new(client: ChatCompletionClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ResultFilter for ChatCompletionFilter {
    async fn select(
        &self,
        query: &str,
        candidates: &[FilterCandidate],
        context: Option<&str>,
    ) -> Result<Vec<String>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let listing = serde_json::to_string(candidates)
            .map_err(|e| ServiceError::Transform(e.to_string()))?;
        let mut prompt = format!("Query: {query}\n");
        if let Some(context) = context {
            prompt.push_str(&format!("Context: {context}\n"));
        }
        prompt.push_str(&format!("Candidates: {listing}"));

        let reply = self.client.complete(FILTER_PROMPT, &prompt).await?;
        parse_selected_ids(&reply, candidates)
    }

    fn name(&self) -> &str {
        "chat-completion"
    }
}

/// Pull the JSON id array out of a model reply, keeping only known ids.
///
/// Tolerates surrounding prose and code fences.
pub fn parse_selected_ids(reply: &str, candidates: &[FilterCandidate]) -> Result<Vec<String>> {
    let (Some(start), Some(end)) = (reply.find('['), reply.rfind(']')) else {
        return Err(ServiceError::Transform(format!(
            "No id list in filter reply: {reply}"
        )));
    };
    if end < start {
        return Err(ServiceError::Transform(format!(
            "No id list in filter reply: {reply}"
        )));
    }

    let ids: Vec<String> = serde_json::from_str(&reply[start..=end])
        .map_err(|e| ServiceError::Transform(format!("Bad id list in filter reply: {e}")))?;

    Ok(ids
        .into_iter()
        .filter(|id| candidates.iter().any(|c| &c.id == id))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn candidate(id: &str) -> FilterCandidate {
        FilterCandidate {
            id: id.to_string(),
            content: format!("content of {id}"),
            similarity_score: 0.5,
        }
    }

    fn reply(content: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": content } }]
        })
    }

    async fn client_for(server: &MockServer) -> ChatCompletionClient {
        ChatCompletionClient::new(
            ChatCompletionConfig::new(Some("sk-test".into())).with_base_url(server.uri()),
        )
        .unwrap()
    }

    #[test]
    fn test_parse_selected_ids() {
        let candidates = vec![candidate("mem_1"), candidate("mem_2")];
        let ids = parse_selected_ids(
            "Sure:\n```json\n[\"mem_2\", \"mem_9\"]\n```",
            &candidates,
        )
        .unwrap();
        assert_eq!(ids, vec!["mem_2"]);
        assert!(parse_selected_ids("none of them", &candidates).is_err());
        assert!(parse_selected_ids("[1, 2]", &candidates).is_err());
    }

    #[tokio::test]
    async fn test_transform_returns_rewritten_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply("Email [EMAIL]\n")))
            .expect(1)
            .mount(&server)
            .await;

        let transform = ChatCompletionTransform::new(client_for(&server).await);
        let out = transform.transform("Email bob@example.com").await.unwrap();
        assert_eq!(out, "Email [EMAIL]");
    }

    #[tokio::test]
    async fn test_filter_selects_ids() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply("[\"b\"]")))
            .mount(&server)
            .await;

        let filter = ChatCompletionFilter::new(client_for(&server).await);
        let ids = filter
            .select("q", &[candidate("a"), candidate("b")], Some("ctx"))
            .await
            .unwrap();
        assert_eq!(ids, vec!["b"]);
    }

    #[tokio::test]
    async fn test_http_error_is_transform_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let transform = ChatCompletionTransform::new(client_for(&server).await);
        assert!(matches!(
            transform.transform("x").await,
            Err(ServiceError::Transform(_))
        ));
    }
}
