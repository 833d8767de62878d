//! Client for the external locator suggestion service.
//!
//! The service is any OpenAI-compatible chat completion endpoint (ollama,
//! llama.cpp, vLLM, hosted APIs). It receives the failed locator, what the
//! element is, and a bounded page excerpt, and answers with a JSON object:
//!
//! ```json
//! {"locator": "[data-testid=login]", "confidence": 0.9, "alternatives": []}
//! ```
//!
//! Transport failures are [`SuggestionError`]s; answers that do not have that
//! shape parse to `None`. The resolver treats both as "no suggestion".

use crate::config::SuggestionConfig;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};
use std::time::Duration;
use tracing::debug;

const SYSTEM_PROMPT: &str = "You repair broken UI test locators. \
Given a locator that no longer matches, a description of the element, and an \
excerpt of the current page markup, reply with only a JSON object of the form \
{\"locator\": \"<css selector>\", \"confidence\": <0.0-1.0>, \"alternatives\": [\"<css selector>\", ...]}. \
Prefer stable attributes such as data-testid, id, name and aria-label.";

/// What the resolver sends to the suggestion service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionRequest {
    /// Locator that failed to resolve
    pub failed_locator: String,
    /// Human-readable description of the element
    pub description: String,
    /// Bounded excerpt of the current page markup
    pub page_excerpt: String,
}

impl SuggestionRequest {
    /// Create a new request
    #[must_use]
    pub fn new(
        failed_locator: impl Into<String>,
        description: impl Into<String>,
        page_excerpt: impl Into<String>,
    ) -> Self {
        Self {
            failed_locator: failed_locator.into(),
            description: description.into(),
            page_excerpt: page_excerpt.into(),
        }
    }

    /// Render the request as the user turn of a chat prompt
    #[must_use]
    pub fn to_prompt(&self) -> String {
        format!(
            "Failed locator: {}\nElement: {}\nPage excerpt:\n{}",
            self.failed_locator, self.description, self.page_excerpt
        )
    }
}

/// A well-formed answer from the suggestion service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestionResponse {
    /// Suggested replacement locator, never empty
    pub locator: String,
    /// Service's confidence in `locator`, within `0.0..=1.0`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Further candidate locators
    #[serde(default)]
    pub alternatives: Vec<String>,
}

impl SuggestionResponse {
    /// Parse the service's textual answer.
    ///
    /// The JSON object may stand alone, sit in a Markdown code fence, or be
    /// surrounded by prose. Returns `None` unless the first object found has a
    /// non-empty string `locator`, an optional number `confidence` in
    /// `0.0..=1.0`, and an optional list of strings `alternatives`.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let value = first_json_object(text)?;
        Self::from_value(&value)
    }

    fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;

        let locator = obj.get("locator")?.as_str()?.trim();
        if locator.is_empty() {
            return None;
        }

        let confidence = match obj.get("confidence") {
            None | Some(Value::Null) => None,
            Some(v) => {
                let c = v.as_f64()?;
                if !(0.0..=1.0).contains(&c) {
                    return None;
                }
                Some(c)
            }
        };

        let alternatives = match obj.get("alternatives") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| item.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()?,
            Some(_) => return None,
        };

        Some(Self {
            locator: locator.to_string(),
            confidence,
            alternatives,
        })
    }
}

fn fence_regex() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").ok())
        .as_ref()
}

/// First JSON value starting at a `{` in `text`, preferring fenced blocks
fn first_json_object(text: &str) -> Option<Value> {
    if let Some(fence) = fence_regex() {
        for caps in fence.captures_iter(text) {
            if let Some(v) = caps.get(1).and_then(|body| scan_for_object(body.as_str())) {
                return Some(v);
            }
        }
    }
    scan_for_object(text)
}

fn scan_for_object(text: &str) -> Option<Value> {
    text.match_indices('{').find_map(|(start, _)| {
        serde_json::Deserializer::from_str(&text[start..])
            .into_iter::<Value>()
            .next()
            .and_then(Result::ok)
            .filter(Value::is_object)
    })
}

/// Errors talking to the suggestion service
#[derive(Debug, thiserror::Error)]
pub enum SuggestionError {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server returned an error status
    #[error("API error {status}: {body}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
    },

    /// Server answered without any content
    #[error("Suggestion service returned no content")]
    EmptyResponse,

    /// The call did not finish within the resolution timeout
    #[error("Suggestion service timed out after {ms}ms")]
    Timeout {
        /// Timeout in milliseconds
        ms: u64,
    },

    /// Service cannot be used
    #[error("Suggestion service unavailable: {0}")]
    Unavailable(String),
}

/// Contract with the suggestion service
#[async_trait]
pub trait SuggestionClient: Send + Sync {
    /// Ask for a replacement locator; returns the raw answer text
    async fn suggest(&self, request: &SuggestionRequest) -> Result<String, SuggestionError>;
}

/// Chat message role
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System prompt
    System,
    /// User message
    User,
    /// Assistant response
    Assistant,
}

/// A single chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author role
    pub role: Role,
    /// Message text
    pub content: String,
}

impl ChatMessage {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Chat completion request body
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    /// Model identifier
    pub model: String,
    /// Conversation
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Always `false`; the client reads whole responses
    pub stream: bool,
}

/// One completion choice
#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    /// Generated message
    pub message: ChatMessage,
}

/// Chat completion response body
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    /// Model that answered
    #[serde(default)]
    pub model: String,
    /// Generated choices
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

/// Suggestion client backed by an OpenAI-compatible chat completion API
#[derive(Debug, Clone)]
pub struct LlmSuggestionClient {
    base_url: String,
    model: String,
    temperature: f64,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl LlmSuggestionClient {
    /// Create a client with a default request timeout
    #[must_use]
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_timeout(base_url, model, Duration::from_secs(30))
    }

    /// Create a client whose HTTP requests time out after `timeout`
    #[must_use]
    pub fn with_timeout(
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            temperature: 0.0,
            api_key: None,
            client,
        }
    }

    /// Create a client from configuration
    #[must_use]
    pub fn from_config(config: &SuggestionConfig) -> Self {
        let mut client = Self::with_timeout(&config.base_url, &config.model, config.timeout())
            .with_temperature(config.temperature);
        client.api_key.clone_from(&config.api_key);
        client
    }

    /// Set sampling temperature
    #[must_use]
    pub const fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// Send a bearer token with each request
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Base URL without trailing slash
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Model name
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Try the service, returning the first path that answered with success
    pub async fn health_check(&self) -> Result<&'static str, SuggestionError> {
        for path in ["/health", "/v1/models", "/"] {
            let url = format!("{}{path}", self.base_url);
            if let Ok(resp) = self.client.get(&url).send().await {
                if resp.status().is_success() {
                    debug!(%url, "suggestion service reachable");
                    return Ok(path);
                }
            }
        }
        Err(SuggestionError::Unavailable(format!(
            "no health endpoint responded at {}",
            self.base_url
        )))
    }

    fn chat_request(&self, request: &SuggestionRequest) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::new(Role::System, SYSTEM_PROMPT),
                ChatMessage::new(Role::User, request.to_prompt()),
            ],
            temperature: Some(self.temperature),
            stream: false,
        }
    }
}

#[async_trait]
impl SuggestionClient for LlmSuggestionClient {
    async fn suggest(&self, request: &SuggestionRequest) -> Result<String, SuggestionError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = self.chat_request(request);

        let mut builder = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let resp = builder.send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SuggestionError::ApiError {
                status: status.as_u16(),
                body,
            });
        }

        let response: ChatResponse = resp.json().await?;
        let content = response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(SuggestionError::EmptyResponse)?;
        debug!(model = %response.model, chars = content.len(), "suggestion received");
        Ok(content)
    }
}

#[derive(Debug, Clone)]
enum MockReply {
    Text(String),
    Fail(String),
}

/// Scripted suggestion client for tests
#[derive(Debug)]
pub struct MockSuggestionClient {
    reply: MockReply,
    delay: Duration,
    calls: AtomicUsize,
    requests: Mutex<Vec<SuggestionRequest>>,
}

impl MockSuggestionClient {
    fn with_reply(reply: MockReply) -> Self {
        Self {
            reply,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Always answer with `text`
    #[must_use]
    pub fn responding(text: impl Into<String>) -> Self {
        Self::with_reply(MockReply::Text(text.into()))
    }

    /// Always fail as an unavailable service
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_reply(MockReply::Fail(message.into()))
    }

    /// Take `delay` before answering
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of `suggest` calls
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests received, in order
    #[must_use]
    pub fn requests(&self) -> Vec<SuggestionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl SuggestionClient for MockSuggestionClient {
    async fn suggest(&self, request: &SuggestionRequest) -> Result<String, SuggestionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.reply {
            MockReply::Text(text) => Ok(text.clone()),
            MockReply::Fail(message) => Err(SuggestionError::Unavailable(message.clone())),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    mod parse_tests {
        use super::*;

        #[test]
        fn test_plain_object() {
            let r = SuggestionResponse::parse(
                r#"{"locator": "[data-testid=login]", "confidence": 0.9, "alternatives": []}"#,
            )
            .unwrap();
            assert_eq!(r.locator, "[data-testid=login]");
            assert_eq!(r.confidence, Some(0.9));
            assert!(r.alternatives.is_empty());
        }

        #[test]
        fn test_locator_only() {
            let r = SuggestionResponse::parse(r##"{"locator": "#submit"}"##).unwrap();
            assert_eq!(r.locator, "#submit");
            assert_eq!(r.confidence, None);
        }

        #[test]
        fn test_locator_is_trimmed() {
            let r = SuggestionResponse::parse(r##"{"locator": "  #submit \n"}"##).unwrap();
            assert_eq!(r.locator, "#submit");
        }

        #[test]
        fn test_fenced_block() {
            let text = "Here you go:\n```json\n{\"locator\": \"button.primary\", \"alternatives\": [\"#go\"]}\n```\nGood luck.";
            let r = SuggestionResponse::parse(text).unwrap();
            assert_eq!(r.locator, "button.primary");
            assert_eq!(r.alternatives, vec!["#go".to_string()]);
        }

        #[test]
        fn test_object_inside_prose() {
            let text = r#"The best match is {"locator": "a.nav-home"} based on the markup."#;
            assert_eq!(SuggestionResponse::parse(text).unwrap().locator, "a.nav-home");
        }

        #[test]
        fn test_missing_locator() {
            assert!(SuggestionResponse::parse(r#"{"confidence": 0.9}"#).is_none());
        }

        #[test]
        fn test_empty_locator() {
            assert!(SuggestionResponse::parse(r#"{"locator": "   "}"#).is_none());
        }

        #[test]
        fn test_non_string_locator() {
            assert!(SuggestionResponse::parse(r#"{"locator": 42}"#).is_none());
        }

        #[test]
        fn test_non_object() {
            assert!(SuggestionResponse::parse(r##"["#a", "#b"]"##).is_none());
            assert!(SuggestionResponse::parse("\"#a\"").is_none());
            assert!(SuggestionResponse::parse("I could not find it.").is_none());
            assert!(SuggestionResponse::parse("").is_none());
        }

        #[test]
        fn test_confidence_out_of_range() {
            assert!(SuggestionResponse::parse(r##"{"locator": "#a", "confidence": 1.5}"##).is_none());
            assert!(
                SuggestionResponse::parse(r##"{"locator": "#a", "confidence": "high"}"##).is_none()
            );
        }

        #[test]
        fn test_bad_alternatives() {
            assert!(
                SuggestionResponse::parse(r##"{"locator": "#a", "alternatives": "#b"}"##).is_none()
            );
            assert!(
                SuggestionResponse::parse(r##"{"locator": "#a", "alternatives": [1]}"##).is_none()
            );
        }

        #[test]
        fn test_skips_unbalanced_brace() {
            let text = r##"oops { not json, then {"locator": "#ok"}"##;
            assert_eq!(SuggestionResponse::parse(text).unwrap().locator, "#ok");
        }
    }

    mod llm_client_tests {
        use super::*;

        #[test]
        fn test_strips_trailing_slash() {
            let client = LlmSuggestionClient::new("http://localhost:11434/", "llama3");
            assert_eq!(client.base_url(), "http://localhost:11434");
            assert_eq!(client.model(), "llama3");
        }

        #[test]
        fn test_from_config() {
            let config = SuggestionConfig {
                base_url: "http://svc:8080/".into(),
                model: "qwen".into(),
                api_key: Some("k".into()),
                ..SuggestionConfig::default()
            };
            let client = LlmSuggestionClient::from_config(&config);
            assert_eq!(client.base_url(), "http://svc:8080");
            assert_eq!(client.api_key.as_deref(), Some("k"));
        }

        #[test]
        fn test_chat_request_body() {
            let client = LlmSuggestionClient::new("http://x", "m");
            let req = SuggestionRequest::new("#login-button", "Login button", "<form></form>");
            let body = serde_json::to_value(client.chat_request(&req)).unwrap();
            assert_eq!(body["model"], "m");
            assert_eq!(body["stream"], false);
            assert_eq!(body["messages"][0]["role"], "system");
            let user = body["messages"][1]["content"].as_str().unwrap();
            assert!(user.contains("#login-button"));
            assert!(user.contains("Login button"));
            assert!(user.contains("<form></form>"));
        }

        #[test]
        fn test_response_without_metadata() {
            let json = r#"{"choices":[{"message":{"role":"assistant","content":"{}"}}]}"#;
            let resp: ChatResponse = serde_json::from_str(json).unwrap();
            assert_eq!(resp.choices[0].message.content, "{}");
        }

        #[test]
        fn test_request_wire_names() {
            let req = SuggestionRequest::new("#a", "A", "<p/>");
            let json = serde_json::to_string(&req).unwrap();
            assert!(json.contains("failedLocator"));
            assert!(json.contains("pageExcerpt"));
        }
    }

    mod mock_client_tests {
        use super::*;

        #[tokio::test]
        async fn test_records_requests() {
            let client = MockSuggestionClient::responding(r##"{"locator":"#b"}"##);
            let req = SuggestionRequest::new("#a", "A", "");
            assert_eq!(client.suggest(&req).await.unwrap(), r##"{"locator":"#b"}"##);
            assert_eq!(client.calls(), 1);
            assert_eq!(client.requests(), vec![req]);
        }

        #[tokio::test]
        async fn test_failing() {
            let client = MockSuggestionClient::failing("down");
            let err = client
                .suggest(&SuggestionRequest::new("#a", "A", ""))
                .await
                .unwrap_err();
            assert!(matches!(err, SuggestionError::Unavailable(_)));
        }
    }
}
