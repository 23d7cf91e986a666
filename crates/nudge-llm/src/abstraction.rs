//! Cluster abstraction: condensing a group of similar error patterns into one
//! general reminder via a chat model.

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{LlmError, Result};

/// At most this many member texts are shown to the model.
const MAX_PROMPT_EXAMPLES: usize = 10;
/// Each member text is cut to this many characters in the prompt.
const MAX_EXAMPLE_CHARS: usize = 150;

const SYSTEM_PROMPT: &str = "You refine prompts for a medical question-answering assistant. \
You are good at extracting general rules from concrete mistakes.";

/// Produces a general reminder from the texts of one pattern cluster.
#[async_trait]
pub trait Abstractor: Send + Sync {
    async fn abstract_cluster(&self, texts: &[String]) -> Result<String>;

    fn name(&self) -> &str;
}

pub type SharedAbstractor = Arc<dyn Abstractor>;

/// Build the user prompt for a cluster.
pub fn cluster_prompt(texts: &[String]) -> String {
    let shown = texts.len().min(MAX_PROMPT_EXAMPLES);
    let mut prompt = format!(
        "Below are {} similar mistakes an assistant made (showing {}):\n\n",
        texts.len(),
        shown
    );
    for (i, text) in texts.iter().take(shown).enumerate() {
        let clipped: String = text.chars().take(MAX_EXAMPLE_CHARS).collect();
        prompt.push_str(&format!("{}. {}\n", i + 1, clipped));
    }
    prompt.push_str(
        "\nWrite one reminder that covers what these mistakes have in common. \
         Keep it to one or two sentences, state what to do or avoid, and use \
         precise medical terminology. Output only the reminder.",
    );
    prompt
}

// ─────────────────────────────────────────────────────────────────────────────
// OpenAI-compatible chat abstractor
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct OpenAiAbstractorConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

impl OpenAiAbstractorConfig {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.3,
            max_tokens: 200,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

pub struct OpenAiAbstractor {
    client: Client,
    config: OpenAiAbstractorConfig,
}

impl OpenAiAbstractor {
    pub fn new(config: OpenAiAbstractorConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Internal(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url)
    }
}

#[async_trait]
impl Abstractor for OpenAiAbstractor {
    async fn abstract_cluster(&self, texts: &[String]) -> Result<String> {
        if texts.is_empty() {
            return Err(LlmError::Backend("cannot abstract an empty cluster".into()));
        }

        let prompt = cluster_prompt(texts);
        let request = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let mut builder = self.client.post(self.completions_url()).json(&request);
        if let Some(ref key) = self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status(status, body));
        }

        let parsed: ChatResponse = response.json().await?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .unwrap_or_default();

        if text.is_empty() {
            return Err(LlmError::Backend("model returned an empty reminder".into()));
        }
        Ok(text)
    }

    fn name(&self) -> &str {
        "openai"
    }
}

#[derive(Debug, serde::Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, serde::Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, serde::Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, serde::Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, serde::Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Mock
// ─────────────────────────────────────────────────────────────────────────────

/// Scripted abstractor for tests.
///
/// Answers `"<prefix> (<n> patterns)"` or fails every call, and records the
/// size of each cluster it was asked about.
#[derive(Debug, Default)]
pub struct MockAbstractor {
    prefix: String,
    fail: bool,
    seen: Mutex<Vec<usize>>,
}

impl MockAbstractor {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    /// Cluster sizes received, in call order.
    pub fn seen(&self) -> Vec<usize> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl Abstractor for MockAbstractor {
    async fn abstract_cluster(&self, texts: &[String]) -> Result<String> {
        self.seen.lock().push(texts.len());
        if self.fail {
            return Err(LlmError::Backend("scripted failure".into()));
        }
        Ok(format!("{} ({} patterns)", self.prefix, texts.len()))
    }

    fn name(&self) -> &str {
        "mock"
    }
}
