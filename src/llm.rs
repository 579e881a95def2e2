//! Chat backend client and model routing.
//!
//! Every request is routed to one of three models: a general text model, a
//! code model, or a vision model when an image is attached. The backend is
//! reached through [`ChatBackend`] so the orchestrator can be tested
//! without a running Ollama.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::BackendConfig;

/// Substrings that mark a message as code-related. Matched against the
/// lowercased message with a leading space, so word-initial hints like
/// `" class"` also match at the very start.
const CODE_HINTS: &[&str] = &[
    "```",
    " function",
    " funktion",
    " class",
    " klasse",
    " error",
    " fehler",
    "exception",
    "stack trace",
    "build failed",
    "typescript",
    "javascript",
    "python",
    "java",
    "c#",
    "c++",
    "sql",
    "regex",
    "bash",
    "shell",
    "npm ",
    "pip ",
    " code",
    " schleife",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    General,
    Code,
    Vision,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::General => "general",
            Route::Code => "code",
            Route::Vision => "vision",
        }
    }

    /// The configured model name for this route.
    pub fn model<'a>(&self, config: &'a BackendConfig) -> &'a str {
        match self {
            Route::General => &config.general_model,
            Route::Code => &config.code_model,
            Route::Vision => &config.vision_model,
        }
    }
}

/// Pick a route from the message text and whether an image is attached.
pub fn classify(text: &str, has_image: bool) -> Route {
    if has_image {
        return Route::Vision;
    }
    let padded = format!(" {}", text.to_lowercase());
    if CODE_HINTS.iter().any(|h| padded.contains(h)) {
        Route::Code
    } else {
        Route::General
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message in Ollama's chat format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Raw base64 images, only for vision requests.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            images: Vec::new(),
        }
    }
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Send `messages` to `model` and return the assistant's reply.
    async fn chat(&self, model: &str, messages: &[ChatMessage]) -> Result<String>;
}

/// Sampling and runtime options forwarded as Ollama's `options` object.
#[derive(Debug, Clone, Serialize)]
pub struct ChatOptions {
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_thread: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_ctx: Option<u32>,
}

#[derive(Serialize)]
struct ChatRequestBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: &'a ChatOptions,
}

#[derive(Deserialize)]
struct ChatResponseBody {
    message: Option<ResponseMessage>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: String,
}

/// [`ChatBackend`] for Ollama's `POST /api/chat` (non-streaming).
///
/// The client has no timeout of its own; the admission controller bounds
/// the whole request and dropping the future aborts the connection.
pub struct OllamaChat {
    client: reqwest::Client,
    url: String,
    options: ChatOptions,
}

impl OllamaChat {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            url: config.chat_url.clone(),
            options: ChatOptions {
                temperature: config.temperature,
                num_thread: config.num_thread,
                num_ctx: config.num_ctx,
            },
        })
    }
}

#[async_trait]
impl ChatBackend for OllamaChat {
    async fn chat(&self, model: &str, messages: &[ChatMessage]) -> Result<String> {
        let body = ChatRequestBody {
            model,
            messages,
            stream: false,
            options: &self.options,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("chat backend unreachable at {}", self.url))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("chat backend returned {}: {}", status, text.trim());
        }

        let data: ChatResponseBody = response
            .json()
            .await
            .context("chat backend returned malformed JSON")?;

        match data.message {
            Some(m) if !m.content.trim().is_empty() => Ok(m.content),
            _ => bail!("chat backend returned an empty answer"),
        }
    }
}
