//! Chat orchestration: route, retrieve, prompt, call the backend, shape.
//!
//! One admission slot covers the whole request, query embedding included,
//! so a burst of chats can never put more than `max_concurrency` requests
//! on the model host at once.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use crate::admission::AdmissionController;
use crate::config::{BackendConfig, RetrievalConfig};
use crate::embedding::Embedder;
use crate::error::ChatError;
use crate::index::IndexHandle;
use crate::llm::{classify, ChatBackend, ChatMessage, Route};
use crate::models::DocRef;
use crate::postprocess::normalize_code_blocks;
use crate::prompt::{build_messages, format_context, SystemPrompt};
use crate::search::{retrieve, ScoredChunk};

/// Stands in for the text of an image-only request.
pub const DEFAULT_VISION_PROMPT: &str =
    "Beschreibe das Bild. Enthält es Code, gib ihn vollständig wieder und erkläre ihn.";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    /// Base64 image, optionally as a `data:` URL.
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub history: Vec<ChatMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatAnswer {
    pub answer: String,
    pub model: String,
    pub route: Route,
    pub doc_refs: Vec<DocRef>,
}

pub struct ChatService {
    index: IndexHandle,
    embedder: Arc<dyn Embedder>,
    backend: Arc<dyn ChatBackend>,
    admission: Arc<AdmissionController>,
    system: SystemPrompt,
    models: BackendConfig,
    retrieval: RetrievalConfig,
}

impl ChatService {
    pub fn new(
        index: IndexHandle,
        embedder: Arc<dyn Embedder>,
        backend: Arc<dyn ChatBackend>,
        admission: Arc<AdmissionController>,
        system: SystemPrompt,
        models: BackendConfig,
        retrieval: RetrievalConfig,
    ) -> Self {
        Self {
            index,
            embedder,
            backend,
            admission,
            system,
            models,
            retrieval,
        }
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub async fn handle(&self, request: ChatRequest) -> Result<ChatAnswer, ChatError> {
        let image = request
            .image
            .as_deref()
            .map(strip_data_url)
            .filter(|data| !data.is_empty())
            .map(str::to_string);
        let message = match request.message.trim() {
            "" if image.is_some() => DEFAULT_VISION_PROMPT,
            "" => return Err(ChatError::EmptyMessage),
            text => text,
        };

        let route = classify(message, image.is_some());
        let model = route.model(&self.models).to_string();
        let started = Instant::now();

        tracing::info!(
            route = route.as_str(),
            model = %model,
            chars = message.chars().count(),
            "chat request"
        );

        let (raw, doc_refs) = self
            .admission
            .run(async {
                let index = self.index.current();
                let mut context = String::new();
                let mut doc_refs = Vec::new();

                if route != Route::Vision && !index.is_empty() {
                    match self.embedder.embed_query(message).await {
                        Some(query) => {
                            let hits = retrieve(&index, &query, self.retrieval.top_k);
                            let (text, used) =
                                format_context(&hits, self.retrieval.max_context_chars);
                            context = text;
                            doc_refs = collect_doc_refs(used, self.retrieval.max_sources);
                        }
                        None => tracing::warn!("query embedding failed, answering without context"),
                    }
                }

                let messages = build_messages(
                    &self.system,
                    &context,
                    &request.history,
                    message,
                    image.clone(),
                );
                let raw = self.backend.chat(&model, &messages).await?;
                Ok::<_, anyhow::Error>((raw, doc_refs))
            })
            .await?;

        tracing::info!(
            route = route.as_str(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            sources = doc_refs.len(),
            "chat answered"
        );

        Ok(ChatAnswer {
            answer: normalize_code_blocks(&raw),
            model,
            route,
            doc_refs,
        })
    }
}

/// Ollama wants bare base64; browsers send `data:image/png;base64,...`.
fn strip_data_url(image: &str) -> &str {
    match image.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => image,
    }
}

/// Unique source files of the hits, best first, at most `max`.
fn collect_doc_refs(hits: &[ScoredChunk<'_>], max: usize) -> Vec<DocRef> {
    let mut refs: Vec<DocRef> = Vec::new();
    for hit in hits {
        if refs.len() >= max {
            break;
        }
        let path = &hit.chunk.file;
        if refs.iter().any(|r| &r.path == path) {
            continue;
        }
        let title = path.rsplit('/').next().unwrap_or(path).to_string();
        refs.push(DocRef {
            title,
            path: path.clone(),
        });
    }
    refs
}
