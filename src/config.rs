//! TOML configuration with environment overrides.
//!
//! Every section is optional; a missing config file yields the defaults
//! below. After parsing, [`Config::apply_env`] lets the deployment override
//! the most common knobs (backend URLs, model names, limits) without editing
//! the file.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub admission: AdmissionConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub companion: CompanionConfig,
    #[serde(default)]
    pub prompt: PromptConfig,
    #[serde(default)]
    pub health: HealthConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8081".to_string()
}

/// Chat backend (Ollama `/api/chat`) settings.
#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    #[serde(default = "default_chat_url")]
    pub chat_url: String,
    #[serde(default = "default_general_model")]
    pub general_model: String,
    #[serde(default = "default_code_model")]
    pub code_model: String,
    #[serde(default = "default_vision_model")]
    pub vision_model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Passed through as `options.num_thread`.
    #[serde(default)]
    pub num_thread: Option<u32>,
    /// Passed through as `options.num_ctx`.
    #[serde(default)]
    pub num_ctx: Option<u32>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            chat_url: default_chat_url(),
            general_model: default_general_model(),
            code_model: default_code_model(),
            vision_model: default_vision_model(),
            temperature: default_temperature(),
            num_thread: None,
            num_ctx: None,
        }
    }
}

fn default_chat_url() -> String {
    "http://127.0.0.1:11434/api/chat".to_string()
}
fn default_general_model() -> String {
    "qwen2.5:3b".to_string()
}
fn default_code_model() -> String {
    "qwen2.5-coder:7b".to_string()
}
fn default_vision_model() -> String {
    "llava:7b".to_string()
}
fn default_temperature() -> f32 {
    0.1
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embed_url")]
    pub url: String,
    #[serde(default = "default_embed_model")]
    pub model: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Single-attempt budget for chat query embeddings.
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            url: default_embed_url(),
            model: default_embed_model(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            query_timeout_secs: default_query_timeout_secs(),
        }
    }
}

fn default_embed_url() -> String {
    "http://127.0.0.1:11434/api/embeddings".to_string()
}
fn default_embed_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_max_retries() -> u32 {
    2
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_query_timeout_secs() -> u64 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct AdmissionConfig {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_max_queue")]
    pub max_queue: usize,
    #[serde(default = "default_request_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            max_queue: default_max_queue(),
            timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl AdmissionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_max_concurrency() -> usize {
    2
}
fn default_max_queue() -> usize {
    8
}
fn default_request_timeout_ms() -> u64 {
    120_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
    #[serde(default = "default_max_sources")]
    pub max_sources: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_context_chars: default_max_context_chars(),
            max_sources: default_max_sources(),
        }
    }
}

fn default_top_k() -> usize {
    3
}
fn default_max_context_chars() -> usize {
    6000
}
fn default_max_sources() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Where the persisted index lives.
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
    /// Directory walked by the index builder.
    #[serde(default = "default_repo_path")]
    pub source_dir: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
            source_dir: default_repo_path(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_index_path() -> PathBuf {
    PathBuf::from("leap_index.json")
}
fn default_repo_path() -> PathBuf {
    PathBuf::from("./leap-code")
}
fn default_include_globs() -> Vec<String> {
    ["leap", "lp", "java", "js", "ts", "cs"]
        .iter()
        .map(|ext| format!("**/*.{}", ext))
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_repo_path")]
    pub repo_path: PathBuf,
    #[serde(default = "default_remote")]
    pub remote: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            repo_path: default_repo_path(),
            remote: default_remote(),
            branch: None,
            interval_secs: default_interval_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_remote() -> String {
    "origin".to_string()
}
fn default_interval_secs() -> u64 {
    300
}

/// Secondary build step run after the index was rebuilt (the interpreter jar).
#[derive(Debug, Deserialize, Clone)]
pub struct CompanionConfig {
    #[serde(default)]
    pub script: Option<PathBuf>,
    #[serde(default = "default_program")]
    pub program: String,
    #[serde(default = "default_companion_timeout")]
    pub timeout_secs: u64,
}

impl Default for CompanionConfig {
    fn default() -> Self {
        Self {
            script: None,
            program: default_program(),
            timeout_secs: default_companion_timeout(),
        }
    }
}

impl CompanionConfig {
    pub fn is_enabled(&self) -> bool {
        self.script.is_some()
    }
}

fn default_program() -> String {
    "node".to_string()
}
fn default_companion_timeout() -> u64 {
    600
}

/// Liveness probe of the chat backend.
#[derive(Debug, Deserialize, Clone)]
pub struct HealthConfig {
    /// Probed with `GET`. Defaults to `/api/tags` next to `backend.chat_url`.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_health_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_health_interval_secs")]
    pub interval_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: default_health_timeout_secs(),
            interval_secs: default_health_interval_secs(),
        }
    }
}

impl HealthConfig {
    pub fn check_url(&self, backend: &BackendConfig) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        let base = backend.chat_url.trim_end_matches('/');
        let base = base.strip_suffix("/api/chat").unwrap_or(base);
        format!("{}/api/tags", base)
    }
}

fn default_health_timeout_secs() -> u64 {
    10
}
fn default_health_interval_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PromptConfig {
    /// Optional interpreter feature sheet merged into the system prompt.
    #[serde(default)]
    pub features_path: Option<PathBuf>,
}

impl Config {
    /// Override fields from environment-style variables.
    ///
    /// `lookup` is usually `|k| std::env::var(k).ok()`; tests pass a map.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup("LEAP_BIND") {
            self.server.bind = bind;
        } else if let Some(port) = lookup("PORT") {
            let port: u16 = port.parse().context("PORT must be a port number")?;
            let host = self
                .server
                .bind
                .rsplit_once(':')
                .map(|(h, _)| h.to_string())
                .unwrap_or_else(|| "127.0.0.1".to_string());
            self.server.bind = format!("{}:{}", host, port);
        }
        if let Some(v) = lookup("OLLAMA_CHAT_URL") {
            self.backend.chat_url = v;
        }
        if let Some(v) = lookup("OLLAMA_EMBED_URL") {
            self.embedding.url = v;
        }
        if let Some(v) = lookup("MODEL_GENERAL") {
            self.backend.general_model = v;
        }
        if let Some(v) = lookup("MODEL_CODER") {
            self.backend.code_model = v;
        }
        if let Some(v) = lookup("MODEL_VISION") {
            self.backend.vision_model = v;
        }
        if let Some(v) = lookup("MODEL_EMBED") {
            self.embedding.model = v;
        }
        if let Some(v) = lookup("OLLAMA_NUM_THREAD") {
            self.backend.num_thread = Some(v.parse().context("OLLAMA_NUM_THREAD must be an integer")?);
        }
        if let Some(v) = lookup("OLLAMA_NUM_CTX") {
            self.backend.num_ctx = Some(v.parse().context("OLLAMA_NUM_CTX must be an integer")?);
        }
        if let Some(v) = lookup("OLLAMA_TIMEOUT") {
            self.admission.timeout_ms = v.parse().context("OLLAMA_TIMEOUT must be milliseconds")?;
        }
        if let Some(v) = lookup("MAX_CONCURRENCY") {
            self.admission.max_concurrency = v.parse().context("MAX_CONCURRENCY must be an integer")?;
        }
        if let Some(v) = lookup("MAX_QUEUE") {
            self.admission.max_queue = v.parse().context("MAX_QUEUE must be an integer")?;
        }
        if let Some(v) = lookup("REPO_ROOT") {
            self.sync.repo_path = PathBuf::from(&v);
            self.index.source_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("INDEX_BUILD_SCRIPT") {
            self.companion.script = Some(PathBuf::from(v));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.admission.max_concurrency == 0 {
            anyhow::bail!("admission.max_concurrency must be >= 1");
        }
        if self.admission.timeout_ms == 0 {
            anyhow::bail!("admission.timeout_ms must be > 0");
        }
        if self.retrieval.top_k == 0 {
            anyhow::bail!("retrieval.top_k must be >= 1");
        }
        if self.retrieval.max_sources == 0 {
            anyhow::bail!("retrieval.max_sources must be >= 1");
        }
        if self.health.interval_secs == 0 || self.health.timeout_secs == 0 {
            anyhow::bail!("health.interval_secs and health.timeout_secs must be > 0");
        }
        if self.sync.enabled && self.sync.interval_secs == 0 {
            anyhow::bail!("sync.interval_secs must be > 0 when sync is enabled");
        }
        Ok(())
    }
}

/// Read the config file (if present), apply process environment overrides,
/// and validate.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        parse_config(&content)?
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Config::default()
    };

    config.apply_env(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse config file")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_empty_file_yields_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:8081");
        assert_eq!(config.admission.max_concurrency, 2);
        assert_eq!(config.retrieval.top_k, 3);
        assert!(!config.companion.is_enabled());
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config = parse_config(
            r#"
[admission]
max_queue = 1

[backend]
num_ctx = 4096
"#,
        )
        .unwrap();
        assert_eq!(config.admission.max_queue, 1);
        assert_eq!(config.admission.max_concurrency, 2);
        assert_eq!(config.backend.num_ctx, Some(4096));
        assert_eq!(config.backend.general_model, "qwen2.5:3b");
    }

    #[test]
    fn test_env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("PORT", "9000"),
            ("MODEL_CODER", "deepseek-coder"),
            ("OLLAMA_TIMEOUT", "5000"),
            ("MAX_CONCURRENCY", "4"),
            ("REPO_ROOT", "/srv/leap"),
            ("INDEX_BUILD_SCRIPT", "scripts/build.js"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.server.bind, "127.0.0.1:9000");
        assert_eq!(config.backend.code_model, "deepseek-coder");
        assert_eq!(config.admission.timeout(), Duration::from_millis(5000));
        assert_eq!(config.admission.max_concurrency, 4);
        assert_eq!(config.sync.repo_path, PathBuf::from("/srv/leap"));
        assert_eq!(config.index.source_dir, PathBuf::from("/srv/leap"));
        assert!(config.companion.is_enabled());
    }

    #[test]
    fn test_bad_env_value_is_an_error() {
        let mut config = Config::default();
        let err = config
            .apply_env(|k| (k == "MAX_QUEUE").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("MAX_QUEUE"));
    }

    #[test]
    fn test_health_check_url_follows_chat_url() {
        let mut config = Config::default();
        assert_eq!(
            config.health.check_url(&config.backend),
            "http://127.0.0.1:11434/api/tags"
        );

        config
            .apply_env(|k| (k == "OLLAMA_CHAT_URL").then(|| "http://gpu-box:11434/api/chat".to_string()))
            .unwrap();
        assert_eq!(
            config.health.check_url(&config.backend),
            "http://gpu-box:11434/api/tags"
        );

        config.health.url = Some("http://other/ping".to_string());
        assert_eq!(config.health.check_url(&config.backend), "http://other/ping");
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut config = Config::default();
        config.admission.max_concurrency = 0;
        assert!(config.validate().is_err());
    }
}
