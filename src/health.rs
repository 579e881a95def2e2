//! Chat backend liveness.
//!
//! [`BackendHealth`] probes the Ollama model list (`GET /api/tags`) with a
//! short timeout and remembers the outcome. `/health` runs a fresh probe;
//! `/api/chat` only consults the last known status, so a request is refused
//! up front while the backend is known to be down instead of occupying an
//! admission slot until it times out.
//!
//! The status starts out healthy: a service that has not probed yet does
//! not turn chats away.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;

use crate::config::{BackendConfig, HealthConfig};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendStatus {
    pub healthy: bool,
    pub last_check: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
}

impl Default for BackendStatus {
    fn default() -> Self {
        Self {
            healthy: true,
            last_check: None,
            last_error: None,
            consecutive_failures: 0,
        }
    }
}

pub struct BackendHealth {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
    status: Mutex<BackendStatus>,
}

impl BackendHealth {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            url: url.into(),
            timeout,
            status: Mutex::new(BackendStatus::default()),
        })
    }

    pub fn from_config(health: &HealthConfig, backend: &BackendConfig) -> Result<Self> {
        Self::new(
            health.check_url(backend),
            Duration::from_secs(health.timeout_secs),
        )
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn status(&self) -> BackendStatus {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_healthy(&self) -> bool {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .healthy
    }

    /// Probe the backend now and record the result.
    pub async fn check(&self) -> BackendStatus {
        let result = self.fetch_tags().await;

        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        status.last_check = Some(Utc::now());
        match result {
            Ok(()) => {
                if !status.healthy {
                    tracing::info!(
                        url = %self.url,
                        failures = status.consecutive_failures,
                        "chat backend recovered"
                    );
                }
                status.healthy = true;
                status.last_error = None;
                status.consecutive_failures = 0;
            }
            Err(e) => {
                status.healthy = false;
                status.last_error = Some(format!("{:#}", e));
                status.consecutive_failures += 1;
                tracing::warn!(
                    url = %self.url,
                    failures = status.consecutive_failures,
                    error = %format!("{:#}", e),
                    "chat backend is down"
                );
            }
        }
        status.clone()
    }

    async fn fetch_tags(&self) -> Result<()> {
        let response = self
            .client
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await
            .with_context(|| format!("backend unreachable at {}", self.url))?;

        let status = response.status();
        if !status.is_success() {
            bail!("backend returned status {}", status);
        }
        Ok(())
    }

    /// Probe every `interval` until `shutdown` flips to `true` or its sender
    /// is dropped. The first probe runs immediately.
    pub async fn run_periodic(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("health monitor stopped");
    }
}
