//! Repository sync: keep the index in step with a git checkout.
//!
//! Each cycle fetches and fast-forwards the checkout, compares HEAD with the
//! commit the current index was built from, and rebuilds only when it moved
//! (or when the previous rebuild failed). After a successful rebuild the
//! optional companion build runs as its own task; its outcome never touches
//! the index.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::{CompanionConfig, IndexConfig, SyncConfig};
use crate::embedding::Embedder;
use crate::index::{self, IndexHandle};

/// The version-control operations a sync cycle needs.
#[async_trait]
pub trait Vcs: Send + Sync {
    async fn head(&self) -> Result<String>;
    async fn fetch(&self) -> Result<()>;
    async fn pull_ff_only(&self) -> Result<()>;
}

/// [`Vcs`] backed by the `git` command line.
pub struct GitCli {
    repo: PathBuf,
    remote: String,
    branch: Option<String>,
}

impl GitCli {
    pub fn new(repo: impl Into<PathBuf>, remote: impl Into<String>, branch: Option<String>) -> Self {
        Self {
            repo: repo.into(),
            remote: remote.into(),
            branch,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(&config.repo_path, &config.remote, config.branch.clone())
    }

    async fn git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to execute 'git {}'. Is git installed?", args[0]))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("git {} failed: {}", args[0], stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl Vcs for GitCli {
    async fn head(&self) -> Result<String> {
        self.git(&["rev-parse", "HEAD"]).await
    }

    async fn fetch(&self) -> Result<()> {
        self.git(&["fetch", &self.remote]).await.map(|_| ())
    }

    async fn pull_ff_only(&self) -> Result<()> {
        let mut args = vec!["pull", "--ff-only", self.remote.as_str()];
        if let Some(branch) = &self.branch {
            args.push(branch.as_str());
        }
        self.git(&args).await.map(|_| ())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepoSyncState {
    /// Commit the current index was built from.
    pub last_commit: Option<String>,
    pub last_sync: Option<DateTime<Utc>>,
    /// The last rebuild failed; rebuild next cycle even if HEAD is unchanged.
    pub stale: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    Unchanged { commit: String },
    Rebuilt { commit: String, chunks: usize },
    Failed { reason: String },
    /// Another sync was already running.
    Skipped,
}

pub struct RepoSync {
    vcs: Arc<dyn Vcs>,
    embedder: Arc<dyn Embedder>,
    index: IndexHandle,
    index_config: IndexConfig,
    companion: CompanionConfig,
    state: Mutex<RepoSyncState>,
    in_progress: tokio::sync::Mutex<()>,
    companion_task: Mutex<Option<JoinHandle<()>>>,
}

impl RepoSync {
    pub fn new(
        vcs: Arc<dyn Vcs>,
        embedder: Arc<dyn Embedder>,
        index: IndexHandle,
        index_config: IndexConfig,
        companion: CompanionConfig,
    ) -> Self {
        Self {
            vcs,
            embedder,
            index,
            index_config,
            companion,
            state: Mutex::new(RepoSyncState::default()),
            in_progress: tokio::sync::Mutex::new(()),
            companion_task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> RepoSyncState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run one sync cycle. Safe to call at any time; overlapping calls
    /// return [`SyncOutcome::Skipped`].
    pub async fn sync(&self) -> SyncOutcome {
        let Ok(_running) = self.in_progress.try_lock() else {
            tracing::debug!("sync already running, skipping");
            return SyncOutcome::Skipped;
        };

        let head = match self.update_checkout().await {
            Ok(head) => head,
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), "repository sync failed");
                return SyncOutcome::Failed {
                    reason: format!("{:#}", e),
                };
            }
        };

        let (changed, stale) = {
            let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let changed = state
                .last_commit
                .as_ref()
                .map_or(head.moved, |c| c != &head.after);
            (changed, state.stale)
        };

        if !changed && !stale {
            self.update_state(|s| s.last_sync = Some(Utc::now()));
            tracing::debug!(commit = %short(&head.after), "repository unchanged");
            return SyncOutcome::Unchanged { commit: head.after };
        }

        tracing::info!(
            commit = %short(&head.after),
            retry = stale && !changed,
            "repository changed, rebuilding index"
        );

        match self.rebuild().await {
            Ok(chunks) => {
                self.update_state(|s| {
                    s.last_commit = Some(head.after.clone());
                    s.last_sync = Some(Utc::now());
                    s.stale = false;
                });
                if let Some(task) = self.spawn_companion() {
                    *self
                        .companion_task
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner) = Some(task);
                }
                SyncOutcome::Rebuilt {
                    commit: head.after,
                    chunks,
                }
            }
            Err(e) => {
                tracing::error!(error = %format!("{:#}", e), "index rebuild failed, keeping previous index");
                self.update_state(|s| {
                    s.last_sync = Some(Utc::now());
                    s.stale = true;
                });
                SyncOutcome::Failed {
                    reason: format!("{:#}", e),
                }
            }
        }
    }

    /// Drive [`sync`](Self::sync) every `interval` until `shutdown` flips to
    /// `true` or its sender is dropped. The first cycle runs immediately.
    pub async fn run_periodic(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let outcome = self.sync().await;
                    tracing::debug!(?outcome, "sync cycle finished");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("periodic sync stopped");
    }

    /// Start the companion build if one is configured.
    pub fn spawn_companion(&self) -> Option<JoinHandle<()>> {
        if !self.companion.is_enabled() {
            return None;
        }
        let config = self.companion.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = run_companion(&config).await {
                tracing::warn!(error = %format!("{:#}", e), "companion build failed");
            }
        }))
    }

    /// Wait for the companion build started by the last rebuild, if any.
    pub async fn wait_companion(&self) {
        let task = self
            .companion_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    async fn update_checkout(&self) -> Result<HeadChange> {
        let before = self.vcs.head().await?;
        self.vcs.fetch().await?;
        self.vcs.pull_ff_only().await?;
        let after = self.vcs.head().await?;
        Ok(HeadChange {
            moved: before != after,
            after,
        })
    }

    async fn rebuild(&self) -> Result<usize> {
        let started = Instant::now();
        let (next, stats) = index::build(
            &self.index_config.source_dir,
            self.embedder.as_ref(),
            &self.index_config,
        )
        .await?;
        index::save(&next, &self.index_config.path)?;
        self.index.replace(next);

        tracing::info!(
            chunks = stats.chunks,
            files = stats.files,
            dropped = stats.dropped,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "index swapped in"
        );
        Ok(stats.chunks)
    }

    fn update_state(&self, f: impl FnOnce(&mut RepoSyncState)) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state);
    }
}

struct HeadChange {
    moved: bool,
    after: String,
}

/// Run the companion build to completion, killing it on timeout.
pub async fn run_companion(config: &CompanionConfig) -> Result<()> {
    let script: &Path = config
        .script
        .as_deref()
        .ok_or_else(|| anyhow!("no companion script configured"))?;
    let started = Instant::now();

    tracing::info!(program = %config.program, script = %script.display(), "companion build started");

    let output = tokio::time::timeout(
        Duration::from_secs(config.timeout_secs),
        Command::new(&config.program)
            .arg(script)
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| anyhow!("companion build timed out after {}s", config.timeout_secs))?
    .with_context(|| format!("Failed to execute '{}'", config.program))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("companion build exited with {}: {}", output.status, stderr.trim());
    }

    tracing::info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        "companion build finished"
    );
    Ok(())
}

fn short(commit: &str) -> &str {
    commit.get(..8).unwrap_or(commit)
}
