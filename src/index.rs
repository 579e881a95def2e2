//! Index building, persistence and the shared in-memory handle.
//!
//! An index is always rebuilt from scratch: walk the source directory,
//! chunk every matching file, embed every chunk, and replace the previous
//! index as a whole. Readers hold an `Arc<Index>` snapshot, so a swap never
//! disturbs an in-flight retrieval.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use globset::{Glob, GlobSet, GlobSetBuilder};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use walkdir::WalkDir;

use crate::chunk::chunk_source;
use crate::config::IndexConfig;
use crate::embedding::Embedder;
use crate::models::{Index, IndexedChunk};

/// Counters reported after a build.
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize)]
pub struct BuildStats {
    pub files: usize,
    pub skipped_files: usize,
    pub chunks: usize,
    /// Chunks whose text was already embedded earlier in the same build.
    pub reused: usize,
    /// Chunks left out because the embedding backend returned nothing.
    pub dropped: usize,
}

/// Build a fresh index from every matching file under `root`.
///
/// Files are visited in path order so the resulting chunk order (and
/// therefore retrieval tie-breaking) is deterministic.
///
/// Fails when chunks were found but none could be embedded, so an embedding
/// outage never replaces a usable index with an empty one.
pub async fn build(
    root: &Path,
    embedder: &dyn Embedder,
    config: &IndexConfig,
) -> Result<(Index, BuildStats)> {
    if !root.is_dir() {
        bail!("index source directory does not exist: {}", root.display());
    }

    let files = collect_files(root, config)?;
    let mut stats = BuildStats::default();
    let mut items = Vec::new();
    let mut cache: HashMap<String, Option<Vec<f32>>> = HashMap::new();

    for (path, rel) in files {
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(file = %rel, error = %e, "skipping unreadable file");
                stats.skipped_files += 1;
                continue;
            }
        };
        stats.files += 1;

        for chunk in chunk_source(&content, &rel) {
            let key = text_hash(&chunk.text);
            let embedding = match cache.get(&key) {
                Some(cached) => {
                    stats.reused += 1;
                    cached.clone()
                }
                None => {
                    let vector = embedder.embed(&chunk.text).await;
                    cache.insert(key, vector.clone());
                    vector
                }
            };

            let Some(embedding) = embedding else {
                stats.dropped += 1;
                continue;
            };

            items.push(IndexedChunk {
                id: uuid::Uuid::new_v4().to_string(),
                text: chunk.text,
                embedding,
                file: chunk.file,
                context_label: chunk.context_label,
                lines: chunk.lines,
            });
            stats.chunks += 1;
        }
    }

    if stats.chunks == 0 && stats.dropped > 0 {
        bail!(
            "embedding failed for all {} chunks, is the embedding backend reachable?",
            stats.dropped
        );
    }

    tracing::info!(
        files = stats.files,
        chunks = stats.chunks,
        reused = stats.reused,
        dropped = stats.dropped,
        model = embedder.model_name(),
        "index built"
    );
    if stats.dropped > 0 {
        tracing::warn!(
            dropped = stats.dropped,
            "some chunks were left out because embedding failed"
        );
    }

    Ok((
        Index {
            updated: Utc::now(),
            items,
        },
        stats,
    ))
}

/// Write the index as JSON, atomically replacing any previous file.
pub fn save(index: &Index, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create index directory: {}", parent.display()))?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let json = serde_json::to_vec(index)?;
    std::fs::write(&tmp, json)
        .with_context(|| format!("Failed to write index: {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move index into place: {}", path.display()))?;
    Ok(())
}

/// Load a persisted index. A missing or unreadable file yields an empty
/// index so the service can start before the first build.
pub fn load(path: &Path) -> Index {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "no index loaded, starting empty");
            return Index::empty();
        }
    };
    match serde_json::from_str::<Index>(&content) {
        Ok(index) => {
            tracing::info!(path = %path.display(), chunks = index.len(), "index loaded");
            index
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "index file is malformed, starting empty");
            Index::empty()
        }
    }
}

/// Shared handle to the current index. Cloning shares the same slot.
#[derive(Clone)]
pub struct IndexHandle {
    inner: Arc<RwLock<Arc<Index>>>,
}

impl IndexHandle {
    pub fn new(index: Index) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(index))),
        }
    }

    /// Snapshot of the current index.
    pub fn current(&self) -> Arc<Index> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn replace(&self, index: Index) {
        let next = Arc::new(index);
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = next;
    }
}

fn collect_files(root: &Path, config: &IndexConfig) -> Result<Vec<(PathBuf, String)>> {
    let include_set = build_globset(&config.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/node_modules/**".to_string(),
        "**/target/**".to_string(),
    ];
    default_excludes.extend(config.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&default_excludes)?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }
        files.push((path.to_path_buf(), rel_str));
    }

    files.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

fn text_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
