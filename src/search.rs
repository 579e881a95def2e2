use anyhow::{bail, Result};

use crate::config::Config;
use crate::embedding::{cosine_similarity, Embedder, OllamaEmbedder};
use crate::index;
use crate::models::{Index, IndexedChunk};

/// A retrieved chunk together with its similarity to the query.
#[derive(Debug, Clone, Copy)]
pub struct ScoredChunk<'a> {
    pub chunk: &'a IndexedChunk,
    pub score: f32,
}

/// Rank every chunk in `index` by cosine similarity to `query` and keep the
/// best `k`. Equal scores keep their index order.
pub fn retrieve<'a>(index: &'a Index, query: &[f32], k: usize) -> Vec<ScoredChunk<'a>> {
    if index.is_empty() || query.is_empty() || k == 0 {
        return Vec::new();
    }

    let mut scored: Vec<ScoredChunk<'a>> = index
        .items
        .iter()
        .map(|chunk| ScoredChunk {
            chunk,
            score: cosine_similarity(query, &chunk.embedding),
        })
        .collect();

    // `sort_by` is stable, which is what gives ties their insertion order.
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(k);
    scored
}

/// `leap-assist search`: embed the query and print the top matches from the
/// persisted index.
pub async fn run_search(config: &Config, query: &str, k: Option<usize>) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let index = index::load(&config.index.path);
    if index.is_empty() {
        println!("No results.");
        return Ok(());
    }

    let embedder = OllamaEmbedder::new(&config.embedding)?;
    let Some(vector) = embedder.embed(query).await else {
        bail!(
            "could not embed query with model '{}'; is the embedding backend running?",
            embedder.model_name()
        );
    };

    let results = retrieve(&index, &vector, k.unwrap_or(config.retrieval.top_k));
    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, r) in results.iter().enumerate() {
        println!(
            "{}. [{:.3}] {} [{}] ({} lines)",
            i + 1,
            r.score,
            r.chunk.file,
            r.chunk.context_label,
            r.chunk.lines
        );
        let preview: String = r.chunk.text.lines().take(3).collect::<Vec<_>>().join("\n    ");
        println!("    {}", preview);
        println!();
    }

    Ok(())
}
