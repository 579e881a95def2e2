//! Core data models shared by the index builder, retrieval and chat layers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A chunk of source text with its embedding, as stored in the index file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexedChunk {
    pub id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    /// Path relative to the indexed root.
    pub file: String,
    #[serde(rename = "contextLabel")]
    pub context_label: String,
    #[serde(default)]
    pub lines: usize,
}

/// The full set of chunks available for retrieval at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Index {
    pub updated: DateTime<Utc>,
    #[serde(default)]
    pub items: Vec<IndexedChunk>,
}

impl Index {
    pub fn empty() -> Self {
        Self {
            updated: DateTime::<Utc>::UNIX_EPOCH,
            items: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of distinct source files contributing chunks.
    pub fn file_count(&self) -> usize {
        let mut files: Vec<&str> = self.items.iter().map(|c| c.file.as_str()).collect();
        files.sort_unstable();
        files.dedup();
        files.len()
    }
}

/// A "related source" reference returned alongside a chat answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocRef {
    pub title: String,
    pub path: String,
}
