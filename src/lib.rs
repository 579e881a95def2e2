//! # Leap Assist
//!
//! A retrieval-augmented chat service for the LEAP programming language,
//! backed by a local Ollama instance.
//!
//! Leap Assist turns a checkout of LEAP example and interpreter sources into
//! an index of structurally coherent, embedded chunks, answers chat questions
//! with the most relevant chunks as context, and keeps the index fresh by
//! following the checkout's upstream branch.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌────────────┐
//! │ Repo sync  │──▶│ Index build  │──▶│ IndexHandle│
//! │ git + jar  │   │ chunk+embed  │   │ Arc<Index> │
//! └────────────┘   └──────────────┘   └─────┬──────┘
//!                                           │ retrieve
//!                  ┌──────────────┐   ┌─────▼──────┐   ┌────────┐
//!                  │  HTTP / CLI  │──▶│    Chat    │──▶│ Ollama │
//!                  └──────────────┘   │ (admission)│   └────────┘
//!                                     └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! leap-assist index                     # build leap_index.json
//! leap-assist search "falls sonst"      # inspect retrieval
//! leap-assist serve                     # start the HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration with environment overrides |
//! | [`models`] | Core data types |
//! | [`chunk`] | Brace-balance source chunker |
//! | [`embedding`] | Embedding client and cosine similarity |
//! | [`index`] | Index build, persistence and the shared handle |
//! | [`search`] | Similarity retrieval |
//! | [`admission`] | Bounded concurrency and queueing for backend calls |
//! | [`llm`] | Chat backend client and model routing |
//! | [`prompt`] | System prompt and message assembly |
//! | [`postprocess`] | Answer code-block normalization |
//! | [`chat`] | Chat orchestration |
//! | [`health`] | Chat backend liveness probe |
//! | [`sync`] | Repository sync and companion build |
//! | [`server`] | HTTP server |
//! | [`error`] | Typed request-path errors |
//! | [`logging`] | Tracing subscriber setup |

pub mod admission;
pub mod chat;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod health;
pub mod index;
pub mod llm;
pub mod logging;
pub mod models;
pub mod postprocess;
pub mod prompt;
pub mod search;
pub mod server;
pub mod sync;
