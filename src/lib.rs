//! # Context Brief
//!
//! Document retrieval and budgeted context assembly for LLM prompts.
//!
//! Extracted document text is chunked, embedded, and stored in a vector
//! index under stable per-segment ids. At query time three sources are
//! gathered concurrently (the owner's background context, their most
//! relevant past conversations, and semantically similar passages) and
//! packed into one character-bounded string. Every upstream is allowed to
//! fail: embeddings fall back to tagged deterministic vectors, retrieval
//! falls back to nothing, and user context falls back to a legacy slot.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌───────────────┐
//! │ Document │──▶│ Chunk+Embed  │──▶│ Vector index  │
//! │   text   │   │  (fallback)  │   │ sqlite/qdrant │
//! └──────────┘   └──────────────┘   └──────┬────────┘
//!                                          │
//!   user context ──┐                       │
//!   history ───────┼──▶ ContextAssembler ◀─┘
//!                  │          │
//!                  ▼          ▼
//!             ┌──────────┐ ┌──────────┐
//!             │   CLI    │ │   HTTP   │
//!             │ (cbrief) │ │  (axum)  │
//!             └──────────┘ └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] / [`migrate`] | SQLite pool and schema |
//! | [`documents`] | Document rows and index status |
//! | [`embedding`] | Providers, retry, and deterministic fallback |
//! | [`index`] | Vector index backends |
//! | [`ingest`] | Chunk → embed → upsert pipeline |
//! | [`retriever`] | Failure-tolerant semantic search |
//! | [`user_context`] | Tiered user background context |
//! | [`history_store`] | Capped conversation history |
//! | [`cache`] | Document metadata LRU |
//! | [`assembler`] | Concurrent, budgeted context assembly |
//! | [`server`] | HTTP API |

pub mod assembler;
pub mod cache;
pub mod config;
pub mod db;
pub mod documents;
pub mod embedding;
pub mod history_store;
pub mod index;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod retriever;
pub mod server;
pub mod services;
pub mod user_context;
