//! # Context Brief Core
//!
//! Runtime-free logic for Context Brief: data models, the overlapping
//! text chunker, point identity encoding, the vector index trait,
//! history relevance scoring, and the budgeted context assembler.
//!
//! This crate contains no tokio, sqlx, or HTTP dependencies. Everything
//! that talks to the outside world lives in the `context-brief` app crate.

pub mod budget;
pub mod chunk;
pub mod embedding;
pub mod error;
pub mod history;
pub mod identity;
pub mod models;
pub mod store;

pub use error::CoreError;
pub use identity::PointId;
