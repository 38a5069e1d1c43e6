//! Local, persistent, semantically-indexed memory store for coding-assistant
//! sessions: project resolution, text chunking, embedding, redaction,
//! storage and ranked recall, plus the maintenance routines that keep the
//! store from growing unbounded.

pub mod chunking;
pub mod config;
pub mod diagnostics;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod maintenance;
pub mod project;
pub mod ranker;
pub mod redact;
pub mod store;
pub mod types;

pub use engine::MemoryEngine;
pub use error::{EngineError, EngineResult};
pub use types::{KnnFilters, Memory, MemoryType, RecallOptions, RecallResult, RememberInput, Source, Stats, UpdateInput};
