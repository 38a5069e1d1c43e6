use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// The kind of memory a row represents (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Decision,
    Preference,
    Fact,
    Pattern,
    Conversation,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::Decision => "decision",
            MemoryType::Preference => "preference",
            MemoryType::Fact => "fact",
            MemoryType::Pattern => "pattern",
            MemoryType::Conversation => "conversation",
        }
    }

    pub fn parse(s: &str) -> EngineResult<Self> {
        match s {
            "decision" => Ok(MemoryType::Decision),
            "preference" => Ok(MemoryType::Preference),
            "fact" => Ok(MemoryType::Fact),
            "pattern" => Ok(MemoryType::Pattern),
            "conversation" => Ok(MemoryType::Conversation),
            other => Err(EngineError::InvalidInput(format!(
                "unknown memory type '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for MemoryType {
    fn default() -> Self {
        MemoryType::Fact
    }
}

/// Closed-set provenance tag (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Manual,
    AutoSession,
    AutoCommit,
    AutoPattern,
    AutoBootstrap,
    AutoIngest,
    AutoResponse,
    AutoPrecompact,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Manual => "manual",
            Source::AutoSession => "auto:session",
            Source::AutoCommit => "auto:commit",
            Source::AutoPattern => "auto:pattern",
            Source::AutoBootstrap => "auto:bootstrap",
            Source::AutoIngest => "auto:ingest",
            Source::AutoResponse => "auto:response",
            Source::AutoPrecompact => "auto:precompact",
        }
    }

    pub fn parse(s: &str) -> EngineResult<Self> {
        match s {
            "manual" => Ok(Source::Manual),
            "auto:session" => Ok(Source::AutoSession),
            "auto:commit" => Ok(Source::AutoCommit),
            "auto:pattern" => Ok(Source::AutoPattern),
            "auto:bootstrap" => Ok(Source::AutoBootstrap),
            "auto:ingest" => Ok(Source::AutoIngest),
            "auto:response" => Ok(Source::AutoResponse),
            "auto:precompact" => Ok(Source::AutoPrecompact),
            other => Err(EngineError::InvalidInput(format!(
                "unknown source tag '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for Source {
    fn default() -> Self {
        Source::Manual
    }
}

/// A persisted memory row (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: i64,
    pub content: String,
    pub mem_type: MemoryType,
    pub project: Option<String>,
    pub category: Option<String>,
    pub reasoning: Option<String>,
    pub source: Source,
    pub importance: i32,
    pub confidence: f64,
    pub created_at: i64,
    pub last_accessed: Option<i64>,
    pub access_count: i64,
    pub expires_at: Option<i64>,
    pub supersedes: Option<i64>,
    pub is_obsolete: bool,
    pub tags: Vec<String>,
}

/// Input to `MemoryEngine::remember` (spec.md §4.6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RememberInput {
    pub content: String,
    #[serde(default)]
    pub mem_type: Option<MemoryType>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub source: Option<Source>,
    #[serde(default)]
    pub importance: Option<i32>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub supersedes: Option<i64>,
    #[serde(default)]
    pub skip_dedup: bool,
}

/// Input to `MemoryEngine::update` — only `content` is required; a new
/// embedding is always computed since the content changed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateInput {
    pub content: String,
    #[serde(default)]
    pub importance: Option<i32>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

/// Options for `MemoryEngine::recall` (spec.md §4.7).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecallOptions {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub mem_type: Option<MemoryType>,
    #[serde(default)]
    pub min_importance: Option<i32>,
    #[serde(default)]
    pub include_obsolete: bool,
}

/// One ranked recall hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallResult {
    pub memory: Memory,
    pub distance: f64,
    pub score: f64,
    pub source: Option<String>,
}

/// Filters applied inside `Store::knn` (spec.md §4.5).
#[derive(Debug, Clone, Default)]
pub struct KnnFilters {
    pub include_obsolete: bool,
    pub mem_type: Option<MemoryType>,
    pub min_importance: Option<i32>,
    pub now: i64,
}

/// Aggregate statistics (spec.md §6, supplemented per SPEC_FULL.md §15).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stats {
    pub total_active: u64,
    pub total_obsolete: u64,
    pub by_type: Vec<(MemoryType, u64)>,
    pub by_project: Vec<(Option<String>, u64)>,
    pub avg_importance: f64,
    pub oldest_created_at: Option<i64>,
    pub newest_created_at: Option<i64>,
}
