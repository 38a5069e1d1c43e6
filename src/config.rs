use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::EngineResult;

/// Embedding service connection settings (spec.md §4.3, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmbeddingConfig {
    #[serde(default = "EmbeddingConfig::default_base_url")]
    pub base_url: String,
    #[serde(default = "EmbeddingConfig::default_dimensions")]
    pub dimensions: usize,
    #[serde(default = "EmbeddingConfig::default_timeout_ms")]
    pub timeout_ms: u64,
}

impl EmbeddingConfig {
    fn default_base_url() -> String {
        "http://127.0.0.1:8420".to_string()
    }
    fn default_dimensions() -> usize {
        384
    }
    fn default_timeout_ms() -> u64 {
        5_000
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: Self::default_base_url(),
            dimensions: Self::default_dimensions(),
            timeout_ms: Self::default_timeout_ms(),
        }
    }
}

/// Chunking thresholds (spec.md §4.2), all measured in estimated tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChunkingConfig {
    #[serde(default = "ChunkingConfig::default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "ChunkingConfig::default_overlap_tokens")]
    pub overlap_tokens: usize,
    #[serde(default = "ChunkingConfig::default_min_chunk_size")]
    pub min_chunk_size: usize,
}

impl ChunkingConfig {
    fn default_max_tokens() -> usize {
        400
    }
    fn default_overlap_tokens() -> usize {
        40
    }
    fn default_min_chunk_size() -> usize {
        20
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: Self::default_max_tokens(),
            overlap_tokens: Self::default_overlap_tokens(),
            min_chunk_size: Self::default_min_chunk_size(),
        }
    }
}

/// Recall-time tuning (spec.md §4.7, §4.8, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecallConfig {
    #[serde(default = "RecallConfig::default_project_results")]
    pub project_results: usize,
    #[serde(default = "RecallConfig::default_global_results")]
    pub global_results: usize,
    #[serde(default = "RecallConfig::default_distance_threshold")]
    pub distance_threshold: f64,
    #[serde(default = "RecallConfig::default_boost_recency")]
    pub boost_recency: bool,
    #[serde(default = "RecallConfig::default_half_life_days")]
    pub recency_half_life_days: f64,
    /// Present in the config surface but not consulted by `recall` (spec.md
    /// §9 open question): reserved until a future revision wires it up.
    #[serde(default)]
    pub global_types_in_project: bool,
}

impl RecallConfig {
    fn default_project_results() -> usize {
        5
    }
    fn default_global_results() -> usize {
        5
    }
    fn default_distance_threshold() -> f64 {
        1.2
    }
    fn default_boost_recency() -> bool {
        true
    }
    fn default_half_life_days() -> f64 {
        30.0
    }
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self {
            project_results: Self::default_project_results(),
            global_results: Self::default_global_results(),
            distance_threshold: Self::default_distance_threshold(),
            boost_recency: Self::default_boost_recency(),
            recency_half_life_days: Self::default_half_life_days(),
            global_types_in_project: false,
        }
    }
}

/// Host-side capture toggles this library does not act on but preserves
/// round-trip so a hosting CLI/MCP server can read its own settings back
/// out of the same `config.json` (spec.md §1 Non-goals: capture policy is
/// a host concern; §6 lists the shape).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CaptureConfig {
    #[serde(default)]
    pub auto_session: bool,
    #[serde(default)]
    pub auto_commit: bool,
    #[serde(default)]
    pub commit_patterns: Vec<String>,
    #[serde(default)]
    pub min_importance: Option<i32>,
}

/// Redaction patterns (spec.md §4.4, §6 `sensitive.patterns[]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedactionConfig {
    #[serde(default = "RedactionConfig::default_patterns", rename = "patterns")]
    pub sensitive_patterns: Vec<String>,
}

impl RedactionConfig {
    fn default_patterns() -> Vec<String> {
        vec![
            r"sk-[A-Za-z0-9]{20,}".to_string(),
            r"ghp_[A-Za-z0-9]{30,}".to_string(),
            r"AKIA[0-9A-Z]{16}".to_string(),
            r"-----BEGIN [A-Z ]*PRIVATE KEY-----".to_string(),
        ]
    }
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            sensitive_patterns: Self::default_patterns(),
        }
    }
}

/// Dedup/consolidation thresholds applied in `MemoryEngine::remember` and
/// `consolidate` (spec.md §4.6, §4.9; the consolidation pass reuses
/// `similarity_threshold` scaled by a configurable multiplier rather than a
/// hardcoded `2×`, per the open question in spec.md §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DedupConfig {
    #[serde(default = "DedupConfig::default_enabled")]
    pub enabled: bool,
    #[serde(default = "DedupConfig::default_similarity_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "DedupConfig::default_prefer_longer")]
    pub prefer_longer: bool,
    #[serde(default = "DedupConfig::default_consolidate_multiplier")]
    pub consolidate_multiplier: f64,
}

impl DedupConfig {
    fn default_enabled() -> bool {
        true
    }
    fn default_similarity_threshold() -> f64 {
        5.0
    }
    fn default_prefer_longer() -> bool {
        true
    }
    fn default_consolidate_multiplier() -> f64 {
        2.0
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            similarity_threshold: Self::default_similarity_threshold(),
            prefer_longer: Self::default_prefer_longer(),
            consolidate_multiplier: Self::default_consolidate_multiplier(),
        }
    }
}

/// Garbage-collection thresholds (spec.md §4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GcConfig {
    #[serde(default = "GcConfig::default_max_age_unused_days")]
    pub max_age_unused_days: i64,
    #[serde(default = "GcConfig::default_min_confidence")]
    pub min_confidence: f64,
}

impl GcConfig {
    fn default_max_age_unused_days() -> i64 {
        180
    }
    fn default_min_confidence() -> f64 {
        0.5
    }
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            max_age_unused_days: Self::default_max_age_unused_days(),
            min_confidence: Self::default_min_confidence(),
        }
    }
}

/// Top-level configuration tree, loaded from `config.json` under the
/// configured root (spec.md §6). Unknown top-level keys are rejected the
/// same way as every nested section, so a typo in a hand-edited file
/// surfaces as a load error instead of silently doing nothing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub recall: RecallConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub sensitive: RedactionConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub gc: GcConfig,
}

impl Config {
    /// Loads `root/config.json`, falling back to defaults when the file is
    /// absent. A present-but-invalid file is a hard error rather than a
    /// silent fallback, since it likely means the user's edits were lost.
    pub fn load(root: &Path) -> EngineResult<Self> {
        let path = root.join("config.json");
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}
