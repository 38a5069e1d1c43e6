use std::path::{Path, PathBuf};

use crate::chunking::{chunk_text, Chunk};
use crate::config::Config;
use crate::diagnostics::{DiagnosticSink, TracingDiagnostics};
use crate::embedding::EmbedderClient;
use crate::error::{EngineError, EngineResult};
use crate::maintenance::{self, ConsolidateReport, CorruptionReport, GcReport};
use crate::project::ProjectResolver;
use crate::ranker::Ranker;
use crate::redact::Redactor;
use crate::store::Store;
use crate::types::{
    KnnFilters, Memory, MemoryType, RecallOptions, RecallResult, RememberInput, Source, Stats, UpdateInput,
};

const PROJECT_SCOPE_BOOST: f64 = 1.3;
const GLOBAL_PREFERENCE_BOOST: f64 = 1.1;

/// Keys the embedding cache on text and dimensionality so a config change
/// that widens/narrows `embedding.dimensions` can't return a stale vector.
fn content_hash(text: &str, dimensions: usize) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(dimensions.to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Entry point tying the resolver, chunker, embedder, redactor, store and
/// ranker together into the public surface spec.md §4.6–§4.7 describes.
pub struct MemoryEngine {
    root: PathBuf,
    config: Config,
    store: Store,
    resolver: ProjectResolver,
    embedder: EmbedderClient,
    redactor: Redactor,
    ranker: Ranker,
    diagnostics: Box<dyn DiagnosticSink>,
}

impl MemoryEngine {
    pub fn open(root: &Path) -> EngineResult<Self> {
        std::fs::create_dir_all(root)?;
        let config = Config::load(root)?;
        let store = Store::open(&root.join("memories.db"), config.embedding.dimensions)?;
        let resolver = ProjectResolver::open(root)?;
        let embedder = EmbedderClient::new(&config.embedding)?;
        let redactor = Redactor::new(&config.sensitive)?;
        let ranker = Ranker::new(config.recall.boost_recency, config.recall.recency_half_life_days);

        Ok(Self {
            root: root.to_path_buf(),
            config,
            store,
            resolver,
            embedder,
            redactor,
            ranker,
            diagnostics: Box::new(TracingDiagnostics),
        })
    }

    pub fn set_diagnostics(&mut self, sink: Box<dyn DiagnosticSink>) {
        self.diagnostics = sink;
    }

    pub async fn is_ready(&self) -> bool {
        self.embedder.is_available().await
    }

    pub fn detect_project(&self, cwd: &Path) -> Option<String> {
        self.resolver.detect(cwd)
    }

    pub fn registry(&self) -> &ProjectResolver {
        &self.resolver
    }

    pub fn registry_mut(&mut self) -> &mut ProjectResolver {
        &mut self.resolver
    }

    /// Embeds `text`, consulting the store's content-hash cache first so a
    /// chunk text that recurs (e.g. identical content re-submitted) does
    /// not cost a second HTTP round trip.
    async fn embed_cached(&mut self, text: &str) -> EngineResult<Vec<f32>> {
        let hash = content_hash(text, self.embedder.dimensions());
        if let Some(cached) = self.store.cached_embedding(&hash)? {
            return Ok(cached);
        }
        let embedding = self.embedder.embed_one(text).await?;
        self.store.cache_embedding(&hash, &embedding)?;
        Ok(embedding)
    }

    /// Stores `input` (spec.md §4.6). Returns one id per chunk; a
    /// deduplicated chunk contributes the id of the row it merged into.
    pub async fn remember(&mut self, input: RememberInput, project_ctx: Option<&str>, now: i64) -> EngineResult<Vec<i64>> {
        if input.content.trim().is_empty() {
            return Err(EngineError::InvalidInput("content must not be empty".into()));
        }

        let (content, redacted_count) = self.redactor.redact(&input.content);
        if redacted_count > 0 {
            self.diagnostics.redacted(None, redacted_count);
        }

        let mem_type = input.mem_type.unwrap_or_default();
        let source = input.source.unwrap_or_default();
        let importance = input.importance.unwrap_or(3).clamp(1, 5);
        let confidence = input.confidence.unwrap_or(1.0).clamp(0.0, 1.0);

        // Preferences are always global; otherwise the caller's explicit
        // project wins, falling back to the detected project context.
        let project = if mem_type == MemoryType::Preference {
            None
        } else {
            input.project.clone().or_else(|| project_ctx.map(str::to_string))
        };

        let chunks: Vec<Chunk> = chunk_text(&content, &self.config.chunking);
        let mut ids = Vec::with_capacity(chunks.len());
        let mut supersede_applied = false;

        for chunk in &chunks {
            let chunk_content = if chunk.total > 1 {
                format!("[{}/{}] {}", chunk.index + 1, chunk.total, chunk.content)
            } else {
                chunk.content.clone()
            };

            let embedding = self.embed_cached(&chunk_content).await?;

            if self.config.dedup.enabled && !input.skip_dedup {
                if let Some((existing, distance)) = self.store.nearest_one(&embedding, false, now)? {
                    if distance < self.config.dedup.similarity_threshold && existing.project == project {
                        let merged_importance = existing.importance.max(importance);
                        let mut merged_content = existing.content.clone();
                        let mut merged_embedding = None;
                        if self.config.dedup.prefer_longer && chunk_content.len() > existing.content.len() {
                            merged_content = chunk_content.clone();
                            merged_embedding = Some(embedding.clone());
                        }
                        self.store.update_fields(existing.id, Some(merged_importance), None, None)?;
                        if let Some(emb) = merged_embedding {
                            self.store.update_content(existing.id, &merged_content, &emb)?;
                        }
                        ids.push(existing.id);
                        continue;
                    }
                }
            }

            let memory = Memory {
                id: 0,
                content: chunk_content,
                mem_type,
                project: project.clone(),
                category: input.category.clone(),
                reasoning: input.reasoning.clone(),
                source,
                importance,
                confidence,
                created_at: now,
                last_accessed: None,
                access_count: 0,
                expires_at: input.expires_at,
                supersedes: if supersede_applied { None } else { input.supersedes },
                is_obsolete: false,
                tags: input.tags.clone(),
            };
            supersede_applied = supersede_applied || input.supersedes.is_some();

            let id = self.store.insert(&memory, &embedding)?;
            ids.push(id);
        }

        Ok(ids)
    }

    /// Semantic recall (spec.md §4.7–§4.8).
    pub async fn recall(&mut self, query: &str, project_ctx: Option<&str>, options: RecallOptions, now: i64) -> EngineResult<Vec<RecallResult>> {
        let embedding = self.embedder.embed_one(query).await?;
        let default_limit = self.config.recall.project_results + self.config.recall.global_results;
        let limit = options.limit.unwrap_or(default_limit);

        let filters = KnnFilters {
            include_obsolete: options.include_obsolete,
            mem_type: options.mem_type,
            min_importance: options.min_importance,
            now,
        };

        let pool = (2 * limit).max(limit).min(500);
        let hits = self.store.knn(&embedding, pool, &filters)?;

        let mut scored: Vec<RecallResult> = hits
            .into_iter()
            .filter(|(_, distance)| *distance < self.config.recall.distance_threshold)
            .map(|(memory, distance)| {
                let mut score = self.ranker.score(&memory, distance, now);
                if let Some(ctx) = project_ctx {
                    if memory.project.as_deref() == Some(ctx) {
                        score *= PROJECT_SCOPE_BOOST;
                    } else if memory.project.is_none() && memory.mem_type == MemoryType::Preference {
                        score *= GLOBAL_PREFERENCE_BOOST;
                    }
                }
                let source = memory.project.clone();
                RecallResult {
                    memory,
                    distance,
                    score,
                    source,
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal))
                .then_with(|| b.memory.id.cmp(&a.memory.id))
        });
        scored.truncate(limit);

        let ids: Vec<i64> = scored.iter().map(|r| r.memory.id).collect();
        self.store.update_stats(&ids, now)?;

        Ok(scored)
    }

    pub fn list_recent(&self, limit: usize, project: Option<&str>, all_projects: bool, now: i64) -> EngineResult<Vec<Memory>> {
        let mut rows = self.store.scan_active(now)?;
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if !all_projects {
            rows.retain(|m| m.project.as_deref() == project);
        }
        rows.truncate(limit);
        Ok(rows)
    }

    /// Updates content (and re-embeds) and/or scalar fields on an existing
    /// row (spec.md §4.10: the only in-place content mutation path).
    pub async fn update(&mut self, id: i64, input: UpdateInput) -> EngineResult<()> {
        if input.content.trim().is_empty() {
            return Err(EngineError::InvalidInput("content must not be empty".into()));
        }
        let (content, redacted_count) = self.redactor.redact(&input.content);
        if redacted_count > 0 {
            self.diagnostics.redacted(Some(id), redacted_count);
        }
        let embedding = self.embed_cached(&content).await?;
        self.store.update_content(id, &content, &embedding)?;
        self.store
            .update_fields(id, input.importance, input.confidence, input.tags.as_deref())?;
        Ok(())
    }

    pub fn mark_obsolete(&self, id: i64) -> EngineResult<()> {
        self.store.set_obsolete(id, true)
    }

    pub fn forget(&mut self, id: i64) -> EngineResult<()> {
        self.store.delete(id)
    }

    pub fn forget_by_category(&mut self, project: Option<&str>, category: &str) -> EngineResult<usize> {
        self.store.delete_by_category(project, category)
    }

    pub fn forget_by_source(&mut self, source: Source) -> EngineResult<usize> {
        self.store.delete_by_source(source)
    }

    pub fn garbage_collect(&mut self, now: i64) -> EngineResult<GcReport> {
        maintenance::garbage_collect(&mut self.store, now, self.config.gc.max_age_unused_days, self.config.gc.min_confidence)
    }

    pub fn consolidate(&mut self, dry_run: bool, now: i64) -> EngineResult<ConsolidateReport> {
        let threshold = self.config.dedup.similarity_threshold * self.config.dedup.consolidate_multiplier;
        maintenance::consolidate(&mut self.store, threshold, dry_run, now)
    }

    pub fn cleanup_corrupted(&mut self, dry_run: bool, now: i64) -> EngineResult<CorruptionReport> {
        maintenance::cleanup_corrupted(&mut self.store, dry_run, now)
    }

    pub fn stats(&self, now: i64) -> EngineResult<Stats> {
        self.store.stats(now)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}
