//! End-to-end scenarios from spec.md §8, run against a real `MemoryEngine`
//! with the embedding service faked by `httpmock`.

use httpmock::prelude::*;
use mcp_memory_core::{MemoryEngine, MemoryType, RecallOptions, RememberInput};
use serde_json::{json, Value};

fn mock_embed(server: &MockServer, text: &str, vector: [f32; 3]) {
    server.mock(|when, then| {
        when.method(POST)
            .path("/embed")
            .json_body(json!({ "texts": [text] }));
        then.status(200)
            .json_body(json!({ "embeddings": [vector], "dimensions": 3 }));
    });
}

fn write_config(root: &std::path::Path, base_url: &str) {
    let config: Value = json!({
        "embedding": { "base_url": base_url, "dimensions": 3, "timeout_ms": 2000 },
        "recall": { "project_results": 5, "global_results": 5, "distance_threshold": 10.0, "boost_recency": false },
        "dedup": { "enabled": true, "similarity_threshold": 0.3, "prefer_longer": true },
        "gc": { "max_age_unused_days": 180, "min_confidence": 0.5 }
    });
    std::fs::write(root.join("config.json"), serde_json::to_string_pretty(&config).unwrap()).unwrap();
}

#[tokio::test]
async fn preference_scoping_gets_global_boost() {
    let server = MockServer::start();
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), &server.base_url());

    mock_embed(&server, "Prefer early returns", [1.0, 0.0, 0.0]);
    mock_embed(&server, "early returns", [1.0, 0.0, 0.0]);

    let mut engine = MemoryEngine::open(dir.path()).unwrap();
    engine
        .remember(
            RememberInput {
                content: "Prefer early returns".to_string(),
                mem_type: Some(MemoryType::Preference),
                project: Some("web".to_string()),
                ..Default::default()
            },
            Some("web"),
            1_000,
        )
        .await
        .unwrap();

    let hits = engine
        .recall("early returns", Some("backend"), RecallOptions::default(), 1_000)
        .await
        .unwrap();

    assert_eq!(hits.len(), 1);
    assert!(hits[0].memory.project.is_none());
    // score includes the ×1.1 global-preference boost since project is null
    // and the memory is a preference, even though the caller is in a
    // different project.
    let unboosted = 1.0 / (1.0 + hits[0].distance) * 0.8 * 1.0 * 1.0;
    assert!((hits[0].score - unboosted * 1.1).abs() < 1e-9);
}

#[tokio::test]
async fn dedup_merge_keeps_first_id_and_longer_content() {
    let server = MockServer::start();
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), &server.base_url());

    mock_embed(&server, "Using JWT in httpOnly cookies", [1.0, 0.0, 0.0]);
    mock_embed(
        &server,
        "Using JWT tokens stored in httpOnly cookies for CSRF resilience",
        [1.0, 0.01, 0.0],
    );

    let mut engine = MemoryEngine::open(dir.path()).unwrap();
    let first = engine
        .remember(
            RememberInput {
                content: "Using JWT in httpOnly cookies".to_string(),
                importance: Some(3),
                ..Default::default()
            },
            None,
            1_000,
        )
        .await
        .unwrap();

    let second = engine
        .remember(
            RememberInput {
                content: "Using JWT tokens stored in httpOnly cookies for CSRF resilience".to_string(),
                importance: Some(4),
                ..Default::default()
            },
            None,
            1_001,
        )
        .await
        .unwrap();

    assert_eq!(first, second);

    let stats = engine.stats(1_001).unwrap();
    assert_eq!(stats.total_active, 1);
}

#[tokio::test]
async fn superseding_obsoletes_target_and_recall_returns_only_new_row() {
    let server = MockServer::start();
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), &server.base_url());

    mock_embed(&server, "Using Prisma ORM", [1.0, 0.0, 0.0]);
    mock_embed(&server, "Migrated to Drizzle ORM", [0.0, 1.0, 0.0]);
    mock_embed(&server, "ORM", [0.0, 1.0, 0.0]);

    let mut engine = MemoryEngine::open(dir.path()).unwrap();
    let old_ids = engine
        .remember(
            RememberInput {
                content: "Using Prisma ORM".to_string(),
                mem_type: Some(MemoryType::Decision),
                ..Default::default()
            },
            None,
            1_000,
        )
        .await
        .unwrap();
    let old_id = old_ids[0];

    engine
        .remember(
            RememberInput {
                content: "Migrated to Drizzle ORM".to_string(),
                mem_type: Some(MemoryType::Decision),
                supersedes: Some(old_id),
                ..Default::default()
            },
            None,
            1_001,
        )
        .await
        .unwrap();

    let hits = engine
        .recall("ORM", None, RecallOptions::default(), 1_002)
        .await
        .unwrap();

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].memory.content, "Migrated to Drizzle ORM");
}

#[tokio::test]
async fn recall_orders_by_distance_then_importance() {
    let server = MockServer::start();
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), &server.base_url());

    mock_embed(&server, "row a", [1.0, 0.0, 0.0]);
    mock_embed(&server, "row b", [0.0, 1.0, 0.0]);
    mock_embed(&server, "query", [1.0, 0.0, 0.0]);

    let mut engine = MemoryEngine::open(dir.path()).unwrap();
    engine
        .remember(
            RememberInput {
                content: "row a".to_string(),
                importance: Some(5),
                skip_dedup: true,
                ..Default::default()
            },
            None,
            1_000,
        )
        .await
        .unwrap();
    engine
        .remember(
            RememberInput {
                content: "row b".to_string(),
                importance: Some(3),
                skip_dedup: true,
                ..Default::default()
            },
            None,
            1_000,
        )
        .await
        .unwrap();

    let hits = engine.recall("query", None, RecallOptions::default(), 1_000).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].memory.content, "row a");
    assert!(hits[0].score > hits[1].score);
}

#[tokio::test]
async fn consolidation_dry_run_reports_single_cluster_without_mutating() {
    let server = MockServer::start();
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), &server.base_url());

    let phrasings = [
        ("use TypeScript strict mode", 3),
        ("use TypeScript strict mode everywhere", 2),
        ("always use TypeScript strict mode", 4),
        ("TypeScript strict mode is required", 1),
        ("we use TypeScript strict mode here", 5),
    ];
    for (i, (text, _)) in phrasings.iter().enumerate() {
        mock_embed(&server, text, [1.0, 0.0001 * i as f32, 0.0]);
    }

    let mut engine = MemoryEngine::open(dir.path()).unwrap();
    let mut ids = Vec::new();
    for (text, importance) in phrasings {
        let id = engine
            .remember(
                RememberInput {
                    content: text.to_string(),
                    importance: Some(importance),
                    skip_dedup: true,
                    ..Default::default()
                },
                None,
                1_000,
            )
            .await
            .unwrap();
        ids.push(id[0]);
    }

    let report = engine.consolidate(true, 1_000).unwrap();
    assert_eq!(report.clusters.len(), 1);
    assert_eq!(report.clusters[0].kept, ids[4]); // highest importance (5)
    assert_eq!(report.clusters[0].merged.len(), 4);

    let stats = engine.stats(1_000).unwrap();
    assert_eq!(stats.total_obsolete, 0);
}

#[tokio::test]
async fn gc_preserves_high_confidence_and_deletes_low_confidence_unused() {
    let server = MockServer::start();
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), &server.base_url());

    mock_embed(&server, "kept forever", [1.0, 0.0, 0.0]);
    mock_embed(&server, "fading note", [0.0, 1.0, 0.0]);

    let mut engine = MemoryEngine::open(dir.path()).unwrap();
    let created_at = 0i64;
    let now = 365 * 86_400;

    engine
        .remember(
            RememberInput {
                content: "kept forever".to_string(),
                confidence: Some(1.0),
                skip_dedup: true,
                ..Default::default()
            },
            None,
            created_at,
        )
        .await
        .unwrap();
    engine
        .remember(
            RememberInput {
                content: "fading note".to_string(),
                confidence: Some(0.2),
                skip_dedup: true,
                ..Default::default()
            },
            None,
            created_at,
        )
        .await
        .unwrap();

    let report = engine.garbage_collect(now).unwrap();
    assert_eq!(report.deleted, 1);

    let stats = engine.stats(now).unwrap();
    assert_eq!(stats.total_active, 1);
}
