use serde::Serialize;

use crate::error::EngineResult;
use crate::store::Store;

#[derive(Debug, Clone, Default, Serialize)]
pub struct GcReport {
    pub deleted: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsolidatedCluster {
    pub kept: i64,
    pub merged: Vec<i64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsolidateReport {
    pub clusters: Vec<ConsolidatedCluster>,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CorruptionReport {
    pub deleted: usize,
    pub samples: Vec<String>,
    pub dry_run: bool,
}

/// Deletes unused-and-low-confidence rows and expired rows (spec.md §4.9).
pub fn garbage_collect(store: &mut Store, now: i64, max_age_unused_days: i64, min_confidence: f64) -> EngineResult<GcReport> {
    let ids = store.gc_candidates(now, max_age_unused_days, min_confidence)?;
    let deleted = store.delete_many(&ids)?;
    Ok(GcReport { deleted })
}

/// Closed list of known corruption signatures (spec.md §4.9): a JSON-object
/// prefix, a bare-array prefix not labeled with a leading bracketed tag, and
/// known leaked prompt fragments.
const KNOWN_LEAKED_FRAGMENTS: &[&str] = &["You are Claude", "<system-reminder>", "SYSTEM PROMPT:"];

fn looks_corrupted(content: &str) -> bool {
    let trimmed = content.trim();
    if trimmed.chars().count() < 20 {
        return true;
    }
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return true;
    }
    if trimmed.starts_with('[') && !trimmed.starts_with("[/") && !is_bracket_label(trimmed) {
        return true;
    }
    KNOWN_LEAKED_FRAGMENTS.iter().any(|f| trimmed.contains(f))
}

/// A chunk part-marker like `[1/3] ...` is a legitimate bracket prefix, not
/// a bare-array corruption signature.
fn is_bracket_label(s: &str) -> bool {
    s.find(']')
        .map(|close| {
            let label = &s[1..close];
            !label.is_empty() && label.chars().all(|c| c.is_ascii_digit() || c == '/')
        })
        .unwrap_or(false)
}

/// Deletes active rows matching a known corruption signature (spec.md
/// §4.9). Dry-run reports the count plus up to 10 truncated samples without
/// mutating.
pub fn cleanup_corrupted(store: &mut Store, dry_run: bool, now: i64) -> EngineResult<CorruptionReport> {
    if !dry_run {
        cleanup_orphaned_vectors(store)?;
    }
    let active = store.scan_active(now)?;
    let corrupted: Vec<&crate::types::Memory> = active.iter().filter(|m| looks_corrupted(&m.content)).collect();

    let samples = corrupted
        .iter()
        .take(10)
        .map(|m| m.content.chars().take(80).collect())
        .collect();

    if dry_run {
        return Ok(CorruptionReport {
            deleted: corrupted.len(),
            samples,
            dry_run: true,
        });
    }

    let ids: Vec<i64> = corrupted.iter().map(|m| m.id).collect();
    let deleted = store.delete_many(&ids)?;
    Ok(CorruptionReport {
        deleted,
        samples,
        dry_run: false,
    })
}

/// Clusters near-duplicate active memories by nearest-neighbour distance,
/// keeping the representative with the highest `importance · confidence ·
/// (1 + access_count)` and marking the rest obsolete with `supersedes`
/// pointing at the winner (spec.md §4.9).
pub fn consolidate(store: &mut Store, distance_threshold: f64, dry_run: bool, now: i64) -> EngineResult<ConsolidateReport> {
    let mut active = store.scan_active(now)?;
    active.sort_by_key(|m| m.id);

    let mut processed = std::collections::HashSet::new();
    let mut clusters = Vec::new();

    for m in &active {
        if processed.contains(&m.id) {
            continue;
        }

        let neighbors = store.neighbors_of(m.id, 20, now)?;
        let mut cluster_ids: Vec<i64> = neighbors
            .into_iter()
            .filter(|(n, dist)| *dist < distance_threshold && !processed.contains(&n.id))
            .map(|(n, _)| n.id)
            .collect();

        if cluster_ids.is_empty() {
            processed.insert(m.id);
            continue;
        }
        cluster_ids.push(m.id);

        let mut members = Vec::with_capacity(cluster_ids.len());
        for id in &cluster_ids {
            if let Some(row) = store.get(*id)? {
                members.push(row);
            }
        }

        let winner = members
            .iter()
            .max_by(|a, b| {
                representative_score(a)
                    .partial_cmp(&representative_score(b))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|m| m.id)
            .unwrap_or(m.id);

        let merged: Vec<i64> = cluster_ids.iter().copied().filter(|&id| id != winner).collect();

        if !dry_run {
            for &loser in &merged {
                store.set_obsolete_with_supersedes(loser, winner)?;
            }
        }

        for id in &cluster_ids {
            processed.insert(*id);
        }

        clusters.push(ConsolidatedCluster { kept: winner, merged });
    }

    Ok(ConsolidateReport { clusters, dry_run })
}

fn representative_score(m: &crate::types::Memory) -> f64 {
    (m.importance as f64) * m.confidence * (1.0 + m.access_count as f64)
}

/// Removes vector rows with no owning memory, restoring the parity
/// invariant from spec.md §3. Rows missing an embedding are reported but
/// not repaired here since that would require re-embedding original text.
pub fn cleanup_orphaned_vectors(store: &Store) -> EngineResult<usize> {
    let orphaned = store.find_orphaned_vectors()?;
    for id in &orphaned {
        store.delete_orphaned_vector(*id)?;
    }
    Ok(orphaned.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Memory, MemoryType, Source};

    fn sample(content: &str, created_at: i64, importance: i32) -> Memory {
        Memory {
            id: 0,
            content: content.to_string(),
            mem_type: MemoryType::Fact,
            project: None,
            category: None,
            reasoning: None,
            source: Source::Manual,
            importance,
            confidence: 1.0,
            created_at,
            last_accessed: None,
            access_count: 0,
            expires_at: None,
            supersedes: None,
            is_obsolete: false,
            tags: vec![],
        }
    }

    #[test]
    fn garbage_collect_removes_expired_regardless_of_confidence() {
        let mut store = Store::open_in_memory(3).unwrap();
        let mut expired = sample("gone", 0, 5);
        expired.expires_at = Some(100);
        expired.confidence = 1.0;
        let id_expired = store.insert(&expired, &[0.1, 0.1, 0.1]).unwrap();

        let report = garbage_collect(&mut store, 200, 180, 0.5).unwrap();
        assert_eq!(report.deleted, 1);
        assert!(store.get(id_expired).unwrap().is_none());
    }

    #[test]
    fn garbage_collect_preserves_high_confidence_unused_rows() {
        let mut store = Store::open_in_memory(3).unwrap();
        let mut old = sample("kept", 0, 5);
        old.confidence = 1.0;
        let id = store.insert(&old, &[0.1, 0.1, 0.1]).unwrap();

        let now = 365 * 86_400;
        let report = garbage_collect(&mut store, now, 180, 0.5).unwrap();
        assert_eq!(report.deleted, 0);
        assert!(store.get(id).unwrap().is_some());
    }

    #[test]
    fn garbage_collect_removes_low_confidence_unused_rows() {
        let mut store = Store::open_in_memory(3).unwrap();
        let mut stale = sample("stale", 0, 5);
        stale.confidence = 0.2;
        let id = store.insert(&stale, &[0.1, 0.1, 0.1]).unwrap();

        let now = 365 * 86_400;
        let report = garbage_collect(&mut store, now, 180, 0.5).unwrap();
        assert_eq!(report.deleted, 1);
        assert!(store.get(id).unwrap().is_none());
    }

    #[test]
    fn consolidate_dry_run_reports_without_mutating() {
        let mut store = Store::open_in_memory(3).unwrap();
        let a = sample("use TypeScript strict mode", 0, 3);
        let b = sample("use TypeScript strict mode always", 0, 5);
        let id_a = store.insert(&a, &[0.1, 0.1, 0.1]).unwrap();
        let id_b = store.insert(&b, &[0.1000001, 0.1000001, 0.1000001]).unwrap();

        let report = consolidate(&mut store, 0.01, true, 1_000).unwrap();
        assert_eq!(report.clusters.len(), 1);
        assert_eq!(report.clusters[0].kept, id_b);
        assert_eq!(report.clusters[0].merged, vec![id_a]);
        assert!(!store.get(id_a).unwrap().unwrap().is_obsolete);
    }

    #[test]
    fn consolidate_live_run_obsoletes_losers() {
        let mut store = Store::open_in_memory(3).unwrap();
        let a = sample("duplicate note", 0, 3);
        let b = sample("duplicate note restated", 0, 5);
        let id_a = store.insert(&a, &[0.1, 0.1, 0.1]).unwrap();
        let id_b = store.insert(&b, &[0.1000001, 0.1000001, 0.1000001]).unwrap();

        consolidate(&mut store, 0.01, false, 1_000).unwrap();
        let loser = store.get(id_a).unwrap().unwrap();
        assert!(loser.is_obsolete);
        assert_eq!(loser.supersedes, Some(id_b));
    }

    #[test]
    fn cleanup_corrupted_flags_short_and_json_content() {
        let mut store = Store::open_in_memory(3).unwrap();
        let short = sample("too short", 0, 5);
        let json_like = sample(r#"{"role":"user","content":"leaked"}"#, 0, 5);
        let normal = sample("a perfectly ordinary memory about the build pipeline", 0, 5);
        store.insert(&short, &[0.1, 0.1, 0.1]).unwrap();
        store.insert(&json_like, &[0.2, 0.2, 0.2]).unwrap();
        store.insert(&normal, &[0.3, 0.3, 0.3]).unwrap();

        let report = cleanup_corrupted(&mut store, true, 1_000).unwrap();
        assert_eq!(report.deleted, 2);
    }
}
