use crate::types::Memory;

/// Combines vector distance with recency, importance, usage and confidence
/// into a scalar score (spec.md §4.8). Scope boosts are applied by the
/// caller, not here, so the ranker stays scope-free and unit-testable.
pub struct Ranker {
    boost_recency: bool,
    recency_half_life_days: f64,
}

impl Ranker {
    pub fn new(boost_recency: bool, recency_half_life_days: f64) -> Self {
        Self {
            boost_recency,
            recency_half_life_days,
        }
    }

    pub fn score(&self, memory: &Memory, distance: f64, now: i64) -> f64 {
        let similarity = 1.0 / (1.0 + distance.max(0.0));
        let recency = self.recency_factor(memory, now);
        let importance = 0.5 + 0.1 * (memory.importance.clamp(1, 5) as f64);
        let usage = 1.0 + 0.05 * (memory.access_count.clamp(0, 10) as f64);
        similarity * recency * importance * usage * memory.confidence
    }

    fn recency_factor(&self, memory: &Memory, now: i64) -> f64 {
        if !self.boost_recency {
            return 1.0;
        }
        let age_days = ((now - memory.created_at).max(0) as f64) / 86_400.0;
        let half_life = self.recency_half_life_days.max(f64::EPSILON);
        0.7 + 0.3 * (-age_days / half_life).exp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MemoryType, Source};

    fn base_memory() -> Memory {
        Memory {
            id: 1,
            content: "x".to_string(),
            mem_type: MemoryType::Fact,
            project: None,
            category: None,
            reasoning: None,
            source: Source::Manual,
            importance: 3,
            confidence: 1.0,
            created_at: 0,
            last_accessed: None,
            access_count: 0,
            expires_at: None,
            supersedes: None,
            is_obsolete: false,
            tags: vec![],
        }
    }

    #[test]
    fn closer_distance_scores_strictly_higher() {
        let ranker = Ranker::new(true, 30.0);
        let m = base_memory();
        let near = ranker.score(&m, 0.1, 0);
        let far = ranker.score(&m, 5.0, 0);
        assert!(near > far);
    }

    #[test]
    fn higher_importance_scores_strictly_higher_within_range() {
        let ranker = Ranker::new(true, 30.0);
        let mut low = base_memory();
        low.importance = 1;
        let mut high = base_memory();
        high.importance = 5;
        assert!(ranker.score(&high, 1.0, 0) > ranker.score(&low, 1.0, 0));
    }

    #[test]
    fn recency_decays_with_age_when_boost_enabled() {
        let ranker = Ranker::new(true, 30.0);
        let m = base_memory();
        let fresh = ranker.score(&m, 1.0, 0);
        let stale = ranker.score(&m, 1.0, 30 * 86_400);
        assert!(fresh > stale);
    }

    #[test]
    fn recency_disabled_ignores_age() {
        let ranker = Ranker::new(false, 30.0);
        let m = base_memory();
        let fresh = ranker.score(&m, 1.0, 0);
        let stale = ranker.score(&m, 1.0, 365 * 86_400);
        assert!((fresh - stale).abs() < 1e-12);
    }

    #[test]
    fn more_accesses_score_higher_up_to_the_cap() {
        let ranker = Ranker::new(true, 30.0);
        let mut rarely = base_memory();
        rarely.access_count = 0;
        let mut often = base_memory();
        often.access_count = 50;
        assert!(ranker.score(&often, 1.0, 0) > ranker.score(&rarely, 1.0, 0));
    }

    #[test]
    fn score_is_strictly_positive_for_finite_inputs() {
        let ranker = Ranker::new(true, 30.0);
        let m = base_memory();
        assert!(ranker.score(&m, 0.0, 0) > 0.0);
    }
}
