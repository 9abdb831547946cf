//! Reinforcement and spaced review.
//!
//! [`touch`] resets a record's decay and bumps its use count; [`observe`]
//! additionally strengthens records reused in an unfamiliar context (tag sets
//! largely disjoint from the record's own). [`review_candidates`] surfaces
//! records whose score has drifted into the danger zone — decayed enough to
//! be at risk, not yet gone — for blending into search results.

use std::collections::HashSet;

use serde::Serialize;

use crate::config::ReviewConfig;
use crate::error::Result;
use crate::memory::decay::Scorer;
use crate::memory::similarity::jaccard;
use crate::memory::types::{Memory, MemoryStatus, ObservationEvent};
use crate::store::{JsonlStore, MemoryFilter};

/// Maximum record strength; boosts saturate here.
pub const MAX_STRENGTH: f64 = 2.0;

/// Result of a [`touch`] operation.
#[derive(Debug, Serialize)]
pub struct TouchResult {
    pub id: String,
    pub old_score: f64,
    pub new_score: f64,
    pub use_count: u32,
    pub strength: f64,
}

/// Result of an [`observe`] operation.
#[derive(Debug, Serialize)]
pub struct ObserveResult {
    pub id: String,
    pub old_score: f64,
    pub new_score: f64,
    pub use_count: u32,
    pub strength: f64,
    /// `true` when the cross-domain boost applied.
    pub cross_domain: bool,
}

/// A record worth resurfacing, with its review priority.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewCandidate {
    pub memory: Memory,
    pub priority: f64,
    pub score: f64,
}

/// Reinforce a record: reset `last_used`, increment `use_count`, and
/// optionally bump strength by the configured touch boost.
pub fn touch(
    store: &JsonlStore,
    scorer: &Scorer,
    config: &ReviewConfig,
    id: &str,
    boost_strength: bool,
    now: i64,
) -> Result<TouchResult> {
    let mut memory = store.get_memory(id)?;
    let old_score = scorer.score(&memory, now);

    memory.last_used = now;
    memory.use_count += 1;
    if boost_strength {
        memory.strength = (memory.strength + config.touch_boost).min(MAX_STRENGTH);
    }

    let new_score = scorer.score(&memory, now);
    let result = TouchResult {
        id: memory.id.clone(),
        old_score,
        new_score,
        use_count: memory.use_count,
        strength: memory.strength,
    };
    store.put_memory(memory)?;

    tracing::debug!(
        id = %result.id,
        old_score = result.old_score,
        new_score = result.new_score,
        "memory reinforced"
    );
    Ok(result)
}

/// Like [`touch`], but the caller reports the tags of the context the record
/// was used in. Reuse in a mostly-disjoint context is stronger evidence of
/// durable value than in-domain reuse, so it earns an extra strength boost.
pub fn observe(
    store: &JsonlStore,
    scorer: &Scorer,
    config: &ReviewConfig,
    event: &ObservationEvent,
) -> Result<ObserveResult> {
    let mut memory = store.get_memory(&event.memory_id)?;
    let old_score = scorer.score(&memory, event.observed_at);

    memory.last_used = event.observed_at;
    memory.use_count += 1;

    let overlap = jaccard(&event.context_tags, &memory.tags);
    let cross_domain = overlap < config.cross_domain_threshold;
    if cross_domain {
        memory.strength = (memory.strength + config.cross_domain_boost).min(MAX_STRENGTH);
    }

    let new_score = scorer.score(&memory, event.observed_at);
    let result = ObserveResult {
        id: memory.id.clone(),
        old_score,
        new_score,
        use_count: memory.use_count,
        strength: memory.strength,
        cross_domain,
    };
    store.put_memory(memory)?;

    tracing::debug!(
        id = %result.id,
        cross_domain,
        overlap,
        "usage observed"
    );
    Ok(result)
}

/// Review priority of a record: a Gaussian bump centered in the danger zone,
/// suppressed entirely for records touched within the last hour. Scores well
/// outside the zone get exactly zero.
pub fn review_priority(scorer: &Scorer, config: &ReviewConfig, memory: &Memory, now: i64) -> f64 {
    if now - memory.last_used < config.recency_suppression_secs {
        return 0.0;
    }

    let score = scorer.score(memory, now);
    let center = (config.danger_zone_low + config.danger_zone_high) / 2.0;
    let half_width = (config.danger_zone_high - config.danger_zone_low) / 2.0;
    if half_width <= 0.0 || (score - center).abs() > 2.0 * half_width {
        return 0.0;
    }

    let sigma = half_width / 2.0;
    (-0.5 * ((score - center) / sigma).powi(2)).exp()
}

/// Active records in the danger zone, highest priority first, skipping ids
/// in `exclude`. Used by search blending.
pub fn review_candidates(
    store: &JsonlStore,
    scorer: &Scorer,
    config: &ReviewConfig,
    now: i64,
    exclude: &HashSet<String>,
    limit: usize,
) -> Vec<ReviewCandidate> {
    if limit == 0 {
        return Vec::new();
    }

    let filter = MemoryFilter {
        status: Some(MemoryStatus::Active),
        ..Default::default()
    };
    let mut candidates: Vec<ReviewCandidate> = store
        .list_memories(&filter)
        .into_iter()
        .filter(|m| !exclude.contains(&m.id))
        .filter_map(|m| {
            let priority = review_priority(scorer, config, &m, now);
            if priority > 0.0 {
                let score = scorer.score(&m, now);
                Some(ReviewCandidate {
                    memory: m,
                    priority,
                    score,
                })
            } else {
                None
            }
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.priority
            .partial_cmp(&a.priority)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.memory.id.cmp(&b.memory.id))
    });
    candidates.truncate(limit);
    candidates
}

/// Number of top-k slots review candidates may claim: `ceil(blend_ratio * k)`.
pub fn blend_slots(config: &ReviewConfig, k: usize) -> usize {
    (config.blend_ratio * k as f64).ceil() as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DecayConfig, LifecycleConfig};
    use tempfile::tempdir;

    fn scorer() -> Scorer {
        let decay = DecayConfig {
            decay_model: "exponential".into(),
            half_life_days: 3.0,
            beta: 0.6,
            ..Default::default()
        };
        Scorer::from_config(&decay, &LifecycleConfig::default()).unwrap()
    }

    fn seeded_store(dir: &std::path::Path) -> JsonlStore {
        JsonlStore::open(dir).unwrap()
    }

    fn put(store: &JsonlStore, id: &str, tags: &[&str], last_used: i64) -> Memory {
        let mut m = Memory::new("content", 0);
        m.id = id.into();
        m.tags = tags.iter().map(|t| t.to_string()).collect();
        m.last_used = last_used;
        store.put_memory(m.clone()).unwrap();
        m
    }

    #[test]
    fn touch_resets_decay_and_counts() {
        let dir = tempdir().unwrap();
        let store = seeded_store(dir.path());
        let scorer = scorer();
        let config = ReviewConfig::default();
        let now = 10 * 86_400;

        put(&store, "m-1", &[], 86_400);
        let result = touch(&store, &scorer, &config, "m-1", false, now).unwrap();

        assert!(result.new_score > result.old_score);
        assert_eq!(result.use_count, 2);
        assert_eq!(result.strength, 1.0);

        let reloaded = store.get_memory("m-1").unwrap();
        assert_eq!(reloaded.last_used, now);
        assert_eq!(reloaded.use_count, 2);
    }

    #[test]
    fn touch_boost_saturates_at_cap() {
        let dir = tempdir().unwrap();
        let store = seeded_store(dir.path());
        let scorer = scorer();
        let config = ReviewConfig::default();

        let mut m = Memory::new("content", 0);
        m.id = "m-1".into();
        m.strength = 1.95;
        store.put_memory(m).unwrap();

        let result = touch(&store, &scorer, &config, "m-1", true, 100).unwrap();
        assert_eq!(result.strength, 2.0);
    }

    #[test]
    fn touch_missing_id_is_not_found() {
        let dir = tempdir().unwrap();
        let store = seeded_store(dir.path());
        let result = touch(
            &store,
            &scorer(),
            &ReviewConfig::default(),
            "m-ghost",
            false,
            100,
        );
        assert!(matches!(result, Err(crate::error::Error::NotFound(_))));
    }

    #[test]
    fn cross_domain_observation_boosts_strength() {
        // Tags {security, jwt} observed from {api, frontend}: Jaccard 0 < 0.3,
        // so strength goes 1.0 → 1.15 and the touch applies.
        let dir = tempdir().unwrap();
        let store = seeded_store(dir.path());
        let scorer = scorer();
        let config = ReviewConfig::default();
        let now = 5 * 86_400;

        put(&store, "m-1", &["security", "jwt"], 86_400);
        let event = ObservationEvent {
            memory_id: "m-1".into(),
            observed_at: now,
            context_tags: vec!["api".into(), "frontend".into()],
        };
        let result = observe(&store, &scorer, &config, &event).unwrap();

        assert!(result.cross_domain);
        assert!((result.strength - 1.15).abs() < 1e-12);
        assert_eq!(result.use_count, 2);
        assert_eq!(store.get_memory("m-1").unwrap().last_used, now);
    }

    #[test]
    fn in_domain_observation_only_touches() {
        let dir = tempdir().unwrap();
        let store = seeded_store(dir.path());
        let scorer = scorer();
        let config = ReviewConfig::default();

        put(&store, "m-1", &["security", "jwt"], 86_400);
        let event = ObservationEvent {
            memory_id: "m-1".into(),
            observed_at: 2 * 86_400,
            context_tags: vec!["security".into(), "jwt".into(), "auth".into()],
        };
        // Jaccard 2/3 ≥ 0.3: no boost.
        let result = observe(&store, &scorer, &config, &event).unwrap();
        assert!(!result.cross_domain);
        assert_eq!(result.strength, 1.0);
        assert_eq!(result.use_count, 2);
    }

    #[test]
    fn priority_peaks_inside_danger_zone() {
        let scorer = scorer();
        let config = ReviewConfig::default();
        let now = 100 * 86_400;

        // Pick last_used offsets so scores land in, near, and far from the
        // zone. score = 0.5^(Δt/3d) for use_count 1, strength 1.
        let in_zone = {
            let mut m = Memory::new("x", 0);
            // Δt = 6d → score 0.25: the zone center.
            m.last_used = now - 6 * 86_400;
            m
        };
        let fresh = {
            let mut m = Memory::new("x", 0);
            m.last_used = now - 2 * 3_600; // score ~0.98, far above zone
            m
        };
        let gone = {
            let mut m = Memory::new("x", 0);
            m.last_used = now - 40 * 86_400; // score ~1e-4, far below zone
            m
        };

        let p_in = review_priority(&scorer, &config, &in_zone, now);
        let p_fresh = review_priority(&scorer, &config, &fresh, now);
        let p_gone = review_priority(&scorer, &config, &gone, now);

        assert!(p_in > 0.9, "was {p_in}");
        assert_eq!(p_fresh, 0.0);
        assert_eq!(p_gone, 0.0);
    }

    #[test]
    fn recently_touched_records_suppressed() {
        let scorer = scorer();
        let config = ReviewConfig::default();
        let now = 100 * 86_400;

        let mut m = Memory::new("x", 0);
        m.last_used = now - 600; // ten minutes ago
        assert_eq!(review_priority(&scorer, &config, &m, now), 0.0);
    }

    #[test]
    fn candidates_ranked_and_excluded() {
        let dir = tempdir().unwrap();
        let store = seeded_store(dir.path());
        let scorer = scorer();
        let config = ReviewConfig::default();
        let now = 100 * 86_400;

        // Two zone records at different distances from the center, one
        // excluded, one fresh record that never qualifies.
        put(&store, "m-center", &[], now - 6 * 86_400);
        put(&store, "m-edge", &[], now - 8 * 86_400);
        put(&store, "m-skip", &[], now - 6 * 86_400);
        put(&store, "m-fresh", &[], now - 2 * 3_600);

        let exclude: HashSet<String> = ["m-skip".to_string()].into();
        let candidates = review_candidates(&store, &scorer, &config, now, &exclude, 10);

        let ids: Vec<&str> = candidates.iter().map(|c| c.memory.id.as_str()).collect();
        assert_eq!(ids, vec!["m-center", "m-edge"]);
        assert!(candidates[0].priority > candidates[1].priority);
    }

    #[test]
    fn blend_slot_count_rounds_up() {
        let config = ReviewConfig::default();
        assert_eq!(blend_slots(&config, 10), 3);
        assert_eq!(blend_slots(&config, 1), 1);
        assert_eq!(blend_slots(&config, 0), 0);
    }
}
