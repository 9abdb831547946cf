//! Near-duplicate detection and single-linkage clustering.
//!
//! Exact duplicates (identical normalized content) are auto-clustered by a
//! hash prefilter. The remainder get pairwise similarities under the
//! configured strategy; pairs at or above the link threshold become edges,
//! merged strongest-first into components capped at the configured size.
//! Cohesion (mean pairwise similarity) classifies each cluster for the
//! consolidation pipeline.

use std::collections::HashMap;

use serde::Serialize;

use crate::cancel::CancelToken;
use crate::config::ClusterConfig;
use crate::error::{Error, Result};
use crate::memory::similarity::{
    content_hash, cosine_similarity, jaccard, MinHashSignature,
};
use crate::memory::types::Memory;

/// What to do with a cluster, by cohesion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterAction {
    /// Cohesion ≥ 0.9 — safe to merge without review.
    AutoMerge,
    /// Cohesion ≥ 0.75 — worth a look before merging.
    Review,
    /// Below 0.75 — leave the members alone.
    KeepSeparate,
}

impl ClusterAction {
    fn from_cohesion(cohesion: f64) -> Self {
        if cohesion >= 0.9 {
            Self::AutoMerge
        } else if cohesion >= 0.75 {
            Self::Review
        } else {
            Self::KeepSeparate
        }
    }
}

/// Pairwise similarity strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Embedding cosine when available, MinHash shingles otherwise.
    Similarity,
    /// Jaccard over tag sets.
    TagOverlap,
    /// 1 when created within the temporal window, else 0.
    Temporal,
    /// 0.6 · semantic + 0.25 · tag + 0.15 · temporal.
    Hybrid,
}

impl std::str::FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "similarity" => Ok(Self::Similarity),
            "tag_overlap" => Ok(Self::TagOverlap),
            "temporal" => Ok(Self::Temporal),
            "hybrid" => Ok(Self::Hybrid),
            _ => Err(format!("unknown cluster strategy: {s}")),
        }
    }
}

/// A proposed cluster of near-duplicate memories.
#[derive(Debug, Clone, Serialize)]
pub struct Cluster {
    pub id: String,
    pub member_ids: Vec<String>,
    /// Mean pairwise similarity across all member pairs.
    pub cohesion: f64,
    pub action: ClusterAction,
    /// `true` when the members share identical normalized content.
    pub exact_duplicates: bool,
}

/// Cluster `memories` for consolidation review. Only clusters with two or
/// more members are returned. The token is checked once per candidate.
pub fn cluster_memories(
    memories: &[Memory],
    config: &ClusterConfig,
    token: &CancelToken,
) -> Result<Vec<Cluster>> {
    let strategy: Strategy = config
        .strategy
        .parse()
        .map_err(Error::Invalid)?;

    // Prefilter: identical normalized content auto-clusters.
    let mut by_hash: HashMap<u64, Vec<usize>> = HashMap::new();
    for (idx, memory) in memories.iter().enumerate() {
        token.check()?;
        by_hash.entry(content_hash(&memory.content)).or_default().push(idx);
    }

    let mut clusters = Vec::new();
    let mut remainder: Vec<usize> = Vec::new();
    for (_, group) in by_hash {
        if group.len() >= 2 {
            clusters.push(Cluster {
                id: new_cluster_id(),
                member_ids: sorted_ids(memories, &group),
                cohesion: 1.0,
                action: ClusterAction::AutoMerge,
                exact_duplicates: true,
            });
        } else {
            remainder.extend(group);
        }
    }

    // Pairwise similarity over the remainder under the configured strategy.
    let signatures: Vec<Option<MinHashSignature>> = remainder
        .iter()
        .map(|&idx| {
            let m = &memories[idx];
            if m.embed.is_none() && matches!(strategy, Strategy::Similarity | Strategy::Hybrid) {
                Some(MinHashSignature::of(&m.content))
            } else {
                None
            }
        })
        .collect();

    let n = remainder.len();
    let mut edges: Vec<(f64, usize, usize)> = Vec::new();
    let mut pair_sims: HashMap<(usize, usize), f64> = HashMap::new();
    for i in 0..n {
        token.check()?;
        for j in (i + 1)..n {
            let sim = pair_similarity(
                &memories[remainder[i]],
                &memories[remainder[j]],
                signatures[i].as_ref(),
                signatures[j].as_ref(),
                strategy,
                config.temporal_window_secs,
            );
            pair_sims.insert((i, j), sim);
            if sim >= config.link_threshold {
                edges.push((sim, i, j));
            }
        }
    }

    // Strongest edges first; a merge that would blow the size cap is refused,
    // which is equivalent to breaking the weakest edges of an oversized
    // component.
    edges.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    let mut dsu = DisjointSet::new(n);
    for (_, i, j) in &edges {
        dsu.union_capped(*i, *j, config.max_cluster_size);
    }

    let mut components: HashMap<usize, Vec<usize>> = HashMap::new();
    for i in 0..n {
        components.entry(dsu.find(i)).or_default().push(i);
    }

    for (_, members) in components {
        if members.len() < 2 {
            continue;
        }
        let cohesion = mean_pairwise(&members, &pair_sims);
        clusters.push(Cluster {
            id: new_cluster_id(),
            member_ids: sorted_ids(
                memories,
                &members.iter().map(|&i| remainder[i]).collect::<Vec<_>>(),
            ),
            cohesion,
            action: ClusterAction::from_cohesion(cohesion),
            exact_duplicates: false,
        });
    }

    clusters.sort_by(|a, b| {
        b.cohesion
            .partial_cmp(&a.cohesion)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    Ok(clusters)
}

fn pair_similarity(
    a: &Memory,
    b: &Memory,
    sig_a: Option<&MinHashSignature>,
    sig_b: Option<&MinHashSignature>,
    strategy: Strategy,
    temporal_window_secs: i64,
) -> f64 {
    match strategy {
        Strategy::Similarity => semantic_similarity(a, b, sig_a, sig_b),
        Strategy::TagOverlap => jaccard(&a.tags, &b.tags),
        Strategy::Temporal => temporal_similarity(a, b, temporal_window_secs),
        Strategy::Hybrid => {
            0.6 * semantic_similarity(a, b, sig_a, sig_b)
                + 0.25 * jaccard(&a.tags, &b.tags)
                + 0.15 * temporal_similarity(a, b, temporal_window_secs)
        }
    }
}

fn semantic_similarity(
    a: &Memory,
    b: &Memory,
    sig_a: Option<&MinHashSignature>,
    sig_b: Option<&MinHashSignature>,
) -> f64 {
    match (&a.embed, &b.embed) {
        (Some(ea), Some(eb)) => cosine_similarity(ea, eb),
        _ => match (sig_a, sig_b) {
            (Some(sa), Some(sb)) => sa.similarity(sb),
            _ => 0.0,
        },
    }
}

fn temporal_similarity(a: &Memory, b: &Memory, window_secs: i64) -> f64 {
    if (a.created_at - b.created_at).abs() < window_secs {
        1.0
    } else {
        0.0
    }
}

fn mean_pairwise(members: &[usize], pair_sims: &HashMap<(usize, usize), f64>) -> f64 {
    let mut total = 0.0;
    let mut count = 0usize;
    for (pos, &i) in members.iter().enumerate() {
        for &j in &members[pos + 1..] {
            let key = if i < j { (i, j) } else { (j, i) };
            if let Some(sim) = pair_sims.get(&key) {
                total += sim;
                count += 1;
            }
        }
    }
    if count == 0 {
        1.0
    } else {
        total / count as f64
    }
}

fn sorted_ids(memories: &[Memory], indices: &[usize]) -> Vec<String> {
    let mut ids: Vec<String> = indices.iter().map(|&i| memories[i].id.clone()).collect();
    ids.sort();
    ids
}

fn new_cluster_id() -> String {
    format!("c-{}", uuid::Uuid::now_v7().simple())
}

/// Union-find with a component size cap.
struct DisjointSet {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            size: vec![1; n],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    /// Merge unless the combined component would exceed `cap`.
    fn union_capped(&mut self, a: usize, b: usize, cap: usize) -> bool {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return true;
        }
        if self.size[ra] + self.size[rb] > cap {
            return false;
        }
        let (big, small) = if self.size[ra] >= self.size[rb] {
            (ra, rb)
        } else {
            (rb, ra)
        };
        self.parent[small] = big;
        self.size[big] += self.size[small];
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory(id: &str, content: &str, embed: Option<Vec<f32>>, created_at: i64) -> Memory {
        let mut m = Memory::new(content, created_at);
        m.id = id.into();
        m.embed = embed;
        m
    }

    fn config(strategy: &str) -> ClusterConfig {
        ClusterConfig {
            strategy: strategy.into(),
            ..Default::default()
        }
    }

    fn axis(dim: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; 8];
        v[dim] = 1.0;
        v
    }

    fn tilted(dim: usize, lean: f32) -> Vec<f32> {
        let mut v = vec![0.0f32; 8];
        v[dim] = 1.0;
        v[(dim + 1) % 8] = lean;
        v
    }

    #[test]
    fn exact_duplicates_auto_cluster() {
        let memories = vec![
            memory("m-1", "Use Postgres for analytics", None, 100),
            memory("m-2", "use  postgres for ANALYTICS", None, 200),
            memory("m-3", "something else entirely", None, 300),
        ];
        let clusters =
            cluster_memories(&memories, &config("similarity"), &CancelToken::new()).unwrap();

        assert_eq!(clusters.len(), 1);
        assert!(clusters[0].exact_duplicates);
        assert_eq!(clusters[0].cohesion, 1.0);
        assert_eq!(clusters[0].action, ClusterAction::AutoMerge);
        assert_eq!(clusters[0].member_ids, vec!["m-1", "m-2"]);
    }

    #[test]
    fn embedding_similarity_links_neighbors() {
        let memories = vec![
            memory("m-1", "alpha", Some(axis(0)), 100),
            memory("m-2", "beta", Some(tilted(0, 0.1)), 100),
            memory("m-3", "gamma", Some(axis(4)), 100),
        ];
        let clusters =
            cluster_memories(&memories, &config("similarity"), &CancelToken::new()).unwrap();

        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].member_ids, vec!["m-1", "m-2"]);
        assert!(clusters[0].cohesion > 0.95);
        assert_eq!(clusters[0].action, ClusterAction::AutoMerge);
    }

    #[test]
    fn tag_overlap_strategy_ignores_content() {
        let mut a = memory("m-1", "first body", None, 100);
        a.tags = vec!["infra".into(), "db".into()];
        let mut b = memory("m-2", "second body", None, 100);
        b.tags = vec!["infra".into(), "db".into()];
        let mut c = memory("m-3", "third body", None, 100);
        c.tags = vec!["frontend".into()];

        let clusters =
            cluster_memories(&[a, b, c], &config("tag_overlap"), &CancelToken::new()).unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].member_ids, vec!["m-1", "m-2"]);
    }

    #[test]
    fn temporal_strategy_links_same_window() {
        let mut cfg = config("temporal");
        cfg.temporal_window_secs = 3_600;
        let memories = vec![
            memory("m-1", "one", None, 1_000),
            memory("m-2", "two", None, 2_000),
            memory("m-3", "three", None, 100_000),
        ];
        let clusters = cluster_memories(&memories, &cfg, &CancelToken::new()).unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].member_ids, vec!["m-1", "m-2"]);
    }

    #[test]
    fn size_cap_refuses_weakest_merges() {
        let mut cfg = config("similarity");
        cfg.max_cluster_size = 2;
        cfg.link_threshold = 0.5;

        // Three mutually similar embeddings; cap 2 keeps one pair plus a
        // singleton rather than one oversized cluster.
        let memories = vec![
            memory("m-1", "a", Some(axis(0)), 100),
            memory("m-2", "b", Some(tilted(0, 0.05)), 100),
            memory("m-3", "c", Some(tilted(0, 0.1)), 100),
        ];
        let clusters = cluster_memories(&memories, &cfg, &CancelToken::new()).unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].member_ids.len(), 2);
    }

    #[test]
    fn cohesion_classifies_review_band() {
        // Force a pair whose similarity lands between 0.75 and 0.9.
        let mut cfg = config("similarity");
        cfg.link_threshold = 0.7;
        let memories = vec![
            memory("m-1", "a", Some(vec![1.0, 0.0, 0.0, 0.0]), 100),
            memory("m-2", "b", Some(vec![1.0, 0.7, 0.0, 0.0]), 100),
        ];
        let clusters = cluster_memories(&memories, &cfg, &CancelToken::new()).unwrap();
        assert_eq!(clusters.len(), 1);
        let c = &clusters[0];
        assert!(c.cohesion > 0.75 && c.cohesion < 0.9, "cohesion {}", c.cohesion);
        assert_eq!(c.action, ClusterAction::Review);
    }

    #[test]
    fn cancellation_observed() {
        let token = CancelToken::new();
        token.cancel();
        let memories = vec![memory("m-1", "a", None, 100)];
        let result = cluster_memories(&memories, &config("similarity"), &token);
        assert!(matches!(result, Err(crate::error::Error::Cancelled)));
    }

    #[test]
    fn unknown_strategy_rejected() {
        let memories = vec![memory("m-1", "a", None, 100)];
        let result = cluster_memories(&memories, &config("kmeans"), &CancelToken::new());
        assert!(matches!(result, Err(crate::error::Error::Invalid(_))));
    }
}
