//! Unified search across the short-term store and the long-term vault.
//!
//! STM candidates are index-filtered then ranked by decay score (times a
//! lexical relevance boost, or embedding cosine when vectors are available);
//! LTM candidates come from the vault index with a simple lexical relevance.
//! Results merge under per-source weights, review candidates blend into a
//! reserved fraction of the top-k, and promoted STM records suppress their
//! vault copies.

use std::collections::HashSet;

use serde::Serialize;

use crate::cancel::CancelToken;
use crate::config::{ReviewConfig, SearchConfig};
use crate::embedding::Embedder;
use crate::error::Result;
use crate::ltm::LtmIndex;
use crate::memory::decay::Scorer;
use crate::memory::review;
use crate::memory::similarity::cosine_similarity;
use crate::memory::types::{Memory, MemoryStatus};
use crate::store::{JsonlStore, MemoryFilter};

/// Which stores a search consults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchSources {
    Stm,
    Ltm,
    Both,
}

impl std::str::FromStr for SearchSources {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "stm" => Ok(Self::Stm),
            "ltm" => Ok(Self::Ltm),
            "both" => Ok(Self::Both),
            _ => Err(format!("unknown search sources: {s}")),
        }
    }
}

/// Where a hit came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HitSource {
    Stm,
    Ltm,
    /// Blended in from the review queue, not the raw result set.
    Review,
}

/// A search request. `window_days` bounds how stale an STM candidate's last
/// use may be; `min_score` drops weak STM candidates before ranking.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: Option<String>,
    pub tags: Vec<String>,
    pub window_days: Option<f64>,
    pub min_score: Option<f64>,
    pub limit: usize,
    pub sources: SearchSources,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            query: None,
            tags: Vec::new(),
            window_days: None,
            min_score: None,
            limit: 10,
            sources: SearchSources::Both,
        }
    }
}

/// One ranked result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub source: HitSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used: Option<i64>,
}

/// Run a unified search. The embedder, when present, is consulted outside
/// any lock and failures degrade to lexical ranking.
#[allow(clippy::too_many_arguments)]
pub fn search_unified(
    store: &JsonlStore,
    ltm: Option<&LtmIndex>,
    embedder: Option<&dyn Embedder>,
    scorer: &Scorer,
    review_config: &ReviewConfig,
    search_config: &SearchConfig,
    request: &SearchRequest,
    now: i64,
    token: &CancelToken,
) -> Result<Vec<SearchHit>> {
    let query_embed = match (&request.query, embedder) {
        (Some(query), Some(embedder)) => match embedder.embed(query) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(error = %e, "query embedding failed, falling back to lexical");
                None
            }
        },
        _ => None,
    };

    let mut hits: Vec<SearchHit> = Vec::new();
    let mut promoted_paths: HashSet<String> = HashSet::new();

    if request.sources != SearchSources::Ltm {
        let stm = stm_candidates(
            store,
            scorer,
            search_config,
            request,
            query_embed.as_deref(),
            now,
            token,
        )?;
        for hit in &stm {
            if let Some(path) = &hit.promoted_to {
                promoted_paths.insert(path.clone());
            }
        }
        hits.extend(stm.into_iter().map(|c| c.hit));
    }

    if request.sources != SearchSources::Stm {
        if let Some(ltm) = ltm {
            hits.extend(ltm_candidates(
                ltm,
                embedder,
                query_embed.as_deref(),
                search_config,
                request,
                &promoted_paths,
                token,
            )?);
        }
    }

    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| hit_key(a).cmp(hit_key(b)))
    });
    hits.truncate(request.limit);

    // Blend review candidates into a reserved fraction of the top-k.
    if request.sources != SearchSources::Ltm {
        blend_review(store, scorer, review_config, request.limit, now, &mut hits);
    }

    Ok(hits)
}

struct StmCandidate {
    hit: SearchHit,
    promoted_to: Option<String>,
}

fn stm_candidates(
    store: &JsonlStore,
    scorer: &Scorer,
    search_config: &SearchConfig,
    request: &SearchRequest,
    query_embed: Option<&[f32]>,
    now: i64,
    token: &CancelToken,
) -> Result<Vec<StmCandidate>> {
    let filter = MemoryFilter {
        tags_any: request.tags.clone(),
        ..Default::default()
    };
    // Promoted records participate in a combined search so they can shadow
    // their vault copies; an STM-only search sees active records alone.
    let include_promoted = request.sources == SearchSources::Both;

    let window_cutoff = request
        .window_days
        .map(|days| now - (days * 86_400.0) as i64);
    let query_lower = request.query.as_deref().map(str::to_lowercase);

    let mut out = Vec::new();
    for memory in store.list_memories(&filter) {
        token.check()?;
        let status_ok = memory.status == MemoryStatus::Active
            || (include_promoted && memory.status == MemoryStatus::Promoted);
        if !status_ok {
            continue;
        }
        if let Some(cutoff) = window_cutoff {
            if memory.last_used < cutoff {
                continue;
            }
        }

        let score = scorer.score(&memory, now);
        if let Some(min_score) = request.min_score {
            if score < min_score {
                continue;
            }
        }

        let ranked = match (query_embed, &memory.embed) {
            (Some(qe), Some(me)) => score * cosine_similarity(qe, me),
            _ => match &query_lower {
                Some(query) => score * lexical_relevance(&memory.content, query),
                None => score,
            },
        };

        out.push(stm_hit(memory, ranked * search_config.stm_weight));
    }
    Ok(out)
}

/// Substring matches double the decay score, any-word matches get half that
/// boost; no overlap ranks at neutral relevance.
fn lexical_relevance(content: &str, query_lower: &str) -> f64 {
    let content_lower = content.to_lowercase();
    if content_lower.contains(query_lower) {
        2.0
    } else if query_lower
        .split_whitespace()
        .any(|word| content_lower.contains(word))
    {
        1.5
    } else {
        1.0
    }
}

fn stm_hit(memory: Memory, score: f64) -> StmCandidate {
    let title = memory
        .content
        .split_whitespace()
        .take(8)
        .collect::<Vec<_>>()
        .join(" ");
    StmCandidate {
        promoted_to: memory.promoted_to.clone(),
        hit: SearchHit {
            source: HitSource::Stm,
            memory_id: Some(memory.id),
            path: None,
            title,
            content: memory.content,
            tags: memory.tags,
            score,
            created_at: Some(memory.created_at),
            last_used: Some(memory.last_used),
        },
    }
}

fn ltm_candidates(
    ltm: &LtmIndex,
    embedder: Option<&dyn Embedder>,
    query_embed: Option<&[f32]>,
    search_config: &SearchConfig,
    request: &SearchRequest,
    promoted_paths: &HashSet<String>,
    token: &CancelToken,
) -> Result<Vec<SearchHit>> {
    let entries = ltm.search(
        request.query.as_deref(),
        &request.tags,
        request.limit * 2,
        token,
    )?;

    let mut out = Vec::new();
    // Entries arrive newest-first; a small rank decay keeps that ordering
    // among hits with equal lexical relevance.
    for (rank, entry) in entries.into_iter().enumerate() {
        token.check()?;
        // An STM record promoted to this note carries the live reinforcement
        // metadata; prefer it.
        if promoted_paths.contains(&entry.path) {
            continue;
        }

        let relevance = match (query_embed, embedder) {
            (Some(qe), Some(embedder)) => match embedder.embed(&entry.content_snippet) {
                Ok(se) => cosine_similarity(qe, &se),
                Err(e) => {
                    tracing::warn!(path = %entry.path, error = %e, "snippet embedding failed");
                    lexical_ltm_relevance(&entry, request.query.as_deref())
                }
            },
            _ => lexical_ltm_relevance(&entry, request.query.as_deref()),
        };

        let recency = 1.0 - rank as f64 * 1e-4;
        out.push(SearchHit {
            source: HitSource::Ltm,
            memory_id: None,
            path: Some(entry.path),
            title: entry.title,
            content: entry.content_snippet,
            tags: entry.tags,
            score: relevance * search_config.ltm_weight * recency,
            created_at: None,
            last_used: None,
        });
    }
    Ok(out)
}

/// Title matches weigh double snippet matches; tag-only queries get a flat
/// middling relevance.
fn lexical_ltm_relevance(entry: &crate::ltm::LtmEntry, query: Option<&str>) -> f64 {
    match query {
        Some(query) => {
            let query_lower = query.to_lowercase();
            let title_match: f64 = if entry.title.to_lowercase().contains(&query_lower) {
                2.0
            } else {
                0.0
            };
            let content_match: f64 = if entry.content_snippet.to_lowercase().contains(&query_lower) {
                1.0
            } else {
                0.0
            };
            ((title_match + content_match) / 3.0).min(1.0)
        }
        None => 0.5,
    }
}

/// Replace the tail of the top-k with review candidates absent from the raw
/// result set, tagged so callers can surface them as "worth revisiting".
fn blend_review(
    store: &JsonlStore,
    scorer: &Scorer,
    config: &ReviewConfig,
    limit: usize,
    now: i64,
    hits: &mut Vec<SearchHit>,
) {
    let slots = review::blend_slots(config, limit);
    if slots == 0 {
        return;
    }

    let present: HashSet<String> = hits
        .iter()
        .filter_map(|h| h.memory_id.clone())
        .collect();
    let candidates = review::review_candidates(store, scorer, config, now, &present, slots);
    if candidates.is_empty() {
        return;
    }

    // Evict just enough of the tail to make room within the limit.
    let room = limit.saturating_sub(hits.len());
    let evict = candidates.len().saturating_sub(room).min(hits.len());
    hits.truncate(hits.len() - evict);

    for candidate in candidates {
        if hits.len() >= limit {
            break;
        }
        let mut stm = stm_hit(candidate.memory, candidate.score);
        stm.hit.source = HitSource::Review;
        hits.push(stm.hit);
    }
}

fn hit_key(hit: &SearchHit) -> &str {
    hit.memory_id
        .as_deref()
        .or(hit.path.as_deref())
        .unwrap_or("")
}
