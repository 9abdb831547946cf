//! Cluster consolidation — merging near-duplicates into one record.
//!
//! `preview` builds a proposal without side effects; `apply` commits the
//! merged record, one `consolidated_from` relation per source, and the
//! source tombstones as a single compound batch under the writer mutex.

use std::collections::HashSet;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::memory::similarity::normalize_content;
use crate::memory::types::{Memory, Relation};
use crate::store::{JsonlStore, WriteBatch};

/// Strategy identifier for the core merge. `summarize` and `qa_extract`
/// are delegated to an external helper; the engine only accepts their
/// pre-generated output.
pub const DEDUPLICATE_AND_MERGE: &str = "deduplicate_and_merge";

/// A merge proposal: what the new record would look like, plus the text
/// discarded as duplicate.
#[derive(Debug, Clone, Serialize)]
pub struct ConsolidationProposal {
    pub source_ids: Vec<String>,
    pub merged_content: String,
    pub merged_tags: Vec<String>,
    pub merged_entities: Vec<String>,
    pub new_strength: f64,
    pub earliest_created_at: i64,
    pub latest_last_used: i64,
    pub total_use_count: u32,
    pub cohesion: f64,
    pub strategy: String,
    /// Sentences dropped as duplicates, for the preview diff.
    pub discarded: Vec<String>,
}

/// Outcome of an applied consolidation.
#[derive(Debug, Serialize)]
pub struct ConsolidationResult {
    pub new_id: String,
    pub consolidated_ids: Vec<String>,
    pub relations_created: usize,
}

/// Build a merge proposal for `sources`. For strategies other than
/// [`DEDUPLICATE_AND_MERGE`], `pre_merged` must carry the externally
/// generated content.
pub fn preview(
    sources: &[Memory],
    cohesion: f64,
    strategy: &str,
    pre_merged: Option<String>,
) -> Result<ConsolidationProposal> {
    if sources.len() < 2 {
        return Err(Error::Invalid(
            "consolidation needs at least two source memories".into(),
        ));
    }

    let mut ordered: Vec<&Memory> = sources.iter().collect();
    ordered.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

    let (merged_content, discarded) = match strategy {
        DEDUPLICATE_AND_MERGE => merge_deduplicated(&ordered),
        "summarize" | "qa_extract" => match pre_merged {
            Some(content) if !content.is_empty() => (content, Vec::new()),
            _ => {
                return Err(Error::Invalid(format!(
                    "strategy {strategy} requires pre-generated merged content"
                )))
            }
        },
        other => return Err(Error::Invalid(format!("unknown merge strategy: {other}"))),
    };

    let mut merged_tags: Vec<String> = ordered
        .iter()
        .flat_map(|m| m.tags.iter().cloned())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    merged_tags.sort();
    let mut merged_entities: Vec<String> = ordered
        .iter()
        .flat_map(|m| m.entities.iter().cloned())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    merged_entities.sort();

    let max_strength = ordered
        .iter()
        .map(|m| m.strength)
        .fold(f64::MIN, f64::max);
    // Higher cohesion produces a stronger merged record.
    let new_strength = (max_strength * (1.0 + (cohesion - 0.75) / 0.5)).min(2.0);

    Ok(ConsolidationProposal {
        source_ids: ordered.iter().map(|m| m.id.clone()).collect(),
        merged_content,
        merged_tags,
        merged_entities,
        new_strength,
        earliest_created_at: ordered.iter().map(|m| m.created_at).min().unwrap_or(0),
        latest_last_used: ordered.iter().map(|m| m.last_used).max().unwrap_or(0),
        total_use_count: ordered.iter().map(|m| m.use_count).sum(),
        cohesion,
        strategy: strategy.to_string(),
        discarded,
    })
}

/// Commit a proposal: new record + provenance relations + source tombstones,
/// all-or-nothing.
pub fn apply(
    store: &JsonlStore,
    proposal: &ConsolidationProposal,
    now: i64,
) -> Result<ConsolidationResult> {
    // Re-check the sources are still live before committing, and collect
    // their existing relations for the cascade.
    let mut stale_relations: std::collections::BTreeSet<String> = Default::default();
    for id in &proposal.source_ids {
        store.get_memory(id)?;
        for relation in store.list_relations(Some(id), None, None) {
            stale_relations.insert(relation.id);
        }
        for relation in store.list_relations(None, Some(id), None) {
            stale_relations.insert(relation.id);
        }
    }

    let mut merged = Memory::new(proposal.merged_content.clone(), now);
    merged.tags = proposal.merged_tags.clone();
    merged.entities = proposal.merged_entities.clone();
    merged.created_at = proposal.earliest_created_at;
    merged.last_used = proposal.latest_last_used;
    merged.use_count = proposal.total_use_count.max(1);
    merged.strength = proposal.new_strength.clamp(0.0, 2.0);
    let new_id = merged.id.clone();

    let relations: Vec<Relation> = proposal
        .source_ids
        .iter()
        .map(|source_id| Relation::new(new_id.clone(), source_id.clone(), "consolidated_from", now))
        .collect();
    let relations_created = relations.len();

    store.apply_batch(WriteBatch {
        memory_puts: vec![merged],
        relation_puts: relations,
        memory_tombstones: proposal.source_ids.clone(),
        relation_tombstones: stale_relations.into_iter().collect(),
        now,
    })?;

    tracing::info!(
        new_id = %new_id,
        sources = proposal.source_ids.len(),
        strength = proposal.new_strength,
        "cluster consolidated"
    );

    Ok(ConsolidationResult {
        new_id,
        consolidated_ids: proposal.source_ids.clone(),
        relations_created,
    })
}

/// Sentence-level merge: keep the first occurrence of each normalized
/// sentence, emit one block per source that retained text, blocks joined by
/// a blank line in timestamp order.
fn merge_deduplicated(ordered: &[&Memory]) -> (String, Vec<String>) {
    let mut seen: HashSet<String> = HashSet::new();
    let mut blocks: Vec<String> = Vec::new();
    let mut discarded: Vec<String> = Vec::new();

    for memory in ordered {
        let mut retained: Vec<&str> = Vec::new();
        for sentence in split_sentences(&memory.content) {
            let key = normalize_content(sentence);
            if key.is_empty() {
                continue;
            }
            if seen.insert(key) {
                retained.push(sentence);
            } else {
                discarded.push(sentence.to_string());
            }
        }
        if !retained.is_empty() {
            blocks.push(retained.join(" "));
        }
    }

    (blocks.join("\n\n"), discarded)
}

/// Split on sentence terminators and newlines, keeping the terminator with
/// its sentence.
fn split_sentences(content: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    for (idx, ch) in content.char_indices() {
        if matches!(ch, '.' | '!' | '?' | '\n') {
            let end = idx + ch.len_utf8();
            let slice = content[start..end].trim();
            if !slice.is_empty() {
                out.push(slice);
            }
            start = end;
        }
    }
    let tail = content[start..].trim();
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}
