//! Core record definitions.
//!
//! Defines [`Memory`] (a short-term record), [`Relation`] (a directed edge
//! between two memories), [`MemoryStatus`] (the lifecycle enum), and
//! [`ObservationEvent`] (an ephemeral usage report consumed by the review
//! subsystem). Both persisted records carry an `extra` map so unknown fields
//! survive a read/write round trip.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Lifecycle state of a memory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryStatus {
    /// Live, decaying, eligible for search, promotion, and GC.
    Active,
    /// Copied to the long-term vault; retained as a redirect pointer.
    Promoted,
    /// Parked by a GC sweep instead of deletion.
    Archived,
    /// Soft-deleted in place (distinct from a tombstone line).
    Deleted,
}

impl MemoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Promoted => "promoted",
            Self::Archived => "archived",
            Self::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for MemoryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MemoryStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "promoted" => Ok(Self::Promoted),
            "archived" => Ok(Self::Archived),
            "deleted" => Ok(Self::Deleted),
            _ => Err(format!("unknown memory status: {s}")),
        }
    }
}

/// A short-term memory record, one JSON object per line in `memories.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    /// Stable URL-safe identifier (`m-` + UUID v7), assigned at creation.
    pub id: String,
    /// User-visible body.
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Named things referenced by the content.
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Unix seconds; immutable after creation.
    pub created_at: i64,
    /// Unix seconds; updated on touch/observe.
    pub last_used: i64,
    pub use_count: u32,
    /// Importance multiplier in `[0, 2]`.
    pub strength: f64,
    pub status: MemoryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promoted_at: Option<i64>,
    /// Vault-relative path of the promoted note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promoted_to: Option<String>,
    /// Opaque vector produced by the host's embedder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embed: Option<Vec<f32>>,
    /// Unknown fields, preserved verbatim for forward compatibility.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Memory {
    /// Build a fresh active record with a generated id.
    pub fn new(content: impl Into<String>, now: i64) -> Self {
        Self {
            id: new_memory_id(),
            content: content.into(),
            tags: Vec::new(),
            entities: Vec::new(),
            source: None,
            context: None,
            created_at: now,
            last_used: now,
            use_count: 1,
            strength: 1.0,
            status: MemoryStatus::Active,
            promoted_at: None,
            promoted_to: None,
            embed: None,
            extra: Map::new(),
        }
    }

    /// Check field constraints before a write. Returns `Invalid` on the first
    /// violation.
    pub fn validate(&self) -> Result<()> {
        if self.content.is_empty() {
            return Err(Error::Invalid("content must not be empty".into()));
        }
        if !(0.0..=2.0).contains(&self.strength) {
            return Err(Error::Invalid(format!(
                "strength must be in [0, 2], got {}",
                self.strength
            )));
        }
        if self.last_used < self.created_at {
            return Err(Error::Invalid(format!(
                "last_used {} precedes created_at {}",
                self.last_used, self.created_at
            )));
        }
        for tag in &self.tags {
            validate_tag(tag)?;
        }
        if self.status == MemoryStatus::Promoted
            && (self.promoted_at.is_none() || self.promoted_to.is_none())
        {
            return Err(Error::Invalid(
                "promoted status requires promoted_at and promoted_to".into(),
            ));
        }
        Ok(())
    }

    /// Age in days at time `now`.
    pub fn age_days(&self, now: i64) -> f64 {
        (now - self.created_at).max(0) as f64 / 86_400.0
    }
}

/// Tags are short path-like identifiers; slashes enable hierarchies.
pub fn validate_tag(tag: &str) -> Result<()> {
    let ok = !tag.is_empty()
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '/'));
    if ok {
        Ok(())
    } else {
        Err(Error::Invalid(format!("malformed tag: {tag:?}")))
    }
}

/// A directed edge between two memory ids, one line in `relations.jsonl`.
/// Cascade-deleted when either endpoint is tombstoned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    /// Stable identifier (`r-` + UUID v7).
    pub id: String,
    pub from_id: String,
    pub to_id: String,
    /// e.g. "related", "causes", "supports", "contradicts", "has_decision",
    /// "consolidated_from", "references".
    pub relation_type: String,
    /// Edge weight in `[0, 1]`.
    pub strength: f64,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Relation {
    pub fn new(
        from_id: impl Into<String>,
        to_id: impl Into<String>,
        relation_type: impl Into<String>,
        now: i64,
    ) -> Self {
        Self {
            id: new_relation_id(),
            from_id: from_id.into(),
            to_id: to_id.into(),
            relation_type: relation_type.into(),
            strength: 1.0,
            created_at: now,
            metadata: None,
            extra: Map::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.relation_type.is_empty() {
            return Err(Error::Invalid("relation_type must not be empty".into()));
        }
        if !(0.0..=1.0).contains(&self.strength) {
            return Err(Error::Invalid(format!(
                "relation strength must be in [0, 1], got {}",
                self.strength
            )));
        }
        if self.from_id == self.to_id {
            return Err(Error::Invalid("relation endpoints must differ".into()));
        }
        Ok(())
    }
}

/// Ephemeral usage report applied by the review subsystem; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationEvent {
    pub memory_id: String,
    pub observed_at: i64,
    #[serde(default)]
    pub context_tags: Vec<String>,
}

/// Projection of the whole store: memories, relations, and summary stats.
#[derive(Debug, Serialize)]
pub struct KnowledgeGraph {
    pub memories: Vec<Memory>,
    pub relations: Vec<Relation>,
    pub total_memories: usize,
    pub total_relations: usize,
    pub avg_score: f64,
    pub avg_use_count: f64,
}

/// Generate a fresh memory id (`m-` + time-sortable UUID).
pub fn new_memory_id() -> String {
    format!("m-{}", uuid::Uuid::now_v7().simple())
}

/// Generate a fresh relation id (`r-` + time-sortable UUID).
pub fn new_relation_id() -> String {
    format!("r-{}", uuid::Uuid::now_v7().simple())
}
