//! Request and response types for the operation surface.
//!
//! Each operation of [`MemoryService`](super::MemoryService) takes one of
//! these typed requests and returns a typed response; errors are the crate's
//! error values. Operations whose engine module already defines a request
//! type (search, gc, promote) use it directly.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::memory::cluster::Cluster;
use crate::memory::consolidate::{ConsolidationProposal, ConsolidationResult};
use crate::memory::types::{Memory, Relation};
use crate::tools::pagination::{PageInfo, PageRequest};

/// `save_memory` — create a new record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SaveMemoryRequest {
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
    /// Initial strength override; defaults to 1.0.
    #[serde(default)]
    pub strength: Option<f64>,
    /// Extra metadata carried verbatim on the record.
    #[serde(default)]
    pub meta: Map<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct SaveMemoryResponse {
    pub memory_id: String,
    pub has_embedding: bool,
}

/// `touch_memory` — reinforce by id.
#[derive(Debug, Clone, Deserialize)]
pub struct TouchMemoryRequest {
    pub memory_id: String,
    #[serde(default)]
    pub boost_strength: bool,
}

/// `observe_memory_usage` — reinforce with usage context.
#[derive(Debug, Clone, Deserialize)]
pub struct ObserveMemoryRequest {
    pub memory_id: String,
    #[serde(default)]
    pub context_tags: Vec<String>,
}

/// `create_relation` — directed edge between two records.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateRelationRequest {
    pub from_id: String,
    pub to_id: String,
    pub relation_type: String,
    /// Edge weight; defaults to 1.0.
    #[serde(default)]
    pub strength: Option<f64>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct CreateRelationResponse {
    pub relation_id: String,
}

/// `open_memories` — hydrate specific records by id.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenMemoriesRequest {
    pub memory_ids: Vec<String>,
    /// Also reinforce each opened record.
    #[serde(default)]
    pub touch: bool,
    #[serde(default)]
    pub include_relations: bool,
    #[serde(default)]
    pub page: Option<PageRequest>,
}

#[derive(Debug, Serialize)]
pub struct OpenedMemory {
    #[serde(flatten)]
    pub memory: Memory,
    pub score: f64,
    pub age_days: f64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub outgoing: Vec<Relation>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub incoming: Vec<Relation>,
}

#[derive(Debug, Serialize)]
pub struct OpenMemoriesResponse {
    pub memories: Vec<OpenedMemory>,
    pub not_found: Vec<String>,
    pub page: PageInfo,
}

/// `cluster_memories` — propose consolidation clusters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClusterMemoriesRequest {
    /// Restrict clustering to records carrying any of these tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Override the configured similarity strategy.
    #[serde(default)]
    pub strategy: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ClusterMemoriesResponse {
    pub clusters: Vec<Cluster>,
    pub candidates_considered: usize,
}

/// `consolidate_memories` — preview or apply a merge. Sources come from a
/// cached cluster id or an explicit member list.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsolidateRequest {
    #[serde(default)]
    pub cluster_id: Option<String>,
    #[serde(default)]
    pub memory_ids: Vec<String>,
    /// "preview" (default) or "apply".
    #[serde(default = "default_mode")]
    pub mode: String,
    /// Merge strategy; defaults to deduplicate_and_merge.
    #[serde(default)]
    pub strategy: Option<String>,
    /// Pre-generated content for external strategies.
    #[serde(default)]
    pub merged_content: Option<String>,
    /// Cohesion override when sources are given explicitly.
    #[serde(default)]
    pub cohesion: Option<f64>,
}

fn default_mode() -> String {
    "preview".into()
}

#[derive(Debug, Serialize)]
pub struct ConsolidateResponse {
    pub proposal: ConsolidationProposal,
    /// Present when mode was "apply".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied: Option<ConsolidationResult>,
}
