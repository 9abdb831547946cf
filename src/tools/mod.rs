//! The typed operation surface.
//!
//! [`MemoryService`] owns the store, the LTM index, the scorer, the clock,
//! and the optional embedder, and exposes one method per operation. A host
//! binds these to whatever transport it likes; the engine itself has none.

pub mod pagination;
pub mod requests;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::warn;

use crate::cancel::CancelToken;
use crate::clock::Clock;
use crate::config::MnemaConfig;
use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::ltm::{LtmIndex, RefreshStats};
use crate::memory::cluster::{self, Cluster};
use crate::memory::consolidate;
use crate::memory::decay::Scorer;
use crate::memory::maintenance::{self, EngineStats, GcRequest, GcResult, MaintenanceReport};
use crate::memory::promote::{self, PromoteReport, PromoteRequest};
use crate::memory::review::{self, ObserveResult, TouchResult};
use crate::memory::search::{self, SearchHit, SearchRequest, SearchSources};
use crate::memory::types::{
    KnowledgeGraph, Memory, MemoryStatus, ObservationEvent, Relation,
};
use crate::store::{CompactStats, JsonlStore, MemoryFilter};
use crate::tools::pagination::paginate;
use crate::tools::requests::*;

/// Top-level engine handle. One instance per process; everything it owns is
/// behind `Arc` so maintenance can run on a background thread.
pub struct MemoryService {
    store: Arc<JsonlStore>,
    ltm: Option<Arc<LtmIndex>>,
    scorer: Arc<Scorer>,
    config: Arc<MnemaConfig>,
    clock: Arc<dyn Clock>,
    embedder: Option<Arc<dyn Embedder>>,
    /// Most recent clustering run, addressable by cluster id for
    /// consolidation.
    cluster_cache: RwLock<HashMap<String, Cluster>>,
}

impl MemoryService {
    /// Open the store (and the vault index when configured) and build the
    /// scorer from config.
    pub fn open(
        config: MnemaConfig,
        clock: Arc<dyn Clock>,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Result<Self> {
        let store = Arc::new(JsonlStore::open(config.resolved_storage_root())?);
        let ltm = match config.resolved_vault_path() {
            Some(vault) => Some(Arc::new(LtmIndex::open(
                vault,
                config.resolved_ltm_index_path(),
            )?)),
            None => None,
        };
        let scorer = Arc::new(Scorer::from_config(&config.decay, &config.lifecycle)?);

        Ok(Self {
            store,
            ltm,
            scorer,
            config: Arc::new(config),
            clock,
            embedder,
            cluster_cache: RwLock::new(HashMap::new()),
        })
    }

    pub fn store(&self) -> &JsonlStore {
        &self.store
    }

    pub fn scorer(&self) -> &Scorer {
        &self.scorer
    }

    pub fn config(&self) -> &MnemaConfig {
        &self.config
    }

    pub fn now(&self) -> i64 {
        self.clock.now()
    }

    /// Create a new record. Embedding happens here, outside any lock, and
    /// degrades to a vector-less record on embedder failure.
    pub fn save_memory(
        &self,
        request: SaveMemoryRequest,
        token: &CancelToken,
    ) -> Result<SaveMemoryResponse> {
        token.check()?;
        let now = self.clock.now();

        let mut memory = Memory::new(request.content, now);
        memory.tags = request.tags;
        memory.entities = request.entities;
        memory.source = request.source;
        memory.context = request.context;
        memory.extra = request.meta;
        if let Some(strength) = request.strength {
            memory.strength = strength;
        }

        if let Some(embedder) = &self.embedder {
            match embedder.embed(&memory.content) {
                Ok(vector) => memory.embed = Some(vector),
                Err(e) => warn!(error = %e, "embedding failed, saving without vector"),
            }
        }

        let has_embedding = memory.embed.is_some();
        let memory_id = self.store.put_memory(memory)?;
        Ok(SaveMemoryResponse {
            memory_id,
            has_embedding,
        })
    }

    /// STM-only search.
    pub fn search_memory(
        &self,
        mut request: SearchRequest,
        token: &CancelToken,
    ) -> Result<Vec<SearchHit>> {
        request.sources = SearchSources::Stm;
        self.search_unified(request, token)
    }

    /// Search across STM and LTM with review blending.
    pub fn search_unified(
        &self,
        request: SearchRequest,
        token: &CancelToken,
    ) -> Result<Vec<SearchHit>> {
        search::search_unified(
            &self.store,
            self.ltm.as_deref(),
            self.embedder.as_deref(),
            &self.scorer,
            &self.config.review,
            &self.config.search,
            &request,
            self.clock.now(),
            token,
        )
    }

    pub fn touch_memory(
        &self,
        request: TouchMemoryRequest,
        token: &CancelToken,
    ) -> Result<TouchResult> {
        token.check()?;
        review::touch(
            &self.store,
            &self.scorer,
            &self.config.review,
            &request.memory_id,
            request.boost_strength,
            self.clock.now(),
        )
    }

    pub fn observe_memory_usage(
        &self,
        request: ObserveMemoryRequest,
        token: &CancelToken,
    ) -> Result<ObserveResult> {
        token.check()?;
        let event = ObservationEvent {
            memory_id: request.memory_id,
            observed_at: self.clock.now(),
            context_tags: request.context_tags,
        };
        review::observe(&self.store, &self.scorer, &self.config.review, &event)
    }

    pub fn gc(&self, request: GcRequest, token: &CancelToken) -> Result<GcResult> {
        maintenance::gc(&self.store, &self.scorer, &request, self.clock.now(), token)
    }

    pub fn promote_memory(
        &self,
        request: PromoteRequest,
        token: &CancelToken,
    ) -> Result<PromoteReport> {
        token.check()?;
        let vault = self
            .config
            .resolved_vault_path()
            .ok_or_else(|| Error::Invalid("no LTM vault configured".into()))?;
        promote::promote(
            &self.store,
            &self.scorer,
            &vault,
            &self.config.ltm.promotion_subdir,
            &request,
            self.clock.now(),
        )
    }

    /// Cluster active records and cache the result for consolidation.
    pub fn cluster_memories(
        &self,
        request: ClusterMemoriesRequest,
        token: &CancelToken,
    ) -> Result<ClusterMemoriesResponse> {
        let filter = MemoryFilter {
            status: Some(MemoryStatus::Active),
            tags_any: request.tags,
            ..Default::default()
        };
        let candidates = self.store.list_memories(&filter);

        let mut cluster_config = self.config.cluster.clone();
        if let Some(strategy) = request.strategy {
            cluster_config.strategy = strategy;
        }
        let clusters = cluster::cluster_memories(&candidates, &cluster_config, token)?;

        let mut cache = self.cluster_cache.write().expect("cluster cache poisoned");
        cache.clear();
        for c in &clusters {
            cache.insert(c.id.clone(), c.clone());
        }
        drop(cache);

        Ok(ClusterMemoriesResponse {
            candidates_considered: candidates.len(),
            clusters,
        })
    }

    /// Preview or apply a consolidation. Sources resolve from a cached
    /// cluster id or an explicit member list.
    pub fn consolidate_memories(
        &self,
        request: ConsolidateRequest,
        token: &CancelToken,
    ) -> Result<ConsolidateResponse> {
        token.check()?;

        let (member_ids, cohesion) = if let Some(cluster_id) = &request.cluster_id {
            let cache = self.cluster_cache.read().expect("cluster cache poisoned");
            let cluster = cache
                .get(cluster_id)
                .ok_or_else(|| Error::NotFound(format!("cluster {cluster_id}")))?;
            (cluster.member_ids.clone(), cluster.cohesion)
        } else if !request.memory_ids.is_empty() {
            (request.memory_ids.clone(), request.cohesion.unwrap_or(0.75))
        } else {
            return Err(Error::Invalid(
                "specify cluster_id or memory_ids".into(),
            ));
        };

        let sources: Vec<Memory> = member_ids
            .iter()
            .map(|id| self.store.get_memory(id))
            .collect::<Result<_>>()?;

        let strategy = request
            .strategy
            .as_deref()
            .unwrap_or(consolidate::DEDUPLICATE_AND_MERGE);
        let proposal = consolidate::preview(
            &sources,
            cohesion,
            strategy,
            request.merged_content.clone(),
        )?;

        let applied = match request.mode.as_str() {
            "preview" => None,
            "apply" => Some(consolidate::apply(
                &self.store,
                &proposal,
                self.clock.now(),
            )?),
            other => return Err(Error::Invalid(format!("unknown mode: {other}"))),
        };

        Ok(ConsolidateResponse { proposal, applied })
    }

    pub fn read_graph(
        &self,
        status: Option<MemoryStatus>,
        token: &CancelToken,
    ) -> Result<KnowledgeGraph> {
        token.check()?;
        Ok(maintenance::read_graph(
            &self.store,
            &self.scorer,
            status,
            self.clock.now(),
        ))
    }

    /// Hydrate specific records by id, with scores, relations, and optional
    /// reinforcement of everything opened.
    pub fn open_memories(
        &self,
        request: OpenMemoriesRequest,
        token: &CancelToken,
    ) -> Result<OpenMemoriesResponse> {
        let now = self.clock.now();
        let mut memories = Vec::new();
        let mut not_found = Vec::new();

        for id in &request.memory_ids {
            token.check()?;
            match self.store.get_memory(id) {
                Ok(memory) => memories.push(memory),
                Err(Error::NotFound(_)) => not_found.push(id.clone()),
                Err(e) => return Err(e),
            }
        }

        if request.touch {
            for memory in &memories {
                review::touch(
                    &self.store,
                    &self.scorer,
                    &self.config.review,
                    &memory.id,
                    false,
                    now,
                )?;
            }
        }

        let opened: Vec<OpenedMemory> = memories
            .into_iter()
            .map(|memory| {
                let outgoing = if request.include_relations {
                    self.store.list_relations(Some(&memory.id), None, None)
                } else {
                    Vec::new()
                };
                let incoming = if request.include_relations {
                    self.store.list_relations(None, Some(&memory.id), None)
                } else {
                    Vec::new()
                };
                OpenedMemory {
                    score: self.scorer.score(&memory, now),
                    age_days: memory.age_days(now),
                    outgoing,
                    incoming,
                    memory,
                }
            })
            .collect();

        let (page_items, page) = paginate(opened, request.page.unwrap_or_default())?;
        Ok(OpenMemoriesResponse {
            memories: page_items,
            not_found,
            page,
        })
    }

    pub fn create_relation(
        &self,
        request: CreateRelationRequest,
        token: &CancelToken,
    ) -> Result<CreateRelationResponse> {
        token.check()?;
        let mut relation = Relation::new(
            request.from_id,
            request.to_id,
            request.relation_type,
            self.clock.now(),
        );
        if let Some(strength) = request.strength {
            relation.strength = strength;
        }
        relation.metadata = request.metadata;

        let relation_id = self.store.put_relation(relation)?;
        Ok(CreateRelationResponse { relation_id })
    }

    pub fn stats(&self) -> EngineStats {
        maintenance::stats(
            &self.store,
            &self.scorer,
            &self.config.maintenance,
            self.ltm.as_deref(),
        )
    }

    pub fn compact(&self, token: &CancelToken) -> Result<CompactStats> {
        token.check()?;
        self.store.compact()
    }

    pub fn refresh_ltm(&self, token: &CancelToken) -> Result<RefreshStats> {
        match &self.ltm {
            Some(ltm) => ltm.refresh(token),
            None => Err(Error::Invalid("no LTM vault configured".into())),
        }
    }

    /// One on-demand maintenance pass (GC + compaction + LTM refresh).
    pub fn run_maintenance(&self, token: &CancelToken) -> Result<MaintenanceReport> {
        maintenance::run_maintenance(
            &self.store,
            &self.scorer,
            &self.config.maintenance,
            self.ltm.as_deref(),
            self.clock.now(),
            token,
        )
    }

    /// Start the background maintenance thread when enabled in config.
    /// Returns the token that stops it.
    pub fn start_scheduler(&self) -> Option<(CancelToken, std::thread::JoinHandle<()>)> {
        if !self.config.maintenance.enabled {
            return None;
        }
        let token = CancelToken::new();
        let handle = maintenance::spawn_scheduler(
            Arc::clone(&self.store),
            Arc::clone(&self.scorer),
            self.config.maintenance.clone(),
            self.ltm.clone(),
            token.clone(),
        );
        Some((token, handle))
    }
}
