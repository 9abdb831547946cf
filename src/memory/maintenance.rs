//! Lifecycle maintenance — GC sweep, compaction, stats, scheduled work.
//!
//! The GC sweep tombstones (or archives) active records whose score has
//! fallen below the forget threshold, pinned records excepted. Compaction
//! fires when the store's stats heuristic recommends it. All of it can run
//! on a background cadence via [`spawn_scheduler`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::cancel::CancelToken;
use crate::clock::Clock;
use crate::config::MaintenanceConfig;
use crate::error::Result;
use crate::ltm::{LtmIndex, RefreshStats};
use crate::memory::decay::Scorer;
use crate::memory::types::{MemoryStatus, Relation};
use crate::store::{CompactStats, JsonlStore, MemoryFilter, StoreStats};

/// GC sweep options.
#[derive(Debug, Default, Clone)]
pub struct GcRequest {
    pub dry_run: bool,
    /// Park records as `archived` instead of tombstoning them.
    pub archive_instead: bool,
    /// Process at most this many records, lowest scores first.
    pub limit: Option<usize>,
}

/// GC sweep outcome.
#[derive(Debug, Serialize)]
pub struct GcResult {
    pub dry_run: bool,
    pub removed_count: usize,
    pub archived_count: usize,
    pub freed_score_sum: f64,
    pub memory_ids: Vec<String>,
}

/// Full engine stats snapshot.
#[derive(Debug, Serialize)]
pub struct EngineStats {
    pub counts_by_status: HashMap<String, usize>,
    pub total_relations: usize,
    pub store: StoreStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ltm_notes: Option<usize>,
    /// Δt clamps observed by the scorer since startup.
    pub score_clamps: u64,
}

/// What a maintenance pass did.
#[derive(Debug, Serialize)]
pub struct MaintenanceReport {
    pub gc: GcResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compacted: Option<CompactStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ltm_refresh: Option<RefreshStats>,
}

/// Sweep active records whose score is below the forget threshold. Pinned
/// records (strength at or above the floor) are immune. The token is checked
/// once per candidate, before any mutation begins.
pub fn gc(
    store: &JsonlStore,
    scorer: &Scorer,
    request: &GcRequest,
    now: i64,
    token: &CancelToken,
) -> Result<GcResult> {
    let filter = MemoryFilter {
        status: Some(MemoryStatus::Active),
        ..Default::default()
    };

    let mut doomed: Vec<(String, f64)> = Vec::new();
    for memory in store.list_memories(&filter) {
        token.check()?;
        if scorer.should_forget(&memory, now) {
            doomed.push((memory.id.clone(), scorer.score(&memory, now)));
        }
    }

    // Lowest scores go first so a limit trims the healthiest candidates.
    doomed.sort_by(|a, b| {
        a.1.partial_cmp(&b.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    if let Some(limit) = request.limit {
        doomed.truncate(limit);
    }

    let freed_score_sum = doomed.iter().map(|(_, s)| s).sum();
    let memory_ids: Vec<String> = doomed.iter().map(|(id, _)| id.clone()).collect();

    let mut removed_count = 0;
    let mut archived_count = 0;
    if request.dry_run {
        if request.archive_instead {
            archived_count = memory_ids.len();
        } else {
            removed_count = memory_ids.len();
        }
    } else {
        for id in &memory_ids {
            if request.archive_instead {
                let mut memory = store.get_memory(id)?;
                memory.status = MemoryStatus::Archived;
                store.put_memory(memory)?;
                archived_count += 1;
            } else {
                store.delete_memory(id, now)?;
                removed_count += 1;
            }
        }
    }

    tracing::info!(
        dry_run = request.dry_run,
        removed = removed_count,
        archived = archived_count,
        "gc sweep complete"
    );

    Ok(GcResult {
        dry_run: request.dry_run,
        removed_count,
        archived_count,
        freed_score_sum,
        memory_ids,
    })
}

/// Stats snapshot across the store, the scorer, and the LTM index.
pub fn stats(
    store: &JsonlStore,
    scorer: &Scorer,
    config: &MaintenanceConfig,
    ltm: Option<&LtmIndex>,
) -> EngineStats {
    let mut counts_by_status = HashMap::new();
    for status in [
        MemoryStatus::Active,
        MemoryStatus::Promoted,
        MemoryStatus::Archived,
        MemoryStatus::Deleted,
    ] {
        counts_by_status.insert(
            status.as_str().to_string(),
            store.count_memories(Some(status)),
        );
    }

    EngineStats {
        counts_by_status,
        total_relations: store.all_relations().len(),
        store: store.stats(
            config.compaction_tombstone_ratio,
            config.compaction_size_factor,
        ),
        ltm_notes: ltm.map(LtmIndex::len),
        score_clamps: scorer.clamped_count(),
    }
}

/// Knowledge-graph projection with summary statistics.
pub fn read_graph(
    store: &JsonlStore,
    scorer: &Scorer,
    status: Option<MemoryStatus>,
    now: i64,
) -> crate::memory::types::KnowledgeGraph {
    let filter = MemoryFilter {
        status,
        ..Default::default()
    };
    let memories = store.list_memories(&filter);
    let relations: Vec<Relation> = store.all_relations();

    let scores: Vec<f64> = memories.iter().map(|m| scorer.score(m, now)).collect();
    let avg_score = if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    };
    let avg_use_count = if memories.is_empty() {
        0.0
    } else {
        memories.iter().map(|m| f64::from(m.use_count)).sum::<f64>() / memories.len() as f64
    };

    crate::memory::types::KnowledgeGraph {
        total_memories: memories.len(),
        total_relations: relations.len(),
        avg_score,
        avg_use_count,
        memories,
        relations,
    }
}

/// One maintenance pass: GC, compaction when recommended, LTM refresh.
pub fn run_maintenance(
    store: &JsonlStore,
    scorer: &Scorer,
    config: &MaintenanceConfig,
    ltm: Option<&LtmIndex>,
    now: i64,
    token: &CancelToken,
) -> Result<MaintenanceReport> {
    let gc_result = gc(store, scorer, &GcRequest::default(), now, token)?;

    let store_stats = store.stats(
        config.compaction_tombstone_ratio,
        config.compaction_size_factor,
    );
    let compacted = if store_stats.compaction_recommended {
        Some(store.compact()?)
    } else {
        None
    };

    let ltm_refresh = match ltm {
        Some(index) => Some(index.refresh(token)?),
        None => None,
    };

    Ok(MaintenanceReport {
        gc: gc_result,
        compacted,
        ltm_refresh,
    })
}

/// Run maintenance on a fixed cadence until the token cancels. Sleeps in
/// short steps so cancellation is observed promptly.
pub fn spawn_scheduler(
    store: Arc<JsonlStore>,
    scorer: Arc<Scorer>,
    config: MaintenanceConfig,
    ltm: Option<Arc<LtmIndex>>,
    token: CancelToken,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let interval = Duration::from_secs(config.interval_secs.max(1));
        let step = Duration::from_millis(250);

        loop {
            let mut slept = Duration::ZERO;
            while slept < interval {
                if token.is_cancelled() {
                    return;
                }
                std::thread::sleep(step);
                slept += step;
            }

            let now = crate::clock::SystemClock.now();
            match run_maintenance(&store, &scorer, &config, ltm.as_deref(), now, &token) {
                Ok(report) => tracing::debug!(
                    removed = report.gc.removed_count,
                    compacted = report.compacted.is_some(),
                    "scheduled maintenance ran"
                ),
                Err(crate::error::Error::Cancelled) => return,
                Err(e) => tracing::warn!(error = %e, "scheduled maintenance failed"),
            }
        }
    })
}
