//! Promotion — copying high-value records into the markdown vault.
//!
//! A promoted record becomes a front-mattered note under the vault's
//! promotion subdirectory, written atomically (tmp + fsync + rename), and
//! the STM record flips to `promoted` with a pointer back to the note. The
//! STM line is only appended after the note is durably on disk.

use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, TimeZone, Utc};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::memory::decay::Scorer;
use crate::memory::types::{Memory, MemoryStatus, Relation};
use crate::store::{JsonlStore, MemoryFilter};

/// Attempts at resolving a slug collision before giving up with `Conflict`.
const MAX_SLUG_ATTEMPTS: u32 = 100;

/// A record eligible for promotion, with the firing criterion.
#[derive(Debug, Clone, Serialize)]
pub struct PromotionCandidate {
    pub id: String,
    pub content_preview: String,
    pub reason: String,
    pub score: f64,
    pub use_count: u32,
    pub age_days: f64,
}

/// A completed promotion.
#[derive(Debug, Clone, Serialize)]
pub struct PromotionOutcome {
    pub stm_id: String,
    /// Vault-relative path of the written note.
    pub written_path: String,
}

/// Proposed note for a dry run: where it would land and what it would say.
#[derive(Debug, Clone, Serialize)]
pub struct NotePreview {
    pub stm_id: String,
    pub proposed_path: String,
    pub body: String,
}

/// Report for a promotion request, covering dry runs and auto-detection.
#[derive(Debug, Serialize)]
pub struct PromoteReport {
    pub dry_run: bool,
    pub candidates: Vec<PromotionCandidate>,
    pub promoted: Vec<PromotionOutcome>,
    /// Populated on dry runs only.
    pub previews: Vec<NotePreview>,
}

/// Promotion request: a specific id, or auto-detection over active records.
#[derive(Debug, Default, Clone)]
pub struct PromoteRequest {
    pub memory_id: Option<String>,
    pub auto_detect: bool,
    pub dry_run: bool,
    /// Promote a specific id even when the criteria have not fired.
    pub force: bool,
}

/// Run a promotion. Auto-detection scans active records and promotes every
/// candidate satisfying the criteria, best score first.
pub fn promote(
    store: &JsonlStore,
    scorer: &Scorer,
    vault_path: &Path,
    promotion_subdir: &str,
    request: &PromoteRequest,
    now: i64,
) -> Result<PromoteReport> {
    let candidates = if let Some(id) = &request.memory_id {
        let memory = store.get_memory(id)?;
        if memory.status == MemoryStatus::Promoted {
            return Err(Error::Invalid(format!(
                "memory already promoted: {id} -> {}",
                memory.promoted_to.as_deref().unwrap_or("?")
            )));
        }
        let decision = scorer.should_promote(&memory, now);
        if !decision.promote && !request.force {
            return Err(Error::Invalid(format!(
                "memory does not meet promotion criteria: {}",
                decision.reason
            )));
        }
        vec![candidate(&memory, decision.reason, decision.score, now)]
    } else if request.auto_detect {
        find_candidates(store, scorer, now)
    } else {
        return Err(Error::Invalid(
            "specify memory_id or set auto_detect".into(),
        ));
    };

    let mut promoted = Vec::new();
    let mut previews = Vec::new();
    for c in &candidates {
        let memory = store.get_memory(&c.id)?;
        if request.dry_run {
            let (proposed_path, body) = render_preview(store, &memory, promotion_subdir);
            previews.push(NotePreview {
                stm_id: memory.id.clone(),
                proposed_path,
                body,
            });
        } else {
            promoted.push(promote_one(store, vault_path, promotion_subdir, &memory, now)?);
        }
    }

    Ok(PromoteReport {
        dry_run: request.dry_run,
        candidates,
        promoted,
        previews,
    })
}

/// Active records currently satisfying the promotion criteria, best first.
pub fn find_candidates(store: &JsonlStore, scorer: &Scorer, now: i64) -> Vec<PromotionCandidate> {
    let filter = MemoryFilter {
        status: Some(MemoryStatus::Active),
        ..Default::default()
    };
    let mut candidates: Vec<PromotionCandidate> = store
        .list_memories(&filter)
        .into_iter()
        .filter_map(|m| {
            let decision = scorer.should_promote(&m, now);
            decision
                .promote
                .then(|| candidate(&m, decision.reason, decision.score, now))
        })
        .collect();
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    candidates
}

/// Write the note for one record and flip its STM status. The note lands
/// before the STM append; a failure after the write best-effort unlinks the
/// note so the operation stays all-or-nothing.
pub fn promote_one(
    store: &JsonlStore,
    vault_path: &Path,
    promotion_subdir: &str,
    memory: &Memory,
    now: i64,
) -> Result<PromotionOutcome> {
    let outgoing = store.list_relations(Some(&memory.id), None, None);
    let body = render_note(memory, &outgoing);

    let target_dir = vault_path.join(promotion_subdir);
    std::fs::create_dir_all(&target_dir)?;
    let (final_path, relative_path) =
        resolve_filename(&target_dir, promotion_subdir, memory)?;

    write_atomic(&final_path, &body)?;

    let mut updated = memory.clone();
    updated.status = MemoryStatus::Promoted;
    updated.promoted_at = Some(now);
    updated.promoted_to = Some(relative_path.clone());
    if let Err(e) = store.put_memory(updated) {
        let _ = std::fs::remove_file(&final_path);
        return Err(e);
    }

    tracing::info!(id = %memory.id, path = %relative_path, "memory promoted");
    Ok(PromotionOutcome {
        stm_id: memory.id.clone(),
        written_path: relative_path,
    })
}

/// Render the proposed note without touching the filesystem or the store.
pub fn render_preview(store: &JsonlStore, memory: &Memory, promotion_subdir: &str) -> (String, String) {
    let outgoing = store.list_relations(Some(&memory.id), None, None);
    let filename = format!("{}-{}.md", slugify(&memory.content), short_id(&memory.id));
    let relative = format!("{promotion_subdir}/{filename}");
    (relative, render_note(memory, &outgoing))
}

fn candidate(memory: &Memory, reason: String, score: f64, now: i64) -> PromotionCandidate {
    PromotionCandidate {
        id: memory.id.clone(),
        content_preview: memory.content.chars().take(100).collect(),
        reason,
        score,
        use_count: memory.use_count,
        age_days: memory.age_days(now),
    }
}

/// Note body: YAML front matter, the content, and an outgoing-relations
/// section when any exist.
fn render_note(memory: &Memory, outgoing: &[Relation]) -> String {
    let created = Utc
        .timestamp_opt(memory.created_at, 0)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).single().expect("epoch is valid"))
        .to_rfc3339_opts(SecondsFormat::Secs, true);

    let mut out = String::new();
    out.push_str("---\n");
    out.push_str(&format!("id: {}\n", memory.id));
    out.push_str(&format!("created: {created}\n"));
    out.push_str("promoted_from: stm\n");
    out.push_str(&format!("tags: [{}]\n", memory.tags.join(", ")));
    out.push_str("aliases: []\n");
    out.push_str(&format!("source_mem_ids: [{}]\n", memory.id));
    out.push_str("---\n\n");
    out.push_str(&memory.content);
    out.push('\n');

    if !outgoing.is_empty() {
        out.push_str("\n## Relations\n");
        for relation in outgoing {
            out.push_str(&format!("- {} → {}\n", relation.relation_type, relation.to_id));
        }
    }
    out
}

/// Slug from the leading words of the content plus a short id, with `-2`,
/// `-3`, … suffixes on collision.
fn resolve_filename(
    target_dir: &Path,
    promotion_subdir: &str,
    memory: &Memory,
) -> Result<(PathBuf, String)> {
    let base = format!("{}-{}", slugify(&memory.content), short_id(&memory.id));
    for attempt in 1..=MAX_SLUG_ATTEMPTS {
        let filename = if attempt == 1 {
            format!("{base}.md")
        } else {
            format!("{base}-{attempt}.md")
        };
        let path = target_dir.join(&filename);
        if !path.exists() {
            return Ok((path, format!("{promotion_subdir}/{filename}")));
        }
    }
    Err(Error::Conflict(format!(
        "could not find a free filename for {base} after {MAX_SLUG_ATTEMPTS} attempts"
    )))
}

fn short_id(id: &str) -> String {
    let trimmed = id.strip_prefix("m-").unwrap_or(id);
    trimmed.chars().take(8).collect()
}

/// Lowercased, dash-separated prefix of the text, capped at 40 chars.
fn slugify(text: &str) -> String {
    let mut slug = String::new();
    let mut last_dash = true;
    for ch in text.chars().flat_map(char::to_lowercase) {
        if slug.len() >= 40 {
            break;
        }
        if ch.is_ascii_alphanumeric() {
            slug.push(ch);
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() {
        "memory".into()
    } else {
        slug
    }
}

/// Write `body` to a sibling tmp file, fsync, rename into place. A failure
/// leaves no tmp file behind.
fn write_atomic(final_path: &Path, body: &str) -> Result<()> {
    let tmp_path = final_path.with_extension("md.tmp");
    let result = (|| -> Result<()> {
        let mut file = std::fs::File::create(&tmp_path)?;
        use std::io::Write;
        file.write_all(body.as_bytes())?;
        file.flush()?;
        file.sync_all()?;
        std::fs::rename(&tmp_path, final_path)?;
        Ok(())
    })();
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp_path);
    }
    result
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

    fn hot_memory(id: &str, content: &str, now: i64) -> Memory {
        let mut m = Memory::new(content, 0);
        m.id = id.into();
        m.use_count = 10;
        m.last_used = now;
        m
    }

    #[test]
    fn promote_writes_note_and_flips_status() {
        let dir = tempdir().unwrap();
        let store = JsonlStore::open(dir.path().join("store")).unwrap();
        let vault = dir.path().join("vault");
        let now = 86_400;

        store
            .put_memory(hot_memory("m-abc12345", "Use Postgres for analytics", now))
            .unwrap();

        let request = PromoteRequest {
            memory_id: Some("m-abc12345".into()),
            ..Default::default()
        };
        let report = promote(&store, &scorer(), &vault, "stm-promoted", &request, now).unwrap();

        assert_eq!(report.promoted.len(), 1);
        let outcome = &report.promoted[0];
        assert_eq!(
            outcome.written_path,
            "stm-promoted/use-postgres-for-analytics-abc12345.md"
        );

        let note = std::fs::read_to_string(vault.join(&outcome.written_path)).unwrap();
        assert!(note.starts_with("---\nid: m-abc12345\n"));
        assert!(note.contains("promoted_from: stm"));
        assert!(note.contains("Use Postgres for analytics"));

        let updated = store.get_memory("m-abc12345").unwrap();
        assert_eq!(updated.status, MemoryStatus::Promoted);
        assert_eq!(updated.promoted_at, Some(now));
        assert_eq!(
            updated.promoted_to.as_deref(),
            Some(outcome.written_path.as_str())
        );
    }

    #[test]
    fn note_lists_outgoing_relations() {
        let dir = tempdir().unwrap();
        let store = JsonlStore::open(dir.path().join("store")).unwrap();
        let vault = dir.path().join("vault");
        let now = 86_400;

        store
            .put_memory(hot_memory("m-src00000", "Source memory body", now))
            .unwrap();
        store
            .put_memory(hot_memory("m-dst00000", "Target memory body", now))
            .unwrap();
        store
            .put_relation(Relation::new("m-src00000", "m-dst00000", "references", now))
            .unwrap();

        let request = PromoteRequest {
            memory_id: Some("m-src00000".into()),
            ..Default::default()
        };
        let report = promote(&store, &scorer(), &vault, "stm-promoted", &request, now).unwrap();
        let note =
            std::fs::read_to_string(vault.join(&report.promoted[0].written_path)).unwrap();
        assert!(note.contains("## Relations"));
        assert!(note.contains("- references → m-dst00000"));
    }

    #[test]
    fn dry_run_has_no_side_effects() {
        let dir = tempdir().unwrap();
        let store = JsonlStore::open(dir.path().join("store")).unwrap();
        let vault = dir.path().join("vault");
        let now = 86_400;

        store
            .put_memory(hot_memory("m-abc12345", "Dry run target", now))
            .unwrap();
        let lines_before = store.stats(0.3, 10.0).memory_lines;

        let request = PromoteRequest {
            memory_id: Some("m-abc12345".into()),
            dry_run: true,
            ..Default::default()
        };
        let report = promote(&store, &scorer(), &vault, "stm-promoted", &request, now).unwrap();

        assert!(report.dry_run);
        assert_eq!(report.candidates.len(), 1);
        assert!(report.promoted.is_empty());
        assert_eq!(report.previews.len(), 1);
        assert!(report.previews[0].proposed_path.starts_with("stm-promoted/"));
        assert!(report.previews[0].body.contains("Dry run target"));
        assert!(!vault.exists());
        assert_eq!(store.stats(0.3, 10.0).memory_lines, lines_before);
        assert_eq!(
            store.get_memory("m-abc12345").unwrap().status,
            MemoryStatus::Active
        );
    }

    #[test]
    fn slug_collisions_get_suffixes() {
        let dir = tempdir().unwrap();
        let store = JsonlStore::open(dir.path().join("store")).unwrap();
        let vault = dir.path().join("vault");
        let now = 86_400;

        // Same content and same short-id prefix forces a collision.
        store
            .put_memory(hot_memory("m-same1234x1", "Identical slug text", now))
            .unwrap();
        store
            .put_memory(hot_memory("m-same1234x2", "Identical slug text", now))
            .unwrap();

        for id in ["m-same1234x1", "m-same1234x2"] {
            let request = PromoteRequest {
                memory_id: Some(id.into()),
                ..Default::default()
            };
            promote(&store, &scorer(), &vault, "stm-promoted", &request, now).unwrap();
        }

        let first = store.get_memory("m-same1234x1").unwrap();
        let second = store.get_memory("m-same1234x2").unwrap();
        assert_eq!(
            first.promoted_to.as_deref(),
            Some("stm-promoted/identical-slug-text-same1234.md")
        );
        assert_eq!(
            second.promoted_to.as_deref(),
            Some("stm-promoted/identical-slug-text-same1234-2.md")
        );
    }

    #[test]
    fn already_promoted_rejected() {
        let dir = tempdir().unwrap();
        let store = JsonlStore::open(dir.path().join("store")).unwrap();
        let vault = dir.path().join("vault");
        let now = 86_400;

        store
            .put_memory(hot_memory("m-abc12345", "Once only", now))
            .unwrap();
        let request = PromoteRequest {
            memory_id: Some("m-abc12345".into()),
            ..Default::default()
        };
        promote(&store, &scorer(), &vault, "stm-promoted", &request, now).unwrap();

        let again = promote(&store, &scorer(), &vault, "stm-promoted", &request, now);
        assert!(matches!(again, Err(Error::Invalid(_))));
    }

    #[test]
    fn below_criteria_needs_force() {
        let dir = tempdir().unwrap();
        let store = JsonlStore::open(dir.path().join("store")).unwrap();
        let vault = dir.path().join("vault");
        let now = 100 * 86_400;

        // Old and stale: no criterion fires.
        let mut m = Memory::new("Barely used note", 0);
        m.id = "m-weak0000".into();
        m.last_used = now - 20 * 86_400;
        store.put_memory(m).unwrap();

        let request = PromoteRequest {
            memory_id: Some("m-weak0000".into()),
            ..Default::default()
        };
        assert!(matches!(
            promote(&store, &scorer(), &vault, "stm-promoted", &request, now),
            Err(Error::Invalid(_))
        ));

        let forced = PromoteRequest {
            memory_id: Some("m-weak0000".into()),
            force: true,
            ..Default::default()
        };
        let report =
            promote(&store, &scorer(), &vault, "stm-promoted", &forced, now).unwrap();
        assert_eq!(report.promoted.len(), 1);
    }

    #[test]
    fn auto_detect_promotes_qualifying_records() {
        let dir = tempdir().unwrap();
        let store = JsonlStore::open(dir.path().join("store")).unwrap();
        let vault = dir.path().join("vault");
        let now = 86_400;

        store
            .put_memory(hot_memory("m-hot00001", "Hot record", now))
            .unwrap();
        let mut cold = Memory::new("Cold record", 0);
        cold.id = "m-cold0001".into();
        cold.last_used = now - 20 * 3_600;
        cold.created_at = now - 30 * 86_400;
        cold.last_used = now - 20 * 86_400;
        store.put_memory(cold).unwrap();

        let request = PromoteRequest {
            auto_detect: true,
            ..Default::default()
        };
        let report = promote(&store, &scorer(), &vault, "stm-promoted", &request, now).unwrap();

        assert_eq!(report.candidates.len(), 1);
        assert_eq!(report.candidates[0].id, "m-hot00001");
        assert_eq!(report.promoted.len(), 1);
    }

    #[test]
    fn slugify_shapes_names() {
        assert_eq!(slugify("Use Postgres, for analytics!"), "use-postgres-for-analytics");
        assert_eq!(slugify("   "), "memory");
        assert!(slugify(&"long words ".repeat(20)).len() <= 40);
    }
}
