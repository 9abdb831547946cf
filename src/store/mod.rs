//! Append-only JSONL storage with in-memory indices.
//!
//! Two line files (`memories.jsonl`, `relations.jsonl`) hold one JSON object
//! per line; updates append a superseding line and deletes append a tombstone
//! (`{"id": …, "_tomb": true, "deleted_at": …}`). The latest line per id wins.
//! Indices are rebuilt on open and kept behind an `RwLock`; a writer mutex
//! serializes every mutation, including compaction. Each write path appends,
//! flushes, and fsyncs before mutating the indices.

use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::memory::types::{Memory, MemoryStatus, Relation};

const MEMORIES_FILE: &str = "memories.jsonl";
const RELATIONS_FILE: &str = "relations.jsonl";
const LOCK_FILE: &str = ".lock";

/// Filter for [`JsonlStore::list_memories`].
#[derive(Debug, Default, Clone)]
pub struct MemoryFilter {
    pub status: Option<MemoryStatus>,
    /// Match records carrying at least one of these tags.
    pub tags_any: Vec<String>,
    /// Match records carrying all of these tags.
    pub tags_all: Vec<String>,
    pub created_after: Option<i64>,
    pub created_before: Option<i64>,
}

/// Compound mutation applied as a single fsync'd append under the writer
/// mutex. Either every line reaches the files or none does.
#[derive(Debug, Default)]
pub struct WriteBatch {
    pub memory_puts: Vec<Memory>,
    pub relation_puts: Vec<Relation>,
    pub memory_tombstones: Vec<String>,
    pub relation_tombstones: Vec<String>,
    pub now: i64,
}

/// Snapshot of store health, used by the compaction heuristic.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreStats {
    pub active_memories: usize,
    pub active_relations: usize,
    pub memory_lines: u64,
    pub relation_lines: u64,
    pub tombstone_lines: u64,
    pub corrupt_lines: u64,
    /// Byte offset of the first malformed line seen on load, if any.
    pub first_corrupt_offset: Option<u64>,
    pub file_size_bytes: u64,
    pub compaction_recommended: bool,
}

/// Result of a [`JsonlStore::compact`] pass.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CompactStats {
    pub memory_lines_before: u64,
    pub memory_lines_after: u64,
    pub relation_lines_before: u64,
    pub relation_lines_after: u64,
}

/// Result of a memory deletion, reporting the relation cascade.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DeleteResult {
    pub id: String,
    pub cascaded_relations: usize,
}

#[derive(Default)]
struct Indices {
    memories: HashMap<String, Memory>,
    relations: HashMap<String, Relation>,
    /// tag → memory ids carrying it.
    by_tag: HashMap<String, HashSet<String>>,
    by_status: HashMap<MemoryStatus, HashSet<String>>,
    /// memory id → relation ids touching it (either endpoint).
    relations_by_endpoint: HashMap<String, HashSet<String>>,
}

impl Indices {
    fn index_memory(&mut self, memory: Memory) {
        self.unindex_memory(&memory.id);
        for tag in &memory.tags {
            self.by_tag
                .entry(tag.clone())
                .or_default()
                .insert(memory.id.clone());
        }
        self.by_status
            .entry(memory.status)
            .or_default()
            .insert(memory.id.clone());
        self.memories.insert(memory.id.clone(), memory);
    }

    fn unindex_memory(&mut self, id: &str) {
        if let Some(old) = self.memories.remove(id) {
            for tag in &old.tags {
                if let Some(set) = self.by_tag.get_mut(tag) {
                    set.remove(id);
                    if set.is_empty() {
                        self.by_tag.remove(tag);
                    }
                }
            }
            if let Some(set) = self.by_status.get_mut(&old.status) {
                set.remove(id);
            }
        }
    }

    fn index_relation(&mut self, relation: Relation) {
        self.unindex_relation(&relation.id);
        for endpoint in [&relation.from_id, &relation.to_id] {
            self.relations_by_endpoint
                .entry(endpoint.clone())
                .or_default()
                .insert(relation.id.clone());
        }
        self.relations.insert(relation.id.clone(), relation);
    }

    fn unindex_relation(&mut self, id: &str) {
        if let Some(old) = self.relations.remove(id) {
            for endpoint in [&old.from_id, &old.to_id] {
                if let Some(set) = self.relations_by_endpoint.get_mut(endpoint) {
                    set.remove(id);
                    if set.is_empty() {
                        self.relations_by_endpoint.remove(endpoint);
                    }
                }
            }
        }
    }
}

struct Writer {
    memories: File,
    relations: File,
    memory_lines: u64,
    relation_lines: u64,
    tombstone_lines: u64,
    corrupt_lines: u64,
    first_corrupt_offset: Option<u64>,
}

/// The append-only store. One instance owns the files for the process
/// lifetime; a pid lock file refuses a second opener.
pub struct JsonlStore {
    root: PathBuf,
    memories_path: PathBuf,
    relations_path: PathBuf,
    lock_path: PathBuf,
    indices: RwLock<Indices>,
    writer: Mutex<Writer>,
}

impl JsonlStore {
    /// Open (or create) a store rooted at `root`. Streams both files to
    /// rebuild the indices, truncating a trailing partial line and skipping
    /// malformed lines. Refuses to open when a live pid holds the lock.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        restrict_dir_permissions(&root)?;

        let lock_path = root.join(LOCK_FILE);
        acquire_lock(&lock_path)?;

        let memories_path = root.join(MEMORIES_FILE);
        let relations_path = root.join(RELATIONS_FILE);

        truncate_partial_trailing_line(&memories_path)?;
        truncate_partial_trailing_line(&relations_path)?;

        let mut indices = Indices::default();
        let mut writer = Writer {
            memories: open_append(&memories_path)?,
            relations: open_append(&relations_path)?,
            memory_lines: 0,
            relation_lines: 0,
            tombstone_lines: 0,
            corrupt_lines: 0,
            first_corrupt_offset: None,
        };

        load_file(&memories_path, &mut writer, |indices: &mut Indices, v| {
            let memory: Memory = serde_json::from_value(v)?;
            indices.index_memory(memory);
            Ok(())
        }, |indices, id| indices.unindex_memory(id), &mut indices, true)?;

        load_file(&relations_path, &mut writer, |indices: &mut Indices, v| {
            let relation: Relation = serde_json::from_value(v)?;
            indices.index_relation(relation);
            Ok(())
        }, |indices, id| indices.unindex_relation(id), &mut indices, false)?;

        // One directory fsync after any recovery work.
        fsync_dir(&root)?;

        info!(
            root = %root.display(),
            memories = indices.memories.len(),
            relations = indices.relations.len(),
            "store ready"
        );

        Ok(Self {
            root,
            memories_path,
            relations_path,
            lock_path,
            indices: RwLock::new(indices),
            writer: Mutex::new(writer),
        })
    }

    /// Append or supersede a memory record. Validates, fsyncs the line, then
    /// swaps the indices.
    pub fn put_memory(&self, memory: Memory) -> Result<String> {
        memory.validate()?;
        let line = serde_json::to_string(&memory)?;
        let id = memory.id.clone();

        let mut writer = self.writer.lock().expect("writer lock poisoned");
        append_line(&mut writer.memories, &line)?;
        writer.memory_lines += 1;
        drop(writer);

        let mut indices = self.indices.write().expect("index lock poisoned");
        indices.index_memory(memory);
        debug!(id = %id, "memory persisted");
        Ok(id)
    }

    pub fn get_memory(&self, id: &str) -> Result<Memory> {
        let indices = self.indices.read().expect("index lock poisoned");
        indices
            .memories
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Tombstone a memory and cascade-tombstone every relation touching it.
    /// Tombstoning a missing id is a no-op.
    pub fn delete_memory(&self, id: &str, now: i64) -> Result<DeleteResult> {
        let cascade: Vec<String> = {
            let indices = self.indices.read().expect("index lock poisoned");
            if !indices.memories.contains_key(id) {
                return Ok(DeleteResult {
                    id: id.to_string(),
                    cascaded_relations: 0,
                });
            }
            indices
                .relations_by_endpoint
                .get(id)
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default()
        };

        let mut writer = self.writer.lock().expect("writer lock poisoned");
        append_line(&mut writer.memories, &tombstone_line(id, now))?;
        writer.memory_lines += 1;
        writer.tombstone_lines += 1;
        for rel_id in &cascade {
            append_line(&mut writer.relations, &tombstone_line(rel_id, now))?;
            writer.relation_lines += 1;
            writer.tombstone_lines += 1;
        }
        drop(writer);

        let mut indices = self.indices.write().expect("index lock poisoned");
        indices.unindex_memory(id);
        for rel_id in &cascade {
            indices.unindex_relation(rel_id);
        }

        debug!(id = %id, cascaded = cascade.len(), "memory tombstoned");
        Ok(DeleteResult {
            id: id.to_string(),
            cascaded_relations: cascade.len(),
        })
    }

    /// List memories matching `filter`, most recently used first.
    pub fn list_memories(&self, filter: &MemoryFilter) -> Vec<Memory> {
        let indices = self.indices.read().expect("index lock poisoned");

        // Narrow by the cheapest available index first.
        let candidate_ids: Vec<String> = if let Some(status) = filter.status {
            indices
                .by_status
                .get(&status)
                .map(|s| s.iter().cloned().collect())
                .unwrap_or_default()
        } else if let Some(first_tag) = filter.tags_all.first() {
            indices
                .by_tag
                .get(first_tag)
                .map(|s| s.iter().cloned().collect())
                .unwrap_or_default()
        } else {
            indices.memories.keys().cloned().collect()
        };

        let mut out: Vec<Memory> = candidate_ids
            .iter()
            .filter_map(|id| indices.memories.get(id))
            .filter(|m| memory_matches(m, filter))
            .cloned()
            .collect();

        out.sort_by(|a, b| b.last_used.cmp(&a.last_used).then(a.id.cmp(&b.id)));
        out
    }

    pub fn count_memories(&self, status: Option<MemoryStatus>) -> usize {
        let indices = self.indices.read().expect("index lock poisoned");
        match status {
            Some(s) => indices.by_status.get(&s).map(|x| x.len()).unwrap_or(0),
            None => indices.memories.len(),
        }
    }

    pub fn put_relation(&self, relation: Relation) -> Result<String> {
        relation.validate()?;
        {
            let indices = self.indices.read().expect("index lock poisoned");
            for endpoint in [&relation.from_id, &relation.to_id] {
                if !indices.memories.contains_key(endpoint.as_str()) {
                    return Err(Error::NotFound(endpoint.clone()));
                }
            }
        }

        let line = serde_json::to_string(&relation)?;
        let id = relation.id.clone();

        let mut writer = self.writer.lock().expect("writer lock poisoned");
        append_line(&mut writer.relations, &line)?;
        writer.relation_lines += 1;
        drop(writer);

        let mut indices = self.indices.write().expect("index lock poisoned");
        indices.index_relation(relation);
        Ok(id)
    }

    pub fn get_relation(&self, id: &str) -> Result<Relation> {
        let indices = self.indices.read().expect("index lock poisoned");
        indices
            .relations
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Tombstone a relation. A missing id is a no-op.
    pub fn delete_relation(&self, id: &str, now: i64) -> Result<()> {
        {
            let indices = self.indices.read().expect("index lock poisoned");
            if !indices.relations.contains_key(id) {
                return Ok(());
            }
        }

        let mut writer = self.writer.lock().expect("writer lock poisoned");
        append_line(&mut writer.relations, &tombstone_line(id, now))?;
        writer.relation_lines += 1;
        writer.tombstone_lines += 1;
        drop(writer);

        let mut indices = self.indices.write().expect("index lock poisoned");
        indices.unindex_relation(id);
        Ok(())
    }

    /// Relations filtered by endpoint and/or type.
    pub fn list_relations(
        &self,
        from_id: Option<&str>,
        to_id: Option<&str>,
        relation_type: Option<&str>,
    ) -> Vec<Relation> {
        let indices = self.indices.read().expect("index lock poisoned");
        let mut out: Vec<Relation> = indices
            .relations
            .values()
            .filter(|r| from_id.map_or(true, |f| r.from_id == f))
            .filter(|r| to_id.map_or(true, |t| r.to_id == t))
            .filter(|r| relation_type.map_or(true, |t| r.relation_type == t))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        out
    }

    pub fn all_relations(&self) -> Vec<Relation> {
        self.list_relations(None, None, None)
    }

    /// Apply a compound batch: every line is serialized first, written as a
    /// single append per file, fsync'd, and only then indexed. A validation
    /// failure leaves both files untouched.
    pub fn apply_batch(&self, batch: WriteBatch) -> Result<()> {
        for m in &batch.memory_puts {
            m.validate()?;
        }
        for r in &batch.relation_puts {
            r.validate()?;
        }

        let mut memory_buf = String::new();
        for m in &batch.memory_puts {
            memory_buf.push_str(&serde_json::to_string(m)?);
            memory_buf.push('\n');
        }
        for id in &batch.memory_tombstones {
            memory_buf.push_str(&tombstone_line(id, batch.now));
            memory_buf.push('\n');
        }
        let mut relation_buf = String::new();
        for r in &batch.relation_puts {
            relation_buf.push_str(&serde_json::to_string(r)?);
            relation_buf.push('\n');
        }
        for id in &batch.relation_tombstones {
            relation_buf.push_str(&tombstone_line(id, batch.now));
            relation_buf.push('\n');
        }

        let mut writer = self.writer.lock().expect("writer lock poisoned");
        if !memory_buf.is_empty() {
            writer.memories.write_all(memory_buf.as_bytes())?;
            writer.memories.flush()?;
            writer.memories.sync_data()?;
        }
        if !relation_buf.is_empty() {
            writer.relations.write_all(relation_buf.as_bytes())?;
            writer.relations.flush()?;
            writer.relations.sync_data()?;
        }
        writer.memory_lines +=
            (batch.memory_puts.len() + batch.memory_tombstones.len()) as u64;
        writer.relation_lines +=
            (batch.relation_puts.len() + batch.relation_tombstones.len()) as u64;
        writer.tombstone_lines +=
            (batch.memory_tombstones.len() + batch.relation_tombstones.len()) as u64;
        drop(writer);

        let mut indices = self.indices.write().expect("index lock poisoned");
        for m in batch.memory_puts {
            indices.index_memory(m);
        }
        for r in batch.relation_puts {
            indices.index_relation(r);
        }
        for id in &batch.memory_tombstones {
            indices.unindex_memory(id);
        }
        for id in &batch.relation_tombstones {
            indices.unindex_relation(id);
        }
        Ok(())
    }

    /// Rewrite both files keeping only the latest non-tombstoned line per id.
    /// Holds the writer mutex for the whole pass; readers stay unblocked on
    /// the existing indices.
    pub fn compact(&self) -> Result<CompactStats> {
        let mut writer = self.writer.lock().expect("writer lock poisoned");
        let before_memories = writer.memory_lines;
        let before_relations = writer.relation_lines;

        let (memories, relations) = {
            let indices = self.indices.read().expect("index lock poisoned");
            let mut memories: Vec<Memory> = indices.memories.values().cloned().collect();
            memories.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
            let mut relations: Vec<Relation> = indices.relations.values().cloned().collect();
            relations.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
            (memories, relations)
        };

        rewrite_file(&self.memories_path, memories.iter().map(|m| {
            serde_json::to_string(m).map_err(Error::from)
        }))?;
        rewrite_file(&self.relations_path, relations.iter().map(|r| {
            serde_json::to_string(r).map_err(Error::from)
        }))?;
        fsync_dir(&self.root)?;

        // Reopen append handles on the renamed files.
        writer.memories = open_append(&self.memories_path)?;
        writer.relations = open_append(&self.relations_path)?;
        writer.memory_lines = memories.len() as u64;
        writer.relation_lines = relations.len() as u64;
        writer.tombstone_lines = 0;

        info!(
            memories = memories.len(),
            relations = relations.len(),
            "compaction complete"
        );

        Ok(CompactStats {
            memory_lines_before: before_memories,
            memory_lines_after: memories.len() as u64,
            relation_lines_before: before_relations,
            relation_lines_after: relations.len() as u64,
        })
    }

    /// Store health snapshot. Compaction is recommended when tombstones make
    /// up more than `tombstone_ratio` of all lines, or the files have grown
    /// past `size_factor` times the live payload.
    pub fn stats(&self, tombstone_ratio: f64, size_factor: f64) -> StoreStats {
        let (active_memories, active_relations) = {
            let indices = self.indices.read().expect("index lock poisoned");
            (indices.memories.len(), indices.relations.len())
        };
        let writer = self.writer.lock().expect("writer lock poisoned");
        let total_lines = writer.memory_lines + writer.relation_lines;
        let file_size_bytes = file_len(&self.memories_path) + file_len(&self.relations_path);

        let tomb_trigger = total_lines > 0
            && writer.tombstone_lines as f64 / total_lines as f64 > tombstone_ratio;
        let active_lines = (active_memories + active_relations) as u64;
        let size_trigger = active_lines > 0
            && total_lines > 0
            && file_size_bytes as f64
                > size_factor * active_lines as f64 * (file_size_bytes as f64 / total_lines as f64);

        StoreStats {
            active_memories,
            active_relations,
            memory_lines: writer.memory_lines,
            relation_lines: writer.relation_lines,
            tombstone_lines: writer.tombstone_lines,
            corrupt_lines: writer.corrupt_lines,
            first_corrupt_offset: writer.first_corrupt_offset,
            file_size_bytes,
            compaction_recommended: tomb_trigger || size_trigger,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Drop for JsonlStore {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.lock_path);
    }
}

fn memory_matches(m: &Memory, filter: &MemoryFilter) -> bool {
    if let Some(status) = filter.status {
        if m.status != status {
            return false;
        }
    }
    if !filter.tags_any.is_empty() && !filter.tags_any.iter().any(|t| m.tags.contains(t)) {
        return false;
    }
    if !filter.tags_all.iter().all(|t| m.tags.contains(t)) {
        return false;
    }
    if let Some(after) = filter.created_after {
        if m.created_at < after {
            return false;
        }
    }
    if let Some(before) = filter.created_before {
        if m.created_at > before {
            return false;
        }
    }
    true
}

fn tombstone_line(id: &str, now: i64) -> String {
    serde_json::json!({"id": id, "_tomb": true, "deleted_at": now}).to_string()
}

fn open_append(path: &Path) -> Result<File> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    restrict_file_permissions(path)?;
    Ok(file)
}

fn append_line(file: &mut File, line: &str) -> Result<()> {
    file.write_all(line.as_bytes())?;
    file.write_all(b"\n")?;
    file.flush()?;
    file.sync_data()?;
    Ok(())
}

/// Drop an unterminated final line left by a crash mid-append.
fn truncate_partial_trailing_line(path: &Path) -> Result<()> {
    let mut file = match OpenOptions::new().read(true).write(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(());
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    if last[0] == b'\n' {
        return Ok(());
    }

    // Scan backwards for the last newline and cut after it.
    let mut buf = Vec::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut buf)?;
    let keep = buf
        .iter()
        .rposition(|&b| b == b'\n')
        .map(|pos| pos as u64 + 1)
        .unwrap_or(0);
    warn!(
        path = %path.display(),
        dropped_bytes = len - keep,
        "truncating partial trailing line"
    );
    file.set_len(keep)?;
    file.sync_data()?;
    Ok(())
}

/// Stream a JSONL file, applying non-tombstone lines via `index` and
/// tombstones via `unindex`. Malformed lines are logged and skipped; the
/// first one's byte offset is recorded for stats.
fn load_file<FIdx, FUn>(
    path: &Path,
    writer: &mut Writer,
    index: FIdx,
    unindex: FUn,
    indices: &mut Indices,
    is_memories: bool,
) -> Result<()>
where
    FIdx: Fn(&mut Indices, Value) -> Result<()>,
    FUn: Fn(&mut Indices, &str),
{
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    let mut offset: u64 = 0;
    for line in contents.split('\n') {
        let line_len = line.len() as u64 + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            offset += line_len;
            continue;
        }

        if is_memories {
            writer.memory_lines += 1;
        } else {
            writer.relation_lines += 1;
        }

        match serde_json::from_str::<Value>(trimmed) {
            Ok(value) => {
                let is_tomb = value.get("_tomb").and_then(Value::as_bool).unwrap_or(false);
                if is_tomb {
                    writer.tombstone_lines += 1;
                    if let Some(id) = value.get("id").and_then(Value::as_str) {
                        unindex(indices, id);
                    }
                } else if let Err(e) = index(indices, value) {
                    record_corrupt(writer, path, offset, &e.to_string());
                }
            }
            Err(e) => record_corrupt(writer, path, offset, &e.to_string()),
        }
        offset += line_len;
    }
    Ok(())
}

fn record_corrupt(writer: &mut Writer, path: &Path, offset: u64, detail: &str) {
    warn!(
        path = %path.display(),
        offset,
        detail,
        "skipping malformed line"
    );
    writer.corrupt_lines += 1;
    if writer.first_corrupt_offset.is_none() {
        writer.first_corrupt_offset = Some(offset);
    }
}

/// Write lines to `<path>.tmp`, fsync, then rename over `path`.
fn rewrite_file<I>(path: &Path, lines: I) -> Result<()>
where
    I: Iterator<Item = Result<String>>,
{
    let tmp_path = path.with_extension("jsonl.tmp");
    {
        let mut tmp = File::create(&tmp_path)?;
        restrict_file_permissions(&tmp_path)?;
        for line in lines {
            tmp.write_all(line?.as_bytes())?;
            tmp.write_all(b"\n")?;
        }
        tmp.flush()?;
        tmp.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

fn fsync_dir(dir: &Path) -> Result<()> {
    let handle = File::open(dir)?;
    handle.sync_all()?;
    Ok(())
}

fn file_len(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Write our pid into the lock file. A live foreign pid refuses startup; a
/// dead one is reclaimed.
fn acquire_lock(lock_path: &Path) -> Result<()> {
    if let Ok(contents) = std::fs::read_to_string(lock_path) {
        if let Ok(pid) = contents.trim().parse::<u32>() {
            if pid != std::process::id() && pid_is_alive(pid) {
                return Err(Error::Conflict(format!(
                    "store is locked by running process {pid}"
                )));
            }
            warn!(pid, "reclaiming stale lock file");
        }
    }
    std::fs::write(lock_path, std::process::id().to_string())?;
    restrict_file_permissions(lock_path)?;
    Ok(())
}

#[cfg(target_os = "linux")]
fn pid_is_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(target_os = "linux"))]
fn pid_is_alive(_pid: u32) -> bool {
    // Without a portable liveness probe, treat any foreign lock as live.
    true
}

#[cfg(unix)]
fn restrict_dir_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_dir_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn restrict_file_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_file_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn memory(id: &str, content: &str, now: i64) -> Memory {
        let mut m = Memory::new(content, now);
        m.id = id.to_string();
        m
    }

    #[test]
    fn put_get_round_trip() {
        let dir = tempdir().unwrap();
        let store = JsonlStore::open(dir.path()).unwrap();

        let mut m = memory("m-1", "Rust ownership rules", 100);
        m.tags = vec!["rust".into(), "lang/rust".into()];
        store.put_memory(m.clone()).unwrap();

        let loaded = store.get_memory("m-1").unwrap();
        assert_eq!(loaded.content, "Rust ownership rules");
        assert_eq!(loaded.tags, m.tags);
        assert!(matches!(
            store.get_memory("m-missing"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn latest_line_supersedes() {
        let dir = tempdir().unwrap();
        let store = JsonlStore::open(dir.path()).unwrap();

        store.put_memory(memory("m-1", "first version", 100)).unwrap();
        store.put_memory(memory("m-1", "second version", 200)).unwrap();

        assert_eq!(store.get_memory("m-1").unwrap().content, "second version");
        assert_eq!(store.count_memories(None), 1);
        // Both lines remain on disk until compaction.
        let stats = store.stats(0.3, 10.0);
        assert_eq!(stats.memory_lines, 2);
    }

    #[test]
    fn tombstone_suppresses_and_cascades() {
        let dir = tempdir().unwrap();
        let store = JsonlStore::open(dir.path()).unwrap();

        store.put_memory(memory("m-1", "a", 100)).unwrap();
        store.put_memory(memory("m-2", "b", 100)).unwrap();
        store
            .put_relation(Relation::new("m-1", "m-2", "related", 100))
            .unwrap();

        let result = store.delete_memory("m-1", 200).unwrap();
        assert_eq!(result.cascaded_relations, 1);
        assert!(matches!(store.get_memory("m-1"), Err(Error::NotFound(_))));
        assert!(store.all_relations().is_empty());

        // Deleting again is a no-op: nothing to cascade, nothing appended.
        let lines_before = store.stats(0.3, 10.0).memory_lines;
        let repeat = store.delete_memory("m-1", 300).unwrap();
        assert_eq!(repeat.cascaded_relations, 0);
        assert_eq!(store.stats(0.3, 10.0).memory_lines, lines_before);
    }

    #[test]
    fn reload_rebuilds_indices() {
        let dir = tempdir().unwrap();
        {
            let store = JsonlStore::open(dir.path()).unwrap();
            let mut m = memory("m-1", "persisted", 100);
            m.tags = vec!["keep".into()];
            store.put_memory(m).unwrap();
            store.put_memory(memory("m-2", "doomed", 100)).unwrap();
            store.delete_memory("m-2", 150).unwrap();
        }

        let store = JsonlStore::open(dir.path()).unwrap();
        assert_eq!(store.count_memories(None), 1);
        assert_eq!(store.get_memory("m-1").unwrap().content, "persisted");
        let filter = MemoryFilter {
            tags_any: vec!["keep".into()],
            ..Default::default()
        };
        assert_eq!(store.list_memories(&filter).len(), 1);
    }

    #[test]
    fn malformed_line_skipped_and_reported() {
        let dir = tempdir().unwrap();
        {
            let store = JsonlStore::open(dir.path()).unwrap();
            store.put_memory(memory("m-1", "good", 100)).unwrap();
        }
        // Corrupt the middle of the file, then append another good record.
        let path = dir.path().join(MEMORIES_FILE);
        let mut contents = std::fs::read_to_string(&path).unwrap();
        let corrupt_offset = contents.len() as u64;
        contents.push_str("{not json at all\n");
        std::fs::write(&path, contents).unwrap();
        {
            let store = JsonlStore::open(dir.path()).unwrap();
            store.put_memory(memory("m-2", "also good", 100)).unwrap();
            let stats = store.stats(0.3, 10.0);
            assert_eq!(stats.corrupt_lines, 1);
            assert_eq!(stats.first_corrupt_offset, Some(corrupt_offset));
            assert_eq!(stats.active_memories, 2);
        }
    }

    #[test]
    fn partial_trailing_line_truncated() {
        let dir = tempdir().unwrap();
        {
            let store = JsonlStore::open(dir.path()).unwrap();
            store.put_memory(memory("m-1", "intact", 100)).unwrap();
        }
        // Simulate a crash mid-append: a line with no terminator.
        let path = dir.path().join(MEMORIES_FILE);
        let mut contents = std::fs::read_to_string(&path).unwrap();
        contents.push_str(r#"{"id":"m-2","content":"torn wri"#);
        std::fs::write(&path, contents).unwrap();

        let store = JsonlStore::open(dir.path()).unwrap();
        assert_eq!(store.count_memories(None), 1);
        let stats = store.stats(0.3, 10.0);
        assert_eq!(stats.corrupt_lines, 0);
        assert_eq!(store.get_memory("m-1").unwrap().content, "intact");
    }

    #[test]
    fn compact_drops_garbage_and_preserves_state() {
        let dir = tempdir().unwrap();
        let store = JsonlStore::open(dir.path()).unwrap();

        store.put_memory(memory("m-1", "v1", 100)).unwrap();
        store.put_memory(memory("m-1", "v2", 200)).unwrap();
        store.put_memory(memory("m-2", "gone", 100)).unwrap();
        store.delete_memory("m-2", 300).unwrap();

        let before = store.stats(0.3, 10.0);
        assert_eq!(before.memory_lines, 4);

        let result = store.compact().unwrap();
        assert_eq!(result.memory_lines_before, 4);
        assert_eq!(result.memory_lines_after, 1);

        assert_eq!(store.get_memory("m-1").unwrap().content, "v2");

        // Appends after compaction land in the rewritten file.
        store.put_memory(memory("m-3", "post-compact", 400)).unwrap();
        drop(store);
        let store = JsonlStore::open(dir.path()).unwrap();
        assert_eq!(store.count_memories(None), 2);
        assert_eq!(store.get_memory("m-3").unwrap().content, "post-compact");
    }

    #[test]
    fn compaction_recommended_on_tombstone_ratio() {
        let dir = tempdir().unwrap();
        let store = JsonlStore::open(dir.path()).unwrap();

        store.put_memory(memory("m-1", "keeper", 100)).unwrap();
        for i in 0..4 {
            let id = format!("m-temp-{i}");
            store.put_memory(memory(&id, "temp", 100)).unwrap();
            store.delete_memory(&id, 200).unwrap();
        }

        // 9 lines, 4 tombstones → ratio 0.44 > 0.3.
        let stats = store.stats(0.3, 10.0);
        assert!(stats.compaction_recommended);

        store.compact().unwrap();
        let stats = store.stats(0.3, 10.0);
        assert!(!stats.compaction_recommended);
    }

    #[test]
    fn batch_is_all_or_nothing_on_validation() {
        let dir = tempdir().unwrap();
        let store = JsonlStore::open(dir.path()).unwrap();
        store.put_memory(memory("m-1", "source", 100)).unwrap();

        let mut bad = memory("m-new", "merged", 200);
        bad.strength = 9.0;
        let batch = WriteBatch {
            memory_puts: vec![bad],
            memory_tombstones: vec!["m-1".into()],
            now: 200,
            ..Default::default()
        };
        assert!(store.apply_batch(batch).is_err());

        // Nothing committed: source is still live, no new record.
        assert!(store.get_memory("m-1").is_ok());
        assert!(store.get_memory("m-new").is_err());
    }

    #[test]
    fn relation_endpoints_must_exist() {
        let dir = tempdir().unwrap();
        let store = JsonlStore::open(dir.path()).unwrap();
        store.put_memory(memory("m-1", "a", 100)).unwrap();

        let r = Relation::new("m-1", "m-ghost", "related", 100);
        assert!(matches!(store.put_relation(r), Err(Error::NotFound(_))));
    }

    #[test]
    fn lock_file_refuses_second_opener() {
        let dir = tempdir().unwrap();
        let _store = JsonlStore::open(dir.path()).unwrap();

        // Simulate a different live process owning the lock. pid 1 is always
        // alive on Linux.
        std::fs::write(dir.path().join(LOCK_FILE), "1").unwrap();
        let second = JsonlStore::open(dir.path());
        assert!(matches!(second, Err(Error::Conflict(_))));
    }

    #[test]
    fn time_window_filter() {
        let dir = tempdir().unwrap();
        let store = JsonlStore::open(dir.path()).unwrap();

        for (id, created) in [("m-old", 100), ("m-mid", 500), ("m-new", 900)] {
            let mut m = memory(id, "x", created);
            m.created_at = created;
            m.last_used = created;
            store.put_memory(m).unwrap();
        }

        let filter = MemoryFilter {
            created_after: Some(200),
            created_before: Some(800),
            ..Default::default()
        };
        let hits = store.list_memories(&filter);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "m-mid");
    }
}
