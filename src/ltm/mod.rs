//! Long-term memory index — a rebuildable projection of the markdown vault.
//!
//! The vault itself is the source of truth; the index is a JSONL cache of
//! per-file metadata (front matter, snippet, stat fingerprint) so searches
//! never re-read unchanged notes. Refresh cost is proportional to the number
//! of changed files.

pub mod front_matter;

use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::cancel::CancelToken;
use crate::error::Result;

/// Approximate snippet length captured from each note body.
const SNIPPET_CHARS: usize = 200;

/// One indexed vault note, one line in `ltm_index.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LtmEntry {
    /// Vault-relative path.
    pub path: String,
    pub title: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    pub mtime_ns: u128,
    pub size: u64,
    #[serde(default)]
    pub front_matter_keys: Vec<String>,
    /// Whitespace-collapsed prefix of the body.
    pub content_snippet: String,
}

/// Outcome of an index refresh.
#[derive(Debug, Default, Clone, Serialize)]
pub struct RefreshStats {
    pub scanned: usize,
    pub indexed: usize,
    pub unchanged: usize,
    pub removed: usize,
}

/// Index over a markdown vault, persisted as an append-only JSONL file with
/// tombstones for deleted notes.
pub struct LtmIndex {
    vault_path: PathBuf,
    index_path: PathBuf,
    entries: RwLock<HashMap<String, LtmEntry>>,
    writer: Mutex<File>,
}

impl LtmIndex {
    /// Open the index, loading any persisted entries. The vault itself is
    /// not scanned until [`refresh`](Self::refresh).
    pub fn open(vault_path: impl AsRef<Path>, index_path: impl AsRef<Path>) -> Result<Self> {
        let vault_path = vault_path.as_ref().to_path_buf();
        let index_path = index_path.as_ref().to_path_buf();
        if let Some(parent) = index_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut entries = HashMap::new();
        if let Ok(contents) = std::fs::read_to_string(&index_path) {
            for line in contents.lines() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<Value>(line) {
                    Ok(value) => {
                        let is_tomb =
                            value.get("_tomb").and_then(Value::as_bool).unwrap_or(false);
                        if is_tomb {
                            if let Some(path) = value.get("path").and_then(Value::as_str) {
                                entries.remove(path);
                            }
                        } else {
                            match serde_json::from_value::<LtmEntry>(value) {
                                Ok(entry) => {
                                    entries.insert(entry.path.clone(), entry);
                                }
                                Err(e) => warn!(error = %e, "skipping malformed index line"),
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, "skipping malformed index line"),
                }
            }
        }

        let writer = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&index_path)?;

        info!(
            vault = %vault_path.display(),
            cached = entries.len(),
            "LTM index loaded"
        );

        Ok(Self {
            vault_path,
            index_path,
            entries: RwLock::new(entries),
            writer: Mutex::new(writer),
        })
    }

    /// Walk the vault and fold changes into the index: new and modified
    /// notes are re-parsed, missing ones tombstoned, unchanged ones skipped
    /// on the `(mtime_ns, size)` fingerprint. Checks the token once per file.
    pub fn refresh(&self, token: &CancelToken) -> Result<RefreshStats> {
        let mut stats = RefreshStats::default();
        let mut seen: HashSet<String> = HashSet::new();
        let mut updates: Vec<LtmEntry> = Vec::new();

        for entry in WalkDir::new(&self.vault_path)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| !is_hidden(e.file_name()))
        {
            token.check()?;
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "vault walk error, skipping entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "md") {
                continue;
            }

            let rel_path = match path.strip_prefix(&self.vault_path) {
                Ok(p) => p.to_string_lossy().into_owned(),
                Err(_) => continue,
            };
            stats.scanned += 1;
            seen.insert(rel_path.clone());

            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    warn!(path = %rel_path, error = %e, "stat failed, skipping");
                    continue;
                }
            };
            let mtime_ns = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_nanos())
                .unwrap_or(0);
            let size = metadata.len();

            let unchanged = {
                let cache = self.entries.read().expect("index lock poisoned");
                cache
                    .get(&rel_path)
                    .map(|e| e.mtime_ns == mtime_ns && e.size == size)
                    .unwrap_or(false)
            };
            if unchanged {
                stats.unchanged += 1;
                continue;
            }

            match index_file(path, &rel_path, mtime_ns, size) {
                Ok(indexed) => {
                    debug!(path = %rel_path, "note indexed");
                    updates.push(indexed);
                    stats.indexed += 1;
                }
                Err(e) => warn!(path = %rel_path, error = %e, "note parse failed, skipping"),
            }
        }

        // Notes that vanished from disk get tombstones.
        let removed: Vec<String> = {
            let cache = self.entries.read().expect("index lock poisoned");
            cache
                .keys()
                .filter(|path| !seen.contains(*path))
                .cloned()
                .collect()
        };
        stats.removed = removed.len();

        // Persist first, then swap the in-memory map.
        {
            let mut writer = self.writer.lock().expect("index writer poisoned");
            let mut buf = String::new();
            for entry in &updates {
                buf.push_str(&serde_json::to_string(entry)?);
                buf.push('\n');
            }
            for path in &removed {
                buf.push_str(
                    &serde_json::json!({"path": path, "_tomb": true}).to_string(),
                );
                buf.push('\n');
            }
            if !buf.is_empty() {
                writer.write_all(buf.as_bytes())?;
                writer.flush()?;
                writer.sync_data()?;
            }
        }

        let mut cache = self.entries.write().expect("index lock poisoned");
        for entry in updates {
            cache.insert(entry.path.clone(), entry);
        }
        for path in &removed {
            cache.remove(path);
        }
        drop(cache);

        info!(
            scanned = stats.scanned,
            indexed = stats.indexed,
            unchanged = stats.unchanged,
            removed = stats.removed,
            "LTM refresh complete"
        );
        Ok(stats)
    }

    /// Search the index by tag intersection and case-insensitive substring
    /// over title, aliases, and snippet. Newest notes first.
    pub fn search(
        &self,
        query: Option<&str>,
        tags: &[String],
        limit: usize,
        token: &CancelToken,
    ) -> Result<Vec<LtmEntry>> {
        let cache = self.entries.read().expect("index lock poisoned");
        let needle = query.map(str::to_lowercase);

        let mut hits: Vec<LtmEntry> = Vec::new();
        for entry in cache.values() {
            token.check()?;
            if !tags.is_empty() && !tags.iter().any(|t| entry.tags.contains(t)) {
                continue;
            }
            if let Some(needle) = &needle {
                let title_hit = entry.title.to_lowercase().contains(needle);
                let alias_hit = entry
                    .aliases
                    .iter()
                    .any(|a| a.to_lowercase().contains(needle));
                let snippet_hit = entry.content_snippet.to_lowercase().contains(needle);
                if !(title_hit || alias_hit || snippet_hit) {
                    continue;
                }
            }
            hits.push(entry.clone());
        }

        hits.sort_by(|a, b| b.mtime_ns.cmp(&a.mtime_ns).then(a.path.cmp(&b.path)));
        hits.truncate(limit);
        Ok(hits)
    }

    pub fn get(&self, path: &str) -> Option<LtmEntry> {
        self.entries
            .read()
            .expect("index lock poisoned")
            .get(path)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("index lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn vault_path(&self) -> &Path {
        &self.vault_path
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

/// Read and index a single note.
fn index_file(path: &Path, rel_path: &str, mtime_ns: u128, size: u64) -> Result<LtmEntry> {
    let content = std::fs::read_to_string(path)?;
    let (fm, body) = front_matter::parse(&content);
    let fm = fm.unwrap_or_default();

    let title = fm.title.unwrap_or_else(|| {
        Path::new(rel_path)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| rel_path.to_string())
    });

    Ok(LtmEntry {
        path: rel_path.to_string(),
        title,
        tags: fm.tags,
        aliases: fm.aliases,
        created: fm.created,
        mtime_ns,
        size,
        front_matter_keys: fm.keys,
        content_snippet: snippet(body),
    })
}

/// Whitespace-collapsed prefix of the body, cut at a char boundary.
fn snippet(body: &str) -> String {
    let collapsed: String = body.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(SNIPPET_CHARS).collect()
}
