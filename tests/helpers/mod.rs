#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use mnema::cancel::CancelToken;
use mnema::clock::FixedClock;
use mnema::config::MnemaConfig;
use mnema::memory::types::Memory;
use mnema::store::JsonlStore;
use mnema::tools::requests::SaveMemoryRequest;
use mnema::tools::MemoryService;

pub const DAY: i64 = 86_400;

/// Open a service over a temp directory with a pinned clock and a vault.
pub fn test_service(dir: &Path, now: i64) -> (MemoryService, Arc<FixedClock>) {
    let mut config = MnemaConfig::default();
    config.storage.storage_root = dir.join("store").to_string_lossy().into_owned();
    config.ltm.vault_path = dir.join("vault").to_string_lossy().into_owned();
    config.decay.decay_model = "exponential".into();
    std::fs::create_dir_all(dir.join("vault")).unwrap();

    let clock = Arc::new(FixedClock::new(now));
    let service = MemoryService::open(config, clock.clone(), None).unwrap();
    (service, clock)
}

/// Open a bare store over `<dir>/store`.
pub fn test_store(dir: &Path) -> JsonlStore {
    JsonlStore::open(dir.join("store")).unwrap()
}

/// Save a memory through the operation surface. Returns the id.
pub fn save(service: &MemoryService, content: &str, tags: &[&str]) -> String {
    let request = SaveMemoryRequest {
        content: content.into(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        ..Default::default()
    };
    service
        .save_memory(request, &CancelToken::new())
        .unwrap()
        .memory_id
}

/// Build a memory record directly, bypassing the service.
pub fn memory(id: &str, content: &str, created_at: i64) -> Memory {
    let mut m = Memory::new(content, created_at);
    m.id = id.to_string();
    m
}
