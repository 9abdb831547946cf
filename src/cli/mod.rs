pub mod inspect;
pub mod maintenance;
pub mod promote;
pub mod search;
pub mod stats;

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::clock::SystemClock;
use crate::config::MnemaConfig;
use crate::tools::MemoryService;

/// Open the engine for a CLI invocation: system clock, no embedder.
pub fn build_service(config: MnemaConfig) -> Result<MemoryService> {
    MemoryService::open(config, Arc::new(SystemClock), None)
        .context("failed to open memory store")
}

/// Truncate a preview string for table output.
pub fn preview(text: &str, max_chars: usize) -> String {
    let mut out: String = text.chars().take(max_chars).collect();
    if text.chars().count() > max_chars {
        out.push_str("...");
    }
    out.replace('\n', " ")
}
