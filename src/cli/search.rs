//! CLI `search` — unified search over STM and the vault.

use anyhow::Result;

use crate::cancel::CancelToken;
use crate::config::MnemaConfig;
use crate::memory::search::{HitSource, SearchRequest, SearchSources};

pub fn run(
    config: MnemaConfig,
    query: Option<String>,
    tags: Vec<String>,
    limit: usize,
    sources: SearchSources,
) -> Result<()> {
    let service = super::build_service(config)?;
    let request = SearchRequest {
        query,
        tags,
        limit,
        sources,
        ..Default::default()
    };
    let hits = service.search_unified(request, &CancelToken::new())?;

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    println!("Found {} result(s):\n", hits.len());
    for (i, hit) in hits.iter().enumerate() {
        let label = match hit.source {
            HitSource::Stm => "stm",
            HitSource::Ltm => "ltm",
            HitSource::Review => "review",
        };
        println!("{}. [{label}] {} (score {:.3})", i + 1, hit.title, hit.score);
        if let Some(id) = &hit.memory_id {
            println!("   id: {id}");
        }
        if let Some(path) = &hit.path {
            println!("   path: {path}");
        }
        if !hit.tags.is_empty() {
            println!("   tags: {}", hit.tags.join(", "));
        }
        println!("   {}", super::preview(&hit.content, 150));
        println!();
    }
    Ok(())
}
