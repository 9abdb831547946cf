//! CLI `inspect` — full view of a single memory.

use anyhow::Result;

use crate::cancel::CancelToken;
use crate::config::MnemaConfig;
use crate::tools::requests::OpenMemoriesRequest;

pub fn run(config: MnemaConfig, memory_id: String) -> Result<()> {
    let service = super::build_service(config)?;
    let response = service.open_memories(
        OpenMemoriesRequest {
            memory_ids: vec![memory_id.clone()],
            touch: false,
            include_relations: true,
            page: None,
        },
        &CancelToken::new(),
    )?;

    let Some(opened) = response.memories.first() else {
        anyhow::bail!("memory not found: {memory_id}");
    };
    let m = &opened.memory;

    println!("id:        {}", m.id);
    println!("status:    {}", m.status);
    println!("score:     {:.4}", opened.score);
    println!("strength:  {:.2}", m.strength);
    println!("use_count: {}", m.use_count);
    println!("age:       {:.1}d", opened.age_days);
    if !m.tags.is_empty() {
        println!("tags:      {}", m.tags.join(", "));
    }
    if !m.entities.is_empty() {
        println!("entities:  {}", m.entities.join(", "));
    }
    if let Some(path) = &m.promoted_to {
        println!("promoted:  {path}");
    }
    println!("\n{}", m.content);

    if !opened.outgoing.is_empty() {
        println!("\nOutgoing relations:");
        for r in &opened.outgoing {
            println!("  {} -> {}", r.relation_type, r.to_id);
        }
    }
    if !opened.incoming.is_empty() {
        println!("\nIncoming relations:");
        for r in &opened.incoming {
            println!("  {} <- {}", r.relation_type, r.from_id);
        }
    }
    Ok(())
}
