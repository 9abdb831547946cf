//! CLI `stats` — engine health snapshot.

use anyhow::Result;

use crate::config::MnemaConfig;

pub fn run(config: MnemaConfig) -> Result<()> {
    let service = super::build_service(config)?;
    let stats = service.stats();

    println!("Memory store");
    for status in ["active", "promoted", "archived", "deleted"] {
        println!(
            "  {status:<10} {}",
            stats.counts_by_status.get(status).copied().unwrap_or(0)
        );
    }
    println!("  relations  {}", stats.total_relations);

    println!("\nFiles");
    println!("  memory lines    {}", stats.store.memory_lines);
    println!("  relation lines  {}", stats.store.relation_lines);
    println!("  tombstones      {}", stats.store.tombstone_lines);
    println!("  size            {} bytes", stats.store.file_size_bytes);
    if stats.store.corrupt_lines > 0 {
        println!(
            "  corrupt lines   {} (first at byte {})",
            stats.store.corrupt_lines,
            stats.store.first_corrupt_offset.unwrap_or(0)
        );
    }
    if let Some(notes) = stats.ltm_notes {
        println!("\nLTM index: {notes} notes");
    }
    if stats.store.compaction_recommended {
        println!("\nCompaction recommended — run `mnema compact`.");
    }

    Ok(())
}
