//! CLI maintenance commands — `gc`, `compact`, and `refresh-ltm`.

use anyhow::Result;

use crate::cancel::CancelToken;
use crate::config::MnemaConfig;
use crate::memory::maintenance::GcRequest;

pub fn gc(
    config: MnemaConfig,
    dry_run: bool,
    archive_instead: bool,
    limit: Option<usize>,
) -> Result<()> {
    let service = super::build_service(config)?;
    let request = GcRequest {
        dry_run,
        archive_instead,
        limit,
    };
    let result = service.gc(request, &CancelToken::new())?;

    let verb = if dry_run { "Would affect" } else { "Affected" };
    println!(
        "{verb} {} memory(ies): {} removed, {} archived, {:.4} total score freed.",
        result.memory_ids.len(),
        result.removed_count,
        result.archived_count,
        result.freed_score_sum,
    );
    for id in result.memory_ids.iter().take(10) {
        println!("  {id}");
    }
    if result.memory_ids.len() > 10 {
        println!("  ... and {} more", result.memory_ids.len() - 10);
    }
    Ok(())
}

pub fn compact(config: MnemaConfig) -> Result<()> {
    let service = super::build_service(config)?;
    let result = service.compact(&CancelToken::new())?;
    println!(
        "Compacted memories {} -> {} lines, relations {} -> {} lines.",
        result.memory_lines_before,
        result.memory_lines_after,
        result.relation_lines_before,
        result.relation_lines_after,
    );
    Ok(())
}

pub fn refresh_ltm(config: MnemaConfig) -> Result<()> {
    let service = super::build_service(config)?;
    let stats = service.refresh_ltm(&CancelToken::new())?;
    println!(
        "Scanned {} note(s): {} indexed, {} unchanged, {} removed.",
        stats.scanned, stats.indexed, stats.unchanged, stats.removed,
    );
    Ok(())
}

/// One full maintenance pass, as the scheduler would run it.
pub fn run_all(config: MnemaConfig) -> Result<()> {
    let service = super::build_service(config)?;
    let report = service.run_maintenance(&CancelToken::new())?;

    println!(
        "GC: {} removed, {} archived.",
        report.gc.removed_count, report.gc.archived_count
    );
    match report.compacted {
        Some(c) => println!(
            "Compaction: {} -> {} memory lines.",
            c.memory_lines_before, c.memory_lines_after
        ),
        None => println!("Compaction: not needed."),
    }
    match report.ltm_refresh {
        Some(r) => println!("LTM refresh: {} indexed, {} removed.", r.indexed, r.removed),
        None => println!("LTM refresh: no vault configured."),
    }
    Ok(())
}
