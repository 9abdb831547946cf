//! CLI `promote` — move high-value memories into the vault.

use anyhow::Result;

use crate::cancel::CancelToken;
use crate::config::MnemaConfig;
use crate::memory::promote::PromoteRequest;

pub fn run(
    config: MnemaConfig,
    memory_id: Option<String>,
    auto_detect: bool,
    dry_run: bool,
    force: bool,
) -> Result<()> {
    let service = super::build_service(config)?;
    let request = PromoteRequest {
        memory_id,
        auto_detect,
        dry_run,
        force,
    };
    let report = service.promote_memory(request, &CancelToken::new())?;

    if report.candidates.is_empty() {
        println!("No promotion candidates.");
        return Ok(());
    }

    println!("Candidates:");
    for c in report.candidates.iter().take(10) {
        println!(
            "  {} score {:.4}, {} use(s), {:.1}d old — {}",
            c.id,
            c.score,
            c.use_count,
            c.age_days,
            super::preview(&c.content_preview, 60),
        );
        println!("    reason: {}", c.reason);
    }

    if report.dry_run {
        for p in &report.previews {
            println!("\nWould write {}:", p.proposed_path);
            println!("{}", p.body);
        }
    } else {
        for outcome in &report.promoted {
            println!("Promoted {} -> {}", outcome.stm_id, outcome.written_path);
        }
    }
    Ok(())
}
