//! `meridian sync` — run one bidirectional reconciliation pass.

use console::style;

use crate::engine::executor::Outcome;
use crate::engine::facade::Engine;
use crate::error::Result;

pub async fn run(engine: &Engine, folder: &str) -> Result<()> {
    println!("{} syncing {}...", style("->").cyan(), style(folder).bold());
    let outcomes = engine.sync_start(folder).await?;

    let mut succeeded = 0;
    let mut failed = 0;
    let mut skipped = 0;
    for outcome in &outcomes {
        match &outcome.outcome {
            Outcome::Success => succeeded += 1,
            Outcome::Failed(reason) => {
                failed += 1;
                eprintln!("  {} {}: {}", style("x").red(), outcome.path, reason);
            }
            Outcome::SkippedFailSafe | Outcome::Cancelled => skipped += 1,
        }
    }

    println!(
        "{} {} succeeded, {} failed, {} skipped",
        style("done").green().bold(),
        style(succeeded).bold(),
        style(failed).bold(),
        style(skipped).bold(),
    );

    Ok(())
}
