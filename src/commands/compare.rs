//! `meridian compare` — ad-hoc comparison of two arbitrary trees, the CLI
//! face of `/compare/start` + `/compare/results`, grounded in
//! `compare_folders.py`'s report-then-prompt flow.

use console::style;

use crate::config::ProviderMode;
use crate::engine::facade::Engine;
use crate::error::Result;

pub async fn run(engine: &Engine, left: &str, right: &str, left_mode: ProviderMode, right_mode: ProviderMode) -> Result<()> {
    println!(
        "{} comparing {} <-> {}...",
        style("->").cyan(),
        style(left).bold(),
        style(right).bold()
    );
    engine.compare_start(left.to_string(), right.to_string(), left_mode, right_mode).await?;

    let results = engine
        .compare_results()
        .await
        .ok_or_else(|| crate::error::MeridianError::Other("comparison produced no results".to_string()))?;

    println!("{} only on left:", style(results.only_in_left.len()).bold());
    for entry in &results.only_in_left {
        println!("  + {}", entry.relative_path);
    }

    println!("{} only on right:", style(results.only_in_right.len()).bold());
    for entry in &results.only_in_right {
        println!("  - {}", entry.relative_path);
    }

    println!("{} size mismatches:", style(results.size_mismatched.len()).bold());
    for entry in &results.size_mismatched {
        println!("  ! {}", entry.relative_path);
    }

    engine.compare_reset().await;
    Ok(())
}
