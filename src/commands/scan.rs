//! `meridian scan` — run a single scan and report the hygiene findings.

use console::style;

use crate::engine::facade::Engine;
use crate::error::Result;

pub async fn run(engine: &Engine, folder: &str, export_path: Option<&std::path::Path>) -> Result<()> {
    println!("{} scanning {}...", style("->").cyan(), style(folder).bold());
    engine.scan(folder).await?;

    let status = engine.status().await;
    println!(
        "{} {} files found, {} empty folders, {} conflicts",
        style("done").green().bold(),
        style(status.files_found_count).bold(),
        style(status.empty_folders_count).bold(),
        style(status.conflicts_count).bold(),
    );

    if let Some(path) = export_path {
        let empty_folders = engine.export_empty_folders().await?;
        let report = serde_json::json!({
            "total_empty_folders": empty_folders.len(),
            "empty_folders": empty_folders,
        });
        std::fs::write(path, serde_json::to_string_pretty(&report)?)?;
        println!("{} wrote report to {}", style("->").cyan(), path.display());
    }

    Ok(())
}
