use anyhow::Result;
use colored::Colorize;
use std::path::PathBuf;

pub fn run(repo: Option<PathBuf>) -> Result<()> {
    let workspace = super::open_repo(repo)?;
    let removed = workspace.cleanup_gated_changes()?;

    if removed.is_empty() {
        println!("{}", "No orphaned gated changes".green());
        return Ok(());
    }

    for path in &removed {
        println!("  {} {}", "-".red(), path);
    }
    println!();
    println!(
        "{} {}",
        "Removed".bold(),
        format!("{} orphaned gated change(s)", removed.len()).cyan()
    );

    Ok(())
}
