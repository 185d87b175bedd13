use anyhow::Result;
use colored::Colorize;
use std::path::PathBuf;

pub fn run(repo: Option<PathBuf>, paths: Vec<String>) -> Result<()> {
    let workspace = super::open_repo(repo)?;
    let gated = workspace.gate(&paths)?;

    if gated.is_empty() {
        println!("{}", "Nothing to gate".yellow());
        return Ok(());
    }

    for path in &gated {
        let label = workspace
            .gated_change(path)?
            .map(|c| crate::display::change_label(c.change_type).to_string())
            .unwrap_or_default();
        println!("  {} {} {}", "+".green(), path, label);
    }
    println!();
    println!(
        "{} {}",
        "Gated".bold(),
        format!("{} file(s)", gated.len()).cyan()
    );

    Ok(())
}

pub fn run_ungate(repo: Option<PathBuf>, paths: Vec<String>) -> Result<()> {
    let workspace = super::open_repo(repo)?;
    let removed = workspace.ungate(&paths)?;

    if removed.is_empty() {
        println!("{}", "Nothing was gated at those paths".yellow());
        return Ok(());
    }

    for path in &removed {
        println!("  {} {}", "-".red(), path);
    }
    println!();
    println!(
        "{} {}",
        "Ungated".bold(),
        format!("{} file(s)", removed.len()).cyan()
    );

    Ok(())
}
