use anyhow::Result;
use colored::Colorize;
use std::path::PathBuf;

pub fn run(repo: Option<PathBuf>, path: String) -> Result<()> {
    let workspace = super::open_repo(repo)?;
    let result = workspace.show_file_diff(&path)?;

    if result.is_empty() {
        println!("{}", format!("No changes in {}", path).green());
        return Ok(());
    }

    println!("{}", "━".repeat(80).bright_black());
    println!(
        "{} {}  {} {}",
        path.white().bold(),
        format!("+{}", result.stats.additions).green(),
        format!("-{}", result.stats.deletions).red(),
        format!("({} hunk(s))", result.hunks.len()).dimmed()
    );
    println!();
    crate::display::print_diff(&result);

    Ok(())
}
