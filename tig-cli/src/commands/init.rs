use anyhow::Result;
use colored::Colorize;
use std::path::PathBuf;
use tig_core::Workspace;

pub fn run(path: PathBuf) -> Result<()> {
    std::fs::create_dir_all(&path)?;
    let abs_path = std::fs::canonicalize(&path)?;

    let workspace = Workspace::init(&abs_path)?;

    println!("{}", "✓ Initialized tig repository".green().bold());
    println!("  {}: {:?}", "Root".bold(), workspace.root());
    println!("  {}: {}", "Mode".bold(), format!("{:?}", workspace.mode()).to_lowercase());
    println!();
    println!("Run {} to stage files", "tig gate .".cyan());

    Ok(())
}
