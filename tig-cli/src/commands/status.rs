use anyhow::Result;
use colored::Colorize;
use std::path::PathBuf;

pub fn run(repo: Option<PathBuf>, with_diffs: bool, json: bool) -> Result<()> {
    let workspace = super::open_repo(repo)?;
    let changes = if with_diffs {
        workspace.status_with_diffs()?
    } else {
        workspace.status()?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&changes)?);
        return Ok(());
    }

    println!("{}", "Repository Status".bold().cyan());
    println!("  {}: {}", "Root".bold(), workspace.root().display());
    println!();

    if changes.is_empty() {
        println!("{}", "Working tree clean".green());
        return Ok(());
    }

    let (gated, working): (Vec<_>, Vec<_>) = changes.iter().partition(|c| c.gated);

    if !gated.is_empty() {
        println!(
            "{} {}",
            "Gated changes:".bold(),
            format!("({})", gated.len()).yellow()
        );
        for change in &gated {
            println!(
                "  {:>10} {}",
                crate::display::change_label(change.change_type),
                change.path
            );
        }
        println!();
    }

    if !working.is_empty() {
        println!(
            "{} {}",
            "Working tree changes:".bold(),
            format!("({})", working.len()).yellow()
        );
        for change in &working {
            match &change.old_path {
                Some(old) => println!(
                    "  {:>10} {} -> {}",
                    crate::display::change_label(change.change_type),
                    old,
                    change.path
                ),
                None => println!(
                    "  {:>10} {}",
                    crate::display::change_label(change.change_type),
                    change.path
                ),
            }
            if let Some(diff) = &change.diff {
                for line in diff.lines() {
                    println!("      {}", line.dimmed());
                }
            }
        }
        println!();
        println!("Run {} to stage these changes", "tig gate <path>".cyan());
    }

    Ok(())
}
