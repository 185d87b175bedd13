use anyhow::Result;
use colored::Colorize;
use std::path::PathBuf;

pub fn run(repo: Option<PathBuf>, limit: Option<usize>, path: Option<String>) -> Result<()> {
    let workspace = super::open_repo(repo)?;
    let change_sets = match &path {
        Some(path) => workspace.history(path)?,
        None => workspace.list_change_sets()?,
    };

    if change_sets.is_empty() {
        println!("{}", "No change sets yet".yellow());
        return Ok(());
    }

    println!("{}", "Change Set History".bold().cyan());
    println!();

    let to_show = limit.unwrap_or(change_sets.len()).min(change_sets.len());

    for cs in change_sets.iter().take(to_show) {
        println!(
            "{} {}",
            "changeset".yellow().bold(),
            cs.id.to_string().yellow()
        );
        if let Some(author) = &cs.author {
            println!("{}: {}", "Author".bold(), author);
        }
        println!(
            "{}: {}",
            "Date".bold(),
            cs.created_at.format("%Y-%m-%d %H:%M:%S")
        );
        if !cs.tags.is_empty() {
            println!("{}: {}", "Tags".bold(), cs.tags.join(", "));
        }
        println!();
        println!("    {}", cs.description);
        println!();

        for change in cs.changes.iter().take(5) {
            println!(
                "      {:>10} {}",
                crate::display::change_label(change.change_type),
                change.path.dimmed()
            );
        }
        if cs.changes.len() > 5 {
            println!(
                "      {} and {} more...",
                "...".dimmed(),
                (cs.changes.len() - 5).to_string().dimmed()
            );
        }

        println!();
    }

    if change_sets.len() > to_show {
        println!(
            "{}",
            format!("... and {} more change sets", change_sets.len() - to_show).dimmed()
        );
        println!("Use {} to see more", "--limit N".cyan());
    }

    Ok(())
}
