use anyhow::Result;
use colored::Colorize;
use std::path::PathBuf;
use tig_core::{ChangeSetRequest, Error};

pub fn run(
    repo: Option<PathBuf>,
    message: String,
    author: Option<String>,
    tags: Vec<String>,
    intent: Option<String>,
) -> Result<()> {
    let workspace = super::open_repo(repo)?;

    let mut request = ChangeSetRequest::new(message.clone());
    if let Some(author) = author {
        request = request.with_author(author);
    }
    for tag in tags {
        request = request.with_tag(tag);
    }
    if let Some(intent) = intent {
        request = request.with_intent(intent);
    }

    let change_set = match workspace.create_change_set_with(request) {
        Ok(cs) => cs,
        Err(Error::NoChanges) => {
            println!("{}", "No changes to commit".yellow());
            println!("Run {} first", "tig gate <path>".cyan());
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    println!("{}", "✓ Change set created".green().bold());
    println!("  {}: {}", "ID".bold(), change_set.id);
    println!("  {}: {}", "Message".bold(), message);
    if let Some(author) = &change_set.author {
        println!("  {}: {}", "Author".bold(), author);
    }
    if let Some(parent) = change_set.parent_id {
        println!("  {}: {}", "Parent".bold(), crate::display::short_id(&parent));
    }
    println!("  {}: {}", "Files changed".bold(), change_set.changes.len());

    Ok(())
}
