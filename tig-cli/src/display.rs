use colored::{ColoredString, Colorize};
use tig_core::{ChangeType, DiffResult, LineType};

pub fn change_label(change_type: ChangeType) -> ColoredString {
    match change_type {
        ChangeType::Add => "new".green(),
        ChangeType::Modify => "modified".yellow(),
        ChangeType::Delete => "deleted".red(),
        ChangeType::Rename => "renamed".blue(),
        ChangeType::Untracked => "untracked".bright_black(),
    }
}

pub fn print_diff(result: &DiffResult) {
    for hunk in &result.hunks {
        let (old_start, old_len) = hunk.old_range();
        let (new_start, new_len) = hunk.new_range();
        println!(
            "{}",
            format!("@@ -{},{} +{},{} @@", old_start, old_len, new_start, new_len).cyan()
        );
        for line in &hunk.lines {
            match line.line_type {
                LineType::Addition => println!("{}", format!("+{}", line.content).green()),
                LineType::Deletion => println!("{}", format!("-{}", line.content).red()),
                LineType::Context => println!(" {}", line.content),
            }
        }
    }
}

pub fn short_id(id: &uuid::Uuid) -> String {
    id.to_string().chars().take(8).collect()
}
