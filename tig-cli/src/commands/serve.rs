use anyhow::Result;
use colored::Colorize;
use std::path::PathBuf;
use tig_core::TrackingMode;
use tig_server::TigServer;

pub async fn run(repo: Option<PathBuf>, port: u16) -> Result<()> {
    let root = super::find_repo(repo)?;

    println!("{}", "🚀 Starting tig server...".bold().cyan());
    println!("   {}: {:?}", "Repository".bold(), root);

    let server = TigServer::new(root)?;

    if server.workspace().mode() == TrackingMode::Auto {
        println!("   {}: {}", "Tracking".bold(), "auto (watching for changes)".green());
    }
    println!(
        "   {}: {}",
        "API Server".bold(),
        format!("http://localhost:{}", port).green()
    );
    println!();
    println!("{}", "Press Ctrl+C to stop".dimmed());
    println!();

    let addr = format!("0.0.0.0:{}", port).parse()?;
    server.serve(addr).await?;

    Ok(())
}
