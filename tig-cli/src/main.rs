use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod display;

use commands::{cleanup, commit, diff, gate, init, log, serve, status};

#[derive(Parser)]
#[command(name = "tig")]
#[command(version, about = "Content-addressed change tracking", long_about = None)]
struct Cli {
    /// Repository to operate on (defaults to the one containing the current directory)
    #[arg(short = 'C', long, global = true)]
    repo: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new repository
    Init {
        /// Directory to initialize (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Stage files or directories for the next change set
    Gate {
        /// Paths to gate; "." gates the whole tree
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Remove paths from the staged set
    Ungate {
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Show staged and working-tree changes
    Status {
        /// Include line diffs for modified files
        #[arg(long)]
        diff: bool,

        /// Print machine-readable JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the diff of a file against its last committed content
    Diff {
        path: String,
    },

    /// Record the staged changes as a change set
    Commit {
        /// Change set description
        message: String,

        #[arg(short, long)]
        author: Option<String>,

        #[arg(short, long)]
        tag: Vec<String>,

        /// Identifier of the intent this change set belongs to
        #[arg(long)]
        intent: Option<String>,
    },

    /// Show change set history
    Log {
        /// Number of change sets to show
        #[arg(short, long)]
        limit: Option<usize>,

        /// Only change sets touching this path
        #[arg(short, long)]
        path: Option<String>,
    },

    /// Drop staged changes whose file and stored content are both gone
    Cleanup,

    /// Serve the HTTP API
    Serve {
        /// Port for the API server
        #[arg(short, long, default_value = "3030")]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let repo = cli.repo;

    match cli.command {
        Commands::Init { path } => {
            init::run(repo.unwrap_or(path))?;
        }
        Commands::Gate { paths } => {
            gate::run(repo, paths)?;
        }
        Commands::Ungate { paths } => {
            gate::run_ungate(repo, paths)?;
        }
        Commands::Status { diff, json } => {
            status::run(repo, diff, json)?;
        }
        Commands::Diff { path } => {
            diff::run(repo, path)?;
        }
        Commands::Commit {
            message,
            author,
            tag,
            intent,
        } => {
            commit::run(repo, message, author, tag, intent)?;
        }
        Commands::Log { limit, path } => {
            log::run(repo, limit, path)?;
        }
        Commands::Cleanup => {
            cleanup::run(repo)?;
        }
        Commands::Serve { port } => {
            serve::run(repo, port).await?;
        }
    }

    Ok(())
}
