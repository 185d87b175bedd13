use crate::api::{create_router, AppState};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tig_core::{TrackingMode, Workspace};
use tracing::info;

pub struct TigServer {
    workspace: Arc<Workspace>,
}

impl TigServer {
    /// Opens the repository at `root`. An auto-tracking repository starts
    /// its watcher here.
    pub fn new(root: PathBuf) -> anyhow::Result<Self> {
        let workspace = Workspace::open(&root)?;
        Ok(Self {
            workspace: Arc::new(workspace),
        })
    }

    pub async fn serve(self, addr: SocketAddr) -> anyhow::Result<()> {
        let root = self.workspace.root().to_path_buf();
        let mode = self.workspace.mode();
        let state = AppState {
            workspace: self.workspace,
        };

        let app = create_router(state);

        info!("Server listening on {}", addr);
        info!("Repository: {:?}", root);
        if mode == TrackingMode::Auto {
            info!("Watching: {:?}", root);
        }

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }

    pub fn workspace(&self) -> &Arc<Workspace> {
        &self.workspace
    }
}
