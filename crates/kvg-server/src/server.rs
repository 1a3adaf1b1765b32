use kvg_sdk::KnowledgeGraph;
use tokio::net::TcpListener;
use tracing::info;

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::AppState;
use crate::router::{build_router, build_router_with_cors};

/// Knowledge-graph HTTP server.
pub struct KvgServer {
    config: ServerConfig,
}

impl KvgServer {
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Open the configured store and build the router (useful for testing).
    pub fn router(&self) -> ServerResult<axum::Router> {
        let state = AppState::new(KnowledgeGraph::open(&self.config.kvg)?);
        Ok(if self.config.permissive_cors {
            build_router_with_cors(state)
        } else {
            build_router(state)
        })
    }

    /// Start serving requests.
    pub async fn serve(self) -> ServerResult<()> {
        let app = self.router()?;
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!(
            addr = %self.config.bind_addr,
            backend = ?self.config.kvg.store,
            "kvg server listening"
        );
        axum::serve(listener, app)
            .await
            .map_err(|e| ServerError::Internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_construction() {
        let server = KvgServer::new(ServerConfig::default());
        assert_eq!(server.config().bind_addr.port(), 7474);
    }

    #[test]
    fn router_builds() {
        let server = KvgServer::new(ServerConfig {
            permissive_cors: true,
            ..ServerConfig::default()
        });
        assert!(server.router().is_ok());
    }
}
