use crate::anchor_client::{HttpTimestampingClient, LocalTimestampingClient};
use crate::config::Config;
use crate::edge_sync::ReplayCache;
use std::sync::Arc;
use votecore::anchor::AnchorOrchestrator;
use votecore::registry::Registry;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub config: Arc<Config>,
    pub edge_replay_cache: Arc<ReplayCache>,
    pub anchor_orchestrator: Arc<AnchorOrchestrator>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let client: Arc<dyn votecore::anchor::TimestampingClient> = match &config.timestamping_endpoint {
            Some(endpoint) => Arc::new(HttpTimestampingClient::new(endpoint.clone())),
            None => Arc::new(LocalTimestampingClient),
        };
        Self {
            registry: Arc::new(Registry::new()),
            config: Arc::new(config),
            edge_replay_cache: Arc::new(ReplayCache::new()),
            anchor_orchestrator: Arc::new(AnchorOrchestrator::new(client)),
        }
    }
}
