use axum::extract::FromRef;
use std::sync::Arc;

use super::ServerConfig;
use crate::artifacts::ArtifactStore;
use crate::pipeline::ConversionPipeline;

pub type SharedPipeline = Arc<ConversionPipeline>;
pub type SharedArtifacts = Arc<ArtifactStore>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub pipeline: SharedPipeline,
    pub artifacts: SharedArtifacts,
}

impl ServerState {
    pub fn new(config: ServerConfig, pipeline: SharedPipeline, artifacts: SharedArtifacts) -> Self {
        Self {
            config,
            pipeline,
            artifacts,
        }
    }
}

impl FromRef<ServerState> for SharedPipeline {
    fn from_ref(input: &ServerState) -> Self {
        input.pipeline.clone()
    }
}

impl FromRef<ServerState> for SharedArtifacts {
    fn from_ref(input: &ServerState) -> Self {
        input.artifacts.clone()
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}
