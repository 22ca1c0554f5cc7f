pub mod handlers;
pub mod routes;

pub use routes::*;

use crate::search::{IndexManager, SearchService, SuggestionEngine};
use crate::sync::{CheckpointStore, DenormalizationRefresher, PipelineHealth};
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub search: Arc<SearchService>,
    pub suggestions: Arc<SuggestionEngine>,
    pub index: Arc<IndexManager>,
    pub checkpoints: CheckpointStore,
    pub health: PipelineHealth,
    pub refresher: Arc<DenormalizationRefresher>,
}
