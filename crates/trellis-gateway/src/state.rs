use std::sync::Arc;

use trellis_core::config::AppConfig;
use trellis_core::traits::DocumentExtractor;
use trellis_engine::ExecutionEngine;
use trellis_retrieval::{CorpusCatalog, EmbeddingStore, Retriever};

/// Shared state behind the HTTP routes.
pub struct AppState {
    pub config: AppConfig,
    pub engine: Arc<ExecutionEngine>,
    pub retriever: Arc<Retriever>,
    pub store: Arc<dyn EmbeddingStore>,
    pub catalog: Arc<CorpusCatalog>,
    pub extractor: Arc<dyn DocumentExtractor>,
}
