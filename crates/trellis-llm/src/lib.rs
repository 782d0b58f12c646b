pub mod gateway;
pub mod image;
pub mod providers;
pub mod retry;

use std::sync::Arc;

use trellis_core::config::AppConfig;
use trellis_core::traits::ModelGateway;

pub use gateway::LlmGateway;
pub use image::ImageClient;
pub use retry::RetryingGateway;

/// Build the retry-wrapped gateway for the configured provider.
pub fn create_gateway(config: &AppConfig) -> Arc<dyn ModelGateway> {
    let inner: Arc<dyn ModelGateway> = Arc::new(LlmGateway::from_config(config));
    Arc::new(RetryingGateway::new(inner))
}
