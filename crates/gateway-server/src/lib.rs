pub mod api;
pub mod state;

use std::sync::Arc;

use anyhow::Result;
use infrastructure::GatewayConfig;
use state::AppState;

pub async fn setup_app_state(config: GatewayConfig) -> Result<Arc<AppState>> {
    AppState::build(config).await
}
