use std::error::Error;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{error, info, warn};

use webui_bridge::api::{ApiServer, AppState};
use webui_bridge::auth::TokenCache;
use webui_bridge::config::{AppConfig, SettingsStore};
use webui_bridge::container::{ContainerEngine, ContainerManager, DockerEngine};
use webui_bridge::functions::FunctionRegistry;
use webui_bridge::http::ServiceClient;
use webui_bridge::integration::{IntegrationOrchestrator, ServiceStatus, StatusPoller};
use webui_bridge::logging::init_logging;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_logging();

    let config = AppConfig::load().await?;
    info!(
        image = %config.service.image,
        port = %config.service.external_port,
        data_dir = %config.data_dir.display(),
        "starting webui-bridge"
    );

    let engine: Arc<dyn ContainerEngine> = Arc::new(DockerEngine::connect()?);
    let manager = ContainerManager::new(engine.clone());
    let tokens = Arc::new(TokenCache::open(config.token_path()).await);
    let client = Arc::new(ServiceClient::new(&config.service, tokens, engine));
    let registry = Arc::new(FunctionRegistry::new(client.clone()));
    let orchestrator = Arc::new(IntegrationOrchestrator::new(client, registry));
    let status = Arc::new(RwLock::new(ServiceStatus::unavailable()));

    if config.service.auto_start {
        let manager = manager.clone();
        let orchestrator = orchestrator.clone();
        let status = status.clone();
        let service = config.service.clone();
        tokio::spawn(async move {
            if let Err(e) = manager.create(service).await {
                error!(error = %e, "auto-start failed");
                return;
            }
            let snapshot = orchestrator.setup_integration().await;
            if !snapshot.is_fully_operational() {
                warn!(?snapshot, "integration setup incomplete");
            }
            *status.write().await = snapshot;
        });
    }

    StatusPoller::new(orchestrator.clone(), status.clone(), config.poll_interval).spawn();

    let state = Arc::new(AppState {
        manager,
        orchestrator,
        status,
        settings: SettingsStore::new(config.settings_path()),
        config: RwLock::new(config.service.clone()),
    });
    ApiServer::new(state, config.api_addr).serve().await?;

    Ok(())
}
