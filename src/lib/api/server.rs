use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State as AxumState},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use crate::config::SettingsStore;
use crate::container::{ContainerInspection, ContainerManager, ServiceConfig};
use crate::error::{BridgeError, BridgeResult};
use crate::integration::{IntegrationOrchestrator, ServiceStatus, SharedStatus};

/// Everything the handlers reach into.
pub struct AppState {
    pub manager: ContainerManager,
    pub orchestrator: Arc<IntegrationOrchestrator>,
    pub status: SharedStatus,
    pub settings: SettingsStore,
    pub config: RwLock<ServiceConfig>,
}

pub type SharedState = Arc<AppState>;

/// `BridgeError` rendered as a JSON `{error}` body.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<BridgeError> for ApiError {
    fn from(err: BridgeError) -> Self {
        let status = match &err {
            BridgeError::Configuration { .. } | BridgeError::InvalidPayload(_) => {
                StatusCode::BAD_REQUEST
            }
            BridgeError::Conflict { .. } => StatusCode::CONFLICT,
            BridgeError::Auth(_) => StatusCode::UNAUTHORIZED,
            BridgeError::Storage { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            BridgeError::RegistryAuth { .. }
            | BridgeError::Transport(_)
            | BridgeError::Timeout { .. }
            | BridgeError::Http { .. }
            | BridgeError::EngineCommand { .. } => StatusCode::BAD_GATEWAY,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContainerAction {
    Start,
    Stop,
    Restart,
    Recreate,
    Create,
}

impl ContainerAction {
    fn parse(action: &str) -> Option<Self> {
        match action {
            "start" => Some(ContainerAction::Start),
            "stop" => Some(ContainerAction::Stop),
            "restart" => Some(ContainerAction::Restart),
            "recreate" => Some(ContainerAction::Recreate),
            "create" => Some(ContainerAction::Create),
            _ => None,
        }
    }
}

pub struct ApiServer {
    state: SharedState,
    addr: SocketAddr,
}

impl ApiServer {
    pub fn new(state: SharedState, addr: SocketAddr) -> Self {
        Self { state, addr }
    }

    pub fn router(state: SharedState) -> Router {
        Router::new()
            .route("/status", get(ApiServer::get_status))
            .route("/status/refresh", post(ApiServer::refresh_status))
            .route("/integration/setup", post(ApiServer::setup_integration))
            .route("/container", get(ApiServer::get_container))
            .route("/container/{action}", post(ApiServer::container_action))
            .route("/config", get(ApiServer::get_config).put(ApiServer::put_config))
            .with_state(state)
    }

    async fn get_status(AxumState(state): AxumState<SharedState>) -> Json<ServiceStatus> {
        Json(*state.status.read().await)
    }

    async fn refresh_status(AxumState(state): AxumState<SharedState>) -> Json<ServiceStatus> {
        let status = state.orchestrator.get_service_status().await;
        *state.status.write().await = status;
        Json(status)
    }

    async fn setup_integration(AxumState(state): AxumState<SharedState>) -> Json<ServiceStatus> {
        let status = state.orchestrator.setup_integration().await;
        *state.status.write().await = status;
        Json(status)
    }

    async fn get_container(AxumState(state): AxumState<SharedState>) -> Json<ContainerInspection> {
        Json(state.manager.get_status().await)
    }

    async fn container_action(
        AxumState(state): AxumState<SharedState>,
        Path(action): Path<String>,
    ) -> ApiResult<ContainerInspection> {
        let Some(action) = ContainerAction::parse(&action) else {
            return Err(ApiError::not_found(format!("unknown container action `{action}`")));
        };
        info!(?action, "container action requested");

        let config = state.config.read().await.clone();
        match action {
            ContainerAction::Create => state.manager.create(config).await?,
            ContainerAction::Recreate => state.manager.recreate(config).await?,
            ContainerAction::Start | ContainerAction::Stop | ContainerAction::Restart => {
                let Some(container) = state.manager.find().await else {
                    return Err(ApiError::not_found("no managed container"));
                };
                match action {
                    ContainerAction::Start => state.manager.start(&container.id).await?,
                    ContainerAction::Stop => state.manager.stop(&container.id).await?,
                    _ => state.manager.restart(&container.id).await?,
                }
            }
        }

        Ok(Json(state.manager.get_status().await))
    }

    async fn get_config(AxumState(state): AxumState<SharedState>) -> Json<ServiceConfig> {
        Json(state.config.read().await.clone())
    }

    async fn put_config(
        AxumState(state): AxumState<SharedState>,
        Json(config): Json<ServiceConfig>,
    ) -> ApiResult<ServiceConfig> {
        state.settings.save(&config).await?;
        *state.config.write().await = config.clone();

        state.orchestrator.client().update_config(&config).await;
        state.orchestrator.registry().invalidate().await;
        state.orchestrator.reset_connectivity_cache().await;
        info!(image = %config.image, port = %config.external_port, "service configuration updated");
        Ok(Json(config))
    }

    pub async fn serve(self) -> BridgeResult<()> {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "cannot bind API listener");
            BridgeError::Transport(format!("cannot bind {}: {e}", self.addr))
        })?;
        info!(addr = %self.addr, "status API listening");

        axum::serve(listener, Self::router(self.state))
            .await
            .map_err(|e| {
                warn!(error = %e, "status API stopped");
                BridgeError::Transport(format!("API server failed: {e}"))
            })
    }
}
