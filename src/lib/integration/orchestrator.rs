use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::state::valid_stage_transition;
use super::types::{ServiceStatus, SetupStage};
use crate::functions::{FunctionPayload, FunctionRegistry};
use crate::http::{CurlOptions, ServiceClient};

pub const BACKEND_HOST: &str = "model-runner.docker.internal";

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub ready_timeout: Duration,
    /// How long a successful connectivity probe is trusted.
    pub connectivity_window: Duration,
    pub backend_url: String,
    pub backend_host: String,
    pub fast_probe: (Duration, Duration),
    pub slow_probe: (Duration, Duration),
    pub slow_probe_attempts: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(5 * 60),
            connectivity_window: Duration::from_secs(5 * 60),
            backend_url: format!("http://{BACKEND_HOST}/engines/llama.cpp/v1/models"),
            backend_host: BACKEND_HOST.to_string(),
            fast_probe: (Duration::from_secs(2), Duration::from_secs(5)),
            slow_probe: (Duration::from_secs(5), Duration::from_secs(15)),
            slow_probe_attempts: 3,
        }
    }
}

/// Drives the service and its integration function towards a working state
/// and reports where it stands.
pub struct IntegrationOrchestrator {
    client: Arc<ServiceClient>,
    registry: Arc<FunctionRegistry>,
    payload: FunctionPayload,
    settings: OrchestratorSettings,
    last_connected: Mutex<Option<Instant>>,
}

impl IntegrationOrchestrator {
    pub fn new(client: Arc<ServiceClient>, registry: Arc<FunctionRegistry>) -> Self {
        Self::with_settings(
            client,
            registry,
            FunctionPayload::docker_model_runner(),
            OrchestratorSettings::default(),
        )
    }

    pub fn with_settings(
        client: Arc<ServiceClient>,
        registry: Arc<FunctionRegistry>,
        payload: FunctionPayload,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            client,
            registry,
            payload,
            settings,
            last_connected: Mutex::new(None),
        }
    }

    pub fn client(&self) -> &Arc<ServiceClient> {
        &self.client
    }

    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }

    fn advance(&self, stage: &mut SetupStage, next: SetupStage) {
        if valid_stage_transition(stage, &next) {
            debug!(from = ?stage, to = ?next, "setup stage");
        } else {
            error!(from = ?stage, to = ?next, "unexpected setup stage transition");
        }
        *stage = next;
    }

    /// Waits for the service, installs and enables the function, then probes
    /// the backend. Never fails; partial progress shows up in the flags.
    pub async fn setup_integration(&self) -> ServiceStatus {
        let id = self.payload.id.as_str();
        let mut stage = SetupStage::WaitReady;

        if !self.client.wait_until_ready(self.settings.ready_timeout).await {
            warn!(
                timeout_secs = self.settings.ready_timeout.as_secs(),
                "service not ready, setup abandoned"
            );
            self.advance(&mut stage, SetupStage::Done);
            return ServiceStatus::unavailable();
        }

        self.advance(&mut stage, SetupStage::InstallIfMissing);
        if !self.registry.is_installed(id).await {
            info!(id, "installing integration function");
            if let Err(e) = self.registry.install_function(&self.payload).await {
                error!(id, error = %e, "function install failed");
                self.advance(&mut stage, SetupStage::Done);
                return ServiceStatus {
                    container_running: true,
                    ..ServiceStatus::default()
                }
                .stamped();
            }
        }

        self.advance(&mut stage, SetupStage::EnableIfInactive);
        let mut activation = None;
        let installed = match self.registry.find(id).await {
            Some(function) => {
                if !FunctionRegistry::is_function_active(&function) {
                    activation = Some(self.registry.ensure_function_enabled(id, true).await);
                }
                true
            }
            None => {
                warn!(id, "function missing from listing after install");
                false
            }
        };
        let enabled = match activation {
            Some(outcome) if !outcome.converged() => {
                warn!(id, ?outcome, "function only partially enabled, reporting it disabled");
                false
            }
            _ => self.function_active(id).await,
        };

        // Setup records connectivity even with the function off.
        self.advance(&mut stage, SetupStage::TestConnectivity);
        let connected = self.test_connectivity().await;

        self.advance(&mut stage, SetupStage::Done);
        let status = ServiceStatus {
            container_running: true,
            function_installed: installed,
            function_enabled: enabled,
            backend_connected: connected,
            last_checked: 0,
        }
        .stamped();
        info!(?status, "integration setup finished");
        status
    }

    async fn function_active(&self, id: &str) -> bool {
        self.registry
            .find(id)
            .await
            .is_some_and(|f| FunctionRegistry::is_function_active(&f))
    }

    /// Current state of each layer. Later layers are only checked once the
    /// earlier ones hold.
    pub async fn get_service_status(&self) -> ServiceStatus {
        if !self.client.is_container_healthy().await {
            debug!("service unhealthy");
            return ServiceStatus::unavailable();
        }

        let id = self.payload.id.as_str();
        let function = self.registry.find(id).await;
        let installed = function.is_some();
        let enabled = function
            .as_ref()
            .is_some_and(FunctionRegistry::is_function_active);
        let connected = enabled && self.test_connectivity().await;

        ServiceStatus {
            container_running: true,
            function_installed: installed,
            function_enabled: enabled,
            backend_connected: connected,
            last_checked: 0,
        }
        .stamped()
    }

    /// Probes the model backend from inside the container.
    ///
    /// A success is trusted for the connectivity window. On failure a DNS
    /// lookup is run and logged to help diagnose the cause.
    pub async fn test_connectivity(&self) -> bool {
        if let Some(at) = *self.last_connected.lock().await
            && at.elapsed() < self.settings.connectivity_window
        {
            debug!("backend reachable (cached)");
            return true;
        }

        let (connect, max_time) = self.settings.fast_probe;
        let fast = CurlOptions::get(&self.settings.backend_url)
            .header("Accept", "application/json")
            .timeouts(connect, max_time)
            .retries(0);
        match self.client.container_curl(&fast).await {
            Ok(_) => {
                self.record_connected().await;
                return true;
            }
            Err(e) => debug!(error = %e, "fast backend probe failed"),
        }

        let (connect, max_time) = self.settings.slow_probe;
        let slow = CurlOptions::get(&self.settings.backend_url)
            .header("Accept", "application/json")
            .timeouts(connect, max_time)
            .retries(self.settings.slow_probe_attempts.saturating_sub(1));
        match self.client.container_curl(&slow).await {
            Ok(body) if !body.trim().is_empty() => {
                self.record_connected().await;
                return true;
            }
            Ok(_) => warn!("backend answered with an empty body"),
            Err(e) => warn!(error = %e, "backend unreachable"),
        }

        self.diagnose_dns().await;
        false
    }

    async fn record_connected(&self) {
        info!(url = %self.settings.backend_url, "backend reachable");
        *self.last_connected.lock().await = Some(Instant::now());
    }

    async fn diagnose_dns(&self) {
        let args = [
            "getent".to_string(),
            "hosts".to_string(),
            self.settings.backend_host.clone(),
        ];
        match self.client.exec_in_container(&args, Some(0)).await {
            Ok(out) => info!(host = %self.settings.backend_host, resolved = %out.trim(), "backend host resolves"),
            Err(e) => warn!(host = %self.settings.backend_host, error = %e, "backend host does not resolve"),
        }
    }

    pub async fn reset_connectivity_cache(&self) {
        *self.last_connected.lock().await = None;
    }
}
