use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::engine::ContainerEngine;
use super::types::{
    CONTAINER_NAME, CONTAINER_PORT, ContainerFilter, ContainerInspection, ContainerState,
    DEFAULT_PORT, EngineContainer, LABEL_AUTO_START, RunSpec, ServiceConfig, managed_labels,
};
use crate::error::{BridgeError, BridgeResult};
use crate::retry::{BackoffSchedule, RetryExecutor};

type SharedCreate = Shared<BoxFuture<'static, BridgeResult<()>>>;

/// Shortest id prefix accepted as a container reference.
const SHORT_ID_LEN: usize = 12;

/// Timing knobs for lifecycle operations.
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Grace period handed to the engine for a graceful stop.
    pub stop_timeout: Duration,
    /// Wait between a failed stop and the kill.
    pub kill_grace: Duration,
    /// Wait between removal and creation on recreate.
    pub recreate_settle: Duration,
    /// Wait before the single retry of a run that failed on a missing image.
    pub image_retry_delay: Duration,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_secs(10),
            kill_grace: Duration::from_secs(1),
            recreate_settle: Duration::from_secs(2),
            image_retry_delay: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunFailure {
    RegistryAuth,
    PortInUse,
    ImageMissing,
    Other,
}

fn classify_failure(err: &BridgeError) -> RunFailure {
    let text = err.message_lower();
    let has = |needles: &[&str]| needles.iter().any(|n| text.contains(n));

    if has(&[
        "unauthorized",
        "denied",
        "authentication required",
        "toomanyrequests",
        "rate limit",
    ]) {
        RunFailure::RegistryAuth
    } else if has(&["port is already allocated", "address already in use"]) {
        RunFailure::PortInUse
    } else if has(&["not found", "no such image", "manifest unknown"]) {
        RunFailure::ImageMissing
    } else {
        RunFailure::Other
    }
}

/// Lifecycle of the single managed service instance.
///
/// Cloning is cheap and clones share the in-flight creation handle.
#[derive(Clone)]
pub struct ContainerManager {
    engine: Arc<dyn ContainerEngine>,
    settings: ManagerSettings,
    in_flight: Arc<Mutex<Option<SharedCreate>>>,
}

impl ContainerManager {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self::with_settings(engine, ManagerSettings::default())
    }

    pub fn with_settings(engine: Arc<dyn ContainerEngine>, settings: ManagerSettings) -> Self {
        Self {
            engine,
            settings,
            in_flight: Arc::new(Mutex::new(None)),
        }
    }

    pub fn engine(&self) -> &Arc<dyn ContainerEngine> {
        &self.engine
    }

    /// Locates the managed instance by label, falling back to its fixed name.
    pub async fn find(&self) -> Option<EngineContainer> {
        let labelled = self
            .engine
            .list_containers(&ContainerFilter::Labels(managed_labels(None)))
            .await;
        match labelled {
            Ok(containers) if !containers.is_empty() => return containers.into_iter().next(),
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "listing labelled containers failed");
                return None;
            }
        }

        match self.engine.list_containers(&ContainerFilter::All).await {
            Ok(containers) => containers.into_iter().find(|c| c.has_name(CONTAINER_NAME)),
            Err(e) => {
                warn!(error = %e, "listing containers failed");
                None
            }
        }
    }

    /// Brings the managed instance up for `config`.
    ///
    /// Overlapping calls share one underlying creation sequence and all
    /// observe its outcome.
    pub async fn create(&self, config: ServiceConfig) -> BridgeResult<()> {
        let shared = {
            let mut slot = self.in_flight.lock().await;
            match slot.as_ref() {
                Some(pending) => {
                    debug!("joining in-flight container creation");
                    pending.clone()
                }
                None => {
                    let this = self.clone();
                    let fut = async move { this.create_sequence(config).await }
                        .boxed()
                        .shared();
                    *slot = Some(fut.clone());
                    fut
                }
            }
        };

        let result = shared.clone().await;

        let mut slot = self.in_flight.lock().await;
        if slot.as_ref().is_some_and(|pending| pending.ptr_eq(&shared)) {
            *slot = None;
        }
        result
    }

    async fn create_sequence(&self, config: ServiceConfig) -> BridgeResult<()> {
        config.validate()?;
        let port = config.port()?;

        if let Some(existing) = self.find().await {
            if existing.state() == ContainerState::Running {
                info!(id = %existing.short_id(), "container already running");
                return Ok(());
            }
            match self.start(&existing.id).await {
                Ok(()) => {
                    info!(id = %existing.short_id(), "started existing container");
                    return Ok(());
                }
                Err(e) => {
                    warn!(id = %existing.short_id(), error = %e, "existing container would not start, removing it");
                    if let Err(e) = self.engine.remove_container(&existing.id, true).await {
                        warn!(id = %existing.short_id(), error = %e, "force remove failed");
                    }
                }
            }
        }

        if let Some(owner) = self.port_owner(port).await {
            if is_ours(&owner) {
                info!(id = %owner.short_id(), port, "port held by our own container, starting it");
                if owner.state() != ContainerState::Running {
                    self.engine.start_container(&owner.id).await?;
                }
                return Ok(());
            }
            error!(id = %owner.short_id(), port, "port held by a foreign container");
            return Err(BridgeError::Conflict {
                image: config.image.clone(),
                port: config.external_port.clone(),
                container_id: owner.short_id().to_string(),
            });
        }

        if config.has_rolling_tag() {
            self.pull_rolling(&config.image).await?;
        }

        let spec = RunSpec::for_service(&config)?;
        self.run(&spec).await
    }

    async fn pull_rolling(&self, image: &str) -> BridgeResult<()> {
        match self.engine.pull_image(image).await {
            Ok(()) => Ok(()),
            Err(err) if classify_failure(&err) == RunFailure::RegistryAuth => {
                Err(BridgeError::RegistryAuth {
                    image: image.to_string(),
                    message: err.to_string(),
                })
            }
            Err(err) => {
                warn!(image, error = %err, "pull failed, relying on the run to fetch the image");
                Ok(())
            }
        }
    }

    async fn run(&self, spec: &RunSpec) -> BridgeResult<()> {
        let engine = &self.engine;
        let retry = RetryExecutor::new(
            "docker run",
            BackoffSchedule::from(vec![self.settings.image_retry_delay]),
        );

        let outcome = retry
            .run_with(
                move |_| engine.run_container(spec),
                |err| classify_failure(err) == RunFailure::ImageMissing,
                None::<fn(BridgeError, usize) -> BridgeError>,
            )
            .await;

        let err = match outcome {
            Ok(id) => {
                info!(id = %&id[..id.len().min(12)], port = %spec.port_mapping(), "container running");
                return Ok(());
            }
            Err(err) => err,
        };

        match classify_failure(&err) {
            RunFailure::RegistryAuth => Err(BridgeError::RegistryAuth {
                image: spec.image.clone(),
                message: err.to_string(),
            }),
            RunFailure::PortInUse => {
                if let Some(owner) = self.port_owner(spec.host_port).await
                    && is_ours(&owner)
                {
                    info!(id = %owner.short_id(), "port race resolved in our favour");
                    return Ok(());
                }
                Err(BridgeError::engine(
                    "run",
                    format!("port {} is already in use: {err}", spec.host_port),
                ))
            }
            RunFailure::ImageMissing | RunFailure::Other => Err(BridgeError::engine(
                "run",
                format!("could not start {} on port {}: {err}", spec.image, spec.host_port),
            )),
        }
    }

    async fn port_owner(&self, port: u16) -> Option<EngineContainer> {
        match self.engine.list_containers(&ContainerFilter::All).await {
            Ok(containers) => containers.into_iter().find(|c| c.publishes_host_port(port)),
            Err(e) => {
                warn!(port, error = %e, "port ownership check failed");
                None
            }
        }
    }

    async fn state_of(&self, id: &str) -> ContainerState {
        if id.is_empty() {
            return ContainerState::NotFound;
        }
        match self.engine.list_containers(&ContainerFilter::All).await {
            Ok(containers) => containers
                .iter()
                .find(|c| {
                    c.id == id
                        || (id.len() >= SHORT_ID_LEN && c.id.starts_with(id))
                        || c.has_name(id)
                })
                .map(EngineContainer::state)
                .unwrap_or(ContainerState::NotFound),
            Err(e) => {
                warn!(id, error = %e, "state lookup failed");
                ContainerState::NotFound
            }
        }
    }

    pub async fn start(&self, id: &str) -> BridgeResult<()> {
        match self.state_of(id).await {
            ContainerState::Running | ContainerState::Restarting => {
                debug!(id, "already running");
                Ok(())
            }
            ContainerState::Paused => self.engine.unpause_container(id).await,
            _ => self.engine.start_container(id).await,
        }
    }

    /// Stops gracefully, killing the container if the graceful stop fails.
    pub async fn stop(&self, id: &str) -> BridgeResult<()> {
        let state = self.state_of(id).await;
        if state.is_stopped() {
            debug!(id, %state, "already stopped");
            return Ok(());
        }
        if state == ContainerState::Paused
            && let Err(e) = self.engine.unpause_container(id).await
        {
            warn!(id, error = %e, "unpause before stop failed");
        }

        match self.engine.stop_container(id, self.settings.stop_timeout).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(id, error = %e, "graceful stop failed, killing");
                tokio::time::sleep(self.settings.kill_grace).await;
                self.engine.kill_container(id).await
            }
        }
    }

    pub async fn restart(&self, id: &str) -> BridgeResult<()> {
        match self.state_of(id).await {
            ContainerState::Restarting => {
                debug!(id, "already restarting");
                Ok(())
            }
            ContainerState::Paused => {
                if let Err(e) = self.engine.unpause_container(id).await {
                    warn!(id, error = %e, "unpause before restart failed");
                }
                self.engine.restart_container(id).await
            }
            _ => self.engine.restart_container(id).await,
        }
    }

    pub async fn remove(&self, id: &str) -> BridgeResult<()> {
        if let Err(e) = self.stop(id).await {
            warn!(id, error = %e, "stop before remove failed");
        }
        self.engine.remove_container(id, true).await
    }

    /// Removes the current instance (if any), lets the engine release its name
    /// and port, then creates a fresh one.
    pub async fn recreate(&self, config: ServiceConfig) -> BridgeResult<()> {
        config.validate()?;
        if let Some(existing) = self.find().await {
            info!(id = %existing.short_id(), "removing container for recreate");
            self.remove(&existing.id).await?;
            tokio::time::sleep(self.settings.recreate_settle).await;
        }
        self.create(config).await
    }

    pub async fn get_status(&self) -> ContainerInspection {
        match self.find().await {
            Some(container) => {
                let external_port = container
                    .host_port_for(CONTAINER_PORT)
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| DEFAULT_PORT.to_string());
                let auto_start = container
                    .labels
                    .get(LABEL_AUTO_START)
                    .map(|v| v == "true")
                    .unwrap_or(ServiceConfig::default().auto_start);
                ContainerInspection {
                    exists: true,
                    state: container.state(),
                    config: ServiceConfig {
                        image: container.image.clone(),
                        external_port,
                        auto_start,
                    },
                    id: Some(container.id),
                }
            }
            None => ContainerInspection {
                exists: false,
                id: None,
                state: ContainerState::NotFound,
                config: ServiceConfig::default(),
            },
        }
    }
}

fn is_ours(container: &EngineContainer) -> bool {
    container.is_managed() || container.has_name(CONTAINER_NAME)
}
