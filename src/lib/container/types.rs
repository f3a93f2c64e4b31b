use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, BridgeResult};

pub const DEFAULT_IMAGE: &str = "ghcr.io/open-webui/open-webui:main";
pub const DEFAULT_PORT: &str = "8090";
pub const CONTAINER_NAME: &str = "open-webui";
pub const CONTAINER_PORT: u16 = 8080;

pub const LABEL_MANAGED: &str = "com.webui-bridge.managed";
pub const LABEL_SERVICE: &str = "com.webui-bridge.service";
pub const LABEL_AUTO_START: &str = "com.webui-bridge.auto-start";

/// Tags that move upstream and are pulled explicitly before every create.
pub const ROLLING_TAGS: [&str; 2] = ["main", "latest"];

/// Desired shape of the managed service instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    pub image: String,
    #[serde(rename = "port", alias = "externalPort")]
    pub external_port: String,
    pub auto_start: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            external_port: DEFAULT_PORT.to_string(),
            auto_start: true,
        }
    }
}

impl ServiceConfig {
    pub fn validate(&self) -> BridgeResult<()> {
        parse_port(&self.external_port)?;
        if image_tag(&self.image).is_none() {
            return Err(BridgeError::config(
                "image",
                &self.image,
                "image reference must carry an explicit tag, e.g. `:main`",
            ));
        }
        Ok(())
    }

    pub fn port(&self) -> BridgeResult<u16> {
        parse_port(&self.external_port)
    }

    pub fn has_rolling_tag(&self) -> bool {
        image_tag(&self.image).is_some_and(|tag| ROLLING_TAGS.contains(&tag))
    }
}

/// Parses a host port given as a string of digits in `1..=65535`.
pub fn parse_port(value: &str) -> BridgeResult<u16> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(BridgeError::config("port", value, "port must be digits only"));
    }
    match value.parse::<u32>() {
        Ok(port) if (1..=65535).contains(&port) => Ok(port as u16),
        _ => Err(BridgeError::config(
            "port",
            value,
            "port must be between 1 and 65535",
        )),
    }
}

/// Tag of an image reference, ignoring any registry `host:port` prefix.
/// Digest references count as tagged.
pub fn image_tag(image: &str) -> Option<&str> {
    if let Some((_, digest)) = image.split_once('@') {
        return (!digest.is_empty()).then_some(digest);
    }
    let last_segment = image.rsplit('/').next().unwrap_or(image);
    match last_segment.rsplit_once(':') {
        Some((name, tag)) if !name.is_empty() && !tag.is_empty() => Some(tag),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    Running,
    Exited,
    Stopped,
    NotFound,
    Created,
    Paused,
    Restarting,
}

impl ContainerState {
    /// Maps an engine state string; anything unrecognized reads as stopped.
    pub fn from_engine(state: &str) -> Self {
        match state.trim().to_ascii_lowercase().as_str() {
            "running" => ContainerState::Running,
            "exited" => ContainerState::Exited,
            "created" => ContainerState::Created,
            "paused" => ContainerState::Paused,
            "restarting" => ContainerState::Restarting,
            _ => ContainerState::Stopped,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerState::Running => "running",
            ContainerState::Exited => "exited",
            ContainerState::Stopped => "stopped",
            ContainerState::NotFound => "not_found",
            ContainerState::Created => "created",
            ContainerState::Paused => "paused",
            ContainerState::Restarting => "restarting",
        }
    }

    pub fn is_stopped(&self) -> bool {
        matches!(
            self,
            ContainerState::Exited
                | ContainerState::Stopped
                | ContainerState::Created
                | ContainerState::NotFound
        )
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the managed instance as the engine reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerInspection {
    pub exists: bool,
    pub id: Option<String>,
    pub state: ContainerState,
    pub config: ServiceConfig,
}

/// A published port entry of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishedPort {
    pub container_port: u16,
    pub host_port: Option<u16>,
}

/// Engine-neutral container summary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineContainer {
    pub id: String,
    pub names: Vec<String>,
    pub image: String,
    pub state: String,
    pub ports: Vec<PublishedPort>,
    pub labels: HashMap<String, String>,
}

impl EngineContainer {
    pub fn short_id(&self) -> &str {
        &self.id[..self.id.len().min(12)]
    }

    pub fn state(&self) -> ContainerState {
        ContainerState::from_engine(&self.state)
    }

    pub fn has_name(&self, name: &str) -> bool {
        self.names.iter().any(|n| n.trim_start_matches('/') == name)
    }

    pub fn is_managed(&self) -> bool {
        self.labels.get(LABEL_MANAGED).map(String::as_str) == Some("true")
            && self.labels.get(LABEL_SERVICE).map(String::as_str) == Some(CONTAINER_NAME)
    }

    pub fn publishes_host_port(&self, port: u16) -> bool {
        self.ports.iter().any(|p| p.host_port == Some(port))
    }

    /// Host port bound to `container_port`, if published.
    pub fn host_port_for(&self, container_port: u16) -> Option<u16> {
        self.ports
            .iter()
            .find(|p| p.container_port == container_port && p.host_port.is_some())
            .and_then(|p| p.host_port)
    }
}

/// Which containers a listing should return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerFilter {
    All,
    Labels(Vec<(String, String)>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    No,
    UnlessStopped,
}

impl RestartPolicy {
    pub fn for_auto_start(auto_start: bool) -> Self {
        if auto_start {
            RestartPolicy::UnlessStopped
        } else {
            RestartPolicy::No
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RestartPolicy::No => "no",
            RestartPolicy::UnlessStopped => "unless-stopped",
        }
    }
}

/// Full argument set for starting the managed instance, the equivalent of a
/// detached `docker run`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpec {
    pub name: String,
    pub image: String,
    pub labels: Vec<(String, String)>,
    pub host_port: u16,
    pub container_port: u16,
    pub env: Vec<String>,
    /// `(volume name, mount path)` pairs.
    pub volumes: Vec<(String, String)>,
    pub restart_policy: RestartPolicy,
}

impl RunSpec {
    pub fn for_service(config: &ServiceConfig) -> BridgeResult<Self> {
        Ok(RunSpec {
            name: CONTAINER_NAME.to_string(),
            image: config.image.clone(),
            labels: managed_labels(Some(config.auto_start)),
            host_port: config.port()?,
            container_port: CONTAINER_PORT,
            env: vec![
                "WEBUI_AUTH=False".to_string(),
                "ENABLE_OLLAMA_API=False".to_string(),
                "ANONYMIZED_TELEMETRY=False".to_string(),
            ],
            volumes: vec![
                ("open-webui-data".to_string(), "/app/backend/data".to_string()),
                ("open-webui-cache".to_string(), "/root/.cache".to_string()),
                (
                    "open-webui-vectors".to_string(),
                    "/app/backend/data/vector_db".to_string(),
                ),
            ],
            restart_policy: RestartPolicy::for_auto_start(config.auto_start),
        })
    }

    /// `host:container` notation, as `docker run -p` takes it.
    pub fn port_mapping(&self) -> String {
        format!("{}:{}", self.host_port, self.container_port)
    }
}

/// Label set identifying the managed instance; `auto_start` adds the
/// desired-restart marker used when creating it.
pub fn managed_labels(auto_start: Option<bool>) -> Vec<(String, String)> {
    let mut labels = vec![
        (LABEL_MANAGED.to_string(), "true".to_string()),
        (LABEL_SERVICE.to_string(), CONTAINER_NAME.to_string()),
    ];
    if let Some(auto_start) = auto_start {
        labels.push((LABEL_AUTO_START.to_string(), auto_start.to_string()));
    }
    labels
}

/// Captured result of a command run inside the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}
