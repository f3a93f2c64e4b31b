use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use bollard::{
    Docker,
    container::{
        Config, CreateContainerOptions, KillContainerOptions, ListContainersOptions,
        LogOutput, RemoveContainerOptions, RestartContainerOptions, StartContainerOptions,
        StopContainerOptions,
    },
    exec::{CreateExecOptions, StartExecResults},
    image::CreateImageOptions,
    models::{ContainerSummary, HostConfig, PortBinding, RestartPolicyNameEnum},
};
use futures_util::stream::StreamExt;
use tracing::{debug, info, warn};

use super::types::{
    ContainerFilter, EngineContainer, ExecOutput, PublishedPort, RestartPolicy, RunSpec,
};
use crate::error::{BridgeError, BridgeResult};

const ENGINE_TIMEOUT: Duration = Duration::from_secs(30);
const PULL_TIMEOUT: Duration = Duration::from_secs(15 * 60);
const EXEC_TIMEOUT: Duration = Duration::from_secs(90);

/// The container engine operations the lifecycle manager relies on.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn list_containers(&self, filter: &ContainerFilter) -> BridgeResult<Vec<EngineContainer>>;
    async fn pull_image(&self, image: &str) -> BridgeResult<()>;
    /// Creates and starts a detached container, returning its id.
    async fn run_container(&self, spec: &RunSpec) -> BridgeResult<String>;
    async fn start_container(&self, id: &str) -> BridgeResult<()>;
    async fn stop_container(&self, id: &str, timeout: Duration) -> BridgeResult<()>;
    async fn kill_container(&self, id: &str) -> BridgeResult<()>;
    async fn unpause_container(&self, id: &str) -> BridgeResult<()>;
    async fn restart_container(&self, id: &str) -> BridgeResult<()>;
    async fn remove_container(&self, id: &str, force: bool) -> BridgeResult<()>;
    async fn exec(&self, container: &str, cmd: &[String]) -> BridgeResult<ExecOutput>;
}

/// [`ContainerEngine`] backed by the Docker Engine API.
#[derive(Debug, Clone)]
pub struct DockerEngine {
    client: Docker,
}

impl DockerEngine {
    pub fn connect() -> BridgeResult<Self> {
        let client = Docker::connect_with_local_defaults()
            .map_err(|e| engine_error("connect", e))?;
        Ok(DockerEngine { client })
    }

    pub fn with_client(client: Docker) -> Self {
        DockerEngine { client }
    }

    async fn create(&self, spec: &RunSpec) -> Result<String, bollard::errors::Error> {
        let restart_policy = bollard::models::RestartPolicy {
            name: Some(match spec.restart_policy {
                RestartPolicy::No => RestartPolicyNameEnum::NO,
                RestartPolicy::UnlessStopped => RestartPolicyNameEnum::UNLESS_STOPPED,
            }),
            maximum_retry_count: None,
        };

        let port_key = format!("{}/tcp", spec.container_port);
        let port_bindings = HashMap::from([(
            port_key.clone(),
            Some(vec![PortBinding {
                host_ip: None,
                host_port: Some(spec.host_port.to_string()),
            }]),
        )]);

        let host_config = HostConfig {
            restart_policy: Some(restart_policy),
            port_bindings: Some(port_bindings),
            binds: Some(
                spec.volumes
                    .iter()
                    .map(|(volume, path)| format!("{volume}:{path}"))
                    .collect(),
            ),
            ..Default::default()
        };

        let container_config = Config {
            image: Some(spec.image.clone()),
            env: Some(spec.env.clone()),
            labels: Some(spec.labels.iter().cloned().collect()),
            exposed_ports: Some(HashMap::from([(port_key, HashMap::new())])),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = Some(CreateContainerOptions {
            name: spec.name.clone(),
            ..Default::default()
        });

        let response = self.client.create_container(options, container_config).await?;
        Ok(response.id)
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn list_containers(&self, filter: &ContainerFilter) -> BridgeResult<Vec<EngineContainer>> {
        let mut filters = HashMap::new();
        if let ContainerFilter::Labels(labels) = filter {
            filters.insert(
                "label".to_string(),
                labels.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>(),
            );
        }
        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let summaries = timed("ps", ENGINE_TIMEOUT, self.client.list_containers(Some(options))).await?;
        Ok(summaries.into_iter().map(to_engine_container).collect())
    }

    async fn pull_image(&self, image: &str) -> BridgeResult<()> {
        info!(image, "pulling image");
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        let pull = async {
            let mut stream = self.client.create_image(Some(options), None, None);
            while let Some(msg) = stream.next().await {
                let info = msg?;
                if let Some(status) = info.status {
                    debug!(image, status = %status, "pull progress");
                }
            }
            Ok::<(), bollard::errors::Error>(())
        };
        timed("pull", PULL_TIMEOUT, pull).await?;

        info!(image, "image pulled");
        Ok(())
    }

    async fn run_container(&self, spec: &RunSpec) -> BridgeResult<String> {
        let created = tokio::time::timeout(ENGINE_TIMEOUT, self.create(spec))
            .await
            .map_err(|_| timeout_error("run", ENGINE_TIMEOUT))?;

        let id = match created {
            Ok(id) => id,
            // `docker run` pulls a missing image implicitly; the API does not.
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => {
                info!(image = %spec.image, "image missing locally, pulling before create");
                self.pull_image(&spec.image).await?;
                timed("run", ENGINE_TIMEOUT, self.create(spec)).await?
            }
            Err(e) => return Err(engine_error("run", e)),
        };
        info!(id = %id, name = %spec.name, "container created");

        let started = timed(
            "run",
            ENGINE_TIMEOUT,
            self.client
                .start_container(&id, None::<StartContainerOptions<String>>),
        )
        .await;

        if let Err(e) = started {
            warn!(id = %id, error = %e, "container failed to start, removing it");
            if let Err(remove_err) = self.remove_container(&id, true).await {
                warn!(id = %id, error = %remove_err, "cleanup after failed start failed");
            }
            return Err(e);
        }

        info!(id = %id, "container started");
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> BridgeResult<()> {
        timed(
            "start",
            ENGINE_TIMEOUT,
            self.client
                .start_container(id, None::<StartContainerOptions<String>>),
        )
        .await
    }

    async fn stop_container(&self, id: &str, timeout: Duration) -> BridgeResult<()> {
        let options = StopContainerOptions {
            t: timeout.as_secs() as i64,
        };
        timed(
            "stop",
            ENGINE_TIMEOUT + timeout,
            self.client.stop_container(id, Some(options)),
        )
        .await
    }

    async fn kill_container(&self, id: &str) -> BridgeResult<()> {
        let options = KillContainerOptions { signal: "SIGKILL" };
        timed(
            "kill",
            ENGINE_TIMEOUT,
            self.client.kill_container(id, Some(options)),
        )
        .await
    }

    async fn unpause_container(&self, id: &str) -> BridgeResult<()> {
        timed("unpause", ENGINE_TIMEOUT, self.client.unpause_container(id)).await
    }

    async fn restart_container(&self, id: &str) -> BridgeResult<()> {
        let options = RestartContainerOptions { t: 10 };
        timed(
            "restart",
            ENGINE_TIMEOUT * 2,
            self.client.restart_container(id, Some(options)),
        )
        .await
    }

    async fn remove_container(&self, id: &str, force: bool) -> BridgeResult<()> {
        let options = RemoveContainerOptions {
            force,
            ..Default::default()
        };
        timed(
            "rm",
            ENGINE_TIMEOUT,
            self.client.remove_container(id, Some(options)),
        )
        .await
    }

    async fn exec(&self, container: &str, cmd: &[String]) -> BridgeResult<ExecOutput> {
        let run = async {
            let exec = self
                .client
                .create_exec(
                    container,
                    CreateExecOptions {
                        cmd: Some(cmd.to_vec()),
                        attach_stdout: Some(true),
                        attach_stderr: Some(true),
                        ..Default::default()
                    },
                )
                .await?;

            let mut stdout = String::new();
            let mut stderr = String::new();
            if let StartExecResults::Attached { mut output, .. } =
                self.client.start_exec(&exec.id, None).await?
            {
                while let Some(chunk) = output.next().await {
                    match chunk? {
                        LogOutput::StdErr { message } => {
                            stderr.push_str(&String::from_utf8_lossy(&message))
                        }
                        other => stdout.push_str(&other.to_string()),
                    }
                }
            }

            let inspect = self.client.inspect_exec(&exec.id).await?;
            Ok::<ExecOutput, bollard::errors::Error>(ExecOutput {
                exit_code: inspect.exit_code.unwrap_or(0),
                stdout,
                stderr,
            })
        };

        timed("exec", EXEC_TIMEOUT, run).await
    }
}

fn to_engine_container(summary: ContainerSummary) -> EngineContainer {
    EngineContainer {
        id: summary.id.unwrap_or_default(),
        names: summary.names.unwrap_or_default(),
        image: summary.image.unwrap_or_default(),
        state: summary.state.unwrap_or_default(),
        ports: summary
            .ports
            .unwrap_or_default()
            .into_iter()
            .map(|port| PublishedPort {
                container_port: port.private_port,
                host_port: port.public_port,
            })
            .collect(),
        labels: summary.labels.unwrap_or_default(),
    }
}

async fn timed<T, F>(command: &'static str, limit: Duration, fut: F) -> BridgeResult<T>
where
    F: Future<Output = Result<T, bollard::errors::Error>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(|e| engine_error(command, e)),
        Err(_) => Err(timeout_error(command, limit)),
    }
}

fn timeout_error(command: &'static str, limit: Duration) -> BridgeError {
    BridgeError::Timeout {
        what: format!("docker {command}"),
        after_ms: limit.as_millis(),
    }
}

fn engine_error(command: &'static str, err: bollard::errors::Error) -> BridgeError {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } => BridgeError::engine(command, format!("{message} (status {status_code})")),
        other => BridgeError::engine(command, other.to_string()),
    }
}
