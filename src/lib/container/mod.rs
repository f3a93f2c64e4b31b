pub mod engine;
pub mod manager;
pub mod types;

pub use engine::{ContainerEngine, DockerEngine};
pub use manager::{ContainerManager, ManagerSettings};
pub use types::{
    CONTAINER_NAME, CONTAINER_PORT, ContainerFilter, ContainerInspection, ContainerState,
    DEFAULT_IMAGE, DEFAULT_PORT, EngineContainer, ExecOutput, PublishedPort, RestartPolicy,
    RunSpec, ServiceConfig,
};
