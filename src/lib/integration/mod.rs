pub mod orchestrator;
pub mod poller;
pub mod state;
pub mod types;

pub use orchestrator::{BACKEND_HOST, IntegrationOrchestrator, OrchestratorSettings};
pub use poller::{SharedStatus, StatusPoller};
pub use state::valid_stage_transition;
pub use types::{ServiceStatus, SetupStage};
