use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::orchestrator::IntegrationOrchestrator;
use super::types::ServiceStatus;

pub type SharedStatus = Arc<RwLock<ServiceStatus>>;

/// Periodically refreshes the shared status snapshot.
pub struct StatusPoller {
    orchestrator: Arc<IntegrationOrchestrator>,
    status: SharedStatus,
    interval: Duration,
}

impl StatusPoller {
    pub fn new(
        orchestrator: Arc<IntegrationOrchestrator>,
        status: SharedStatus,
        interval: Duration,
    ) -> Self {
        Self {
            orchestrator,
            status,
            interval,
        }
    }

    /// One check, published to the shared snapshot.
    pub async fn poll_once(&self) -> ServiceStatus {
        let status = self.orchestrator.get_service_status().await;
        *self.status.write().await = status;
        debug!(?status, "status refreshed");
        status
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(self) {
        info!(interval_secs = self.interval.as_secs(), "status poller started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.poll_once().await;
        }
    }
}
