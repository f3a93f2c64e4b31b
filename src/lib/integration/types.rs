use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Snapshot of the integration's health. Replaced wholesale, never patched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub container_running: bool,
    pub function_installed: bool,
    pub function_enabled: bool,
    pub backend_connected: bool,
    /// Epoch milliseconds.
    pub last_checked: i64,
}

impl ServiceStatus {
    /// Everything down, stamped now.
    pub fn unavailable() -> Self {
        Self::default().stamped()
    }

    pub fn stamped(mut self) -> Self {
        self.last_checked = Utc::now().timestamp_millis();
        self
    }

    pub fn is_fully_operational(&self) -> bool {
        self.container_running
            && self.function_installed
            && self.function_enabled
            && self.backend_connected
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetupStage {
    WaitReady,
    InstallIfMissing,
    EnableIfInactive,
    TestConnectivity,
    Done,
}
