use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::types::{ActivationOutcome, CachedFunctionList, Function, FunctionPayload};
use crate::error::{BridgeError, BridgeResult};
use crate::http::{RequestOptions, ServiceClient};

pub const EXPORT_PATH: &str = "/api/v1/functions/export";
pub const CREATE_PATH: &str = "/api/v1/functions/create";

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Local,
    Global,
}

impl Scope {
    fn toggle_path(&self, id: &str) -> String {
        match self {
            Scope::Local => format!("/api/v1/functions/id/{id}/toggle"),
            Scope::Global => format!("/api/v1/functions/id/{id}/toggle/global"),
        }
    }
}

/// Cached view of the functions installed in the service.
pub struct FunctionRegistry {
    client: Arc<ServiceClient>,
    cache: Mutex<Option<CachedFunctionList>>,
    ttl: Duration,
}

impl FunctionRegistry {
    pub fn new(client: Arc<ServiceClient>) -> Self {
        Self::with_ttl(client, DEFAULT_CACHE_TTL)
    }

    pub fn with_ttl(client: Arc<ServiceClient>, ttl: Duration) -> Self {
        Self {
            client,
            cache: Mutex::new(None),
            ttl,
        }
    }

    pub async fn invalidate(&self) {
        *self.cache.lock().await = None;
    }

    /// Installed functions, served from cache while fresh. Any failure is
    /// logged and reported as an empty list.
    pub async fn list_functions(&self) -> Vec<Function> {
        {
            let cache = self.cache.lock().await;
            if let Some(cached) = cache.as_ref()
                && cached.cached_at.elapsed() < self.ttl
            {
                return cached.functions.clone();
            }
        }

        match self.fetch().await {
            Ok(functions) => {
                debug!(count = functions.len(), "function list refreshed");
                *self.cache.lock().await = Some(CachedFunctionList {
                    functions: functions.clone(),
                    cached_at: Instant::now(),
                });
                functions
            }
            Err(e) => {
                warn!(error = %e, "could not list functions");
                Vec::new()
            }
        }
    }

    async fn fetch(&self) -> BridgeResult<Vec<Function>> {
        let response = self
            .client
            .request(RequestOptions::get(EXPORT_PATH).authenticated())
            .await?;
        let payload: Value = response.json()?;

        let items = match payload {
            Value::Array(items) => items,
            Value::Object(mut map) => match map.remove("data").or_else(|| map.remove("functions")) {
                Some(Value::Array(items)) => items,
                _ => {
                    return Err(BridgeError::InvalidPayload(
                        "function export is not a list".to_string(),
                    ));
                }
            },
            _ => {
                return Err(BridgeError::InvalidPayload(
                    "function export is not a list".to_string(),
                ));
            }
        };

        Ok(items.into_iter().filter_map(Function::from_raw).collect())
    }

    pub async fn find(&self, id: &str) -> Option<Function> {
        self.list_functions().await.into_iter().find(|f| f.id == id)
    }

    pub async fn is_installed(&self, id: &str) -> bool {
        self.find(id).await.is_some()
    }

    /// Drives both activation flags of `id` towards `desired`.
    ///
    /// At most one local and one global toggle are issued, each followed by a
    /// fresh read. A state that still disagrees afterwards is reported in the
    /// outcome and logged, never returned as an error.
    pub async fn ensure_function_enabled(&self, id: &str, desired: bool) -> ActivationOutcome {
        let mut outcome = ActivationOutcome {
            found: false,
            desired,
            local_active: false,
            global_active: false,
            toggles: 0,
        };

        let Some(mut current) = self.find(id).await else {
            warn!(id, "cannot change activation of a function that is not installed");
            return outcome;
        };
        outcome.found = true;

        if current.local_active != desired {
            if let Some(updated) = self.toggle(id, Scope::Local).await {
                outcome.toggles += 1;
                current = updated;
            }
        }
        if current.global_active != desired {
            if let Some(updated) = self.toggle(id, Scope::Global).await {
                outcome.toggles += 1;
                current = updated;
            }
        }

        outcome.local_active = current.local_active;
        outcome.global_active = current.global_active;
        if outcome.converged() {
            info!(id, desired, toggles = outcome.toggles, "function activation reconciled");
        } else {
            warn!(
                id,
                desired,
                local = outcome.local_active,
                global = outcome.global_active,
                "function activation did not reach the desired state"
            );
        }
        outcome
    }

    /// Flips one flag, then re-reads the entry. `None` when the toggle call
    /// failed or the entry vanished.
    async fn toggle(&self, id: &str, scope: Scope) -> Option<Function> {
        let result = self
            .client
            .request(RequestOptions::post(scope.toggle_path(id)).authenticated())
            .await;
        self.invalidate().await;

        if let Err(e) = result {
            warn!(id, ?scope, error = %e, "toggle failed");
            return None;
        }
        self.find(id).await
    }

    /// Registers `payload` with the service. The cache is dropped whatever the
    /// outcome.
    pub async fn install_function(&self, payload: &FunctionPayload) -> BridgeResult<()> {
        if payload.content.trim().is_empty() {
            return Err(BridgeError::InvalidPayload(format!(
                "function {} has no content",
                payload.id
            )));
        }

        let result = self
            .client
            .request(
                RequestOptions::post(CREATE_PATH)
                    .json(payload.to_request_body())
                    .authenticated(),
            )
            .await;
        self.invalidate().await;

        let response = result?;
        match serde_json::from_str::<Value>(&response.body) {
            Ok(body) => {
                let echoed = body.get("id").and_then(Value::as_str) == Some(payload.id.as_str());
                let success = body.get("success").and_then(Value::as_bool) == Some(true);
                if echoed || success {
                    info!(id = %payload.id, "function installed");
                    Ok(())
                } else {
                    Err(BridgeError::InvalidPayload(format!(
                        "install of {} was not acknowledged",
                        payload.id
                    )))
                }
            }
            Err(_) => {
                info!(id = %payload.id, "function installed (plain acknowledgement)");
                Ok(())
            }
        }
    }

    /// True when any activation signal on the entry is set.
    pub fn is_function_active(function: &Function) -> bool {
        function.local_active || function.global_active
    }
}
