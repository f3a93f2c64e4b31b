use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::types::{CurlOptions, HttpResponse, RequestOptions};
use crate::auth::TokenCache;
use crate::container::{CONTAINER_NAME, ContainerEngine, ServiceConfig};
use crate::error::{BridgeError, BridgeResult};
use crate::retry::{BackoffPolicy, BackoffSchedule, RetryExecutor, compute};

pub const SIGNIN_PATH: &str = "/api/v1/auths/signin";
pub const HEALTH_PATH: &str = "/health";

#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Default retry schedule for requests, exec calls and health probes.
    pub schedule: BackoffSchedule,
    pub request_timeout: Duration,
    /// First and largest wait of the readiness poll.
    pub ready_initial: Duration,
    pub ready_max: Duration,
    /// Container that exec and curl probes run in.
    pub container: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            schedule: BackoffPolicy::new(Duration::from_millis(500), Duration::from_secs(4))
                .max_attempts(3)
                .schedule(),
            request_timeout: Duration::from_secs(10),
            ready_initial: Duration::from_secs(1),
            ready_max: Duration::from_secs(10),
            container: CONTAINER_NAME.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SigninResponse {
    token: Option<String>,
    /// Absolute expiry in epoch seconds.
    #[serde(alias = "expires_at")]
    exp: Option<f64>,
}

/// Authenticated client for the service's REST API, plus probes that run
/// inside the service container.
pub struct ServiceClient {
    http: reqwest::Client,
    base_url: RwLock<String>,
    tokens: Arc<TokenCache>,
    engine: Arc<dyn ContainerEngine>,
    settings: ClientSettings,
}

impl ServiceClient {
    pub fn new(
        config: &ServiceConfig,
        tokens: Arc<TokenCache>,
        engine: Arc<dyn ContainerEngine>,
    ) -> Self {
        Self::with_settings(config, tokens, engine, ClientSettings::default())
    }

    pub fn with_settings(
        config: &ServiceConfig,
        tokens: Arc<TokenCache>,
        engine: Arc<dyn ContainerEngine>,
        settings: ClientSettings,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: RwLock::new(base_url_for(config)),
            tokens,
            engine,
            settings,
        }
    }

    /// Re-derives the API base URL after a configuration change.
    pub async fn update_config(&self, config: &ServiceConfig) {
        let url = base_url_for(config);
        info!(base_url = %url, "service client reconfigured");
        *self.base_url.write().await = url;
    }

    pub async fn base_url(&self) -> String {
        self.base_url.read().await.clone()
    }

    pub fn tokens(&self) -> &TokenCache {
        &self.tokens
    }

    /// Performs an API call under the retry schedule.
    ///
    /// A 401 on an authenticated call triggers one token refresh and one
    /// replay of the request; a second 401 is an authentication error.
    pub async fn request(&self, options: RequestOptions) -> BridgeResult<HttpResponse> {
        let schedule = options
            .schedule
            .clone()
            .unwrap_or_else(|| self.settings.schedule.clone());
        let retry = RetryExecutor::new("service request", schedule);
        let options = &options;

        retry
            .run_with(
                move |_| self.attempt(options),
                BridgeError::is_retryable,
                None::<fn(BridgeError, usize) -> BridgeError>,
            )
            .await
    }

    async fn attempt(&self, options: &RequestOptions) -> BridgeResult<HttpResponse> {
        let mut token = None;
        if options.include_auth {
            token = self.tokens.get().await;
            if token.is_none() && self.ensure_auth_token().await {
                token = self.tokens.get().await;
            }
        }

        let response = self.send(options, token.as_deref()).await?;
        if response.status != 401 || !options.include_auth {
            return response.into_result();
        }

        warn!(path = %options.path, "unauthorized, refreshing token");
        self.tokens.clear().await;
        if !self.ensure_auth_token().await {
            return Err(BridgeError::Auth(format!(
                "sign-in failed after {} returned 401",
                options.path
            )));
        }

        let token = self.tokens.get().await;
        let replay = self.send(options, token.as_deref()).await?;
        if replay.status == 401 {
            return Err(BridgeError::Auth(format!(
                "{} still unauthorized after token refresh",
                options.path
            )));
        }
        replay.into_result()
    }

    async fn send(&self, options: &RequestOptions, token: Option<&str>) -> BridgeResult<HttpResponse> {
        let url = format!("{}{}", self.base_url().await, options.path);
        let timeout = options.timeout.unwrap_or(self.settings.request_timeout);

        let mut builder = self
            .http
            .request(options.method.clone(), &url)
            .timeout(timeout);
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &options.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| transport_error(&url, timeout, e))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| transport_error(&url, timeout, e))?;

        debug!(method = %options.method, url = %url, status, "service call");
        Ok(HttpResponse { status, body })
    }

    /// Makes sure a usable token is cached, signing in when none is.
    ///
    /// The service runs with authentication disabled for local access, so an
    /// empty credential pair is accepted. Never errors.
    pub async fn ensure_auth_token(&self) -> bool {
        if self.tokens.get().await.is_some() {
            return true;
        }

        let options = RequestOptions::post(SIGNIN_PATH).json(json!({ "email": "", "password": "" }));
        let response = match self.send(&options, None).await {
            Ok(response) if response.is_success() => response,
            Ok(response) => {
                debug!(status = response.status, "sign-in rejected");
                return false;
            }
            Err(e) => {
                debug!(error = %e, "sign-in failed");
                return false;
            }
        };

        let signin: SigninResponse = match response.json() {
            Ok(signin) => signin,
            Err(e) => {
                warn!(error = %e, "sign-in response unreadable");
                return false;
            }
        };
        let Some(token) = signin.token.filter(|t| !t.is_empty()) else {
            warn!("sign-in response carried no token");
            return false;
        };

        let ttl = match signin.exp.filter(|exp| exp.is_finite()) {
            Some(exp) => {
                let remaining = exp - Utc::now().timestamp() as f64;
                if remaining < 1.0 {
                    warn!(exp, "sign-in returned an already expired token");
                    return false;
                }
                // Saturating cast; out-of-range values fall back to the default TTL.
                TimeDelta::try_seconds(remaining as i64)
            }
            None => None,
        };
        self.tokens.set(token, ttl).await;
        info!("signed in to service API");
        true
    }

    /// Runs `args` inside the managed container, returning its stdout.
    pub async fn exec_in_container(&self, args: &[String], retries: Option<usize>) -> BridgeResult<String> {
        let schedule = match retries {
            Some(retries) => compute(
                Duration::from_millis(500),
                Duration::from_secs(4),
                2.0,
                Some(retries),
                None,
            ),
            None => self.settings.schedule.clone(),
        };
        let engine = &self.engine;
        let container = self.settings.container.as_str();

        RetryExecutor::new("docker exec", schedule)
            .run_with(
                move |_| async move {
                    let output = engine.exec(container, args).await?;
                    if output.exit_code != 0 {
                        return Err(BridgeError::engine(
                            "exec",
                            format!(
                                "`{}` exited with {}: {}",
                                args.join(" "),
                                output.exit_code,
                                output.stderr.trim()
                            ),
                        ));
                    }
                    Ok(output.stdout)
                },
                BridgeError::is_retryable,
                None::<fn(BridgeError, usize) -> BridgeError>,
            )
            .await
    }

    /// Issues an HTTP probe from inside the container's network namespace.
    pub async fn container_curl(&self, options: &CurlOptions) -> BridgeResult<String> {
        self.exec_in_container(&options.to_args(), options.retries).await
    }

    /// Probes the health endpoint, then the root path, from the host.
    pub async fn is_container_healthy(&self) -> bool {
        let retry = RetryExecutor::new("health probe", self.settings.schedule.clone());
        retry.run(|_| self.probe_health()).await.is_ok()
    }

    async fn probe_health(&self) -> BridgeResult<()> {
        for path in [HEALTH_PATH, "/"] {
            match self.send(&RequestOptions::get(path), None).await {
                Ok(response) if !response.body.trim().is_empty() => return Ok(()),
                Ok(response) => debug!(path, status = response.status, "empty health response"),
                Err(e) => debug!(path, error = %e, "health probe failed"),
            }
        }
        Err(BridgeError::Transport("service did not answer health probes".to_string()))
    }

    /// Polls sign-in until it succeeds or `timeout` elapses.
    pub async fn wait_until_ready(&self, timeout: Duration) -> bool {
        let schedule = compute(
            self.settings.ready_initial,
            self.settings.ready_max,
            2.0,
            None,
            Some(timeout),
        );
        let retry = RetryExecutor::new("readiness", schedule);
        let poll = retry.run(move |_| async move {
            if self.ensure_auth_token().await {
                Ok(())
            } else {
                Err("service API not accepting sign-in yet")
            }
        });

        match tokio::time::timeout(timeout, poll).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(error = e, "service never became ready");
                false
            }
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "readiness deadline elapsed");
                false
            }
        }
    }
}

fn base_url_for(config: &ServiceConfig) -> String {
    format!("http://127.0.0.1:{}", config.external_port)
}

fn transport_error(url: &str, timeout: Duration, err: reqwest::Error) -> BridgeError {
    if err.is_timeout() {
        BridgeError::Timeout {
            what: url.to_string(),
            after_ms: timeout.as_millis(),
        }
    } else {
        BridgeError::Transport(format!("{url}: {err}"))
    }
}
