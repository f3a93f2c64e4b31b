use std::time::Duration;

use reqwest::Method;
use serde::de::DeserializeOwned;

use crate::error::{BridgeError, BridgeResult};
use crate::retry::BackoffSchedule;

/// Longest body excerpt carried in an HTTP error.
pub const BODY_EXCERPT_CHARS: usize = 200;

/// One call against the service REST API.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub path: String,
    pub body: Option<serde_json::Value>,
    pub include_auth: bool,
    /// Per-request timeout; the client default applies when unset.
    pub timeout: Option<Duration>,
    /// Retry schedule; the client default applies when unset.
    pub schedule: Option<BackoffSchedule>,
}

impl RequestOptions {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            include_auth: false,
            timeout: None,
            schedule: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn authenticated(mut self) -> Self {
        self.include_auth = true;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn schedule(mut self, schedule: BackoffSchedule) -> Self {
        self.schedule = Some(schedule);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> BridgeResult<T> {
        serde_json::from_str(&self.body)
            .map_err(|e| BridgeError::InvalidPayload(format!("{e}: {}", excerpt(&self.body))))
    }

    pub(crate) fn into_result(self) -> BridgeResult<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(BridgeError::Http {
                status: self.status,
                body: excerpt(&self.body),
            })
        }
    }
}

pub fn excerpt(body: &str) -> String {
    body.chars().take(BODY_EXCERPT_CHARS).collect()
}

/// An HTTP probe executed with `curl` inside the managed container.
#[derive(Debug, Clone)]
pub struct CurlOptions {
    pub url: String,
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub connect_timeout: Duration,
    pub max_time: Duration,
    pub follow_redirects: bool,
    pub fail_on_error: bool,
    /// Extra attempts after the first; the client schedule applies when unset.
    pub retries: Option<usize>,
}

impl CurlOptions {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::GET,
            headers: Vec::new(),
            body: None,
            connect_timeout: Duration::from_secs(5),
            max_time: Duration::from_secs(15),
            follow_redirects: true,
            fail_on_error: true,
            retries: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn timeouts(mut self, connect: Duration, max_time: Duration) -> Self {
        self.connect_timeout = connect;
        self.max_time = max_time;
        self
    }

    pub fn retries(mut self, retries: usize) -> Self {
        self.retries = Some(retries);
        self
    }

    /// The `curl` command line for these options.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec!["curl".to_string(), "-sS".to_string()];
        if self.fail_on_error {
            args.push("-f".to_string());
        }
        if self.follow_redirects {
            args.push("-L".to_string());
        }
        args.extend([
            "-X".to_string(),
            self.method.as_str().to_string(),
            "--connect-timeout".to_string(),
            secs(self.connect_timeout),
            "--max-time".to_string(),
            secs(self.max_time),
        ]);
        for (name, value) in &self.headers {
            args.push("-H".to_string());
            args.push(format!("{name}: {value}"));
        }
        if let Some(body) = &self.body {
            args.push("--data-raw".to_string());
            args.push(body.clone());
        }
        args.push(self.url.clone());
        args
    }
}

fn secs(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs.fract() == 0.0 {
        format!("{}", secs as u64)
    } else {
        format!("{secs:.1}")
    }
}
