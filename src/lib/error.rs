use thiserror::Error;

/// Errors surfaced by the bridge components.
///
/// Every variant carries owned text so the value is `Clone`: a single container
/// creation outcome is handed to every caller waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("Invalid configuration: {field} = {value:?} - {reason}")]
    Configuration {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error(
        "Port {port} is already in use by container {container_id}; cannot start {image}. \
         Stop that container or choose another port"
    )]
    Conflict {
        image: String,
        port: String,
        container_id: String,
    },

    #[error(
        "Registry refused access to {image}: {message}. \
         Run `docker login` for the registry or wait for the rate limit to reset"
    )]
    RegistryAuth { image: String, message: String },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timed out after {after_ms} ms: {what}")]
    Timeout { what: String, after_ms: u128 },

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Docker {command} failed: {message}")]
    EngineCommand {
        command: &'static str,
        message: String,
    },

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Settings storage error at {path}: {message}")]
    Storage { path: String, message: String },
}

impl BridgeError {
    pub fn engine(command: &'static str, message: impl Into<String>) -> Self {
        BridgeError::EngineCommand {
            command,
            message: message.into(),
        }
    }

    pub fn config(field: &'static str, value: impl Into<String>, reason: impl Into<String>) -> Self {
        BridgeError::Configuration {
            field,
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Transient failures worth another attempt after a backoff delay.
    pub fn is_retryable(&self) -> bool {
        match self {
            BridgeError::Transport(_) | BridgeError::Timeout { .. } => true,
            BridgeError::EngineCommand { .. } => true,
            BridgeError::Http { status, .. } => {
                *status == 408 || *status == 429 || *status >= 500
            }
            BridgeError::Configuration { .. }
            | BridgeError::Conflict { .. }
            | BridgeError::RegistryAuth { .. }
            | BridgeError::Auth(_)
            | BridgeError::InvalidPayload(_)
            | BridgeError::Storage { .. } => false,
        }
    }

    /// Lower-cased message text, used to classify engine failures.
    pub fn message_lower(&self) -> String {
        match self {
            BridgeError::EngineCommand { message, .. } => message.to_lowercase(),
            other => other.to_string().to_lowercase(),
        }
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;
