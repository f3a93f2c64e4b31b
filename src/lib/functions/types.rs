use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field names carrying the workspace-level activation flag, highest
/// precedence first. Dotted names address nested objects.
pub const LOCAL_ACTIVE_FIELDS: &[&str] = &[
    "is_active",
    "isActive",
    "active",
    "enabled",
    "meta.is_active",
    "meta.isActive",
    "meta.active",
    "meta.enabled",
];

/// Field names carrying the global activation flag, highest precedence first.
pub const GLOBAL_ACTIVE_FIELDS: &[&str] = &[
    "is_global",
    "isGlobal",
    "global",
    "meta.is_global",
    "meta.isGlobal",
    "meta.global",
];

pub const KIND_FIELDS: &[&str] = &["type", "kind", "meta.type"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionKind {
    Manifold,
    #[default]
    Pipe,
    Filter,
}

impl FunctionKind {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "manifold" => FunctionKind::Manifold,
            "filter" => FunctionKind::Filter,
            _ => FunctionKind::Pipe,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FunctionKind::Manifold => "manifold",
            FunctionKind::Pipe => "pipe",
            FunctionKind::Filter => "filter",
        }
    }
}

impl fmt::Display for FunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A function registered with the service, normalized at ingestion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Function {
    pub id: String,
    pub name: String,
    pub kind: FunctionKind,
    pub metadata: Value,
    pub local_active: bool,
    pub global_active: bool,
    pub raw: Value,
}

impl Function {
    /// Builds the canonical entry from an export payload item. Items without
    /// an id are skipped.
    pub fn from_raw(raw: Value) -> Option<Self> {
        let id = raw.get("id")?.as_str()?.trim().to_string();
        if id.is_empty() {
            return None;
        }
        let name = raw
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or(&id)
            .to_string();
        let kind = first_match(&raw, KIND_FIELDS, |v| v.as_str().map(FunctionKind::parse))
            .unwrap_or_default();
        let local_active = first_match(&raw, LOCAL_ACTIVE_FIELDS, as_flag).unwrap_or(false);
        let global_active = first_match(&raw, GLOBAL_ACTIVE_FIELDS, as_flag).unwrap_or(false);
        let metadata = raw.get("meta").cloned().unwrap_or(Value::Null);

        Some(Function {
            id,
            name,
            kind,
            metadata,
            local_active,
            global_active,
            raw,
        })
    }
}

/// Value at a dotted path such as `meta.is_active`.
fn lookup<'a>(raw: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(raw, |node, key| node.get(key))
}

/// First field in `fields` present on `raw` whose value `convert` accepts.
fn first_match<T>(raw: &Value, fields: &[&str], convert: impl Fn(&Value) -> Option<T>) -> Option<T> {
    fields
        .iter()
        .filter_map(|field| lookup(raw, field))
        .find_map(convert)
}

fn as_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Normalized function list with the moment it was fetched.
#[derive(Debug, Clone)]
pub struct CachedFunctionList {
    pub functions: Vec<Function>,
    pub cached_at: Instant,
}

/// Everything needed to register a function with the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionPayload {
    pub id: String,
    pub name: String,
    pub kind: FunctionKind,
    pub description: String,
    pub content: String,
}

/// Source of the bundled Docker Model Runner manifold.
pub const DOCKER_MODEL_RUNNER_SOURCE: &str = include_str!("../../../assets/docker_model_runner.py");

impl FunctionPayload {
    /// The integration function this bridge installs.
    pub fn docker_model_runner() -> Self {
        Self {
            id: "docker_model_runner".to_string(),
            name: "Docker Model Runner".to_string(),
            kind: FunctionKind::Manifold,
            description: "OpenAI-compatible access to models served by Docker Model Runner"
                .to_string(),
            content: DOCKER_MODEL_RUNNER_SOURCE.to_string(),
        }
    }

    pub fn to_request_body(&self) -> Value {
        serde_json::json!({
            "id": self.id,
            "name": self.name,
            "type": self.kind.as_str(),
            "content": self.content,
            "meta": {
                "description": self.description,
                "manifest": {},
            },
        })
    }
}

/// Result of reconciling a function's activation flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationOutcome {
    pub found: bool,
    pub desired: bool,
    pub local_active: bool,
    pub global_active: bool,
    pub toggles: usize,
}

impl ActivationOutcome {
    pub fn converged(&self) -> bool {
        self.found && self.local_active == self.desired && self.global_active == self.desired
    }
}
