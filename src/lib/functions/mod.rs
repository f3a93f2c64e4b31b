pub mod registry;
pub mod types;

pub use registry::{CREATE_PATH, DEFAULT_CACHE_TTL, EXPORT_PATH, FunctionRegistry};
pub use types::{
    ActivationOutcome, DOCKER_MODEL_RUNNER_SOURCE, Function, FunctionKind, FunctionPayload,
};
