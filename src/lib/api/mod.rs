pub mod server;

pub use server::{ApiError, ApiServer, AppState, SharedState};
