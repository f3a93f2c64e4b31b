pub mod token_cache;
pub mod types;

pub use token_cache::{FALLBACK_TTL_SECS, TokenCache};
pub use types::AuthToken;
