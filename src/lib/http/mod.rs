pub mod client;
pub mod types;

pub use client::{ClientSettings, HEALTH_PATH, SIGNIN_PATH, ServiceClient};
pub use types::{CurlOptions, HttpResponse, RequestOptions};
