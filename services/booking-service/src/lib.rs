pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod state;

pub use config::Config;
pub use errors::{Result, ServiceError};
pub use state::AppState;
