//! Dolo API Library
//!
//! HTTP surface of the Dolo checkout and fulfillment service: configuration,
//! shared state, JSON error responses and the axum routes.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod validation;

pub use config::Config;
pub use error::{ApiError, ApiResult, RequestId};
pub use routes::create_router;
pub use state::AppState;
