//! HTTP layer of the pixroll image server.
//!
//! The interesting machinery (two-tier cache, manifest index, builder)
//! lives in `pixroll-core`; this crate wires it to axum handlers, env
//! configuration, and the background rebuild/maintenance timers.

pub mod errors;
pub mod handlers;
pub mod infra;
pub mod routes;

pub use errors::{AppError, AppResult};
pub use infra::app_state::AppState;
pub use routes::create_router;
