//! Admin HTTP API
//!
//! - [`handlers`] - routes for manual triggers, status, health and metrics
//! - [`server`] - shared state and the axum server

pub mod handlers;
pub mod server;

pub use handlers::{create_router, API_KEY_HEADER};
pub use server::{ApiServer, AppState};
