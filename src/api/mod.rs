//! Public HTTP API
//!
//! - [`queries`] - `EventQueries`: event lookups by slug
//! - [`routes`] - axum router and handlers
//! - [`server`] - `ApiServer` with graceful shutdown

pub mod queries;
pub mod routes;
pub mod server;

pub use queries::{EventQueries, StoreEventQueries};
pub use routes::{create_router, ApiResponse, CreatedResponse, EventDetail};
pub use server::{ApiServer, AppState, ServerError};
