//! # lipsync-api
//!
//! HTTP surface of the lipsync server built on Axum: the multipart
//! generation endpoint, health probes, middleware (CORS, request logging,
//! body limits), response DTOs, and error-to-status mapping.

pub mod dto;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;

pub use error::ApiError;
pub use router::build_router;
pub use state::AppState;
