//! # relay-api
//!
//! HTTP API layer for the portal relay built on Axum.
//!
//! Provides the event stream and negotiate endpoints, health checks,
//! fixed-window rate limiting, CORS, request logging, extractors, DTOs and
//! error mapping.

pub mod app;
pub mod dto;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;

pub use app::build_app;
pub use error::ApiError;
pub use state::AppState;
