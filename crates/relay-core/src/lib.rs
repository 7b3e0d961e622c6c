//! # relay-core
//!
//! Core crate for the portal relay. Contains the configuration schema,
//! the `PortalEvent` domain record, the broker and identity capability
//! traits, and the unified error system.
//!
//! This crate has **no** internal dependencies on other relay crates.

pub mod config;
pub mod error;
pub mod events;
pub mod result;
pub mod traits;

pub use error::AppError;
pub use events::PortalEvent;
pub use result::AppResult;
