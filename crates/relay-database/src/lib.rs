//! # relay-database
//!
//! PostgreSQL connection management and the user repository used to map
//! verified identities to tenants.

pub mod connection;
pub mod repositories;

pub use connection::DatabasePool;
pub use repositories::UserRepository;
