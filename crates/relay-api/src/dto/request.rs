//! Request DTOs.

use serde::Deserialize;

/// Query string accepted by the event stream.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamQuery {
    /// Stream ticket from the negotiate endpoint, for clients that cannot send headers.
    pub ticket: Option<String>,
}
