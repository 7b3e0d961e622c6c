//! Outbound stream frames.

use std::sync::Arc;

use relay_core::events::PortalEvent;

/// Comment sent as soon as a stream opens.
pub const CONNECTED_COMMENT: &str = "connected";

/// Comment sent on every keepalive tick.
pub const KEEPALIVE_COMMENT: &str = "keepalive";

/// One discrete frame on an event stream.
#[derive(Debug, Clone)]
pub enum StreamFrame {
    /// A comment line the client ignores.
    Comment(String),
    /// A portal event, serialized as JSON on the wire.
    Event(Arc<PortalEvent>),
}

impl StreamFrame {
    /// The frame sent when a connection opens.
    pub fn connected() -> Self {
        Self::Comment(CONNECTED_COMMENT.to_string())
    }

    /// The frame sent on each keepalive tick.
    pub fn keepalive() -> Self {
        Self::Comment(KEEPALIVE_COMMENT.to_string())
    }

    /// Whether this frame carries an event.
    pub fn is_event(&self) -> bool {
        matches!(self, Self::Event(_))
    }
}
