//! The portal event record relayed from the broker to stream clients.
//!
//! Events are produced by other services onto the broker topic. The relay
//! parses them only far enough to read the tenant, then hands the same
//! record to every matching connection.

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;

const TENANT_FIELD: &str = "tenantId";
const LEGACY_TENANT_FIELD: &str = "businessId";

/// A change notification scoped to one tenant.
///
/// Fields the relay does not model (`eventId`, `dedupeKey`, ...) are kept in
/// [`PortalEvent::extra`]. An event parsed from a broker body serializes back
/// to exactly that body: absent fields stay absent and a legacy tenant key
/// is not renamed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalEvent {
    /// Owning tenant. The only fan-out key.
    pub tenant_id: String,
    /// What kind of record changed, e.g. `"order"`.
    #[serde(default)]
    pub entity: String,
    /// What happened to it, e.g. `"created"`.
    #[serde(default)]
    pub op: String,
    /// Identifier of the changed record.
    #[serde(default)]
    pub entity_id: Option<String>,
    /// Opaque body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Map<String, Value>>,
    /// Origin timestamp, passed through as-is.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Unmodelled fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    /// The object as received.
    #[serde(skip)]
    received: Map<String, Value>,
}

/// Shape written for events that were not parsed from a broker body.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EventBody<'a> {
    tenant_id: &'a str,
    entity: &'a str,
    op: &'a str,
    entity_id: Option<&'a String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<&'a Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    created_at: Option<&'a String>,
    #[serde(flatten)]
    extra: &'a Map<String, Value>,
}

impl Serialize for PortalEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if !self.received.is_empty() {
            return self.received.serialize(serializer);
        }
        EventBody {
            tenant_id: &self.tenant_id,
            entity: &self.entity,
            op: &self.op,
            entity_id: self.entity_id.as_ref(),
            payload: self.payload.as_ref(),
            created_at: self.created_at.as_ref(),
            extra: &self.extra,
        }
        .serialize(serializer)
    }
}

/// Why a broker message body could not become a [`PortalEvent`].
#[derive(Debug, Error)]
pub enum EventParseError {
    /// The body is not JSON.
    #[error("message body is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    /// The body is JSON but not an object.
    #[error("message body is not a JSON object")]
    NotAnObject,
    /// `tenantId` is missing, empty, or not a string.
    #[error("message has no tenant")]
    MissingTenant,
    /// A modelled field has the wrong type.
    #[error("message does not match the event shape: {0}")]
    InvalidShape(#[source] serde_json::Error),
}

impl PortalEvent {
    /// Parse a raw broker message body.
    ///
    /// Accepts a JSON object or a JSON string containing one. The tenant may
    /// arrive as `tenantId` or as the older `businessId`.
    pub fn from_broker_body(body: &[u8]) -> Result<Self, EventParseError> {
        let mut value: Value = serde_json::from_slice(body).map_err(EventParseError::InvalidJson)?;
        if let Value::String(inner) = &value {
            value = serde_json::from_str(inner).map_err(EventParseError::InvalidJson)?;
        }

        let Value::Object(mut fields) = value else {
            return Err(EventParseError::NotAnObject);
        };
        let received = fields.clone();

        if fields.get(TENANT_FIELD).is_none_or(Value::is_null) {
            if let Some(legacy) = fields.get(LEGACY_TENANT_FIELD).cloned() {
                fields.insert(TENANT_FIELD.to_string(), legacy);
            }
        }

        match fields.get(TENANT_FIELD) {
            Some(Value::String(tenant)) if !tenant.trim().is_empty() => {}
            _ => return Err(EventParseError::MissingTenant),
        }

        let mut event: Self =
            serde_json::from_value(Value::Object(fields)).map_err(EventParseError::InvalidShape)?;
        event.received = received;
        Ok(event)
    }

    /// Whether this event belongs to `tenant_id`.
    pub fn is_for_tenant(&self, tenant_id: &str) -> bool {
        self.tenant_id == tenant_id
    }
}
