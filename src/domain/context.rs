//! Operation context
//!
//! Metadata about the caller of an engine operation, used for auditing,
//! tracing, and fraud geolocation checks.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use uuid::Uuid;

/// A declared geographic position (decimal degrees).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

/// Context for an engine operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationContext {
    /// Opaque identifier of the acting party (user, admin, system job).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,

    /// Correlation ID for request tracing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<IpAddr>,

    /// Location declared by the request, if any. Absent location data makes
    /// the geolocation fraud check a no-op.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
}

impl OperationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_client_ip(mut self, ip: IpAddr) -> Self {
        self.client_ip = Some(ip);
        self
    }

    pub fn with_location(mut self, location: GeoPoint) -> Self {
        self.location = Some(location);
        self
    }

    /// Generate a correlation ID if the caller did not supply one.
    pub fn ensure_correlation_id(&mut self) -> Uuid {
        *self.correlation_id.get_or_insert_with(Uuid::new_v4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let id = Uuid::new_v4();
        let ctx = OperationContext::new()
            .with_actor("admin")
            .with_correlation_id(id)
            .with_location(GeoPoint { lat: 14.7, lon: -17.5 });

        assert_eq!(ctx.actor.as_deref(), Some("admin"));
        assert_eq!(ctx.correlation_id, Some(id));
        assert!(ctx.location.is_some());
    }

    #[test]
    fn test_ensure_correlation_id_is_stable() {
        let mut ctx = OperationContext::new();
        let first = ctx.ensure_correlation_id();
        assert_eq!(ctx.ensure_correlation_id(), first);
    }
}
