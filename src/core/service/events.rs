//! Entity change events
//!
//! Upstream systems publish create/update/delete events for resources,
//! principal policies, and role policies. Any repository can apply them:
//! create and update save the payload, delete removes by the payload's id.
//!
//! ```json
//! { "eventType": "UPDATE", "payload": { "id": "doc-1", "type": "document" } }
//! ```

use super::repository::{
    PrincipalPolicyRecord, PrincipalPolicyRepository, ResourceRepository, RolePolicyRecord,
    RolePolicyRepository,
};
use crate::core::iam::Resource;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Create,
    Update,
    Delete,
}

/// A change to one stored entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityEvent<T> {
    pub event_type: EventType,
    pub payload: T,
}

impl<T> EntityEvent<T> {
    pub fn create(payload: T) -> Self {
        EntityEvent {
            event_type: EventType::Create,
            payload,
        }
    }

    pub fn update(payload: T) -> Self {
        EntityEvent {
            event_type: EventType::Update,
            payload,
        }
    }

    pub fn delete(payload: T) -> Self {
        EntityEvent {
            event_type: EventType::Delete,
            payload,
        }
    }
}

/// Destination for entity events
pub trait EventSink<T> {
    fn apply(&self, event: EntityEvent<T>) -> Result<()>;
}

impl<R: ResourceRepository + ?Sized> EventSink<Resource> for R {
    fn apply(&self, event: EntityEvent<Resource>) -> Result<()> {
        debug!("Applying {:?} for resource {}", event.event_type, event.payload.id);
        match event.event_type {
            EventType::Create | EventType::Update => self.save(event.payload).map(|_| ()),
            EventType::Delete => self.delete_by_id(&event.payload.id),
        }
    }
}

impl<R: PrincipalPolicyRepository + ?Sized> EventSink<PrincipalPolicyRecord> for R {
    fn apply(&self, event: EntityEvent<PrincipalPolicyRecord>) -> Result<()> {
        debug!(
            "Applying {:?} for principal policy {}",
            event.event_type, event.payload.principal_id
        );
        match event.event_type {
            EventType::Create | EventType::Update => self.save(event.payload).map(|_| ()),
            EventType::Delete => self.delete_by_principal_id(&event.payload.principal_id),
        }
    }
}

impl<R: RolePolicyRepository + ?Sized> EventSink<RolePolicyRecord> for R {
    fn apply(&self, event: EntityEvent<RolePolicyRecord>) -> Result<()> {
        debug!(
            "Applying {:?} for role policy {}",
            event.event_type, event.payload.role_id
        );
        match event.event_type {
            EventType::Create | EventType::Update => self.save(event.payload).map(|_| ()),
            EventType::Delete => self.delete_by_id(&event.payload.role_id),
        }
    }
}
