//! Work-item notifications
//!
//! Which scopes hear about a work-item change is domain policy, kept here
//! rather than in the router. Each audience gets its own event kind so
//! clients can tell a private update from a group or administrator feed.

use crate::scopes::{Scope, ScopeError};
use crate::server::{Event, EventError, EventRouter};
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

pub const NEW_ISSUE_ADMIN: &str = "new_issue_admin";
pub const NEW_ISSUE_GROUP: &str = "new_issue_ward";
pub const STATUS_UPDATE: &str = "issue_status_update";
pub const STATUS_UPDATE_ADMIN: &str = "issue_status_update_admin";
pub const STATUS_UPDATE_GROUP: &str = "issue_status_update_ward";
pub const NEW_ASSIGNMENT: &str = "new_assignment";

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error(transparent)]
    Scope(#[from] ScopeError),

    #[error(transparent)]
    Event(#[from] EventError),
}

/// The routing-relevant facts about a work item
#[derive(Debug, Clone)]
pub struct WorkItemRef {
    pub id: String,
    /// Subject who reported it
    pub reporter_id: String,
    /// Group it belongs to
    pub group_id: String,
}

fn payload(message: &str, item: &Value) -> Value {
    json!({ "message": message, "issue": item })
}

/// Events for a newly reported item: administrators and the item's group
pub fn created_events(work_item: &WorkItemRef, message: &str, item: &Value) -> Result<Vec<Event>, NotifyError> {
    let body = payload(message, item);
    Ok(vec![
        Event::new(NEW_ISSUE_ADMIN, body.clone(), [Scope::administrators()])?,
        Event::new(NEW_ISSUE_GROUP, body, [Scope::group(work_item.group_id.as_str())?])?,
    ])
}

/// Events for a status change: the reporter, administrators, and the group
pub fn status_events(work_item: &WorkItemRef, message: &str, item: &Value) -> Result<Vec<Event>, NotifyError> {
    let body = payload(message, item);
    Ok(vec![
        Event::new(
            STATUS_UPDATE,
            body.clone(),
            [Scope::identity(work_item.reporter_id.as_str())?],
        )?,
        Event::new(STATUS_UPDATE_ADMIN, body.clone(), [Scope::administrators()])?,
        Event::new(
            STATUS_UPDATE_GROUP,
            body,
            [Scope::group(work_item.group_id.as_str())?],
        )?,
    ])
}

/// Events for an assignment: the new handler, then a status update for the
/// reporter, administrators, and the group
pub fn assignment_events(
    work_item: &WorkItemRef,
    handler_id: &str,
    handler_message: &str,
    reporter_message: &str,
    item: &Value,
) -> Result<Vec<Event>, NotifyError> {
    let handler_body = payload(handler_message, item);
    let mut events = vec![
        Event::new(
            NEW_ASSIGNMENT,
            handler_body.clone(),
            [Scope::identity(handler_id)?],
        )?,
        Event::new(
            STATUS_UPDATE,
            payload(reporter_message, item),
            [Scope::identity(work_item.reporter_id.as_str())?],
        )?,
    ];
    events.push(Event::new(
        STATUS_UPDATE_ADMIN,
        handler_body.clone(),
        [Scope::administrators()],
    )?);
    events.push(Event::new(
        STATUS_UPDATE_GROUP,
        handler_body,
        [Scope::group(work_item.group_id.as_str())?],
    )?);
    Ok(events)
}

/// Emits work-item events through the router
#[derive(Clone)]
pub struct WorkItemNotifier {
    router: Arc<EventRouter>,
}

impl WorkItemNotifier {
    pub fn new(router: Arc<EventRouter>) -> Self {
        Self { router }
    }

    fn emit(&self, work_item: &WorkItemRef, events: Vec<Event>) -> usize {
        let delivered = events.iter().map(|e| self.router.deliver(e)).sum();
        debug!(work_item = %work_item.id, delivered, "Work item notifications sent");
        delivered
    }

    pub fn issue_created(&self, work_item: &WorkItemRef, message: &str, item: &Value) -> Result<usize, NotifyError> {
        let events = created_events(work_item, message, item)?;
        Ok(self.emit(work_item, events))
    }

    pub fn status_updated(&self, work_item: &WorkItemRef, message: &str, item: &Value) -> Result<usize, NotifyError> {
        let events = status_events(work_item, message, item)?;
        Ok(self.emit(work_item, events))
    }

    pub fn assigned(
        &self,
        work_item: &WorkItemRef,
        handler_id: &str,
        handler_message: &str,
        reporter_message: &str,
        item: &Value,
    ) -> Result<usize, NotifyError> {
        let events = assignment_events(work_item, handler_id, handler_message, reporter_message, item)?;
        Ok(self.emit(work_item, events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Identity, Role};
    use crate::server::{ClientConnection, ConnectionRegistry, OutboundMessage};
    use tokio::sync::mpsc;

    fn item() -> WorkItemRef {
        WorkItemRef {
            id: "issue-1".to_string(),
            reporter_id: "u1".to_string(),
            group_id: "g7".to_string(),
        }
    }

    fn kinds(rx: &mut mpsc::Receiver<OutboundMessage>) -> Vec<String> {
        let mut kinds = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            let value: Value = serde_json::from_str(&msg.payload).unwrap();
            kinds.push(value["kind"].as_str().unwrap().to_string());
        }
        kinds
    }

    #[test]
    fn test_created_targets_admins_and_group() {
        let events = created_events(&item(), "New pothole issue reported", &json!({"id": "issue-1"})).unwrap();
        assert_eq!(events.len(), 2);
        assert!(events[0].scopes().contains(&Scope::administrators()));
        assert!(events[1].scopes().contains(&Scope::group("g7").unwrap()));
        assert_eq!(events[1].payload()["message"], "New pothole issue reported");
    }

    #[test]
    fn test_invalid_ids_are_rejected() {
        let mut bad = item();
        bad.group_id = "g 7".to_string();
        assert!(matches!(
            created_events(&bad, "m", &json!({})),
            Err(NotifyError::Scope(_))
        ));
    }

    #[test]
    fn test_assignment_reaches_each_audience() {
        let registry = Arc::new(ConnectionRegistry::new());
        let notifier = WorkItemNotifier::new(Arc::new(EventRouter::new(registry.clone())));

        let mut receivers = Vec::new();
        for (subject, role, group) in [
            ("u1", Role::Reporter, Some("g7")),
            ("h1", Role::Handler, Some("g7")),
            ("a1", Role::Administrator, None),
            ("h2", Role::Handler, Some("g9")),
        ] {
            let (tx, rx) = mpsc::channel(16);
            let identity = Identity::new(subject, role, group.map(str::to_string)).unwrap();
            registry.join(Arc::new(ClientConnection::new(identity, tx))).unwrap();
            receivers.push(rx);
        }

        let delivered = notifier
            .assigned(&item(), "h1", "assigned to you", "now in progress", &json!({}))
            .unwrap();
        // h1 twice (private + group), u1 twice (private + group), a1 once
        assert_eq!(delivered, 5);

        assert_eq!(kinds(&mut receivers[0]), vec![STATUS_UPDATE, STATUS_UPDATE_GROUP]);
        assert_eq!(kinds(&mut receivers[1]), vec![NEW_ASSIGNMENT, STATUS_UPDATE_GROUP]);
        assert_eq!(kinds(&mut receivers[2]), vec![STATUS_UPDATE_ADMIN]);
        assert!(kinds(&mut receivers[3]).is_empty());
    }
}
