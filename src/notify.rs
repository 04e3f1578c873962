use std::fmt;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::model::{ClassGroupId, Session, SessionId, TeacherId};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// Who should hear about a change: the teacher, or everyone in a class group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Recipient {
    Teacher(TeacherId),
    ClassGroup(ClassGroupId),
}

/// A committed schedule change, ready for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleChange {
    pub kind: ChangeKind,
    pub session_id: SessionId,
    pub recipients: Vec<Recipient>,
    pub payload: serde_json::Value,
}

impl ScheduleChange {
    /// Build a change notice. Recipients cover both the old and the new placement,
    /// so a teacher whose session was moved to a colleague still hears about it.
    pub fn new(kind: ChangeKind, session: &Session, previous: Option<&Session>) -> Self {
        let mut recipients = vec![
            Recipient::Teacher(session.teacher_id()),
            Recipient::ClassGroup(session.class_group_id()),
        ];
        if let Some(prev) = previous {
            recipients.push(Recipient::Teacher(prev.teacher_id()));
            recipients.push(Recipient::ClassGroup(prev.class_group_id()));
        }
        recipients.sort();
        recipients.dedup();

        Self {
            kind,
            session_id: session.id,
            recipients,
            payload: serde_json::json!({
                "session": session,
                "previous": previous,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyError(pub String);

impl fmt::Display for NotifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "notification failed: {}", self.0)
    }
}

impl std::error::Error for NotifyError {}

/// Delivery seam for schedule changes. Called after commit, never awaited by the mutation.
#[async_trait]
pub trait ChangeNotifier: Send + Sync {
    async fn notify(&self, change: ScheduleChange) -> Result<(), NotifyError>;
}

/// Broadcast hub delivering changes to in-process subscribers per recipient.
#[derive(Default)]
pub struct NotifyHub {
    channels: DashMap<Recipient, broadcast::Sender<ScheduleChange>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to changes for a recipient. Creates the channel if needed.
    pub fn subscribe(&self, recipient: Recipient) -> broadcast::Receiver<ScheduleChange> {
        let sender = self
            .channels
            .entry(recipient)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a change to one recipient. No-op if nobody is listening.
    pub fn send(&self, recipient: Recipient, change: &ScheduleChange) {
        if let Some(sender) = self.channels.get(&recipient) {
            let _ = sender.send(change.clone());
        }
    }

    /// Drop a recipient's channel (e.g. when the teacher or class group goes away).
    pub fn remove(&self, recipient: &Recipient) {
        self.channels.remove(recipient);
    }
}

#[async_trait]
impl ChangeNotifier for NotifyHub {
    async fn notify(&self, change: ScheduleChange) -> Result<(), NotifyError> {
        for recipient in &change.recipients {
            self.send(*recipient, &change);
        }
        Ok(())
    }
}
