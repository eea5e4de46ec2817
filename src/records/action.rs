//! Reviewer actions and the field mutations they produce.
//!
//! Planning is pure: [`plan`] turns a queue, the current record and an action
//! into a [`Mutation`] without touching the store. Validation runs first, so
//! an invalid submission never becomes a store call.

use serde::{Deserialize, Serialize};

use super::model::{Permission, Record, RecordUpdate};
use super::queue::Queue;
use crate::error::ValidationError;

/// Action names, as listed to the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Approval,
    Objection,
    Manual,
    Cancel,
    Reply,
    Remove,
    Restore,
    Delete,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Approval => "approval",
            Self::Objection => "objection",
            Self::Manual => "manual",
            Self::Cancel => "cancel",
            Self::Reply => "reply",
            Self::Remove => "remove",
            Self::Restore => "restore",
            Self::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// A reviewer action with its form input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ReviewAction {
    Approval {
        #[serde(default)]
        draft_reply: Option<String>,
    },
    Objection {
        #[serde(default)]
        feedback: String,
        #[serde(default)]
        draft_reply: Option<String>,
    },
    Manual {
        #[serde(default)]
        feedback: String,
        #[serde(default)]
        draft_reply: Option<String>,
    },
    Cancel {
        #[serde(default)]
        draft_reply: Option<String>,
    },
    /// Submit the queue-specific human reply.
    Reply {
        #[serde(default)]
        reply: String,
        #[serde(default)]
        human_name: Option<String>,
    },
    /// Move the record to recovery.
    Remove,
    /// Bring a recovery record back to sendguard intake.
    Restore,
    /// Erase the record from the store.
    Delete,
}

/// What the store should do for an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Update(RecordUpdate),
    Delete,
}

impl Queue {
    /// Actions a reviewer may take on records in this queue.
    pub fn permitted_actions(&self) -> &'static [ActionKind] {
        match self {
            Queue::SendGuard => &[
                ActionKind::Approval,
                ActionKind::Objection,
                ActionKind::Manual,
                ActionKind::Cancel,
                ActionKind::Remove,
            ],
            Queue::ManualReply | Queue::Escalation | Queue::Important => {
                &[ActionKind::Reply, ActionKind::Remove]
            }
            Queue::Recovery => &[ActionKind::Restore, ActionKind::Delete],
        }
    }

    pub fn permits(&self, kind: ActionKind) -> bool {
        self.permitted_actions().contains(&kind)
    }
}

impl ReviewAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Approval { .. } => ActionKind::Approval,
            Self::Objection { .. } => ActionKind::Objection,
            Self::Manual { .. } => ActionKind::Manual,
            Self::Cancel { .. } => ActionKind::Cancel,
            Self::Reply { .. } => ActionKind::Reply,
            Self::Remove => ActionKind::Remove,
            Self::Restore => ActionKind::Restore,
            Self::Delete => ActionKind::Delete,
        }
    }

    /// Check the action against the queue and its required inputs.
    pub fn validate(&self, queue: Queue) -> Result<(), ValidationError> {
        let kind = self.kind();
        if !queue.permits(kind) {
            return Err(ValidationError::ActionNotPermitted {
                queue: queue.to_string(),
                action: kind.to_string(),
            });
        }

        match self {
            Self::Objection { feedback, .. } | Self::Manual { feedback, .. }
                if feedback.trim().is_empty() =>
            {
                Err(ValidationError::Required {
                    field: "feedback".into(),
                    action: kind.to_string(),
                })
            }
            Self::Reply { reply, .. } if reply.trim().is_empty() => {
                Err(ValidationError::Required {
                    field: reply_column(queue).into(),
                    action: kind.to_string(),
                })
            }
            _ => Ok(()),
        }
    }
}

/// Column that holds the human reply for a reply queue.
fn reply_column(queue: Queue) -> &'static str {
    match queue {
        Queue::Escalation => "Escalated_reply",
        Queue::Important => "Important_reply",
        _ => "human_reply",
    }
}

/// Plan the mutation for `action` taken on `record` in `queue`.
pub fn plan(queue: Queue, record: &Record, action: &ReviewAction) -> Result<Mutation, ValidationError> {
    action.validate(queue)?;

    let mut update = RecordUpdate::default();
    match action {
        ReviewAction::Approval { draft_reply } => {
            update.permission = Some(Some(Permission::Approval));
            update.feedback = Some(None);
            update.draft_reply = draft_reply.clone().map(Some);
        }
        ReviewAction::Objection {
            feedback,
            draft_reply,
        } => {
            update.permission = Some(Some(Permission::Objection));
            update.feedback = Some(Some(feedback.clone()));
            update.edited = Some(Some(record.edited.map_or(1, |n| n.saturating_add(1))));
            update.draft_reply = draft_reply.clone().map(Some);
        }
        ReviewAction::Manual {
            feedback,
            draft_reply,
        } => {
            update.permission = Some(Some(Permission::ManualHandle));
            update.feedback = Some(Some(feedback.clone()));
            update.draft_reply = draft_reply.clone().map(Some);
        }
        ReviewAction::Cancel { draft_reply } => {
            update.permission = Some(Some(Permission::Cancel));
            update.draft_reply = draft_reply.clone().map(Some);
        }
        ReviewAction::Reply { reply, human_name } => {
            let name = human_name
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string);
            update.human_name = Some(name);
            match queue {
                Queue::Escalation => {
                    update.escalated_reply = Some(Some(reply.clone()));
                    update.escalated_replied = Some(true);
                }
                Queue::Important => {
                    update.important_reply = Some(Some(reply.clone()));
                    update.important_replied = Some(true);
                }
                _ => {
                    update.human_reply = Some(Some(reply.clone()));
                    update.replied = Some(true);
                }
            }
        }
        ReviewAction::Remove => {
            update.removed = Some(true);
        }
        ReviewAction::Restore => {
            update.removed = Some(false);
            update.permission = Some(Some(Permission::Waiting));
        }
        ReviewAction::Delete => return Ok(Mutation::Delete),
    }

    Ok(Mutation::Update(update))
}
