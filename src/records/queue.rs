//! Review queues and which records belong in each.
//!
//! Every queue has two equivalent forms of its predicate: [`Queue::matches`]
//! for in-process filtering and [`Queue::filter_params`] for the store's REST
//! query syntax. Nullable boolean columns count as `false` in both.

use serde::{Deserialize, Serialize};

use super::model::{Permission, Record};
use crate::error::ValidationError;

/// A named view over the record table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Queue {
    /// Drafts awaiting reviewer approval.
    #[serde(rename = "sendguard")]
    SendGuard,
    /// Records routed to a human writer.
    ManualReply,
    /// Escalated records without an escalated reply.
    Escalation,
    /// Important records without an important reply.
    Important,
    /// Cancelled or removed records.
    Recovery,
}

impl Queue {
    pub const ALL: [Queue; 5] = [
        Queue::SendGuard,
        Queue::ManualReply,
        Queue::Escalation,
        Queue::Important,
        Queue::Recovery,
    ];

    /// Queues a reviewer works through; everything except recovery.
    pub const ACTIVE: [Queue; 4] = [
        Queue::SendGuard,
        Queue::ManualReply,
        Queue::Escalation,
        Queue::Important,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendGuard => "sendguard",
            Self::ManualReply => "manual-reply",
            Self::Escalation => "escalation",
            Self::Important => "important",
            Self::Recovery => "recovery",
        }
    }

    /// Human-readable title for overview tiles.
    pub fn title(&self) -> &'static str {
        match self {
            Self::SendGuard => "SendGuard",
            Self::ManualReply => "Manual Reply",
            Self::Escalation => "Escalation",
            Self::Important => "Important",
            Self::Recovery => "Data Recovery",
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Recovery)
    }

    /// Does this record belong in this queue?
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Self::SendGuard => {
                !record.removed
                    && (record.is(Permission::Waiting)
                        || (record.is(Permission::Objection) && record.objection_nai))
            }
            Self::ManualReply => {
                record.is(Permission::ManualHandle) && !record.replied && !record.removed
            }
            Self::Escalation => record.escalation && !record.escalated_replied && !record.removed,
            Self::Important => record.important && !record.important_replied && !record.removed,
            Self::Recovery => record.is(Permission::Cancel) || record.removed,
        }
    }

    /// The same predicate as REST query parameters (PostgREST syntax).
    pub fn filter_params(&self) -> Vec<(String, String)> {
        fn p(key: &str, value: &str) -> (String, String) {
            (key.to_string(), value.to_string())
        }

        match self {
            Self::SendGuard => vec![p(
                "or",
                "(and(permission.eq.Waiting,removed.not.is.true),\
                 and(permission.eq.Objection,Objection_nai.is.true,removed.not.is.true))",
            )],
            Self::ManualReply => vec![
                p("permission", "eq.Manual Handle"),
                p("replied", "not.is.true"),
                p("removed", "not.is.true"),
            ],
            Self::Escalation => vec![
                p("escalation", "is.true"),
                p("Escalated_replied", "not.is.true"),
                p("removed", "not.is.true"),
            ],
            Self::Important => vec![
                p("important", "is.true"),
                p("Important_replied", "not.is.true"),
                p("removed", "not.is.true"),
            ],
            Self::Recovery => vec![p("or", "(permission.eq.Cancel,removed.is.true)")],
        }
    }
}

/// Every queue this record currently belongs to.
pub fn queues_for(record: &Record) -> Vec<Queue> {
    Queue::ALL
        .into_iter()
        .filter(|queue| queue.matches(record))
        .collect()
}

impl std::fmt::Display for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Queue {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Queue::ALL
            .into_iter()
            .find(|q| q.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownQueue(s.to_string()))
    }
}
