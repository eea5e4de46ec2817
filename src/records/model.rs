//! Record data model: the row type and partial updates to it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Primary workflow status of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    /// Drafted reply waiting for review.
    Waiting,
    /// Reviewer approved the draft.
    Approval,
    /// Reviewer objected; the draft goes back for rework.
    Objection,
    /// A human must write the reply.
    #[serde(rename = "Manual Handle")]
    ManualHandle,
    /// Reviewer cancelled the reply.
    Cancel,
    /// A value this version does not know about.
    #[serde(other)]
    Unrecognized,
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Waiting => write!(f, "Waiting"),
            Self::Approval => write!(f, "Approval"),
            Self::Objection => write!(f, "Objection"),
            Self::ManualHandle => write!(f, "Manual Handle"),
            Self::Cancel => write!(f, "Cancel"),
            Self::Unrecognized => write!(f, "Unrecognized"),
        }
    }
}

/// One row of the hosted table.
///
/// Column names follow the table, including its mixed-case columns.
/// Boolean columns are nullable in the store; null reads as `false`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Record {
    pub id: i64,
    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub email_subject: Option<String>,
    #[serde(default, rename = "Customer_Email")]
    pub customer_email: Option<String>,
    #[serde(default, rename = "Previous_Emails_Summary")]
    pub previous_emails_summary: Option<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub thought_process: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub hubspot_crm_id: Option<String>,
    #[serde(default, rename = "CRM_notes")]
    pub crm_notes: Option<String>,
    #[serde(default, rename = "Availabilities")]
    pub availabilities: Option<String>,
    #[serde(default)]
    pub from_knowledgebase: Option<String>,
    #[serde(default)]
    pub image_analysis: Option<String>,

    #[serde(default)]
    pub permission: Option<Permission>,
    #[serde(default)]
    pub feedback: Option<String>,
    #[serde(default)]
    pub draft_reply: Option<String>,
    #[serde(default)]
    pub human_reply: Option<String>,
    #[serde(default, rename = "Escalated_reply")]
    pub escalated_reply: Option<String>,
    #[serde(default, rename = "Important_reply")]
    pub important_reply: Option<String>,
    #[serde(default)]
    pub human_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_count")]
    pub edited: Option<i64>,
    #[serde(default)]
    pub image_url: Option<String>,

    #[serde(default, deserialize_with = "null_as_false")]
    pub replied: bool,
    #[serde(default, deserialize_with = "null_as_false")]
    pub message_sent: bool,
    #[serde(default, deserialize_with = "null_as_false")]
    pub removed: bool,
    #[serde(default, deserialize_with = "null_as_false")]
    pub escalation: bool,
    #[serde(default, deserialize_with = "null_as_false")]
    pub important: bool,
    #[serde(default, rename = "Escalated_replied", deserialize_with = "null_as_false")]
    pub escalated_replied: bool,
    #[serde(default, rename = "Important_replied", deserialize_with = "null_as_false")]
    pub important_replied: bool,
    #[serde(default, deserialize_with = "null_as_false")]
    pub bookcall: bool,
    #[serde(default, rename = "Objection_nai", deserialize_with = "null_as_false")]
    pub objection_nai: bool,
    #[serde(default, deserialize_with = "null_as_false")]
    pub image: bool,
}

impl Record {
    /// A bare record with the given identity, all other fields unset.
    pub fn new(id: i64, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            created_at,
            ..Default::default()
        }
    }

    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permission = Some(permission);
        self
    }

    pub fn is(&self, permission: Permission) -> bool {
        self.permission == Some(permission)
    }

    /// Attachment URLs decoded from `image_url`.
    ///
    /// Empty unless `image` is set. Malformed text decodes to nothing.
    pub fn image_urls(&self) -> Vec<String> {
        if !self.image {
            return Vec::new();
        }
        self.image_url
            .as_deref()
            .and_then(|raw| serde_json::from_str::<Vec<String>>(raw).ok())
            .unwrap_or_default()
    }

    /// Apply a partial update in place. The store does the same server-side.
    pub fn apply(&mut self, update: &RecordUpdate) {
        fn set<T: Clone>(field: &mut Option<T>, value: &Option<Option<T>>) {
            if let Some(v) = value {
                *field = v.clone();
            }
        }
        fn set_flag(field: &mut bool, value: Option<bool>) {
            if let Some(v) = value {
                *field = v;
            }
        }

        set(&mut self.permission, &update.permission);
        set(&mut self.feedback, &update.feedback);
        set(&mut self.draft_reply, &update.draft_reply);
        set(&mut self.edited, &update.edited);
        set(&mut self.human_reply, &update.human_reply);
        set(&mut self.escalated_reply, &update.escalated_reply);
        set(&mut self.important_reply, &update.important_reply);
        set(&mut self.human_name, &update.human_name);
        set_flag(&mut self.replied, update.replied);
        set_flag(&mut self.escalated_replied, update.escalated_replied);
        set_flag(&mut self.important_replied, update.important_replied);
        set_flag(&mut self.removed, update.removed);
    }
}

/// A partial update keyed by record id.
///
/// Outer `None` leaves a column untouched and is not serialized;
/// `Some(None)` clears the column to null.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission: Option<Option<Permission>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft_reply: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited: Option<Option<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human_reply: Option<Option<String>>,
    #[serde(
        default,
        rename = "Escalated_reply",
        skip_serializing_if = "Option::is_none"
    )]
    pub escalated_reply: Option<Option<String>>,
    #[serde(
        default,
        rename = "Important_reply",
        skip_serializing_if = "Option::is_none"
    )]
    pub important_reply: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human_name: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replied: Option<bool>,
    #[serde(
        default,
        rename = "Escalated_replied",
        skip_serializing_if = "Option::is_none"
    )]
    pub escalated_replied: Option<bool>,
    #[serde(
        default,
        rename = "Important_replied",
        skip_serializing_if = "Option::is_none"
    )]
    pub important_replied: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed: Option<bool>,
}

impl RecordUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn null_as_false<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}

/// `edited` is a numeric column; the store may send it as a number or a string.
fn lenient_count<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Float(f64),
        Text(String),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        None => None,
        Some(Raw::Int(n)) => Some(n),
        Some(Raw::Float(f)) => Some(f.trunc() as i64),
        Some(Raw::Text(s)) => s.trim().parse::<f64>().ok().map(|f| f.trunc() as i64),
    })
}
