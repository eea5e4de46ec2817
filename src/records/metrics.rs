//! Window metrics, chart breakdowns and period-over-period comparison.

use serde::{Deserialize, Serialize};

use super::model::{Permission, Record};
use super::queue::Queue;
use crate::error::ValidationError;

/// Counters over the records created inside a window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    pub total: usize,
    pub message_sent: usize,
    pub approval: usize,
    pub objection: usize,
    pub manual_handle: usize,
    pub replied: usize,
    pub escalation: usize,
    pub cancel: usize,
    pub important: usize,
    pub bookcall: usize,
    pub waiting: usize,
}

impl Metrics {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a Record>) -> Self {
        let mut m = Self::default();
        for r in records {
            m.total += 1;
            m.message_sent += r.message_sent as usize;
            m.replied += r.replied as usize;
            m.escalation += r.escalation as usize;
            m.important += r.important as usize;
            m.bookcall += r.bookcall as usize;
            match r.permission {
                Some(Permission::Approval) => m.approval += 1,
                Some(Permission::Objection) => m.objection += 1,
                Some(Permission::ManualHandle) => m.manual_handle += 1,
                Some(Permission::Cancel) => m.cancel += 1,
                Some(Permission::Waiting) => m.waiting += 1,
                Some(Permission::Unrecognized) | None => {}
            }
        }
        m
    }

    pub fn get(&self, metric: Metric) -> usize {
        match metric {
            Metric::Total => self.total,
            Metric::MessageSent => self.message_sent,
            Metric::Approval => self.approval,
            Metric::Objection => self.objection,
            Metric::ManualHandle => self.manual_handle,
            Metric::Replied => self.replied,
            Metric::Escalation => self.escalation,
            Metric::Cancel => self.cancel,
            Metric::Important => self.important,
            Metric::Bookcall => self.bookcall,
            Metric::Waiting => self.waiting,
        }
    }

    fn slice(&self, name: &str, value: usize) -> ChartSlice {
        ChartSlice {
            name: name.to_string(),
            value,
            percentage: percent_of(value, self.total),
        }
    }

    /// Review decisions: Approval, Objection, Manual Handle.
    pub fn permission_breakdown(&self) -> Vec<ChartSlice> {
        vec![
            self.slice("Approval", self.approval),
            self.slice("Objection", self.objection),
            self.slice("Manual Handle", self.manual_handle),
        ]
    }

    /// Record status: Escalation, Cancel, Important, Bookcall.
    pub fn status_breakdown(&self) -> Vec<ChartSlice> {
        vec![
            self.slice("Escalation", self.escalation),
            self.slice("Cancel", self.cancel),
            self.slice("Important", self.important),
            self.slice("Bookcall", self.bookcall),
        ]
    }
}

/// Rounded percentage; 0 when the whole is 0.
fn percent_of(part: usize, whole: usize) -> u32 {
    if whole == 0 {
        return 0;
    }
    ((part as f64 / whole as f64) * 100.0).round() as u32
}

/// One chart segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartSlice {
    pub name: String,
    pub value: usize,
    pub percentage: u32,
}

/// A single counter from [`Metrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Total,
    MessageSent,
    Approval,
    Objection,
    ManualHandle,
    Replied,
    Escalation,
    Cancel,
    Important,
    Bookcall,
    Waiting,
}

impl std::str::FromStr for Metric {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| ValidationError::UnknownMetric(s.to_string()))
    }
}

/// A metric in the current window against the preceding window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub metric: Metric,
    pub current: usize,
    pub previous: usize,
    pub difference: i64,
    /// Change relative to `previous`, one decimal place. 0 when `previous` is 0.
    pub percentage_change: f64,
}

impl Comparison {
    pub fn between(metric: Metric, current: &Metrics, previous: &Metrics) -> Self {
        let cur = current.get(metric);
        let prev = previous.get(metric);
        let difference = cur as i64 - prev as i64;
        let percentage_change = if prev == 0 {
            0.0
        } else {
            ((difference as f64 / prev as f64) * 1000.0).round() / 10.0
        };
        Self {
            metric,
            current: cur,
            previous: prev,
            difference,
            percentage_change,
        }
    }
}

/// Size of one queue, for the overview tiles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCount {
    pub queue: Queue,
    pub title: String,
    pub count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(permission: Option<Permission>) -> Record {
        let mut r = Record::new(1, Utc::now());
        r.permission = permission;
        r
    }

    #[test]
    fn counts_permissions_and_flags() {
        let mut sent = record(Some(Permission::Approval));
        sent.message_sent = true;
        let mut escalated = record(Some(Permission::ManualHandle));
        escalated.escalation = true;
        escalated.bookcall = true;
        let records = vec![
            sent,
            escalated,
            record(Some(Permission::Waiting)),
            record(Some(Permission::Objection)),
            record(None),
        ];

        let m = Metrics::from_records(&records);
        assert_eq!(m.total, 5);
        assert_eq!(m.message_sent, 1);
        assert_eq!(m.approval, 1);
        assert_eq!(m.manual_handle, 1);
        assert_eq!(m.waiting, 1);
        assert_eq!(m.objection, 1);
        assert_eq!(m.escalation, 1);
        assert_eq!(m.bookcall, 1);
        assert_eq!(m.cancel, 0);
    }

    #[test]
    fn breakdown_percentages_round() {
        let m = Metrics {
            total: 3,
            approval: 2,
            objection: 1,
            ..Default::default()
        };
        let slices = m.permission_breakdown();
        assert_eq!(slices[0].percentage, 67);
        assert_eq!(slices[1].percentage, 33);
        assert_eq!(slices[2].percentage, 0);

        let empty = Metrics::default();
        assert!(empty.status_breakdown().iter().all(|s| s.percentage == 0));
    }

    #[test]
    fn comparison_against_previous_window() {
        let current = Metrics {
            total: 520,
            ..Default::default()
        };
        let previous = Metrics {
            total: 410,
            ..Default::default()
        };
        let c = Comparison::between(Metric::Total, &current, &previous);
        assert_eq!(c.difference, 110);
        assert_eq!(c.percentage_change, 26.8);

        let c = Comparison::between(Metric::Total, &previous, &Metrics::default());
        assert_eq!(c.percentage_change, 0.0);
    }

    #[test]
    fn metric_names_parse() {
        assert_eq!("manual_handle".parse::<Metric>().unwrap(), Metric::ManualHandle);
        assert!("velocity".parse::<Metric>().is_err());
    }
}
