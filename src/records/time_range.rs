//! Time windows over `created_at`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Fixed window presets, plus explicit custom dates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Preset {
    #[serde(rename = "last24h")]
    Last24h,
    #[serde(rename = "last7d")]
    Last7d,
    #[default]
    #[serde(rename = "last30d")]
    Last30d,
    #[serde(rename = "last90d")]
    Last90d,
    #[serde(rename = "custom")]
    Custom,
}

impl Preset {
    /// Window length, or `None` for custom.
    pub fn span(&self) -> Option<Duration> {
        match self {
            Self::Last24h => Some(Duration::hours(24)),
            Self::Last7d => Some(Duration::days(7)),
            Self::Last30d => Some(Duration::days(30)),
            Self::Last90d => Some(Duration::days(90)),
            Self::Custom => None,
        }
    }
}

impl std::str::FromStr for Preset {
    type Err = ValidationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "last24h" => Ok(Self::Last24h),
            "last7d" => Ok(Self::Last7d),
            "last30d" => Ok(Self::Last30d),
            "last90d" => Ok(Self::Last90d),
            "custom" => Ok(Self::Custom),
            _ => Err(ValidationError::InvalidTimeRange(format!(
                "unknown preset: {s}"
            ))),
        }
    }
}

/// An inclusive `[start, end]` window and the preset that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub preset: Preset,
}

impl Default for TimeRange {
    fn default() -> Self {
        Self::preset_at(Preset::default(), Utc::now())
    }
}

impl TimeRange {
    /// `[now - span, now]` for a fixed preset. Custom yields an empty window at `now`.
    pub fn preset_at(preset: Preset, now: DateTime<Utc>) -> Self {
        let start = preset.span().map_or(now, |span| now - span);
        Self {
            start,
            end: now,
            preset,
        }
    }

    /// Explicit dates.
    pub fn custom(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, ValidationError> {
        if start > end {
            return Err(ValidationError::InvalidTimeRange(
                "start must not be after end".into(),
            ));
        }
        Ok(Self {
            start,
            end,
            preset: Preset::Custom,
        })
    }

    /// Switch presets. Fixed presets recompute from `now`; custom keeps the dates.
    pub fn select_preset(&mut self, preset: Preset, now: DateTime<Utc>) {
        if preset == Preset::Custom {
            self.preset = Preset::Custom;
        } else {
            *self = Self::preset_at(preset, now);
        }
    }

    /// Pick an explicit start date; the window becomes custom.
    pub fn set_start(&mut self, start: DateTime<Utc>) {
        self.start = start;
        self.preset = Preset::Custom;
    }

    /// Pick an explicit end date; the window becomes custom.
    pub fn set_end(&mut self, end: DateTime<Utc>) {
        self.end = end;
        self.preset = Preset::Custom;
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }

    pub fn length(&self) -> Duration {
        self.end - self.start
    }

    /// The window of equal length that ends where this one starts.
    pub fn previous(&self) -> Self {
        Self {
            start: self.start - self.length(),
            end: self.start,
            preset: Preset::Custom,
        }
    }
}

/// Window selection as sent in query strings: `preset=..` or `start=..&end=..`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WindowParams {
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
}

impl WindowParams {
    /// Resolve to a window, or `None` when nothing was supplied.
    pub fn resolve(&self, now: DateTime<Utc>) -> Result<Option<TimeRange>, ValidationError> {
        match (self.start, self.end) {
            (Some(start), Some(end)) => return TimeRange::custom(start, end).map(Some),
            (Some(_), None) | (None, Some(_)) => {
                return Err(ValidationError::InvalidTimeRange(
                    "start and end must be given together".into(),
                ));
            }
            (None, None) => {}
        }

        match self.preset.as_deref() {
            None => Ok(None),
            Some(name) => {
                let preset: Preset = name.parse()?;
                if preset == Preset::Custom {
                    return Err(ValidationError::InvalidTimeRange(
                        "custom preset needs start and end".into(),
                    ));
                }
                Ok(Some(TimeRange::preset_at(preset, now)))
            }
        }
    }

    /// Resolve, falling back to the default preset.
    pub fn resolve_or_default(&self, now: DateTime<Utc>) -> Result<TimeRange, ValidationError> {
        Ok(self
            .resolve(now)?
            .unwrap_or_else(|| TimeRange::preset_at(Preset::default(), now)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn last7d_is_seven_days_back_from_now() {
        let mut range = TimeRange::preset_at(Preset::Last30d, now());
        range.select_preset(Preset::Last7d, now());
        assert_eq!(range.start, now() - Duration::days(7));
        assert_eq!(range.end, now());
        assert_eq!(range.preset, Preset::Last7d);
    }

    #[test]
    fn custom_dates_are_preserved() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 1, 31, 23, 59, 59).unwrap();

        let mut range = TimeRange::preset_at(Preset::Last24h, now());
        range.select_preset(Preset::Custom, now());
        range.set_start(start);
        range.set_end(end);
        assert_eq!(range.preset, Preset::Custom);

        // Re-selecting custom later does not move the dates.
        range.select_preset(Preset::Custom, now() + Duration::days(3));
        assert_eq!((range.start, range.end), (start, end));

        range.select_preset(Preset::Last24h, now());
        assert_eq!(range.start, now() - Duration::hours(24));
    }

    #[test]
    fn bounds_are_inclusive() {
        let range = TimeRange::preset_at(Preset::Last24h, now());
        assert!(range.contains(range.start));
        assert!(range.contains(range.end));
        assert!(!range.contains(range.end + Duration::seconds(1)));
    }

    #[test]
    fn custom_rejects_inverted_dates() {
        assert!(TimeRange::custom(now(), now() - Duration::days(1)).is_err());
    }

    #[test]
    fn previous_window_has_equal_length() {
        let range = TimeRange::preset_at(Preset::Last7d, now());
        let prev = range.previous();
        assert_eq!(prev.end, range.start);
        assert_eq!(prev.length(), Duration::days(7));
    }

    #[test]
    fn params_resolve() {
        let params = WindowParams::default();
        assert_eq!(params.resolve(now()).unwrap(), None);
        assert_eq!(
            params.resolve_or_default(now()).unwrap().preset,
            Preset::Last30d
        );

        let params = WindowParams {
            preset: Some("last90d".into()),
            ..Default::default()
        };
        let range = params.resolve(now()).unwrap().unwrap();
        assert_eq!(range.start, now() - Duration::days(90));

        let params = WindowParams {
            preset: Some("fortnight".into()),
            ..Default::default()
        };
        assert!(params.resolve(now()).is_err());

        let params = WindowParams {
            start: Some(now()),
            ..Default::default()
        };
        assert!(params.resolve(now()).is_err());
    }

    #[test]
    fn preset_serde_names() {
        assert_eq!(serde_json::to_string(&Preset::Last7d).unwrap(), "\"last7d\"");
        assert_eq!("last24h".parse::<Preset>().unwrap(), Preset::Last24h);
    }
}
