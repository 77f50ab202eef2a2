use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_EXPECTED_COUNT: u32 = 3;

/// A calendar event after normalization. Instants are always UTC; the zone the
/// source used is only needed while decoding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CalendarEvent {
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub location: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub all_day: bool,
}

impl CalendarEvent {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.title, "event.title")?;
        if self.end < self.start {
            return Err("event.end must be >= event.start".to_string());
        }
        Ok(())
    }

    /// Zero-duration events mark a point in time and never occupy busy time.
    pub fn is_point_marker(&self) -> bool {
        self.end == self.start
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct FreeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl FreeWindow {
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Half-open containment: `start <= instant < end`.
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }

    pub fn covers(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start <= start && end <= self.end
    }
}

/// Local hours inside which a meeting may be placed, applied per calendar day.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DailyHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl DailyHours {
    pub fn parse(start: &str, end: &str) -> Result<Self, String> {
        let start = parse_hhmm(start).ok_or_else(|| "daily_hours.start must be HH:MM".to_string())?;
        let end = parse_hhmm(end).ok_or_else(|| "daily_hours.end must be HH:MM".to_string())?;
        let hours = Self { start, end };
        hours.validate()?;
        Ok(hours)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.end <= self.start {
            return Err("daily_hours.end must be after daily_hours.start".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulingRequest {
    pub participant_a_name: String,
    pub participant_b_name: String,
    pub events_a: Vec<CalendarEvent>,
    pub events_b: Vec<CalendarEvent>,
    pub range_start: DateTime<Utc>,
    pub range_end: DateTime<Utc>,
    pub min_duration: Duration,
    pub context: Option<String>,
    pub timezone: Tz,
    pub daily_hours: Option<DailyHours>,
    pub expected_count: u32,
}

impl SchedulingRequest {
    pub fn new(
        participant_a_name: impl Into<String>,
        participant_b_name: impl Into<String>,
        range_start: DateTime<Utc>,
        range_end: DateTime<Utc>,
        min_duration: Duration,
    ) -> Self {
        Self {
            participant_a_name: participant_a_name.into(),
            participant_b_name: participant_b_name.into(),
            events_a: Vec::new(),
            events_b: Vec::new(),
            range_start,
            range_end,
            min_duration,
            context: None,
            timezone: Tz::UTC,
            daily_hours: None,
            expected_count: DEFAULT_EXPECTED_COUNT,
        }
    }

    pub fn with_events(
        mut self,
        events_a: Vec<CalendarEvent>,
        events_b: Vec<CalendarEvent>,
    ) -> Self {
        self.events_a = events_a;
        self.events_b = events_b;
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn with_daily_hours(mut self, daily_hours: DailyHours) -> Self {
        self.daily_hours = Some(daily_hours);
        self
    }

    pub fn with_expected_count(mut self, expected_count: u32) -> Self {
        self.expected_count = expected_count;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.participant_a_name, "participant_a_name")?;
        validate_non_empty(&self.participant_b_name, "participant_b_name")?;
        if self.range_end <= self.range_start {
            return Err("range_end must be after range_start".to_string());
        }
        if self.min_duration < Duration::zero() {
            return Err("min_duration must not be negative".to_string());
        }
        if self.min_duration >= self.range_end - self.range_start {
            return Err(format!(
                "min_duration ({} minutes) must be shorter than the range ({} minutes)",
                self.min_duration.num_minutes(),
                (self.range_end - self.range_start).num_minutes()
            ));
        }
        if self.expected_count == 0 {
            return Err("expected_count must be > 0".to_string());
        }
        if let Some(daily_hours) = &self.daily_hours {
            daily_hours.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EnergyLevel {
    Low,
    Medium,
    High,
}

impl EnergyLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl FromStr for EnergyLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" | "med" | "moderate" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!("invalid energy level: {other}")),
        }
    }
}

impl fmt::Display for EnergyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether `meeting_type` is checked against a fixed vocabulary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case", tag = "kind", content = "values")]
pub enum MeetingTypePolicy {
    #[default]
    Open,
    Closed(Vec<String>),
}

impl MeetingTypePolicy {
    pub fn closed_default() -> Self {
        Self::Closed(
            DEFAULT_MEETING_TYPES
                .iter()
                .map(|value| (*value).to_string())
                .collect(),
        )
    }

    /// Returns the canonical spelling, or `None` when the value is not allowed.
    pub fn canonicalize(&self, value: &str) -> Option<String> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }
        match self {
            Self::Open => Some(value.to_string()),
            Self::Closed(allowed) => allowed
                .iter()
                .find(|candidate| candidate.trim().eq_ignore_ascii_case(value))
                .map(|candidate| candidate.trim().to_string()),
        }
    }

    pub fn allowed_values(&self) -> Option<&[String]> {
        match self {
            Self::Open => None,
            Self::Closed(values) => Some(values),
        }
    }
}

pub const DEFAULT_MEETING_TYPES: [&str; 4] =
    ["Coffee", "Casual lunch", "Evening drinks", "Activity"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeetingSuggestion {
    pub suggestion_id: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub start: DateTime<Utc>,
    pub duration_minutes: u32,
    pub meeting_type: String,
    pub energy_level_a: EnergyLevel,
    pub energy_level_b: EnergyLevel,
    pub reasoning: String,
    pub location: Option<String>,
    pub confidence: Option<f64>,
}

impl MeetingSuggestion {
    pub fn end(&self) -> DateTime<Utc> {
        self.start + Duration::minutes(i64::from(self.duration_minutes))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "mode", content = "seed")]
pub enum SuggestionMode {
    /// Fixed seed, minimum temperature. `None` derives the seed from the prompt fingerprint.
    Deterministic(Option<u32>),
    /// Caller or random seed, higher temperature.
    Exploratory(Option<u32>),
}

impl SuggestionMode {
    pub fn deterministic() -> Self {
        Self::Deterministic(None)
    }

    pub fn exploratory() -> Self {
        Self::Exploratory(None)
    }

    pub fn is_deterministic(&self) -> bool {
        matches!(self, Self::Deterministic(_))
    }

    pub fn requested_seed(&self) -> Option<u32> {
        match self {
            Self::Deterministic(seed) | Self::Exploratory(seed) => *seed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deterministic(_) => "deterministic",
            Self::Exploratory(_) => "exploratory",
        }
    }
}

pub(crate) fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

pub(crate) fn parse_hhmm(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").ok()
}

/// Resolves a wall-clock time in `timezone`. Ambiguous times (DST fold) take the
/// earlier instant; times inside a DST gap do not exist and yield `None`.
pub(crate) fn local_to_utc(timezone: Tz, local: NaiveDateTime) -> Option<DateTime<Utc>> {
    timezone
        .from_local_datetime(&local)
        .earliest()
        .map(|value| value.with_timezone(&Utc))
}

/// Like [`local_to_utc`] but moves times inside a DST gap forward past the gap.
pub(crate) fn local_to_utc_lenient(timezone: Tz, local: NaiveDateTime) -> Option<DateTime<Utc>> {
    local_to_utc(timezone, local).or_else(|| local_to_utc(timezone, local + Duration::hours(1)))
}

pub(crate) fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}
