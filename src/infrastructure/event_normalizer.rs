use crate::domain::models::{local_to_utc_lenient, CalendarEvent};
use chrono::{DateTime, Days, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const UNTITLED_EVENT: &str = "No title";
const CANCELLED_STATUS: &str = "cancelled";
const NAIVE_FORMATS: [&str; 5] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RawCalendarEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<RawEventTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<RawEventTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// A timestamp as calendar sources hand it over: either a bare string or a
/// Google-style `{dateTime | date, timeZone}` object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum RawEventTime {
    Text(String),
    Structured(RawEventDateTime),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RawEventDateTime {
    #[serde(rename = "dateTime", default, skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(rename = "timeZone", default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum SkipReason {
    MissingStartTime,
    MissingEndTime,
    UnparseableTimestamp,
    EndBeforeStart,
    MalformedRecord,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SkippedRecord {
    pub index: usize,
    pub reason: SkipReason,
    pub detail: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct NormalizationReport {
    pub events: Vec<CalendarEvent>,
    pub skipped: Vec<SkippedRecord>,
}

impl NormalizationReport {
    pub fn total_records(&self) -> usize {
        self.events.len() + self.skipped.len()
    }
}

#[derive(Debug, Clone, Copy)]
enum ResolvedTime {
    Instant(DateTime<Utc>),
    Day(NaiveDate, Tz),
}

/// Decodes untyped records one by one; a record that does not even have the
/// shape of an event is skipped, never fatal.
pub fn normalize_json_events(records: &[serde_json::Value], default_tz: Tz) -> NormalizationReport {
    let outcomes = records.iter().enumerate().map(|(index, value)| {
        serde_json::from_value::<RawCalendarEvent>(value.clone())
            .map_err(|error| SkippedRecord {
                index,
                reason: SkipReason::MalformedRecord,
                detail: format!("not a calendar event record: {error}"),
            })
            .and_then(|raw| normalize_one(index, &raw, default_tz))
    });
    collect_report(outcomes)
}

pub fn normalize_events(records: &[RawCalendarEvent], default_tz: Tz) -> NormalizationReport {
    let outcomes = records
        .iter()
        .enumerate()
        .map(|(index, raw)| normalize_one(index, raw, default_tz));
    collect_report(outcomes)
}

fn collect_report<I>(outcomes: I) -> NormalizationReport
where
    I: Iterator<Item = Result<CalendarEvent, SkippedRecord>>,
{
    let mut report = NormalizationReport::default();
    for outcome in outcomes {
        match outcome {
            Ok(event) => report.events.push(event),
            Err(skipped) => {
                debug!(
                    index = skipped.index,
                    reason = ?skipped.reason,
                    detail = %skipped.detail,
                    "skipping calendar record"
                );
                report.skipped.push(skipped);
            }
        }
    }
    if !report.skipped.is_empty() {
        info!(
            total = report.total_records(),
            usable = report.events.len(),
            skipped = report.skipped.len(),
            "normalized calendar records with skips"
        );
    }
    report
}

fn normalize_one(
    index: usize,
    raw: &RawCalendarEvent,
    default_tz: Tz,
) -> Result<CalendarEvent, SkippedRecord> {
    let skip = |reason: SkipReason, detail: String| SkippedRecord { index, reason, detail };

    if raw
        .status
        .as_deref()
        .is_some_and(|status| status.trim().eq_ignore_ascii_case(CANCELLED_STATUS))
    {
        return Err(skip(SkipReason::Cancelled, "event is cancelled".to_string()));
    }

    let start = raw
        .start
        .as_ref()
        .and_then(|value| resolve_time(value, default_tz).transpose())
        .ok_or_else(|| skip(SkipReason::MissingStartTime, "start time is missing".to_string()))?
        .map_err(|detail| skip(SkipReason::UnparseableTimestamp, format!("start: {detail}")))?;
    let end = raw
        .end
        .as_ref()
        .and_then(|value| resolve_time(value, default_tz).transpose())
        .ok_or_else(|| skip(SkipReason::MissingEndTime, "end time is missing".to_string()))?
        .map_err(|detail| skip(SkipReason::UnparseableTimestamp, format!("end: {detail}")))?;

    let all_day = matches!(start, ResolvedTime::Day(..));
    let start_at = instant_of(start).ok_or_else(|| {
        skip(SkipReason::UnparseableTimestamp, "start day has no midnight".to_string())
    })?;
    let end_at = match (start, end) {
        // Same-day all-day events run until the following local midnight.
        (ResolvedTime::Day(start_date, _), ResolvedTime::Day(end_date, zone))
            if end_date == start_date =>
        {
            start_date
                .checked_add_days(Days::new(1))
                .and_then(|next| instant_of(ResolvedTime::Day(next, zone)))
        }
        _ => instant_of(end),
    }
    .ok_or_else(|| skip(SkipReason::UnparseableTimestamp, "end day has no midnight".to_string()))?;

    let event = CalendarEvent {
        title: non_blank(raw.summary.as_deref())
            .or_else(|| non_blank(raw.title.as_deref()))
            .unwrap_or_else(|| UNTITLED_EVENT.to_string()),
        start: start_at,
        end: end_at,
        location: non_blank(raw.location.as_deref()),
        description: non_blank(raw.description.as_deref()),
        all_day,
    };
    event.validate().map_err(|detail| {
        skip(SkipReason::EndBeforeStart, format!("{detail} ({end_at} < {start_at})"))
    })?;
    Ok(event)
}

/// `Ok(None)` when the value carries no timestamp at all.
fn resolve_time(value: &RawEventTime, default_tz: Tz) -> Result<Option<ResolvedTime>, String> {
    match value {
        RawEventTime::Text(text) => {
            if text.trim().is_empty() {
                return Ok(None);
            }
            parse_timestamp(text, default_tz).map(Some)
        }
        RawEventTime::Structured(structured) => {
            let zone = structured
                .time_zone
                .as_deref()
                .and_then(|name| name.trim().parse::<Tz>().ok())
                .unwrap_or(default_tz);
            if let Some(date_time) = non_blank(structured.date_time.as_deref()) {
                return parse_timestamp(&date_time, zone).map(Some);
            }
            if let Some(date) = non_blank(structured.date.as_deref()) {
                return NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                    .map(|date| Some(ResolvedTime::Day(date, zone)))
                    .map_err(|error| format!("invalid date '{date}': {error}"));
            }
            Ok(None)
        }
    }
}

fn parse_timestamp(raw: &str, zone: Tz) -> Result<ResolvedTime, String> {
    let value = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(ResolvedTime::Instant(parsed.with_timezone(&Utc)));
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return local_to_utc_lenient(zone, naive)
                .map(ResolvedTime::Instant)
                .ok_or_else(|| format!("'{value}' does not exist in {}", zone.name()));
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(ResolvedTime::Day(date, zone));
    }
    Err(format!("unrecognized timestamp '{value}'"))
}

fn instant_of(value: ResolvedTime) -> Option<DateTime<Utc>> {
    match value {
        ResolvedTime::Instant(instant) => Some(instant),
        ResolvedTime::Day(date, zone) => local_to_utc_lenient(zone, date.and_time(NaiveTime::MIN)),
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}
