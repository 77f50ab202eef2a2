use crate::domain::event_links::suggestion_id;
use crate::domain::models::{
    local_to_utc, EnergyLevel, FreeWindow, MeetingSuggestion, MeetingTypePolicy,
};
use chrono::{NaiveDate, NaiveTime};
use chrono_tz::Tz;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use thiserror::Error;

pub const DEFAULT_MIN_DURATION_MINUTES: u32 = 1;
pub const DEFAULT_MAX_DURATION_MINUTES: u32 = 480;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("malformed suggestion response: {0}")]
pub struct MalformedResponse(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationPolicy {
    pub min_duration_minutes: u32,
    pub max_duration_minutes: u32,
    pub meeting_types: MeetingTypePolicy,
    /// Also require `start + duration` to stay inside the window that contains the start.
    pub require_full_fit: bool,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        Self {
            min_duration_minutes: DEFAULT_MIN_DURATION_MINUTES,
            max_duration_minutes: DEFAULT_MAX_DURATION_MINUTES,
            meeting_types: MeetingTypePolicy::Open,
            require_full_fit: false,
        }
    }
}

/// Everything from the resolution step that the validator re-checks against.
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext<'a> {
    pub free_windows: &'a [FreeWindow],
    pub timezone: Tz,
    pub participant_a: &'a str,
    pub participant_b: &'a str,
    pub expected_count: Option<u32>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
pub enum RejectionReason {
    NotAnObject,
    MissingField,
    InvalidDate,
    InvalidTime,
    NonexistentLocalTime,
    InvalidDuration,
    InvalidMeetingType,
    InvalidEnergyLevel,
    EmptyReasoning,
    InvalidConfidence,
    OutsideFreeWindow,
    OverrunsFreeWindow,
    DuplicateSlot,
    ExceedsExpectedCount,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RejectedEntry {
    /// Position of the entry in the raw response.
    pub index: usize,
    pub raw: Value,
    pub reason: RejectionReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<&'static str>,
    pub detail: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ValidationOutcome {
    pub accepted: Vec<MeetingSuggestion>,
    pub rejected: Vec<RejectedEntry>,
}

/// A candidate as received, before any check. Lives only for one validation call.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSuggestionEntry {
    pub index: usize,
    pub value: Value,
}

struct Rejection {
    reason: RejectionReason,
    field: Option<&'static str>,
    detail: String,
}

impl Rejection {
    fn new(reason: RejectionReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            field: None,
            detail: detail.into(),
        }
    }

    fn on_field(reason: RejectionReason, field: &'static str, detail: impl Into<String>) -> Self {
        Self {
            reason,
            field: Some(field),
            detail: detail.into(),
        }
    }
}

/// Fails only when no structured block can be found. Every entry after that is either
/// accepted or rejected, in response order, and free-window membership is re-derived.
pub fn validate(
    raw_response: &str,
    context: &ValidationContext<'_>,
    policy: &ValidationPolicy,
) -> Result<ValidationOutcome, MalformedResponse> {
    let entries = extract_entries(raw_response)?;
    Ok(validate_entries(entries, context, policy))
}

pub fn validate_entries(
    entries: Vec<RawSuggestionEntry>,
    context: &ValidationContext<'_>,
    policy: &ValidationPolicy,
) -> ValidationOutcome {
    let mut outcome = ValidationOutcome::default();
    let mut seen_starts = HashSet::new();

    for entry in entries {
        let checked = check_entry(&entry.value, context, policy).and_then(|suggestion| {
            if !seen_starts.insert(suggestion.start) {
                return Err(Rejection::new(
                    RejectionReason::DuplicateSlot,
                    format!("{} {} was already suggested", suggestion.date, suggestion.time),
                ));
            }
            if let Some(expected) = context.expected_count {
                if outcome.accepted.len() >= expected as usize {
                    return Err(Rejection::new(
                        RejectionReason::ExceedsExpectedCount,
                        format!("only {expected} suggestions were requested"),
                    ));
                }
            }
            Ok(suggestion)
        });

        match checked {
            Ok(suggestion) => outcome.accepted.push(suggestion),
            Err(rejection) => outcome.rejected.push(RejectedEntry {
                index: entry.index,
                raw: entry.value,
                reason: rejection.reason,
                field: rejection.field,
                detail: rejection.detail,
            }),
        }
    }
    outcome
}

/// Locates the structured block in a response and splits it into raw entries.
pub fn extract_entries(raw_response: &str) -> Result<Vec<RawSuggestionEntry>, MalformedResponse> {
    let trimmed = raw_response.trim();
    if trimmed.is_empty() {
        return Err(MalformedResponse("response is empty".to_string()));
    }

    let candidates = [
        Some(trimmed),
        fenced_block(trimmed, Some("json")),
        fenced_block(trimmed, None),
        outer_span(trimmed, '{', '}'),
        outer_span(trimmed, '[', ']'),
    ];

    let mut last_problem = "no JSON block found".to_string();
    for candidate in candidates.into_iter().flatten() {
        let parsed = match serde_json::from_str::<Value>(candidate) {
            Ok(value) => value,
            Err(error) => {
                last_problem = format!("invalid JSON: {error}");
                continue;
            }
        };
        match entries_from_value(parsed) {
            Ok(entries) => return Ok(entries),
            Err(problem) => last_problem = problem,
        }
    }
    Err(MalformedResponse(last_problem))
}

fn entries_from_value(value: Value) -> Result<Vec<RawSuggestionEntry>, String> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut object) => match object.remove("suggestions") {
            Some(Value::Array(items)) => items,
            Some(_) => return Err("\"suggestions\" is not an array".to_string()),
            None if object.contains_key("date") => vec![Value::Object(object)],
            None => return Err("object has no \"suggestions\" array".to_string()),
        },
        _ => return Err("top-level JSON is neither an object nor an array".to_string()),
    };
    Ok(items
        .into_iter()
        .enumerate()
        .map(|(index, value)| RawSuggestionEntry { index, value })
        .collect())
}

fn fenced_block<'a>(text: &'a str, language: Option<&str>) -> Option<&'a str> {
    let open = match language {
        Some(language) => {
            let marker = format!("```{language}");
            let lowered = text.to_ascii_lowercase();
            lowered.find(&marker)? + marker.len()
        }
        None => text.find("```")? + 3,
    };
    let rest = &text[open..];
    // Skip the remainder of the opening line (a language tag, if any).
    let body_start = rest.find('\n').map_or(0, |newline| newline + 1);
    let body = &rest[body_start..];
    let close = body.find("```")?;
    Some(body[..close].trim())
}

fn outer_span(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

fn check_entry(
    value: &Value,
    context: &ValidationContext<'_>,
    policy: &ValidationPolicy,
) -> Result<MeetingSuggestion, Rejection> {
    let Value::Object(object) = value else {
        return Err(Rejection::new(
            RejectionReason::NotAnObject,
            "suggestion entry is not a JSON object",
        ));
    };

    let raw_date = required(object, "date", &["date"])?;
    let raw_time = required(object, "time", &["time", "start_time"])?;
    let raw_duration = required(object, "duration", &["duration_minutes", "duration"])?;
    let raw_meeting_type = required(object, "meeting_type", &["meeting_type", "type"])?;
    let raw_energy_a = energy_value(
        object,
        "energy_level_a",
        &["energy_level_a", "energy_a"],
        context.participant_a,
    )?;
    let raw_energy_b = energy_value(
        object,
        "energy_level_b",
        &["energy_level_b", "energy_b"],
        context.participant_b,
    )?;
    let raw_reasoning = first_present(object, &["reasoning", "reason"]).ok_or_else(|| {
        Rejection::on_field(
            RejectionReason::MissingField,
            "reasoning",
            "missing required field: reasoning",
        )
    })?;

    let date = raw_date
        .as_str()
        .and_then(|value| NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok())
        .ok_or_else(|| {
            Rejection::on_field(
                RejectionReason::InvalidDate,
                "date",
                format!("date must be YYYY-MM-DD, got {raw_date}"),
            )
        })?;

    let time = raw_time.as_str().and_then(parse_time_of_day).ok_or_else(|| {
        Rejection::on_field(
            RejectionReason::InvalidTime,
            "time",
            format!("time must be HH:MM, got {raw_time}"),
        )
    })?;

    let duration_minutes = parse_duration_minutes(raw_duration)
        .filter(|minutes| {
            *minutes >= i64::from(policy.min_duration_minutes)
                && *minutes <= i64::from(policy.max_duration_minutes)
        })
        .and_then(|minutes| u32::try_from(minutes).ok())
        .ok_or_else(|| {
            Rejection::on_field(
                RejectionReason::InvalidDuration,
                "duration",
                format!(
                    "duration must be a whole number of minutes within {}..={}, got {raw_duration}",
                    policy.min_duration_minutes, policy.max_duration_minutes
                ),
            )
        })?;

    let meeting_type = match raw_meeting_type {
        Value::String(value) => policy.meeting_types.canonicalize(value),
        _ => None,
    }
    .ok_or_else(|| {
        Rejection::on_field(
            RejectionReason::InvalidMeetingType,
            "meeting_type",
            format!("meeting_type {raw_meeting_type} is not allowed"),
        )
    })?;

    let energy_level_a = parse_energy(raw_energy_a, "energy_level_a")?;
    let energy_level_b = parse_energy(raw_energy_b, "energy_level_b")?;

    let reasoning = raw_reasoning
        .as_str()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .ok_or_else(|| {
            Rejection::on_field(
                RejectionReason::EmptyReasoning,
                "reasoning",
                "reasoning must not be empty",
            )
        })?;

    let location = object
        .get("location")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned);

    let confidence = match object.get("confidence") {
        None | Some(Value::Null) => None,
        Some(raw) => Some(
            number_like(raw)
                .filter(|value| (0.0..=1.0).contains(value))
                .ok_or_else(|| {
                    Rejection::on_field(
                        RejectionReason::InvalidConfidence,
                        "confidence",
                        format!("confidence must be within 0.0..=1.0, got {raw}"),
                    )
                })?,
        ),
    };

    let start = local_to_utc(context.timezone, date.and_time(time)).ok_or_else(|| {
        Rejection::new(
            RejectionReason::NonexistentLocalTime,
            format!("{date} {time} does not exist in {}", context.timezone.name()),
        )
    })?;

    let suggestion = MeetingSuggestion {
        suggestion_id: suggestion_id(date, time, context.participant_a, context.participant_b),
        date,
        time,
        start,
        duration_minutes,
        meeting_type,
        energy_level_a,
        energy_level_b,
        reasoning,
        location,
        confidence,
    };

    let Some(window) = context.free_windows.iter().find(|window| window.contains(start)) else {
        return Err(Rejection::new(
            RejectionReason::OutsideFreeWindow,
            format!("{date} {time} is not inside any mutually free window"),
        ));
    };
    if policy.require_full_fit && !window.covers(start, suggestion.end()) {
        return Err(Rejection::new(
            RejectionReason::OverrunsFreeWindow,
            format!("{date} {time} plus {duration_minutes} minutes runs past the free window"),
        ));
    }

    Ok(suggestion)
}

fn first_present<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| object.get(*key))
        .find(|value| !value.is_null())
}

fn required<'a>(
    object: &'a Map<String, Value>,
    field: &'static str,
    keys: &[&str],
) -> Result<&'a Value, Rejection> {
    first_present(object, keys)
        .filter(|value| value.as_str().is_none_or(|text| !text.trim().is_empty()))
        .ok_or_else(|| {
            Rejection::on_field(
                RejectionReason::MissingField,
                field,
                format!("missing required field: {field}"),
            )
        })
}

/// Energy may arrive under the canonical key, a short alias, `<name>_energy`, or
/// inside a `user_energies` map keyed by participant name.
fn energy_value<'a>(
    object: &'a Map<String, Value>,
    field: &'static str,
    keys: &[&str],
    participant: &str,
) -> Result<&'a Value, Rejection> {
    let name_key = format!(
        "{}_energy",
        participant.trim().to_lowercase().split_whitespace().collect::<Vec<_>>().join("_")
    );
    let from_map = || {
        object
            .get("user_energies")
            .and_then(Value::as_object)
            .and_then(|energies| {
                energies
                    .iter()
                    .find(|(name, _)| name.trim().eq_ignore_ascii_case(participant.trim()))
                    .map(|(_, value)| value)
            })
    };

    first_present(object, keys)
        .or_else(|| {
            object
                .iter()
                .find(|(key, _)| key.to_lowercase() == name_key)
                .map(|(_, value)| value)
        })
        .or_else(from_map)
        .ok_or_else(|| {
            Rejection::on_field(
                RejectionReason::MissingField,
                field,
                format!("missing required field: {field}"),
            )
        })
}

fn parse_energy(value: &Value, field: &'static str) -> Result<EnergyLevel, Rejection> {
    value
        .as_str()
        .and_then(|text| text.parse::<EnergyLevel>().ok())
        .ok_or_else(|| {
            Rejection::on_field(
                RejectionReason::InvalidEnergyLevel,
                field,
                format!("{field} must be low, medium or high, got {value}"),
            )
        })
}

fn number_like(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Accepts `HH:MM`, `HH:MM:SS` and 12-hour forms such as `2:30 pm` or `3PM`.
pub fn parse_time_of_day(raw: &str) -> Option<NaiveTime> {
    let normalized = raw.trim().to_ascii_uppercase();
    for format in ["%H:%M", "%H:%M:%S"] {
        if let Ok(time) = NaiveTime::parse_from_str(&normalized, format) {
            return Some(time);
        }
    }

    let compact: String = normalized.split_whitespace().collect();
    let (clock, meridiem) = if let Some(clock) = compact.strip_suffix("AM") {
        (clock, false)
    } else if let Some(clock) = compact.strip_suffix("PM") {
        (clock, true)
    } else {
        return None;
    };
    let (hour, minute) = match clock.split_once(':') {
        Some((hour, minute)) => (hour.parse::<u32>().ok()?, minute.parse::<u32>().ok()?),
        None => (clock.parse::<u32>().ok()?, 0),
    };
    if !(1..=12).contains(&hour) {
        return None;
    }
    let hour = match (hour, meridiem) {
        (12, false) => 0,
        (12, true) => 12,
        (hour, false) => hour,
        (hour, true) => hour + 12,
    };
    NaiveTime::from_hms_opt(hour, minute, 0)
}

/// Whole minutes from an integer, a numeric string, or phrases such as
/// `"90 minutes"`, `"1.5 hours"` and `"1 hour 30 minutes"`.
pub fn parse_duration_minutes(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => {
            if let Some(minutes) = number.as_i64() {
                return Some(minutes);
            }
            let minutes = number.as_f64()?;
            (minutes.fract() == 0.0 && minutes.abs() < i64::MAX as f64).then_some(minutes as i64)
        }
        Value::String(text) => parse_duration_text(text),
        _ => None,
    }
}

fn parse_duration_text(text: &str) -> Option<i64> {
    let text = text.trim().to_ascii_lowercase();
    if let Ok(minutes) = text.parse::<i64>() {
        return Some(minutes);
    }

    let mut total = 0.0f64;
    let mut seen_component = false;
    let mut chars = text.chars().peekable();
    while let Some(&character) = chars.peek() {
        if character.is_whitespace() || character == ',' {
            chars.next();
            continue;
        }
        if character.is_ascii_digit() || character == '.' {
            let mut number = String::new();
            while let Some(&digit) = chars.peek() {
                if digit.is_ascii_digit() || digit == '.' {
                    number.push(digit);
                    chars.next();
                } else {
                    break;
                }
            }
            let amount = number.parse::<f64>().ok()?;
            while chars.peek().is_some_and(|next| next.is_whitespace()) {
                chars.next();
            }
            let mut unit = String::new();
            while let Some(&letter) = chars.peek() {
                if letter.is_ascii_alphabetic() {
                    unit.push(letter);
                    chars.next();
                } else {
                    break;
                }
            }
            let factor = match unit.as_str() {
                "h" | "hr" | "hrs" | "hour" | "hours" => 60.0,
                "m" | "min" | "mins" | "minute" | "minutes" => 1.0,
                _ => return None,
            };
            total += amount * factor;
            seen_component = true;
            continue;
        }
        if character.is_ascii_alphabetic() {
            let mut word = String::new();
            while let Some(&letter) = chars.peek() {
                if letter.is_ascii_alphabetic() {
                    word.push(letter);
                    chars.next();
                } else {
                    break;
                }
            }
            if word != "and" {
                return None;
            }
            continue;
        }
        return None;
    }

    if !seen_component || (total - total.round()).abs() > 1e-6 {
        return None;
    }
    Some(total.round() as i64)
}
