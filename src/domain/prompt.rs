use crate::domain::models::{
    weekday_name, CalendarEvent, FreeWindow, MeetingTypePolicy, SchedulingRequest,
};
use chrono::{DateTime, Datelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;

/// Bumped whenever the rendered layout changes, so fingerprints never collide across layouts.
const PROMPT_TEMPLATE_VERSION: &str = "meetsched-prompt-v1";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PromptFingerprint(String);

impl PromptFingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Seed used by deterministic mode when the caller does not supply one.
    /// Masked to the non-negative `i32` range accepted by the suggestion service.
    pub fn derived_seed(&self) -> u32 {
        let bytes = hex::decode(&self.0).unwrap_or_default();
        let mut prefix = [0u8; 4];
        for (slot, byte) in prefix.iter_mut().zip(bytes.iter()) {
            *slot = *byte;
        }
        u32::from_be_bytes(prefix) & 0x7fff_ffff
    }
}

impl std::fmt::Display for PromptFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltPrompt {
    pub text: String,
    pub fingerprint: PromptFingerprint,
}

#[derive(Serialize)]
struct CanonicalEvent<'a> {
    title: &'a str,
    start: String,
    end: String,
    location: Option<&'a str>,
    description: Option<&'a str>,
    all_day: bool,
}

#[derive(Serialize)]
struct CanonicalInputs<'a> {
    version: &'static str,
    participant_a: &'a str,
    participant_b: &'a str,
    events_a: Vec<CanonicalEvent<'a>>,
    events_b: Vec<CanonicalEvent<'a>>,
    range_start: String,
    range_end: String,
    min_duration_seconds: i64,
    timezone: &'a str,
    expected_count: u32,
    meeting_types: Option<&'a [String]>,
    free_windows: Vec<(String, String)>,
    context: Option<String>,
}

/// Pure function of the request and its windows; nothing reads the wall clock.
pub fn build(
    request: &SchedulingRequest,
    free_windows: &[FreeWindow],
    meeting_types: &MeetingTypePolicy,
) -> BuiltPrompt {
    let timezone = request.timezone;
    let name_a = request.participant_a_name.trim();
    let name_b = request.participant_b_name.trim();
    let events_a = sorted_events(&request.events_a);
    let events_b = sorted_events(&request.events_b);
    let context = request
        .context
        .as_deref()
        .map(sanitize_context)
        .filter(|value| !value.trim().is_empty());

    let mut text = String::new();
    text.push_str("# MEETING SCHEDULER ASSISTANT\n\n");
    text.push_str("## ROLE\n");
    let _ = writeln!(
        text,
        "You are an expert meeting scheduler. Suggest meeting times that {name_a} and \
         {name_b} would both find appealing and convenient."
    );
    text.push('\n');

    text.push_str("## ANALYSIS RANGE\n");
    let _ = writeln!(
        text,
        "{} to {} ({})",
        format_local(request.range_start, timezone),
        format_local(request.range_end, timezone),
        timezone.name()
    );
    let _ = writeln!(
        text,
        "Minimum meeting length: {} minutes",
        request.min_duration.num_minutes()
    );
    text.push('\n');

    let _ = writeln!(text, "## {}'S CALENDAR EVENTS", name_a.to_uppercase());
    render_events(&mut text, &events_a, timezone);
    text.push('\n');
    let _ = writeln!(text, "## {}'S CALENDAR EVENTS", name_b.to_uppercase());
    render_events(&mut text, &events_b, timezone);
    text.push('\n');

    text.push_str("## MUTUALLY FREE WINDOWS\n");
    render_windows(&mut text, free_windows, timezone);
    text.push('\n');

    if let Some(context) = context.as_deref() {
        text.push_str("## ADDITIONAL CONTEXT\n");
        text.push_str(context);
        if !context.ends_with('\n') {
            text.push('\n');
        }
        text.push('\n');
    }

    render_output_contract(&mut text, request, meeting_types, name_a, name_b);

    let canonical = CanonicalInputs {
        version: PROMPT_TEMPLATE_VERSION,
        participant_a: name_a,
        participant_b: name_b,
        events_a: events_a.iter().map(|event| canonical_event(event)).collect(),
        events_b: events_b.iter().map(|event| canonical_event(event)).collect(),
        range_start: request.range_start.to_rfc3339(),
        range_end: request.range_end.to_rfc3339(),
        min_duration_seconds: request.min_duration.num_seconds(),
        timezone: timezone.name(),
        expected_count: request.expected_count,
        meeting_types: meeting_types.allowed_values(),
        free_windows: free_windows
            .iter()
            .map(|window| (window.start.to_rfc3339(), window.end.to_rfc3339()))
            .collect(),
        context,
    };

    BuiltPrompt {
        text,
        fingerprint: fingerprint_of(&canonical),
    }
}

/// Strips control characters except line breaks and tabs; nothing else is altered.
pub fn sanitize_context(raw: &str) -> String {
    raw.chars()
        .filter(|character| !character.is_control() || matches!(character, '\n' | '\t'))
        .collect()
}

fn fingerprint_of(inputs: &CanonicalInputs<'_>) -> PromptFingerprint {
    // Serializing plain structs, strings and integers cannot fail.
    let canonical = serde_json::to_vec(inputs).unwrap_or_default();
    let digest = Sha256::digest(&canonical);
    PromptFingerprint(hex::encode(digest))
}

fn sorted_events(events: &[CalendarEvent]) -> Vec<&CalendarEvent> {
    let mut sorted: Vec<&CalendarEvent> = events.iter().collect();
    sorted.sort_by(|left, right| left.start.cmp(&right.start));
    sorted
}

fn canonical_event<'a>(event: &'a CalendarEvent) -> CanonicalEvent<'a> {
    CanonicalEvent {
        title: &event.title,
        start: event.start.to_rfc3339(),
        end: event.end.to_rfc3339(),
        location: event.location.as_deref(),
        description: event.description.as_deref(),
        all_day: event.all_day,
    }
}

fn render_events(text: &mut String, events: &[&CalendarEvent], timezone: Tz) {
    let _ = writeln!(text, "Total events: {}", events.len());
    for event in events {
        let start = event.start.with_timezone(&timezone);
        let end = event.end.with_timezone(&timezone);
        let when = if event.all_day {
            "all day".to_string()
        } else {
            format!("{}-{}", start.format("%H:%M"), end.format("%H:%M"))
        };
        let _ = write!(
            text,
            "{} ({}) {} - {}",
            start.format("%Y-%m-%d"),
            weekday_name(start.weekday()),
            when,
            single_line(&event.title)
        );
        if let Some(location) = event.location.as_deref() {
            let _ = write!(text, " @ {}", single_line(location));
        }
        if let Some(description) = event.description.as_deref() {
            let _ = write!(text, " | {}", single_line(description));
        }
        text.push('\n');
    }
}

fn render_windows(text: &mut String, windows: &[FreeWindow], timezone: Tz) {
    if windows.is_empty() {
        text.push_str("None\n");
        return;
    }
    for window in windows {
        let _ = writeln!(
            text,
            "- {} to {} ({} minutes)",
            format_local(window.start, timezone),
            format_local(window.end, timezone),
            window.duration().num_minutes()
        );
    }
}

fn render_output_contract(
    text: &mut String,
    request: &SchedulingRequest,
    meeting_types: &MeetingTypePolicy,
    name_a: &str,
    name_b: &str,
) {
    text.push_str("## TASK\n");
    let _ = writeln!(
        text,
        "Suggest exactly {} meeting times. Each suggestion must start inside one of the \
         mutually free windows above and should fit entirely inside it.",
        request.expected_count
    );
    let _ = writeln!(
        text,
        "Dates and times are local to {}. Prefer varied days and times.",
        request.timezone.name()
    );
    match meeting_types.allowed_values() {
        Some(allowed) => {
            let _ = writeln!(text, "meeting_type must be one of: {}.", allowed.join(", "));
        }
        None => text.push_str(
            "meeting_type is a short free-form label such as Coffee or Casual lunch.\n",
        ),
    }
    let _ = writeln!(
        text,
        "energy_level_a is {name_a}'s expected energy and energy_level_b is {name_b}'s; \
         each is one of low, medium, high."
    );
    text.push('\n');

    text.push_str("## OUTPUT FORMAT\n");
    text.push_str("Respond with JSON only, in this shape:\n");
    text.push_str("```json\n");
    text.push_str("{\n");
    text.push_str("  \"suggestions\": [\n");
    text.push_str("    {\n");
    text.push_str("      \"date\": \"YYYY-MM-DD\",\n");
    text.push_str("      \"time\": \"HH:MM\",\n");
    text.push_str("      \"duration_minutes\": 60,\n");
    text.push_str("      \"meeting_type\": \"Coffee\",\n");
    text.push_str("      \"energy_level_a\": \"high\",\n");
    text.push_str("      \"energy_level_b\": \"medium\",\n");
    text.push_str("      \"reasoning\": \"Why this time works well for both people\",\n");
    text.push_str("      \"location\": \"optional\",\n");
    text.push_str("      \"confidence\": 0.8\n");
    text.push_str("    }\n");
    text.push_str("  ]\n");
    text.push_str("}\n");
    text.push_str("```\n");
}

fn format_local(instant: DateTime<Utc>, timezone: Tz) -> String {
    let local = instant.with_timezone(&timezone);
    format!(
        "{} ({}) {}",
        local.format("%Y-%m-%d"),
        weekday_name(local.weekday()),
        local.format("%H:%M")
    )
}

fn single_line(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}
