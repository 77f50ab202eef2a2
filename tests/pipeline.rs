use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use meetsched::{
    prepare_request, ErrorKind, GenerationRequest, GenerativeBackend, InMemoryOutcomeRepository,
    RawSchedulingInput, RejectionReason, SchedulerConfig, SchedulerError, SchedulingService,
    SkipReason, SuggestionMode,
};
use serde_json::json;
use std::sync::Arc;
use std::sync::Mutex;

/// Answers every call with the same text and remembers what it was asked.
struct ScriptedBackend {
    reply: String,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedBackend {
    fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl GenerativeBackend for ScriptedBackend {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, SchedulerError> {
        self.requests.lock().expect("requests lock").push(request.clone());
        Ok(self.reply.clone())
    }
}

fn fixed_time(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .expect("valid datetime")
        .with_timezone(&Utc)
}

fn tokyo_config() -> SchedulerConfig {
    SchedulerConfig {
        timezone: "Asia/Tokyo".to_string(),
        ..SchedulerConfig::default()
    }
}

fn raw_input() -> RawSchedulingInput {
    RawSchedulingInput {
        participant_a_name: "Phil".to_string(),
        participant_b_name: "Chris".to_string(),
        events_a: vec![
            json!({
                "summary": "Standup",
                "start": {"dateTime": "2026-02-16T09:00:00", "timeZone": "Asia/Tokyo"},
                "end": {"dateTime": "2026-02-16T10:00:00", "timeZone": "Asia/Tokyo"}
            }),
            json!({"summary": "Broken", "start": "soon"}),
        ],
        events_b: vec![json!({
            "summary": "Dentist",
            "start": "2026-02-16T09:30:00+09:00",
            "end": "2026-02-16T11:00:00+09:00",
            "location": "Shibuya"
        })],
        range_start: fixed_time("2026-02-16T08:00:00+09:00"),
        range_end: fixed_time("2026-02-16T12:00:00+09:00"),
        min_duration: Duration::minutes(30),
        context: Some("Chris prefers quiet places".to_string()),
        daily_hours: None,
        expected_count: Some(2),
    }
}

const SERVICE_REPLY: &str = r#"Here you go:
```json
{
  "suggestions": [
    {"date": "2026-02-16", "time": "8:15 AM", "duration": "45 minutes", "meeting_type": "Coffee",
     "phil_energy": "High", "chris_energy": "Medium", "reasoning": "Before the standup",
     "confidence": 0.8},
    {"date": "2026-02-16", "time": "10:30", "duration_minutes": 30, "meeting_type": "Walk",
     "energy_level_a": "low", "energy_level_b": "low", "reasoning": "Between appointments"},
    {"date": "2026-02-16", "time": "11:00", "duration_minutes": 60, "meeting_type": "Casual lunch",
     "energy_level_a": "medium", "energy_level_b": "high", "reasoning": "Lunch after the dentist",
     "location": "Shibuya"}
  ]
}
```"#;

#[tokio::test]
async fn raw_calendars_flow_through_to_validated_suggestions() {
    let config = tokyo_config();
    let prepared = prepare_request(raw_input(), config.timezone().expect("zone")).expect("prepare");
    assert_eq!(prepared.diagnostics.skipped_a.len(), 1);
    assert_eq!(prepared.diagnostics.skipped_a[0].reason, SkipReason::UnparseableTimestamp);

    let backend = Arc::new(ScriptedBackend::new(SERVICE_REPLY));
    let service = SchedulingService::from_config(Arc::clone(&backend), &config)
        .with_outcome_repository(Arc::new(InMemoryOutcomeRepository::default()));

    let outcome = service
        .get_meeting_suggestions(&prepared.request, SuggestionMode::deterministic())
        .await
        .expect("suggestions");

    assert_eq!(outcome.free_windows.len(), 2);
    assert_eq!(outcome.accepted.len(), 2);
    assert_eq!(outcome.accepted[0].start, fixed_time("2026-02-16T08:15:00+09:00"));
    assert_eq!(outcome.accepted[0].duration_minutes, 45);
    assert_eq!(outcome.accepted[1].meeting_type, "Casual lunch");
    assert_eq!(outcome.rejected.len(), 1);
    assert_eq!(outcome.rejected[0].reason, RejectionReason::OutsideFreeWindow);
    assert_eq!(outcome.rejected[0].index, 1);

    let sent = backend.requests.lock().expect("requests lock").clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].seed, outcome.fingerprint.derived_seed());
    assert_eq!(sent[0].temperature, 0.0);
    assert!(sent[0].prompt.contains("Chris prefers quiet places"));
    assert!(sent[0].prompt.contains("Dentist @ Shibuya"));
}

#[tokio::test]
async fn identical_requests_share_fingerprint_and_output() {
    let config = tokyo_config();
    let backend = Arc::new(ScriptedBackend::new(SERVICE_REPLY));
    let service = SchedulingService::from_config(Arc::clone(&backend), &config);

    let zone = config.timezone().expect("zone");
    let first_request = prepare_request(raw_input(), zone).expect("prepare");
    let second_request = prepare_request(raw_input(), zone).expect("prepare");
    let first = service
        .get_meeting_suggestions(&first_request.request, SuggestionMode::deterministic())
        .await
        .expect("first");
    let second = service
        .get_meeting_suggestions(&second_request.request, SuggestionMode::deterministic())
        .await
        .expect("second");

    assert_eq!(first.fingerprint, second.fingerprint);
    assert_eq!(first.seed, second.seed);
    assert_eq!(first.accepted, second.accepted);
}

#[tokio::test]
async fn closed_meeting_types_from_config_reject_free_form_values() {
    let mut config = tokyo_config();
    config.validation.meeting_types = Some(vec!["Coffee".to_string(), "Casual lunch".to_string()]);
    let prepared = prepare_request(raw_input(), config.timezone().expect("zone")).expect("prepare");
    let reply = SERVICE_REPLY.replace("\"time\": \"10:30\"", "\"time\": \"08:30\"");
    let service = SchedulingService::from_config(Arc::new(ScriptedBackend::new(reply)), &config);

    let outcome = service
        .get_meeting_suggestions(&prepared.request, SuggestionMode::deterministic())
        .await
        .expect("suggestions");

    assert_eq!(outcome.accepted.len(), 2);
    assert_eq!(outcome.rejected[0].reason, RejectionReason::InvalidMeetingType);
}

#[test]
fn unusable_calendars_are_bad_input() {
    let mut input = raw_input();
    input.events_a = vec![json!({"summary": "Broken", "start": "soon"})];
    input.events_b = vec![json!(null)];

    match prepare_request(input, chrono_tz::Asia::Tokyo) {
        Err(error) => assert_eq!(error.kind(), ErrorKind::BadInput),
        Ok(_) => panic!("expected a data error"),
    }
}
