use crate::application::suggestion_client::{
    resolve_seed, InvocationReport, RetryPolicy, SamplingSettings, SuggestionClient,
};
use crate::domain::availability;
use crate::domain::models::{
    DailyHours, FreeWindow, MeetingSuggestion, MeetingTypePolicy, SchedulingRequest, SuggestionMode,
};
use crate::domain::prompt::{self, BuiltPrompt, PromptFingerprint};
use crate::domain::suggestion_validator::{
    self, RejectedEntry, ValidationContext, ValidationOutcome, ValidationPolicy,
};
use crate::infrastructure::config::SchedulerConfig;
use crate::infrastructure::error::SchedulerError;
use crate::infrastructure::event_normalizer::{normalize_json_events, SkippedRecord};
use crate::infrastructure::gemini_client::GenerativeBackend;
use crate::infrastructure::outcome_cache::{OutcomeKey, OutcomeRepository};
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Scheduling input as it arrives from the calendar collaborator, before normalization.
#[derive(Debug, Clone)]
pub struct RawSchedulingInput {
    pub participant_a_name: String,
    pub participant_b_name: String,
    pub events_a: Vec<serde_json::Value>,
    pub events_b: Vec<serde_json::Value>,
    pub range_start: DateTime<Utc>,
    pub range_end: DateTime<Utc>,
    pub min_duration: Duration,
    pub context: Option<String>,
    pub daily_hours: Option<DailyHours>,
    pub expected_count: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct NormalizationDiagnostics {
    pub skipped_a: Vec<SkippedRecord>,
    pub skipped_b: Vec<SkippedRecord>,
}

#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub request: SchedulingRequest,
    pub diagnostics: NormalizationDiagnostics,
}

/// Normalizes both calendars and checks the request before anything leaves the process.
///
/// Bad records are skipped individually. The request only fails with
/// `SchedulerError::Data` when records were supplied and none of them survived.
pub fn prepare_request(
    input: RawSchedulingInput,
    default_tz: Tz,
) -> Result<PreparedRequest, SchedulerError> {
    let report_a = normalize_json_events(&input.events_a, default_tz);
    let report_b = normalize_json_events(&input.events_b, default_tz);

    let supplied = input.events_a.len() + input.events_b.len();
    if supplied > 0 && report_a.events.is_empty() && report_b.events.is_empty() {
        return Err(SchedulerError::Data(format!(
            "none of the {supplied} calendar records could be used"
        )));
    }

    let mut request = SchedulingRequest::new(
        input.participant_a_name,
        input.participant_b_name,
        input.range_start,
        input.range_end,
        input.min_duration,
    )
    .with_events(report_a.events, report_b.events)
    .with_timezone(default_tz);
    if let Some(context) = input.context {
        request = request.with_context(context);
    }
    if let Some(daily_hours) = input.daily_hours {
        request = request.with_daily_hours(daily_hours);
    }
    if let Some(expected_count) = input.expected_count {
        request = request.with_expected_count(expected_count);
    }
    request.validate().map_err(SchedulerError::Range)?;

    Ok(PreparedRequest {
        request,
        diagnostics: NormalizationDiagnostics {
            skipped_a: report_a.skipped,
            skipped_b: report_b.skipped,
        },
    })
}

/// Resolves availability and renders the prompt a request would send, without
/// calling the service.
pub fn render_prompt(
    request: &SchedulingRequest,
    meeting_types: &MeetingTypePolicy,
) -> Result<(Vec<FreeWindow>, BuiltPrompt), SchedulerError> {
    request.validate().map_err(SchedulerError::Range)?;
    let free_windows = availability::resolve_request(request);
    let built = prompt::build(request, &free_windows, meeting_types);
    Ok((free_windows, built))
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeterminismCheck {
    /// Exploratory call, no ledger configured, or nothing was sent.
    NotChecked,
    FirstObservation,
    Consistent,
    /// Same prompt and seed produced different accepted suggestions.
    Mismatch,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SuggestionOutcome {
    pub accepted: Vec<MeetingSuggestion>,
    pub rejected: Vec<RejectedEntry>,
    pub fingerprint: PromptFingerprint,
    pub free_windows: Vec<FreeWindow>,
    pub mode: SuggestionMode,
    pub seed: u32,
    pub temperature: f32,
    pub attempts: u8,
    pub determinism: DeterminismCheck,
}

pub struct SchedulingService<B>
where
    B: GenerativeBackend,
{
    client: SuggestionClient<B>,
    validation_policy: ValidationPolicy,
    outcome_repository: Option<Arc<dyn OutcomeRepository>>,
}

impl<B> SchedulingService<B>
where
    B: GenerativeBackend,
{
    pub fn new(client: SuggestionClient<B>, validation_policy: ValidationPolicy) -> Self {
        Self {
            client,
            validation_policy,
            outcome_repository: None,
        }
    }

    pub fn from_config(backend: Arc<B>, config: &SchedulerConfig) -> Self {
        let service_config = &config.suggestion_service;
        let client = SuggestionClient::new(backend, SamplingSettings::from_config(service_config))
            .with_retry_policy(RetryPolicy::from_config(service_config));
        Self::new(client, config.validation_policy())
    }

    pub fn with_outcome_repository(mut self, repository: Arc<dyn OutcomeRepository>) -> Self {
        self.outcome_repository = Some(repository);
        self
    }

    pub async fn get_meeting_suggestions(
        &self,
        request: &SchedulingRequest,
        mode: SuggestionMode,
    ) -> Result<SuggestionOutcome, SchedulerError> {
        let (free_windows, built) = render_prompt(request, &self.validation_policy.meeting_types)?;
        info!(
            windows = free_windows.len(),
            fingerprint = %built.fingerprint,
            mode = mode.as_str(),
            "resolved availability"
        );

        let seed = resolve_seed(mode, &built.fingerprint);
        if free_windows.is_empty() {
            info!("no mutually free time; skipping suggestion service");
            return Ok(SuggestionOutcome {
                accepted: Vec::new(),
                rejected: Vec::new(),
                fingerprint: built.fingerprint,
                free_windows,
                mode,
                seed,
                temperature: self.client.sampling().temperature_for(mode),
                attempts: 0,
                determinism: DeterminismCheck::NotChecked,
            });
        }

        let context = ValidationContext {
            free_windows: &free_windows,
            timezone: request.timezone,
            participant_a: &request.participant_a_name,
            participant_b: &request.participant_b_name,
            expected_count: Some(request.expected_count),
        };

        let first = self.request_suggestions(&built, mode, seed, &context).await;
        let (report, validated, attempts) = match first {
            Ok((report, validated)) => {
                let attempts = report.attempts;
                (report, validated, attempts)
            }
            // Only exploratory calls retry a malformed response, whether the service or
            // the validator found it unusable.
            Err(SchedulerError::MalformedResponse(reason)) if !mode.is_deterministic() => {
                warn!(reason = %reason, "malformed exploratory response; retrying once");
                let retry_seed = resolve_seed(mode, &built.fingerprint);
                let (report, validated) = self
                    .request_suggestions(&built, mode, retry_seed, &context)
                    .await?;
                let attempts = report.attempts.saturating_add(1);
                (report, validated, attempts)
            }
            Err(error) => return Err(error),
        };
        let ValidationOutcome { accepted, rejected } = validated;
        info!(accepted = accepted.len(), rejected = rejected.len(), "validated suggestions");
        for entry in &rejected {
            debug!(
                index = entry.index,
                reason = ?entry.reason,
                detail = %entry.detail,
                "rejected suggestion"
            );
        }

        let determinism = self.check_determinism(mode, &built.fingerprint, report.seed, &accepted)?;

        Ok(SuggestionOutcome {
            accepted,
            rejected,
            fingerprint: built.fingerprint,
            free_windows,
            mode,
            seed: report.seed,
            temperature: report.temperature,
            attempts,
            determinism,
        })
    }

    /// Like [`Self::get_meeting_suggestions`], but gives up as soon as `cancellation`
    /// fires. The in-flight call is dropped and its result discarded.
    pub async fn get_meeting_suggestions_cancellable(
        &self,
        request: &SchedulingRequest,
        mode: SuggestionMode,
        cancellation: &CancellationToken,
    ) -> Result<SuggestionOutcome, SchedulerError> {
        tokio::select! {
            biased;
            _ = cancellation.cancelled() => {
                info!("suggestion request cancelled by caller");
                Err(SchedulerError::Cancelled)
            }
            result = self.get_meeting_suggestions(request, mode) => result,
        }
    }

    async fn request_suggestions(
        &self,
        built: &BuiltPrompt,
        mode: SuggestionMode,
        seed: u32,
        context: &ValidationContext<'_>,
    ) -> Result<(InvocationReport, ValidationOutcome), SchedulerError> {
        let report = self.client.invoke_with_seed(built, mode, seed).await?;
        let validated =
            suggestion_validator::validate(&report.raw_text, context, &self.validation_policy)?;
        Ok((report, validated))
    }

    fn check_determinism(
        &self,
        mode: SuggestionMode,
        fingerprint: &PromptFingerprint,
        seed: u32,
        accepted: &[MeetingSuggestion],
    ) -> Result<DeterminismCheck, SchedulerError> {
        let Some(repository) = self.outcome_repository.as_ref() else {
            return Ok(DeterminismCheck::NotChecked);
        };
        if !mode.is_deterministic() {
            return Ok(DeterminismCheck::NotChecked);
        }

        let key = OutcomeKey {
            fingerprint: fingerprint.clone(),
            seed,
        };
        match repository.get(&key)? {
            None => {
                repository.record(key, accepted)?;
                Ok(DeterminismCheck::FirstObservation)
            }
            Some(previous) if previous == accepted => Ok(DeterminismCheck::Consistent),
            Some(previous) => {
                warn!(
                    fingerprint = %fingerprint,
                    seed,
                    previous = previous.len(),
                    current = accepted.len(),
                    "service determinism mismatch: same prompt and seed gave different suggestions"
                );
                Ok(DeterminismCheck::Mismatch)
            }
        }
    }
}
