use crate::domain::models::SuggestionMode;
use crate::domain::prompt::{BuiltPrompt, PromptFingerprint};
use crate::infrastructure::config::{SuggestionServiceConfig, MIN_TEMPERATURE};
use crate::infrastructure::error::SchedulerError;
use crate::infrastructure::gemini_client::{GenerationRequest, GenerativeBackend};
use rand::Rng;
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration as TokioDuration};
use tracing::{debug, info, warn};

const MAX_SEED: u32 = 0x7fff_ffff;
// Only the first candidate is ever read.
const CANDIDATE_COUNT: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u8,
    /// Hard limit for a single attempt.
    pub attempt_timeout: TokioDuration,
    pub backoff: TokioDuration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            attempt_timeout: TokioDuration::from_secs(30),
            backoff: TokioDuration::from_millis(1_000),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &SuggestionServiceConfig) -> Self {
        Self {
            attempt_timeout: config.timeout(),
            backoff: config.retry_backoff(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryState {
    Attempting { attempt: u8 },
    Retrying { failed_attempt: u8, reason: String },
    Succeeded { attempts: u8 },
    Failed { attempts: u8, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptEvent {
    Succeeded,
    TransientFailure(String),
    PermanentFailure(String),
    BackoffElapsed,
}

impl RetryState {
    pub fn initial() -> Self {
        Self::Attempting { attempt: 1 }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded { .. } | Self::Failed { .. })
    }

    /// Pure transition function; terminal states absorb every event.
    pub fn next(self, event: AttemptEvent, policy: &RetryPolicy) -> Self {
        let max_attempts = policy.max_attempts.max(1);
        match (self, event) {
            (Self::Attempting { attempt }, AttemptEvent::Succeeded) => {
                Self::Succeeded { attempts: attempt }
            }
            (Self::Attempting { attempt }, AttemptEvent::TransientFailure(reason))
                if attempt < max_attempts =>
            {
                Self::Retrying {
                    failed_attempt: attempt,
                    reason,
                }
            }
            (
                Self::Attempting { attempt },
                AttemptEvent::TransientFailure(reason) | AttemptEvent::PermanentFailure(reason),
            ) => Self::Failed {
                attempts: attempt,
                reason,
            },
            (Self::Retrying { failed_attempt, .. }, AttemptEvent::BackoffElapsed) => {
                Self::Attempting {
                    attempt: failed_attempt.saturating_add(1),
                }
            }
            (state, _) => state,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingSettings {
    pub exploratory_temperature: f32,
    pub max_output_tokens: u32,
}

impl SamplingSettings {
    pub fn from_config(config: &SuggestionServiceConfig) -> Self {
        Self {
            exploratory_temperature: config.exploratory_temperature,
            max_output_tokens: config.max_output_tokens,
        }
    }

    /// Deterministic calls always sample at the minimum temperature.
    pub fn temperature_for(&self, mode: SuggestionMode) -> f32 {
        if mode.is_deterministic() {
            MIN_TEMPERATURE
        } else {
            self.exploratory_temperature
        }
    }
}

impl Default for SamplingSettings {
    fn default() -> Self {
        Self::from_config(&SuggestionServiceConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InvocationReport {
    pub raw_text: String,
    pub seed: u32,
    pub temperature: f32,
    pub attempts: u8,
}

/// Seed actually sent for a mode: the caller's, else fingerprint-derived
/// (deterministic) or random (exploratory).
pub fn resolve_seed(mode: SuggestionMode, fingerprint: &PromptFingerprint) -> u32 {
    match mode {
        SuggestionMode::Deterministic(Some(seed)) | SuggestionMode::Exploratory(Some(seed)) => {
            seed & MAX_SEED
        }
        SuggestionMode::Deterministic(None) => fingerprint.derived_seed(),
        SuggestionMode::Exploratory(None) => rand::thread_rng().gen_range(0..=MAX_SEED),
    }
}

pub struct SuggestionClient<B>
where
    B: GenerativeBackend,
{
    backend: Arc<B>,
    sampling: SamplingSettings,
    retry_policy: RetryPolicy,
}

impl<B> SuggestionClient<B>
where
    B: GenerativeBackend,
{
    pub fn new(backend: Arc<B>, sampling: SamplingSettings) -> Self {
        Self {
            backend,
            sampling,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn sampling(&self) -> &SamplingSettings {
        &self.sampling
    }

    pub async fn invoke(
        &self,
        prompt: &BuiltPrompt,
        mode: SuggestionMode,
    ) -> Result<InvocationReport, SchedulerError> {
        let seed = resolve_seed(mode, &prompt.fingerprint);
        self.invoke_with_seed(prompt, mode, seed).await
    }

    pub async fn invoke_with_seed(
        &self,
        prompt: &BuiltPrompt,
        mode: SuggestionMode,
        seed: u32,
    ) -> Result<InvocationReport, SchedulerError> {
        let request = GenerationRequest {
            prompt: prompt.text.clone(),
            temperature: self.sampling.temperature_for(mode),
            seed,
            candidate_count: CANDIDATE_COUNT,
            max_output_tokens: self.sampling.max_output_tokens,
        };

        let mut state = RetryState::initial();
        let mut last_error = None;
        let mut raw_text = None;

        while !state.is_terminal() {
            let event = match &state {
                RetryState::Attempting { attempt } => {
                    debug!(
                        attempt,
                        seed,
                        temperature = request.temperature,
                        mode = mode.as_str(),
                        "calling suggestion service"
                    );
                    let call = self.backend.generate(&request);
                    match timeout(self.retry_policy.attempt_timeout, call).await {
                        Ok(Ok(text)) => {
                            raw_text = Some(text);
                            AttemptEvent::Succeeded
                        }
                        Ok(Err(error)) => {
                            let event = if error.is_transient() {
                                AttemptEvent::TransientFailure(error.to_string())
                            } else {
                                AttemptEvent::PermanentFailure(error.to_string())
                            };
                            last_error = Some(error);
                            event
                        }
                        Err(_) => {
                            let error = SchedulerError::TransientService(format!(
                                "attempt timed out after {} ms",
                                self.retry_policy.attempt_timeout.as_millis()
                            ));
                            let event = AttemptEvent::TransientFailure(error.to_string());
                            last_error = Some(error);
                            event
                        }
                    }
                }
                RetryState::Retrying { failed_attempt, reason } => {
                    warn!(
                        failed_attempt,
                        backoff_ms = self.retry_policy.backoff.as_millis() as u64,
                        reason = %reason,
                        "retrying suggestion service"
                    );
                    sleep(self.retry_policy.backoff).await;
                    AttemptEvent::BackoffElapsed
                }
                RetryState::Succeeded { .. } | RetryState::Failed { .. } => break,
            };
            state = state.next(event, &self.retry_policy);
        }

        match state {
            RetryState::Succeeded { attempts } => {
                info!(attempts, seed, "suggestion service responded");
                Ok(InvocationReport {
                    raw_text: raw_text.unwrap_or_default(),
                    seed,
                    temperature: request.temperature,
                    attempts,
                })
            }
            RetryState::Failed { attempts, reason } => {
                warn!(attempts, reason = %reason, "suggestion service call failed");
                match last_error {
                    Some(SchedulerError::TransientService(_)) | None => {
                        Err(SchedulerError::ServiceUnavailable(format!(
                            "gave up after {attempts} attempt(s): {reason}"
                        )))
                    }
                    Some(error) => Err(error),
                }
            }
            RetryState::Attempting { .. } | RetryState::Retrying { .. } => {
                Err(SchedulerError::ServiceUnavailable(
                    "retry loop ended in a non-terminal state".to_string(),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{FreeWindow, MeetingTypePolicy, SchedulingRequest};
    use crate::domain::prompt;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, Utc};
    use proptest::prelude::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    enum FakeReply {
        Text(&'static str),
        Transient,
        Unavailable,
        Hang,
    }

    #[derive(Debug)]
    struct FakeBackend {
        replies: Mutex<VecDeque<FakeReply>>,
        requests: Mutex<Vec<GenerationRequest>>,
        calls: AtomicUsize,
    }

    impl FakeBackend {
        fn with_replies(replies: Vec<FakeReply>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            }
        }

        fn last_request(&self) -> GenerationRequest {
            self.requests
                .lock()
                .expect("requests lock poisoned")
                .last()
                .cloned()
                .expect("at least one request")
        }
    }

    #[async_trait]
    impl GenerativeBackend for FakeBackend {
        async fn generate(&self, request: &GenerationRequest) -> Result<String, SchedulerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().expect("requests lock poisoned").push(request.clone());
            let reply = self
                .replies
                .lock()
                .expect("reply lock poisoned")
                .pop_front()
                .unwrap_or(FakeReply::Text("{\"suggestions\": []}"));
            match reply {
                FakeReply::Text(text) => Ok(text.to_string()),
                FakeReply::Transient => {
                    Err(SchedulerError::TransientService("http 503".to_string()))
                }
                FakeReply::Unavailable => {
                    Err(SchedulerError::ServiceUnavailable("http 403".to_string()))
                }
                FakeReply::Hang => {
                    sleep(TokioDuration::from_secs(5)).await;
                    Ok("too late".to_string())
                }
            }
        }
    }

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn sample_prompt() -> BuiltPrompt {
        let start = fixed_time("2026-02-16T08:00:00Z");
        let end = fixed_time("2026-02-16T12:00:00Z");
        let request = SchedulingRequest::new("Phil", "Chris", start, end, Duration::minutes(30));
        prompt::build(&request, &[FreeWindow { start, end }], &MeetingTypePolicy::Open)
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            attempt_timeout: TokioDuration::from_millis(50),
            backoff: TokioDuration::from_millis(1),
        }
    }

    fn client(backend: &Arc<FakeBackend>) -> SuggestionClient<FakeBackend> {
        SuggestionClient::new(Arc::clone(backend), SamplingSettings::default())
            .with_retry_policy(fast_policy())
    }

    #[test]
    fn retry_state_machine_allows_exactly_one_retry() {
        let policy = fast_policy();
        let state = RetryState::initial()
            .next(AttemptEvent::TransientFailure("timeout".into()), &policy);
        assert_eq!(
            state,
            RetryState::Retrying {
                failed_attempt: 1,
                reason: "timeout".into()
            }
        );

        let state = state.next(AttemptEvent::BackoffElapsed, &policy);
        assert_eq!(state, RetryState::Attempting { attempt: 2 });

        let state = state.next(AttemptEvent::TransientFailure("503".into()), &policy);
        assert_eq!(
            state,
            RetryState::Failed {
                attempts: 2,
                reason: "503".into()
            }
        );
        assert_eq!(state.clone().next(AttemptEvent::BackoffElapsed, &policy), state);
    }

    #[test]
    fn permanent_failures_and_successes_end_immediately() {
        let policy = fast_policy();
        assert_eq!(
            RetryState::initial().next(AttemptEvent::PermanentFailure("403".into()), &policy),
            RetryState::Failed {
                attempts: 1,
                reason: "403".into()
            }
        );
        assert_eq!(
            RetryState::initial().next(AttemptEvent::Succeeded, &policy),
            RetryState::Succeeded { attempts: 1 }
        );
    }

    #[tokio::test]
    async fn deterministic_mode_uses_derived_seed_and_minimum_temperature() {
        let backend = Arc::new(FakeBackend::with_replies(vec![FakeReply::Text("ok")]));
        let prompt = sample_prompt();

        let report = client(&backend)
            .invoke(&prompt, SuggestionMode::deterministic())
            .await
            .expect("invoke");

        assert_eq!(report.raw_text, "ok");
        assert_eq!(report.attempts, 1);
        assert_eq!(report.seed, prompt.fingerprint.derived_seed());
        assert_eq!(report.temperature, 0.0);
        let sent = backend.last_request();
        assert_eq!(sent.seed, report.seed);
        assert_eq!(sent.prompt, prompt.text);
        assert_eq!(sent.candidate_count, 1);
    }

    #[tokio::test]
    async fn deterministic_temperature_ignores_unvalidated_config() {
        let backend = Arc::new(FakeBackend::with_replies(vec![FakeReply::Text("ok")]));
        let config = SuggestionServiceConfig {
            deterministic_temperature: 0.9,
            exploratory_temperature: 1.2,
            ..SuggestionServiceConfig::default()
        };
        let sampling = SamplingSettings::from_config(&config);
        let client =
            SuggestionClient::new(Arc::clone(&backend), sampling).with_retry_policy(fast_policy());

        let report = client
            .invoke(&sample_prompt(), SuggestionMode::Deterministic(Some(3)))
            .await
            .expect("invoke");

        assert_eq!(report.temperature, MIN_TEMPERATURE);
        assert_eq!(backend.last_request().temperature, MIN_TEMPERATURE);
        assert_eq!(client.sampling().temperature_for(SuggestionMode::exploratory()), 1.2);
    }

    #[tokio::test]
    async fn exploratory_mode_honors_caller_seed_and_higher_temperature() {
        let backend = Arc::new(FakeBackend::with_replies(vec![]));
        let prompt = sample_prompt();

        let report = client(&backend)
            .invoke(&prompt, SuggestionMode::Exploratory(Some(7)))
            .await
            .expect("invoke");

        assert_eq!(report.seed, 7);
        assert!(report.temperature > MIN_TEMPERATURE);
    }

    #[tokio::test]
    async fn one_transient_failure_is_retried() {
        let replies = vec![FakeReply::Transient, FakeReply::Text("ok")];
        let backend = Arc::new(FakeBackend::with_replies(replies));

        let report = client(&backend)
            .invoke(&sample_prompt(), SuggestionMode::Deterministic(Some(42)))
            .await
            .expect("invoke");

        assert_eq!(report.attempts, 2);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn second_transient_failure_surfaces_as_unavailable() {
        let replies = vec![FakeReply::Transient, FakeReply::Hang];
        let backend = Arc::new(FakeBackend::with_replies(replies));

        let result = client(&backend)
            .invoke(&sample_prompt(), SuggestionMode::deterministic())
            .await;

        match result {
            Err(SchedulerError::ServiceUnavailable(message)) => {
                assert!(message.contains("timed out"));
            }
            other => panic!("expected service unavailable, got {other:?}"),
        }
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_transient_failure_is_not_retried() {
        let replies = vec![FakeReply::Unavailable, FakeReply::Text("ok")];
        let backend = Arc::new(FakeBackend::with_replies(replies));

        let result = client(&backend)
            .invoke(&sample_prompt(), SuggestionMode::deterministic())
            .await;

        assert!(matches!(result, Err(SchedulerError::ServiceUnavailable(_))));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    // Feature: meetsched, Property: resolved seeds stay in the non-negative i32 range
    proptest! {
        #[test]
        fn resolved_seeds_fit_service_range(seed in any::<u32>(), deterministic in any::<bool>()) {
            let fingerprint = sample_prompt().fingerprint;
            let mode = if deterministic {
                SuggestionMode::Deterministic(Some(seed))
            } else {
                SuggestionMode::Exploratory(Some(seed))
            };
            prop_assert!(resolve_seed(mode, &fingerprint) <= MAX_SEED);
            prop_assert!(resolve_seed(SuggestionMode::Exploratory(None), &fingerprint) <= MAX_SEED);
            prop_assert_eq!(
                resolve_seed(SuggestionMode::Deterministic(None), &fingerprint),
                fingerprint.derived_seed()
            );
        }
    }
}
