pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::bootstrap::{bootstrap_workspace, BootstrapResult};
pub use application::scheduling::{
    prepare_request, render_prompt, DeterminismCheck, NormalizationDiagnostics, PreparedRequest,
    RawSchedulingInput, SchedulingService, SuggestionOutcome,
};
pub use application::suggestion_client::{
    InvocationReport, RetryPolicy, RetryState, SamplingSettings, SuggestionClient,
};
pub use domain::event_links::{event_creation_link, suggestion_id};
pub use domain::models::{
    CalendarEvent, DailyHours, EnergyLevel, FreeWindow, MeetingSuggestion, MeetingTypePolicy,
    SchedulingRequest, SuggestionMode,
};
pub use domain::prompt::{BuiltPrompt, PromptFingerprint};
pub use domain::suggestion_validator::{
    MalformedResponse, RejectedEntry, RejectionReason, ValidationOutcome, ValidationPolicy,
};
pub use infrastructure::config::SchedulerConfig;
pub use infrastructure::error::{ErrorKind, SchedulerError};
pub use infrastructure::event_normalizer::{
    normalize_events, normalize_json_events, NormalizationReport, RawCalendarEvent, SkipReason,
};
pub use infrastructure::gemini_client::{GeminiClient, GenerationRequest, GenerativeBackend};
pub use infrastructure::outcome_cache::{InMemoryOutcomeRepository, OutcomeKey, OutcomeRepository};
