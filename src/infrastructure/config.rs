use crate::domain::models::{DailyHours, MeetingTypePolicy};
use crate::domain::suggestion_validator::{
    ValidationPolicy, DEFAULT_MAX_DURATION_MINUTES, DEFAULT_MIN_DURATION_MINUTES,
};
use crate::infrastructure::error::SchedulerError;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

const SCHEDULER_JSON: &str = "scheduler.json";
const SUPPORTED_SCHEMA: u64 = 1;

pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const API_KEY_VARS: [&str; 2] = ["MEETSCHED_GEMINI_API_KEY", "GOOGLE_API_KEY"];
pub const MIN_TEMPERATURE: f32 = 0.0;
const MAX_TEMPERATURE: f32 = 2.0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerConfig {
    pub schema: u8,
    pub timezone: String,
    #[serde(default)]
    pub availability: AvailabilityConfig,
    #[serde(default)]
    pub suggestion_service: SuggestionServiceConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct AvailabilityConfig {
    pub min_duration_minutes: u32,
    pub daily_hours: Option<DailyHoursConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DailyHoursConfig {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SuggestionServiceConfig {
    pub model: String,
    pub base_url: String,
    pub timeout_seconds: u64,
    pub retry_backoff_ms: u64,
    /// Must stay at the minimum; deterministic calls never sample above it.
    pub deterministic_temperature: f32,
    pub exploratory_temperature: f32,
    pub max_output_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidationConfig {
    pub min_duration_minutes: u32,
    pub max_duration_minutes: u32,
    /// `null` keeps meeting types free-form.
    pub meeting_types: Option<Vec<String>>,
    pub require_full_fit: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            schema: SUPPORTED_SCHEMA as u8,
            timezone: "UTC".to_string(),
            availability: AvailabilityConfig::default(),
            suggestion_service: SuggestionServiceConfig::default(),
            validation: ValidationConfig::default(),
        }
    }
}

impl Default for AvailabilityConfig {
    fn default() -> Self {
        Self {
            min_duration_minutes: 30,
            daily_hours: None,
        }
    }
}

impl Default for SuggestionServiceConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_seconds: 30,
            retry_backoff_ms: 1_000,
            deterministic_temperature: 0.0,
            exploratory_temperature: 0.9,
            max_output_tokens: 2_048,
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_duration_minutes: DEFAULT_MIN_DURATION_MINUTES,
            max_duration_minutes: DEFAULT_MAX_DURATION_MINUTES,
            meeting_types: None,
            require_full_fit: false,
        }
    }
}

impl SchedulerConfig {
    pub fn timezone(&self) -> Result<Tz, SchedulerError> {
        self.timezone.trim().parse::<Tz>().map_err(|_| {
            SchedulerError::InvalidConfig(format!("unknown timezone {}", self.timezone))
        })
    }

    pub fn daily_hours(&self) -> Result<Option<DailyHours>, SchedulerError> {
        self.availability
            .daily_hours
            .as_ref()
            .map(|hours| DailyHours::parse(&hours.start, &hours.end))
            .transpose()
            .map_err(SchedulerError::InvalidConfig)
    }

    pub fn min_duration(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.availability.min_duration_minutes))
    }

    pub fn validation_policy(&self) -> ValidationPolicy {
        let meeting_types = match &self.validation.meeting_types {
            Some(values) => MeetingTypePolicy::Closed(values.clone()),
            None => MeetingTypePolicy::Open,
        };
        ValidationPolicy {
            min_duration_minutes: self.validation.min_duration_minutes,
            max_duration_minutes: self.validation.max_duration_minutes,
            meeting_types,
            require_full_fit: self.validation.require_full_fit,
        }
    }

    pub fn validate(&self) -> Result<(), SchedulerError> {
        self.timezone()?;
        self.daily_hours()?;

        let service = &self.suggestion_service;
        if service.model.trim().is_empty() {
            return Err(SchedulerError::InvalidConfig(
                "suggestionService.model must not be empty".to_string(),
            ));
        }
        url::Url::parse(&service.base_url).map_err(|error| {
            SchedulerError::InvalidConfig(format!("invalid suggestionService.baseUrl: {error}"))
        })?;
        if service.timeout_seconds == 0 {
            return Err(SchedulerError::InvalidConfig(
                "suggestionService.timeoutSeconds must be positive".to_string(),
            ));
        }
        if service.deterministic_temperature != MIN_TEMPERATURE {
            return Err(SchedulerError::InvalidConfig(format!(
                "suggestionService.deterministicTemperature must be {MIN_TEMPERATURE:.1}"
            )));
        }
        if !(MIN_TEMPERATURE..=MAX_TEMPERATURE).contains(&service.exploratory_temperature) {
            return Err(SchedulerError::InvalidConfig(format!(
                "suggestionService.exploratoryTemperature must be within \
                 {MIN_TEMPERATURE:.1}..={MAX_TEMPERATURE:.1}"
            )));
        }

        let validation = &self.validation;
        if validation.min_duration_minutes == 0
            || validation.min_duration_minutes > validation.max_duration_minutes
        {
            return Err(SchedulerError::InvalidConfig(
                "validation duration bounds must satisfy 1 <= min <= max".to_string(),
            ));
        }
        if let Some(types) = &validation.meeting_types {
            if types.iter().all(|value| value.trim().is_empty()) {
                return Err(SchedulerError::InvalidConfig(
                    "validation.meetingTypes must list at least one type or be null".to_string(),
                ));
            }
        }
        Ok(())
    }
}

impl SuggestionServiceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), SchedulerError> {
    let path = config_dir.join(SCHEDULER_JSON);
    if !path.exists() {
        let formatted = serde_json::to_string_pretty(&SchedulerConfig::default())?;
        fs::write(path, format!("{formatted}\n"))?;
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, SchedulerError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| {
            SchedulerError::InvalidConfig(format!("missing schema in {}", path.display()))
        })?;
    if schema != SUPPORTED_SCHEMA {
        return Err(SchedulerError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_config(config_dir: &Path) -> Result<SchedulerConfig, SchedulerError> {
    let path = config_dir.join(SCHEDULER_JSON);
    let config: SchedulerConfig = serde_json::from_value(read_config(&path)?)?;
    config.validate()?;
    Ok(config)
}

pub fn load_api_key_from_env() -> Result<String, SchedulerError> {
    load_api_key_from_lookup(|key| std::env::var(key).ok())
}

pub fn load_api_key_from_lookup<F>(lookup: F) -> Result<String, SchedulerError>
where
    F: Fn(&str) -> Option<String>,
{
    required_lookup_value(&lookup, &API_KEY_VARS, "suggestion service api key")
}

fn required_lookup_value<F>(
    lookup: &F,
    keys: &[&str],
    field_name: &str,
) -> Result<String, SchedulerError>
where
    F: Fn(&str) -> Option<String>,
{
    optional_lookup_value(lookup, keys).ok_or_else(|| {
        SchedulerError::InvalidConfig(format!(
            "missing {} (set one of: {})",
            field_name,
            keys.join(", ")
        ))
    })
}

fn optional_lookup_value<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    keys.iter()
        .filter_map(|key| lookup(key))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_TEMP_DIR: AtomicUsize = AtomicUsize::new(0);

    struct TempConfigDir {
        path: PathBuf,
    }

    impl TempConfigDir {
        fn new() -> Self {
            let sequence = NEXT_TEMP_DIR.fetch_add(1, Ordering::Relaxed);
            let path = std::env::temp_dir().join(format!(
                "meetsched-config-tests-{}-{}",
                std::process::id(),
                sequence
            ));
            fs::create_dir_all(&path).expect("create temp config dir");
            Self { path }
        }

        fn write(&self, value: serde_json::Value) {
            fs::write(self.path.join(SCHEDULER_JSON), value.to_string()).expect("write config");
        }
    }

    impl Drop for TempConfigDir {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    #[test]
    fn defaults_are_written_once_and_load_back() {
        let dir = TempConfigDir::new();
        ensure_default_configs(&dir.path).expect("write defaults");

        let loaded = load_config(&dir.path).expect("load defaults");
        assert_eq!(loaded, SchedulerConfig::default());
        assert_eq!(loaded.validation_policy().meeting_types, MeetingTypePolicy::Open);

        dir.write(serde_json::json!({"schema": 1, "timezone": "Asia/Tokyo"}));
        ensure_default_configs(&dir.path).expect("keep existing file");
        let kept = load_config(&dir.path).expect("load existing");
        assert_eq!(kept.timezone().expect("zone"), chrono_tz::Asia::Tokyo);
        assert_eq!(kept.suggestion_service.model, DEFAULT_MODEL);
    }

    #[test]
    fn missing_or_unsupported_schema_is_rejected() {
        let dir = TempConfigDir::new();
        dir.write(serde_json::json!({"timezone": "UTC"}));
        assert!(matches!(
            load_config(&dir.path),
            Err(SchedulerError::InvalidConfig(message)) if message.contains("missing schema")
        ));

        dir.write(serde_json::json!({"schema": 2, "timezone": "UTC"}));
        assert!(matches!(
            load_config(&dir.path),
            Err(SchedulerError::InvalidConfig(message)) if message.contains("unsupported schema 2")
        ));
    }

    #[test]
    fn closed_meeting_types_and_daily_hours_are_typed() {
        let dir = TempConfigDir::new();
        dir.write(serde_json::json!({
            "schema": 1,
            "timezone": "Europe/Berlin",
            "availability": {
                "minDurationMinutes": 45,
                "dailyHours": {"start": "09:00", "end": "21:00"}
            },
            "validation": {"meetingTypes": ["Coffee", "Walk"], "requireFullFit": true}
        }));

        let config = load_config(&dir.path).expect("load config");
        let policy = config.validation_policy();

        assert_eq!(config.min_duration(), chrono::Duration::minutes(45));
        assert!(config.daily_hours().expect("hours").is_some());
        assert!(policy.require_full_fit);
        assert_eq!(policy.meeting_types.canonicalize("walk").as_deref(), Some("Walk"));
        assert_eq!(policy.max_duration_minutes, DEFAULT_MAX_DURATION_MINUTES);
    }

    #[test]
    fn invalid_values_are_reported() {
        let dir = TempConfigDir::new();
        let utc = |section: &str, value: serde_json::Value| {
            serde_json::json!({"schema": 1, "timezone": "UTC", section: value})
        };
        for body in [
            serde_json::json!({"schema": 1, "timezone": "Mars/Olympus"}),
            utc("suggestionService", serde_json::json!({"timeoutSeconds": 0})),
            utc("suggestionService", serde_json::json!({"baseUrl": "not a url"})),
            utc(
                "validation",
                serde_json::json!({"minDurationMinutes": 90, "maxDurationMinutes": 60}),
            ),
            utc("validation", serde_json::json!({"meetingTypes": []})),
            utc(
                "availability",
                serde_json::json!({"dailyHours": {"start": "18:00", "end": "09:00"}}),
            ),
        ] {
            dir.write(body.clone());
            assert!(
                matches!(load_config(&dir.path), Err(SchedulerError::InvalidConfig(_))),
                "expected invalid config for {body}"
            );
        }
    }

    #[test]
    fn deterministic_temperature_is_pinned_to_the_minimum() {
        let mut config = SchedulerConfig::default();
        config.suggestion_service.deterministic_temperature = 0.9;
        match config.validate() {
            Err(SchedulerError::InvalidConfig(message)) => {
                assert!(message.contains("deterministicTemperature"));
            }
            other => panic!("expected invalid config, got {other:?}"),
        }

        config.suggestion_service.deterministic_temperature = MIN_TEMPERATURE;
        config.suggestion_service.exploratory_temperature = 2.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn api_key_prefers_scoped_variable_and_skips_blanks() {
        let key = load_api_key_from_lookup(|key| match key {
            "MEETSCHED_GEMINI_API_KEY" => Some("   ".to_string()),
            "GOOGLE_API_KEY" => Some(" fallback ".to_string()),
            _ => None,
        })
        .expect("fallback key");
        assert_eq!(key, "fallback");

        match load_api_key_from_lookup(|_| None) {
            Err(SchedulerError::InvalidConfig(message)) => {
                assert!(message.contains("MEETSCHED_GEMINI_API_KEY"));
            }
            _ => panic!("expected invalid config error"),
        }
    }
}
