use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use meetsched::infrastructure::config::load_api_key_from_env;
use meetsched::{
    bootstrap_workspace, event_creation_link, prepare_request, render_prompt, ErrorKind,
    GeminiClient, InMemoryOutcomeRepository, NormalizationDiagnostics, RawSchedulingInput,
    SchedulerConfig, SchedulerError, SchedulingService, SuggestionMode, SuggestionOutcome,
};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Suggest meeting times for two people from their calendars
#[derive(Parser, Debug)]
#[command(name = "meetsched")]
#[command(version, about, long_about = None)]
struct Args {
    /// Workspace holding config/scheduler.json
    #[arg(short, long, global = true, default_value = ".")]
    workspace: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the config directory with default settings
    Init,
    /// Ask the suggestion service for meeting times and print the validated outcome
    Suggest {
        #[command(flatten)]
        request: RequestArgs,
        #[arg(long, value_enum, default_value = "deterministic")]
        mode: ModeArg,
        /// Fixed sampling seed
        #[arg(long)]
        seed: Option<u32>,
        /// Base URL used to build event-creation links for accepted suggestions
        #[arg(long, default_value = "")]
        link_base: String,
    },
    /// Print the prompt and its fingerprint without calling the service
    Prompt {
        #[command(flatten)]
        request: RequestArgs,
    },
}

#[derive(ClapArgs, Debug)]
struct RequestArgs {
    /// JSON file with the first participant's events
    #[arg(long)]
    events_a: PathBuf,
    /// JSON file with the second participant's events
    #[arg(long)]
    events_b: PathBuf,
    #[arg(long)]
    name_a: String,
    #[arg(long)]
    name_b: String,
    /// Range start, RFC 3339 or local YYYY-MM-DDTHH:MM in the configured timezone
    #[arg(long)]
    start: String,
    /// Range end, same formats as --start
    #[arg(long)]
    end: String,
    /// Minimum free window in minutes (defaults to the config value)
    #[arg(long)]
    min_duration: Option<u32>,
    /// Number of suggestions to request
    #[arg(long)]
    count: Option<u32>,
    /// Free-text context appended to the prompt
    #[arg(long)]
    context: Option<String>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Deterministic,
    Exploratory,
}

#[derive(Serialize)]
struct SuggestOutput {
    #[serde(flatten)]
    outcome: SuggestionOutcome,
    diagnostics: NormalizationDiagnostics,
    links: Vec<SuggestionLink>,
}

#[derive(Serialize)]
struct SuggestionLink {
    suggestion_id: String,
    link: String,
}

#[derive(Serialize)]
struct PromptOutput {
    fingerprint: String,
    derived_seed: u32,
    free_windows: usize,
    prompt: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("meetsched=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(kind = ?error.kind(), "{error}");
            eprintln!("error: {error}");
            ExitCode::from(exit_code(error.kind()))
        }
    }
}

fn exit_code(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::Internal => 1,
        ErrorKind::BadInput => 2,
        ErrorKind::ExternalService => 3,
        ErrorKind::NothingUsable => 4,
    }
}

async fn run(args: Args) -> Result<(), SchedulerError> {
    let bootstrap = bootstrap_workspace(&args.workspace)?;
    let config = bootstrap.config;

    match args.command {
        Command::Init => {
            println!("{}", bootstrap.config_path.display());
            Ok(())
        }
        Command::Prompt { request } => {
            let prepared = prepare_request(raw_input(&request, &config)?, config.timezone()?)?;
            let meeting_types = config.validation_policy().meeting_types;
            let (free_windows, built) = render_prompt(&prepared.request, &meeting_types)?;
            print_json(&PromptOutput {
                fingerprint: built.fingerprint.to_string(),
                derived_seed: built.fingerprint.derived_seed(),
                free_windows: free_windows.len(),
                prompt: built.text,
            })
        }
        Command::Suggest {
            request,
            mode,
            seed,
            link_base,
        } => {
            let prepared = prepare_request(raw_input(&request, &config)?, config.timezone()?)?;
            let backend = GeminiClient::new(load_api_key_from_env()?, &config.suggestion_service)?;
            let service = SchedulingService::from_config(Arc::new(backend), &config)
                .with_outcome_repository(Arc::new(InMemoryOutcomeRepository::default()));
            let mode = match mode {
                ModeArg::Deterministic => SuggestionMode::Deterministic(seed),
                ModeArg::Exploratory => SuggestionMode::Exploratory(seed),
            };

            let outcome = service.get_meeting_suggestions(&prepared.request, mode).await?;
            let links = outcome
                .accepted
                .iter()
                .map(|suggestion| SuggestionLink {
                    suggestion_id: suggestion.suggestion_id.clone(),
                    link: event_creation_link(&link_base, &suggestion.suggestion_id),
                })
                .collect();
            print_json(&SuggestOutput {
                outcome,
                diagnostics: prepared.diagnostics,
                links,
            })
        }
    }
}

fn raw_input(
    args: &RequestArgs,
    config: &SchedulerConfig,
) -> Result<RawSchedulingInput, SchedulerError> {
    let timezone = config.timezone()?;
    Ok(RawSchedulingInput {
        participant_a_name: args.name_a.clone(),
        participant_b_name: args.name_b.clone(),
        events_a: read_event_file(&args.events_a)?,
        events_b: read_event_file(&args.events_b)?,
        range_start: parse_instant(&args.start, timezone)?,
        range_end: parse_instant(&args.end, timezone)?,
        min_duration: args
            .min_duration
            .map(|minutes| Duration::minutes(i64::from(minutes)))
            .unwrap_or_else(|| config.min_duration()),
        context: args.context.clone(),
        daily_hours: config.daily_hours()?,
        expected_count: args.count,
    })
}

/// Accepts a bare array, or a calendar listing with `items` or `events`.
fn read_event_file(path: &Path) -> Result<Vec<serde_json::Value>, SchedulerError> {
    let raw = fs::read_to_string(path)?;
    match serde_json::from_str::<serde_json::Value>(&raw)? {
        serde_json::Value::Array(records) => Ok(records),
        serde_json::Value::Object(mut listing) => match listing
            .remove("items")
            .or_else(|| listing.remove("events"))
        {
            Some(serde_json::Value::Array(records)) => Ok(records),
            _ => Err(SchedulerError::Data(format!(
                "{} has no event array",
                path.display()
            ))),
        },
        _ => Err(SchedulerError::Data(format!(
            "{} is not an event list",
            path.display()
        ))),
    }
}

fn parse_instant(value: &str, timezone: Tz) -> Result<DateTime<Utc>, SchedulerError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value.trim()) {
        return Ok(parsed.with_timezone(&Utc));
    }
    let naive = ["%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value.trim(), format).ok())
        .ok_or_else(|| SchedulerError::Range(format!("unrecognized timestamp '{value}'")))?;
    timezone
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| {
            SchedulerError::Range(format!("'{value}' does not exist in {}", timezone.name()))
        })
}

fn print_json<T: Serialize>(value: &T) -> Result<(), SchedulerError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
