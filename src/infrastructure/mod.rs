pub mod config;
pub mod error;
pub mod event_normalizer;
pub mod gemini_client;
pub mod outcome_cache;
