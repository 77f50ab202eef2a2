pub mod availability;
pub mod event_links;
pub mod models;
pub mod prompt;
pub mod suggestion_validator;
