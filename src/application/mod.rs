pub mod bootstrap;
pub mod scheduling;
pub mod suggestion_client;
