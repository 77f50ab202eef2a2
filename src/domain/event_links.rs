use chrono::{NaiveDate, NaiveTime};
use sha2::{Digest, Sha256};

const EVENT_LINK_PATH: &str = "/calendar/events/create-from-suggestion";

/// Stable id for a suggested slot between two participants.
pub fn suggestion_id(
    date: NaiveDate,
    time: NaiveTime,
    participant_a: &str,
    participant_b: &str,
) -> String {
    let content = format!(
        "{}_{}_{}_{}",
        date.format("%Y-%m-%d"),
        time.format("%H:%M"),
        participant_a.trim(),
        participant_b.trim()
    );
    let digest = hex::encode(Sha256::digest(content.as_bytes()));
    format!("suggestion_{}", &digest[..8])
}

/// Link the hosting layer exposes for turning a suggestion into a calendar event.
pub fn event_creation_link(base_url: &str, suggestion_id: &str) -> String {
    format!(
        "{}{}/{}",
        base_url.trim_end_matches('/'),
        EVENT_LINK_PATH,
        suggestion_id
    )
}
