use crate::domain::models::MeetingSuggestion;
use crate::domain::prompt::PromptFingerprint;
use crate::infrastructure::error::SchedulerError;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

type OutcomeMap = HashMap<OutcomeKey, Vec<MeetingSuggestion>>;

/// Identifies one reproducible invocation: the same prompt sampled with the same seed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OutcomeKey {
    pub fingerprint: PromptFingerprint,
    pub seed: u32,
}

/// Ledger of accepted suggestions per invocation, used to spot a service that
/// does not honor its seed.
pub trait OutcomeRepository: Send + Sync {
    fn get(&self, key: &OutcomeKey) -> Result<Option<Vec<MeetingSuggestion>>, SchedulerError>;
    fn record(&self, key: OutcomeKey, accepted: &[MeetingSuggestion]) -> Result<(), SchedulerError>;
    fn remove(&self, key: &OutcomeKey) -> Result<(), SchedulerError>;
}

#[derive(Debug, Default)]
pub struct InMemoryOutcomeRepository {
    outcomes: Mutex<OutcomeMap>,
}

impl InMemoryOutcomeRepository {
    fn lock(&self) -> Result<MutexGuard<'_, OutcomeMap>, SchedulerError> {
        self.outcomes.lock().map_err(|error| {
            SchedulerError::InvalidConfig(format!("outcome cache lock poisoned: {error}"))
        })
    }
}

impl OutcomeRepository for InMemoryOutcomeRepository {
    fn get(&self, key: &OutcomeKey) -> Result<Option<Vec<MeetingSuggestion>>, SchedulerError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn record(
        &self,
        key: OutcomeKey,
        accepted: &[MeetingSuggestion],
    ) -> Result<(), SchedulerError> {
        self.lock()?.insert(key, accepted.to_vec());
        Ok(())
    }

    fn remove(&self, key: &OutcomeKey) -> Result<(), SchedulerError> {
        self.lock()?.remove(key);
        Ok(())
    }
}
