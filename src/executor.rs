use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::domain::{EntityId, Fact, SkipReason, WriteOutcome, WritePlan};
use crate::error::SyncError;
use crate::kb::KbClient;

const BASE_DELAY_MS: u64 = 250;

/// Applies reconciliation plans against the remote store. Safe to re-run:
/// writing an identical value again converges on the same remote state, and
/// the store's own conflict detection backstops stale snapshots.
pub struct WriteExecutor<'a, K: KbClient> {
    kb: &'a K,
    max_retries: usize,
    dry_run: bool,
    target_unique: bool,
}

impl<'a, K: KbClient> WriteExecutor<'a, K> {
    pub fn new(kb: &'a K, max_retries: usize, dry_run: bool, target_unique: bool) -> Self {
        Self {
            kb,
            max_retries,
            dry_run,
            target_unique,
        }
    }

    pub fn execute(&self, entity: &EntityId, fact: &Fact, plan: &WritePlan) -> WriteOutcome {
        let replace_references = match plan {
            WritePlan::NoOp => {
                return WriteOutcome::Skipped {
                    reason: SkipReason::UpToDate,
                };
            }
            WritePlan::Create => false,
            WritePlan::UpdateReference => true,
        };

        if self.dry_run {
            return WriteOutcome::Skipped {
                reason: SkipReason::DryRun,
            };
        }

        let mut attempt = 0usize;
        loop {
            match self.kb.write_claim(entity, fact, replace_references) {
                Ok(()) => {
                    debug!(entity = %entity, property = %fact.property, "claim written");
                    return WriteOutcome::Written {
                        entity: entity.clone(),
                    };
                }
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    let delay = backoff_delay(attempt);
                    warn!(
                        entity = %entity,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "transient write failure, backing off"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                // Conflicts repeat deterministically, so they are never
                // retried. On a property configured as unique the store is
                // enforcing the expected constraint; otherwise config and
                // store disagree about uniqueness.
                Err(err @ SyncError::WriteConflict { .. }) => {
                    let detail = if self.target_unique {
                        format!("{err}, manual review required")
                    } else {
                        format!("{err} (property not declared unique in config)")
                    };
                    return WriteOutcome::Error { detail };
                }
                Err(err) => {
                    return WriteOutcome::Error {
                        detail: err.to_string(),
                    };
                }
            }
        }
    }
}

fn backoff_delay(attempt: usize) -> Duration {
    Duration::from_millis(BASE_DELAY_MS << attempt.min(6))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(0), Duration::from_millis(250));
        assert_eq!(backoff_delay(1), Duration::from_millis(500));
        assert_eq!(backoff_delay(3), Duration::from_millis(2000));
        assert_eq!(backoff_delay(10), backoff_delay(6));
    }
}
