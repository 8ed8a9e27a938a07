//! Challenge reuse ledger.
//!
//! A challenge may be presented any number of times within `window` of its
//! first use; after that it is rejected. Records past the window are swept
//! on every check, so the ledger stays bounded by the traffic of one window.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::error::AuthError;

pub struct ChallengeLedger {
    window: Duration,
    first_used: Mutex<HashMap<String, Instant>>,
}

impl ChallengeLedger {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            first_used: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Accept `challenge` if unseen or still inside its window, then sweep
    /// records past the window. A rejection returns without sweeping.
    pub fn check_and_record(&self, challenge: &str) -> Result<(), AuthError> {
        let now = Instant::now();
        let mut records = self.first_used.lock().unwrap_or_else(|e| e.into_inner());

        match records.get(challenge) {
            // Rejected before the sweep so the record survives this call.
            Some(first) if now.duration_since(*first) > self.window => {
                debug!(challenge, age = ?now.duration_since(*first), "challenge past reuse window");
                return Err(AuthError::ChallengeExpired);
            }
            Some(first) => {
                debug!(challenge, age = ?now.duration_since(*first), "challenge reused within window");
            }
            None => {
                records.insert(challenge.to_string(), now);
            }
        }

        let before = records.len();
        let window = self.window;
        records.retain(|_, first| now.duration_since(*first) <= window);
        let swept = before - records.len();
        if swept > 0 {
            debug!(swept, remaining = records.len(), "swept expired challenges");
        }

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.first_used
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(120);

    #[tokio::test(start_paused = true)]
    async fn reuse_allowed_inside_window() {
        let ledger = ChallengeLedger::new(WINDOW);
        assert_eq!(ledger.check_and_record("DEV_1"), Ok(()));
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(ledger.check_and_record("DEV_1"), Ok(()));
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(ledger.check_and_record("DEV_1"), Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn reuse_rejected_after_window() {
        let ledger = ChallengeLedger::new(WINDOW);
        ledger.check_and_record("DEV_1").unwrap();
        tokio::time::advance(WINDOW + Duration::from_secs(1)).await;
        assert_eq!(
            ledger.check_and_record("DEV_1"),
            Err(AuthError::ChallengeExpired)
        );
        assert_eq!(
            ledger.check_and_record("DEV_1"),
            Err(AuthError::ChallengeExpired)
        );
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn old_records_are_swept() {
        let ledger = ChallengeLedger::new(WINDOW);
        ledger.check_and_record("a").unwrap();
        ledger.check_and_record("b").unwrap();
        assert_eq!(ledger.len(), 2);

        tokio::time::advance(WINDOW * 2).await;
        ledger.check_and_record("c").unwrap();
        assert_eq!(ledger.len(), 1);
    }
}
