use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::race::{Outcome, Race};

/// Deadline for one attempt. Firing settles the dispatch as timed out
/// unless some attempt already won, in which case it does nothing.
pub struct TimeoutGuard {
    race: Arc<Race>,
    deadline: Instant,
}

impl TimeoutGuard {
    pub fn arm(race: Arc<Race>, delay: Duration) -> Self {
        Self {
            race,
            deadline: Instant::now() + delay,
        }
    }

    /// Settle as timed out now. Returns true only if this won the race.
    pub fn fire(&self) -> bool {
        self.race.settle(Outcome::TimedOut)
    }

    /// Wait for the deadline, then fire.
    pub async fn expire(&self) -> bool {
        tokio::time::sleep_until(self.deadline).await;
        self.fire()
    }
}
