//! Burst coalescing for reload triggers
//!
//! Capability changes arrive in bursts when many nodes change together (bulk
//! edits). The first trigger in a window waits the window out and runs; every
//! trigger landing inside the same window is absorbed.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Trailing-edge debouncer on tokio time
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    deadline: Mutex<Option<Instant>>,
}

impl Debouncer {
    /// Debouncer with the given window
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: Mutex::new(None),
        }
    }

    /// Join the current burst
    ///
    /// Returns `true` for the one caller that should perform the coalesced
    /// work (after waiting out the window), `false` for callers absorbed
    /// into an already-open window.
    pub async fn coalesce(&self) -> bool {
        {
            let mut deadline = self.deadline.lock().await;
            let now = Instant::now();
            if let Some(active) = *deadline {
                if now < active {
                    return false;
                }
            }
            *deadline = Some(now + self.window);
        }
        tokio::time::sleep(self.window).await;
        let mut deadline = self.deadline.lock().await;
        *deadline = None;
        true
    }
}
