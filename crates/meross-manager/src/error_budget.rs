//! Per-device LAN error budget (C2): a tumbling window that counts
//! transport failures and trips once a device has used up its
//! allowance, until the window rolls over.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

pub const DEFAULT_MAX_ERRORS: u32 = 1;
pub const DEFAULT_WINDOW_MS: u64 = 60_000;

struct Window {
    count: u32,
    window_start: Instant,
}

/// Tracks LAN transport failures per device uuid over a tumbling
/// window. Out of budget means the arbiter should not attempt LAN.
pub struct ErrorBudget {
    max_errors: u32,
    window: Duration,
    windows: Mutex<HashMap<String, Window>>,
}

impl ErrorBudget {
    pub fn new(max_errors: u32, window_ms: u64) -> Self {
        Self {
            max_errors,
            window: Duration::from_millis(window_ms),
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Record a transport failure for `uuid`. If the window has
    /// elapsed since it was last touched, the counter resets first.
    pub async fn notify_error(&self, uuid: &str) {
        let mut windows = self.windows.lock().await;
        let now = Instant::now();
        let entry = windows.entry(uuid.to_string()).or_insert(Window {
            count: 0,
            window_start: now,
        });

        if now.duration_since(entry.window_start) >= self.window {
            entry.count = 0;
            entry.window_start = now;
        }
        entry.count += 1;
    }

    pub async fn is_out_of_budget(&self, uuid: &str) -> bool {
        self.remaining(uuid).await == 0
    }

    /// Errors still allowed before the device is considered out of
    /// budget, accounting for window rollover without mutating state.
    pub async fn remaining(&self, uuid: &str) -> u32 {
        let windows = self.windows.lock().await;
        match windows.get(uuid) {
            None => self.max_errors,
            Some(entry) => {
                if Instant::now().duration_since(entry.window_start) >= self.window {
                    self.max_errors
                } else {
                    self.max_errors.saturating_sub(entry.count)
                }
            }
        }
    }

    pub async fn reset(&self, uuid: &str) {
        self.windows.lock().await.remove(uuid);
    }
}

impl Default for ErrorBudget {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ERRORS, DEFAULT_WINDOW_MS)
    }
}
