//! Ring-buffer call statistics (§4.11 "enableStats"/"maxStatsSamples"),
//! behind a flag so disabled managers pay no bookkeeping cost.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Http,
    Mqtt,
}

#[derive(Debug, Clone)]
pub struct CallSample {
    pub transport: Transport,
    pub status: u16,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

pub const DEFAULT_MAX_SAMPLES: usize = 200;

/// Fixed-capacity ring buffer of recent HTTP/MQTT call outcomes.
pub struct CallStats {
    enabled: bool,
    max_samples: usize,
    samples: Mutex<VecDeque<CallSample>>,
}

impl CallStats {
    pub fn new(enabled: bool, max_samples: usize) -> Self {
        Self {
            enabled,
            max_samples: max_samples.max(1),
            samples: Mutex::new(VecDeque::with_capacity(max_samples.max(1))),
        }
    }

    pub async fn record(&self, transport: Transport, status: u16, duration_ms: u64) {
        if !self.enabled {
            return;
        }
        let mut samples = self.samples.lock().await;
        if samples.len() >= self.max_samples {
            samples.pop_front();
        }
        samples.push_back(CallSample {
            transport,
            status,
            duration_ms,
            timestamp: Utc::now(),
        });
    }

    pub async fn snapshot(&self) -> Vec<CallSample> {
        self.samples.lock().await.iter().cloned().collect()
    }

    pub async fn count_for(&self, transport: Transport) -> usize {
        self.samples
            .lock()
            .await
            .iter()
            .filter(|s| s.transport == transport)
            .count()
    }
}

impl Default for CallStats {
    fn default() -> Self {
        Self::new(false, DEFAULT_MAX_SAMPLES)
    }
}
