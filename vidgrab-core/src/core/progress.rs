use std::time::{Duration, Instant};

/// One progress report from a fetch step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FetchProgress {
    pub percent: f64,
    pub speed_bytes_per_sec: f64,
    pub eta_seconds: Option<f64>,
}

pub struct ProgressThrottle {
    last_emit: Option<Instant>,
    min_interval: Duration,
}

impl ProgressThrottle {
    pub fn new(min_interval_ms: u64) -> Self {
        Self {
            last_emit: None,
            min_interval: Duration::from_millis(min_interval_ms),
        }
    }

    pub fn should_emit(&mut self) -> bool {
        let now = Instant::now();
        match self.last_emit {
            Some(last) if now.duration_since(last) < self.min_interval => false,
            _ => {
                self.last_emit = Some(now);
                true
            }
        }
    }
}

/// Maps the progress of stream `index` out of `total` onto the job's
/// overall 0–100 range.
#[derive(Debug, Clone, Copy)]
pub struct StreamSlot {
    pub index: usize,
    pub total: usize,
}

impl StreamSlot {
    pub fn single() -> Self {
        Self { index: 0, total: 1 }
    }

    pub fn overall(&self, percent: f64) -> f64 {
        let total = self.total.max(1) as f64;
        let percent = percent.clamp(0.0, 100.0);
        (self.index as f64 / total) * 100.0 + percent / total
    }
}
