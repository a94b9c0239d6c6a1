use tokio::time::{Duration, Instant};

/// Tick-loop timings. The tick period is bounded by `recv_timeout` plus
/// `yield_slice`, independent of the configured poll interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTiming {
    pub recv_timeout: Duration,
    pub idle_backoff: Duration,
    pub yield_slice: Duration,
}

impl Default for LinkTiming {
    fn default() -> Self {
        Self {
            recv_timeout: Duration::from_secs(1),
            idle_backoff: Duration::from_secs(5),
            yield_slice: Duration::from_millis(50),
        }
    }
}

/// Decides when the next downlink frame is due.
#[derive(Debug, Default, Clone, Copy)]
pub struct PollTimer {
    last_sent: Option<Instant>,
}

impl PollTimer {
    pub fn due(&self, now: Instant, interval: Duration) -> bool {
        self.last_sent
            .is_none_or(|last| now.duration_since(last) >= interval)
    }

    pub fn mark_sent(&mut self, at: Instant) {
        self.last_sent = Some(at);
    }

    /// How far past its interval a send at `now` is, in ms. Negative when early.
    pub fn lateness_ms(&self, now: Instant, interval: Duration) -> Option<f64> {
        self.last_sent.map(|last| {
            let actual = now.duration_since(last).as_secs_f64();
            (actual - interval.as_secs_f64()) * 1000.0
        })
    }
}
