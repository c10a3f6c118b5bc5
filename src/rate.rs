use crate::session::Traffic;
use serde::Serialize;
use std::time::Instant;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Throughput {
    pub sent_per_sec: f64,
    pub received_per_sec: f64,
}

/// Bytes-per-second between successive samples of a cumulative counter.
/// Owned by whichever poller reports it.
#[derive(Debug, Default)]
pub struct TrafficRate {
    last: Option<(Instant, Traffic)>,
}

impl TrafficRate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sample and return the rate since the previous one.
    /// The first sample, or a non-advancing clock, yields zero.
    pub fn sample(&mut self, now: Instant, traffic: Traffic) -> Throughput {
        let rate = match self.last {
            Some((then, prev)) => {
                let elapsed = now.saturating_duration_since(then).as_secs_f64();
                if elapsed > 0.0 {
                    Throughput {
                        sent_per_sec: traffic.sent.saturating_sub(prev.sent) as f64 / elapsed,
                        received_per_sec: traffic.received.saturating_sub(prev.received) as f64
                            / elapsed,
                    }
                } else {
                    Throughput::default()
                }
            }
            None => Throughput::default(),
        };
        self.last = Some((now, traffic));
        rate
    }
}
