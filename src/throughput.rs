//! Throughput measurement for the self-test.

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

/// Bytes moved over a measured wall-clock interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Throughput {
    pub bytes: u64,
    pub elapsed: Duration,
}

impl Throughput {
    pub fn new(bytes: u64, elapsed: Duration) -> Self {
        Self { bytes, elapsed }
    }

    /// Mean rate in megabits (10^6 bits) per second. Zero for an empty interval.
    pub fn mbps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        (self.bytes as f64 * 8.0 / 1_000_000.0) / secs
    }
}

impl fmt::Display for Throughput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} Mbps", self.mbps())
    }
}

/// Upload and download results of a full throughput test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThroughputReport {
    pub upload: Throughput,
    pub download: Throughput,
}

/// Await `fut` and return its output with the time it took.
pub async fn timed<F: Future>(fut: F) -> (F::Output, Duration) {
    let start = Instant::now();
    let output = fut.await;
    (output, start.elapsed())
}
