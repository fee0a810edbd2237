//! # Statistics engine
//!
//! Computes latency (median via quickselect plus moving/cumulative
//! averages), bandwidth, and message rate from a sample window. Grounded
//! on `libperf.c`'s timing ring and report computation. The median is
//! quickselect over raw samples rather than an HDR-histogram percentile,
//! and deliberately reads the ring unconditionally rather than only the
//! slots actually filled (see DESIGN.md).

use serde::Serialize;

pub const TIMING_QUEUE_SIZE: usize = 256;

/// Fixed-size ring of monotonic timestamps (in ticks, i.e. nanoseconds —
/// this crate has no hardware tick counter, so ticks and nanoseconds
/// coincide and `TICKS_PER_SEC` is simply 1e9).
pub const TICKS_PER_SEC: f64 = 1_000_000_000.0;

#[derive(Debug, Clone)]
pub struct TimingRing {
    samples: [u64; TIMING_QUEUE_SIZE],
    head: usize,
    filled: usize,
}

impl TimingRing {
    pub fn new() -> Self {
        Self {
            samples: [0; TIMING_QUEUE_SIZE],
            head: 0,
            filled: 0,
        }
    }

    pub fn push(&mut self, ticks: u64) {
        self.samples[self.head] = ticks;
        self.head = (self.head + 1) % TIMING_QUEUE_SIZE;
        self.filled = (self.filled + 1).min(TIMING_QUEUE_SIZE);
    }

    pub fn reset(&mut self) {
        self.samples = [0; TIMING_QUEUE_SIZE];
        self.head = 0;
        self.filled = 0;
    }

    /// Number of samples actually produced since the last reset. Not
    /// consulted by [`median`]: the median reads the full backing array
    /// regardless, including any zeroed unfilled slots — a known quirk
    /// preserved from the original timing-ring report path rather than
    /// one this crate silently fixes.
    pub fn filled(&self) -> usize {
        self.filled
    }
}

impl Default for TimingRing {
    fn default() -> Self {
        Self::new()
    }
}

/// Median-of-three quickselect: an in-place, allocation-free partial sort
/// that positions the median element without fully sorting the slice.
fn quickselect_median(data: &mut [u64]) -> u64 {
    let mid = data.len() / 2;
    quickselect(data, mid)
}

fn quickselect(data: &mut [u64], k: usize) -> u64 {
    let mut lo = 0;
    let mut hi = data.len() - 1;
    loop {
        if lo == hi {
            return data[lo];
        }
        let pivot_idx = median_of_three(data, lo, hi);
        let pivot_idx = partition(data, lo, hi, pivot_idx);
        if k == pivot_idx {
            return data[k];
        } else if k < pivot_idx {
            hi = pivot_idx - 1;
        } else {
            lo = pivot_idx + 1;
        }
    }
}

fn median_of_three(data: &[u64], lo: usize, hi: usize) -> usize {
    let mid = lo + (hi - lo) / 2;
    let (a, b, c) = (data[lo], data[mid], data[hi]);
    if (a <= b && b <= c) || (c <= b && b <= a) {
        mid
    } else if (b <= a && a <= c) || (c <= a && a <= b) {
        lo
    } else {
        hi
    }
}

fn partition(data: &mut [u64], lo: usize, hi: usize, pivot_idx: usize) -> usize {
    data.swap(pivot_idx, hi);
    let pivot = data[hi];
    let mut store = lo;
    for i in lo..hi {
        if data[i] < pivot {
            data.swap(i, store);
            store += 1;
        }
    }
    data.swap(store, hi);
    store
}

/// `latency.typical`: median of the timing ring, converted from ticks to
/// seconds and halved for ping-pong (latency is half the round trip).
pub fn latency_typical(ring: &TimingRing, is_pingpong: bool) -> f64 {
    let mut copy = ring.samples;
    let median_ticks = quickselect_median(&mut copy);
    let factor = if is_pingpong { 2.0 } else { 1.0 };
    (median_ticks as f64 / TICKS_PER_SEC) / factor
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Counters {
    pub time: u64,
    pub msgs: u64,
    pub bytes: u64,
    pub iters: u64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Metric {
    pub typical: f64,
    pub moment_average: f64,
    pub total_average: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StatsResult {
    pub latency: Metric,
    pub bandwidth: Metric,
    pub msgrate: Metric,
}

/// Computes the full result from the ring plus the current/previous
/// counter snapshots and the run's start time, all in ticks.
pub fn compute(
    ring: &TimingRing,
    current: Counters,
    prev: Counters,
    start_time: u64,
    is_pingpong: bool,
) -> StatsResult {
    let latency_factor = if is_pingpong { 2.0 } else { 1.0 };

    let dt_moment = (current.time.saturating_sub(prev.time)) as f64 / TICKS_PER_SEC;
    let diters_moment = (current.iters.saturating_sub(prev.iters)) as f64;
    let dt_total = (current.time.saturating_sub(start_time)) as f64 / TICKS_PER_SEC;

    let latency = Metric {
        typical: latency_typical(ring, is_pingpong),
        moment_average: if diters_moment > 0.0 {
            (dt_moment / diters_moment) / latency_factor
        } else {
            0.0
        },
        total_average: if current.iters > 0 {
            (dt_total / current.iters as f64) / latency_factor
        } else {
            0.0
        },
    };

    let bandwidth = Metric {
        typical: 0.0,
        moment_average: if dt_moment > 0.0 {
            (current.bytes.saturating_sub(prev.bytes)) as f64 / dt_moment
        } else {
            0.0
        },
        total_average: if dt_total > 0.0 {
            current.bytes as f64 / dt_total
        } else {
            0.0
        },
    };

    let msgrate = Metric {
        typical: 0.0,
        moment_average: if dt_moment > 0.0 {
            (current.msgs.saturating_sub(prev.msgs)) as f64 / dt_moment
        } else {
            0.0
        },
        total_average: if dt_total > 0.0 {
            current.msgs as f64 / dt_total
        } else {
            0.0
        },
    };

    StatsResult {
        latency,
        bandwidth,
        msgrate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quickselect_median_matches_sort_based_median_on_odd_length() {
        let mut data = [5u64, 1, 4, 2, 8, 9, 3];
        let expected = {
            let mut sorted = data;
            sorted.sort_unstable();
            sorted[sorted.len() / 2]
        };
        assert_eq!(quickselect_median(&mut data), expected);
    }

    #[test]
    fn pingpong_latency_typical_is_median_over_two_ticks_per_sec() {
        let mut ring = TimingRing::new();
        for _ in 0..TIMING_QUEUE_SIZE {
            ring.push(2_000_000_000);
        }
        let latency = latency_typical(&ring, true);
        assert!((latency - 1.0).abs() < 1e-9);
    }

    #[test]
    fn partially_filled_ring_still_reads_the_full_backing_array() {
        let mut ring = TimingRing::new();
        ring.push(4_000_000_000);
        assert_eq!(ring.filled(), 1);
        // median over 255 zeroed slots and one real sample is 0 — the
        // preserved quirk, not a bug.
        let latency = latency_typical(&ring, false);
        assert_eq!(latency, 0.0);
    }

    #[test]
    fn bandwidth_typical_and_msgrate_typical_are_always_zero() {
        let ring = TimingRing::new();
        let result = compute(&ring, Counters::default(), Counters::default(), 0, false);
        assert_eq!(result.bandwidth.typical, 0.0);
        assert_eq!(result.msgrate.typical, 0.0);
    }

    #[test]
    fn total_average_bandwidth_matches_bytes_over_elapsed_seconds() {
        let ring = TimingRing::new();
        let current = Counters {
            time: 2_000_000_000,
            msgs: 100,
            bytes: 200_000,
            iters: 100,
        };
        let result = compute(&ring, current, Counters::default(), 0, false);
        assert!((result.bandwidth.total_average - 100_000.0).abs() < 1e-6);
    }
}
