//! # Perf context
//!
//! Per-run state: memory buffers, offsets, timing ring, iteration and time
//! bounds, and the peer table. Grounded on `libperf.c`'s
//! `ucx_perf_context_t`.

use std::time::Instant;

use crate::perf::stats::{Counters, TimingRing};
use crate::rendezvous::PeerEndpoint;

/// Per-thread view into the shared send/recv registration: a byte offset
/// computed as `thread_id * msg_size`, plus the buffer bases themselves
/// for single-threaded runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct BufferView {
    pub send_buffer: u64,
    pub recv_buffer: u64,
    pub offset: u64,
}

pub struct PerfContext {
    pub buffers: BufferView,
    pub peers: Vec<PeerEndpoint>,
    pub ring: TimingRing,
    pub current: Counters,
    pub prev: Counters,
    pub start_time: Instant,
    pub start_ticks: u64,
    pub end_ticks: Option<u64>,
    pub max_iter: u64,
    pub report_interval: u64,
    pub last_report_iter: u64,
}

fn now_ticks(start: Instant) -> u64 {
    start.elapsed().as_nanos() as u64
}

impl PerfContext {
    pub fn new(buffers: BufferView, peers: Vec<PeerEndpoint>, max_iter: u64, report_interval: u64) -> Self {
        let start_time = Instant::now();
        Self {
            buffers,
            peers,
            ring: TimingRing::new(),
            current: Counters::default(),
            prev: Counters::default(),
            start_time,
            start_ticks: 0,
            end_ticks: None,
            max_iter,
            report_interval,
            last_report_iter: 0,
        }
    }

    /// Snapshots `start_time`, computes `end_time = start + max_time` (or
    /// leaves it unbounded), and zeroes counters and the timing ring.
    pub fn reset(&mut self, max_time: f64) {
        self.start_time = Instant::now();
        self.start_ticks = 0;
        self.end_ticks = if max_time > 0.0 {
            Some((max_time * crate::perf::stats::TICKS_PER_SEC) as u64)
        } else {
            None
        };
        self.current = Counters::default();
        self.prev = Counters::default();
        self.ring.reset();
        self.last_report_iter = 0;
    }

    pub fn now(&self) -> u64 {
        now_ticks(self.start_time)
    }

    pub fn time_exceeded(&self) -> bool {
        match self.end_ticks {
            Some(end) => self.now() >= end,
            None => false,
        }
    }

    pub fn iter_exceeded(&self) -> bool {
        self.max_iter != 0 && self.current.iters >= self.max_iter
    }

    /// Records one completed operation: advances `current` and pushes a
    /// timing sample. `prev` is left untouched — it only moves forward at
    /// a report boundary, in [`mark_reported`](Self::mark_reported), so
    /// `moment_average` reflects the most recent reporting interval rather
    /// than a single iteration's delta.
    pub fn record_sample(&mut self, sample_ticks: u64, msgs: u64, bytes: u64) {
        self.current.time = self.now();
        self.current.iters += 1;
        self.current.msgs += msgs;
        self.current.bytes += bytes;
        self.ring.push(sample_ticks);
    }

    /// True every `report_interval` iterations since the last partial
    /// report (0 disables periodic reporting).
    pub fn due_for_partial_report(&self) -> bool {
        self.report_interval != 0
            && self.current.iters.saturating_sub(self.last_report_iter) >= self.report_interval
    }

    /// Report boundary: snapshots `current` into `prev` so the next
    /// `moment_average` is computed over the interval that just ended,
    /// and records the iteration count the report was taken at.
    pub fn mark_reported(&mut self) {
        self.prev = self.current;
        self.last_report_iter = self.current.iters;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_zeroes_counters_and_ring() {
        let mut ctx = PerfContext::new(BufferView::default(), Vec::new(), 100, 0);
        ctx.current.iters = 5;
        ctx.ring.push(123);
        ctx.reset(0.0);
        assert_eq!(ctx.current.iters, 0);
        assert_eq!(ctx.ring.filled(), 0);
        assert!(ctx.end_ticks.is_none());
    }

    #[test]
    fn iter_exceeded_true_once_max_iter_reached() {
        let mut ctx = PerfContext::new(BufferView::default(), Vec::new(), 3, 0);
        assert!(!ctx.iter_exceeded());
        ctx.current.iters = 3;
        assert!(ctx.iter_exceeded());
    }

    #[test]
    fn zero_max_iter_means_unbounded() {
        let ctx = PerfContext::new(BufferView::default(), Vec::new(), 0, 0);
        assert!(!ctx.iter_exceeded());
    }

    #[test]
    fn partial_report_due_every_report_interval_iterations() {
        let mut ctx = PerfContext::new(BufferView::default(), Vec::new(), 0, 10);
        for _ in 0..9 {
            ctx.current.iters += 1;
        }
        assert!(!ctx.due_for_partial_report());
        ctx.current.iters += 1;
        assert!(ctx.due_for_partial_report());
        ctx.mark_reported();
        assert!(!ctx.due_for_partial_report());
    }
}
