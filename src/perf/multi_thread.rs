//! # Multi-thread perf driver
//!
//! Spawns `thread_count` threads sharing one worker, partitions the send
//! and receive buffers by thread, synchronizes phases, and aggregates
//! status. Grounded on `libperf.c`'s multi-threaded driver.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Barrier, Mutex};

use crossbeam::thread as cb_thread;
use serde::Serialize;

use crate::error::{CoreError, CoreResult, ErrorKind};
use crate::perf::context::{BufferView, PerfContext};
use crate::perf::params::{Parameters, TestType, ThreadModeKind};
use crate::perf::stats::{self, Counters, StatsResult, TimingRing};
use crate::rte::Rte;
use crate::worker::{ThreadMode, Worker};

/// Per-thread local result handed back through the shared slot array once
/// a thread finishes its run phase.
struct ThreadResult {
    ring: TimingRing,
    current: Counters,
    prev: Counters,
}

#[derive(Debug, Clone, Serialize)]
pub struct MultiThreadReport {
    pub stats: StatsResult,
    pub iters_per_thread: u64,
    pub thread_count: usize,
}

/// Runs `step` on `thread_count` threads sharing `worker`. `step` receives
/// the thread index and its per-thread context (already offset by
/// `thread_id * msg_size`) and returns `(msgs, bytes)` for one completed
/// operation, same contract as the single-threaded driver.
///
/// Any thread's failure is captured in a shared status array; the first
/// non-OK status observed after either phase barrier is surfaced to the
/// caller, and siblings stop without attempting further iterations.
pub fn run<F>(
    params: &Parameters,
    worker: &Worker,
    rte: &mut dyn Rte,
    msg_size: usize,
    step: F,
) -> CoreResult<MultiThreadReport>
where
    F: Fn(usize, &Worker, &mut PerfContext) -> CoreResult<(u64, u64)> + Sync,
{
    if params.thread_mode == ThreadModeKind::Single {
        return Err(CoreError::invalid_param(
            "multi-thread driver requires thread_mode != SINGLE",
        ));
    }
    if worker.thread_mode() != ThreadMode::Multi {
        return Err(CoreError::invalid_param(
            "multi-thread driver requires a worker created with MULTI thread mode",
        ));
    }

    let thread_count = params.thread_count.max(1);
    let statuses: Vec<AtomicU8> = (0..thread_count).map(|_| AtomicU8::new(0)).collect();
    let warmup_iters = params.clamped_warmup_iter();
    let is_pingpong = params.test_type == TestType::PingPong;

    // Warmup phase: local barrier only, no process-level rendezvous yet.
    let warmup_barrier = Barrier::new(thread_count);
    cb_thread::scope(|scope| {
        for thread_id in 0..thread_count {
            let statuses = &statuses;
            let step = &step;
            let warmup_barrier = &warmup_barrier;
            scope.spawn(move |_| {
                let offset = (thread_id * msg_size) as u64;
                let mut ctx = PerfContext::new(
                    BufferView {
                        send_buffer: offset,
                        recv_buffer: offset,
                        offset,
                    },
                    Vec::new(),
                    warmup_iters,
                    0,
                );
                for _ in 0..warmup_iters {
                    if step(thread_id, worker, &mut ctx).is_err() {
                        statuses[thread_id].store(1, Ordering::SeqCst);
                        break;
                    }
                }
                warmup_barrier.wait();
            });
        }
    })
    .map_err(|_| CoreError::fatal("warmup thread panicked"))?;

    if warmup_iters > 0 {
        rte.barrier()?;
    }
    if let Some(bad) = statuses.iter().position(|s| s.load(Ordering::SeqCst) != 0) {
        return Err(CoreError::new(
            ErrorKind::Fatal,
            format!("thread {bad} failed during warmup"),
        ));
    }

    // Run phase: each thread measures into its own context; results are
    // collected through a shared mutex-guarded slot array.
    let run_barrier = Barrier::new(thread_count);
    let results: Mutex<Vec<Option<ThreadResult>>> =
        Mutex::new((0..thread_count).map(|_| None).collect());

    cb_thread::scope(|scope| {
        for thread_id in 0..thread_count {
            let statuses = &statuses;
            let step = &step;
            let run_barrier = &run_barrier;
            let results = &results;
            scope.spawn(move |_| {
                let offset = (thread_id * msg_size) as u64;
                let mut ctx = PerfContext::new(
                    BufferView {
                        send_buffer: offset,
                        recv_buffer: offset,
                        offset,
                    },
                    Vec::new(),
                    params.max_iter,
                    params.report_interval,
                );
                ctx.reset(params.max_time);
                loop {
                    if step(thread_id, worker, &mut ctx).is_err() {
                        statuses[thread_id].store(1, Ordering::SeqCst);
                        break;
                    }
                    if ctx.iter_exceeded() || ctx.time_exceeded() {
                        break;
                    }
                }
                results.lock().expect("results lock poisoned")[thread_id] = Some(ThreadResult {
                    ring: ctx.ring.clone(),
                    current: ctx.current,
                    prev: ctx.prev,
                });
                run_barrier.wait();
            });
        }
    })
    .map_err(|_| CoreError::fatal("run-phase thread panicked"))?;

    rte.barrier()?;
    if let Some(bad) = statuses.iter().position(|s| s.load(Ordering::SeqCst) != 0) {
        return Err(CoreError::new(
            ErrorKind::Fatal,
            format!("thread {bad} failed during run"),
        ));
    }

    // Thread 0 performs the statistical reduction: sum counters across
    // threads, use thread 0's timing ring for the median (a shared ring
    // across threads would require a lock on the hot path every sample).
    let results = results.into_inner().expect("results lock poisoned");
    let mut combined = Counters::default();
    let mut combined_prev = Counters::default();
    let mut iters_per_thread = 0;
    let mut ring0 = TimingRing::new();
    for (idx, r) in results.into_iter().enumerate() {
        let r = r.ok_or_else(|| CoreError::fatal("missing thread result"))?;
        combined.msgs += r.current.msgs;
        combined.bytes += r.current.bytes;
        combined.time = combined.time.max(r.current.time);
        combined.iters += r.current.iters;
        combined_prev.msgs += r.prev.msgs;
        combined_prev.bytes += r.prev.bytes;
        combined_prev.time = combined_prev.time.max(r.prev.time);
        combined_prev.iters += r.prev.iters;
        if idx == 0 {
            iters_per_thread = r.current.iters;
            ring0 = r.ring;
        }
    }

    let stats = stats::compute(&ring0, combined, combined_prev, 0, is_pingpong);
    let report = MultiThreadReport {
        stats,
        iters_per_thread,
        thread_count,
    };
    let bytes = serde_json::to_vec(&report).unwrap_or_default();
    rte.report(&bytes, true)?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atomic_selector::AtomicPolicy;
    use crate::capability::FeatureSet;
    use crate::rte::loopback::LoopbackRte;
    use crate::transport::loopback::LoopbackFactory;
    use crate::transport::InterfaceConfig;
    use crate::worker::{AsyncContext, WorkerConfig};

    fn multi_worker(num_tls: usize) -> Worker {
        let cfg = WorkerConfig {
            thread_mode: ThreadMode::Multi,
            async_context: AsyncContext::Thread,
            num_tls,
            features: FeatureSet::AM | FeatureSet::AMO64,
            atomic_policy: AtomicPolicy::Cpu,
            cpu_mask: vec![],
        };
        let iface_cfg = InterfaceConfig {
            transport_name: "loopback".into(),
            cpu_mask: vec![],
        };
        let factory = LoopbackFactory;
        let factories: Vec<(&InterfaceConfig, &dyn crate::transport::InterfaceFactory)> =
            (0..num_tls).map(|_| (&iface_cfg, &factory as &dyn crate::transport::InterfaceFactory)).collect();
        Worker::create(cfg, &factories).unwrap()
    }

    fn params(thread_count: usize, max_iter: u64, warmup_iter: u64) -> Parameters {
        use crate::perf::params::{Api, CommandKind, DataLayoutKind};
        Parameters {
            api: Api::Messaging,
            command: CommandKind::Put,
            test_type: TestType::StreamUni,
            data_layout: DataLayoutKind::Bcopy,
            msg_size_list: vec![64],
            iov_stride: 0,
            am_hdr_size: 0,
            fc_window: 0,
            max_outstanding: 1,
            alignment: 8,
            warmup_iter,
            max_iter,
            max_time: 0.0,
            report_interval: 0,
            thread_count,
            thread_mode: ThreadModeKind::Multi,
            flags: 0,
        }
    }

    #[test]
    fn rejects_single_thread_mode_parameters() {
        let worker = multi_worker(2);
        let mut rte = LoopbackRte::new();
        let p = params(2, 10, 0);
        let mut single_mode = p.clone();
        single_mode.thread_mode = ThreadModeKind::Single;
        let result = run(&single_mode, &worker, &mut rte, 64, |_id, _w, _ctx| Ok((1, 64)));
        assert!(result.is_err());
    }

    #[test]
    fn all_threads_contribute_to_the_combined_iteration_count() {
        let worker = multi_worker(2);
        let mut rte = LoopbackRte::new();
        let p = params(4, 20, 0);
        let report = run(&p, &worker, &mut rte, 64, |_id, _w, _ctx| Ok((1, 64))).unwrap();
        assert_eq!(report.thread_count, 4);
        assert_eq!(report.iters_per_thread, 20);
        assert!(rte.reports().last().unwrap().1);
    }

    #[test]
    fn a_failing_thread_surfaces_as_a_fatal_error_for_every_sibling() {
        let worker = multi_worker(2);
        let mut rte = LoopbackRte::new();
        let p = params(3, 20, 0);
        let result = run(&p, &worker, &mut rte, 64, |id, _w, _ctx| {
            if id == 1 {
                Err(CoreError::fatal("simulated transport failure"))
            } else {
                Ok((1, 64))
            }
        });
        assert!(result.is_err());
    }
}
