//! # Single-threaded perf driver
//!
//! Runs the warmup → barrier → measured-run sequence for one thread,
//! sampling timings into the perf context and periodically reporting
//! partial results. Grounded on `libperf.c`'s dispatch loop, including its
//! warmup clamp and `report_interval` partial-report behavior.

use serde::Serialize;

use crate::error::CoreResult;
use crate::perf::context::PerfContext;
use crate::perf::params::{Parameters, TestType};
use crate::perf::stats::{self, StatsResult};
use crate::rte::Rte;

/// One measured operation's contribution: message count and byte count,
/// as the caller's command-specific step function produced them.
pub type StepFn<'a> = dyn FnMut(&mut PerfContext) -> CoreResult<(u64, u64)> + 'a;

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub stats: StatsResult,
    pub iters: u64,
}

/// Runs one full measured test: optional warmup (clamped per
/// `Parameters::clamped_warmup_iter`), a rendezvous barrier, then the
/// timed loop until `max_iter`/`max_time` is reached. `report()` on `rte`
/// is called with `final=false` every `report_interval` iterations and
/// with `final=true` once at the end.
pub fn run(params: &Parameters, ctx: &mut PerfContext, rte: &mut dyn Rte, mut step: Box<StepFn<'_>>) -> CoreResult<RunReport> {
    let is_pingpong = params.test_type == TestType::PingPong;

    let warmup_iters = params.clamped_warmup_iter();
    if warmup_iters > 0 {
        ctx.reset(0.0);
        let saved_report_interval = ctx.report_interval;
        ctx.report_interval = 0;
        for _ in 0..warmup_iters {
            run_one_iteration(ctx, &mut step)?;
        }
        ctx.report_interval = saved_report_interval;
        rte.barrier()?;
    }
    ctx.reset(params.max_time);

    loop {
        run_one_iteration(ctx, &mut step)?;

        if ctx.due_for_partial_report() {
            report_partial(ctx, rte, is_pingpong)?;
        }

        if ctx.iter_exceeded() || ctx.time_exceeded() {
            break;
        }
    }

    let result = stats::compute(&ctx.ring, ctx.current, ctx.prev, ctx.start_ticks, is_pingpong);
    let report = RunReport {
        stats: result,
        iters: ctx.current.iters,
    };
    let bytes = serde_json::to_vec(&report).unwrap_or_default();
    rte.report(&bytes, true)?;
    Ok(report)
}

fn run_one_iteration(ctx: &mut PerfContext, step: &mut StepFn<'_>) -> CoreResult<()> {
    let before = ctx.now();
    let (msgs, bytes) = step(ctx)?;
    let after = ctx.now();
    ctx.record_sample(after.saturating_sub(before), msgs, bytes);
    Ok(())
}

fn report_partial(ctx: &mut PerfContext, rte: &mut dyn Rte, is_pingpong: bool) -> CoreResult<()> {
    let partial = stats::compute(&ctx.ring, ctx.current, ctx.prev, ctx.start_ticks, is_pingpong);
    let bytes = serde_json::to_vec(&partial).unwrap_or_default();
    rte.report(&bytes, false)?;
    ctx.mark_reported();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perf::context::BufferView;
    use crate::perf::params::{Api, CommandKind, DataLayoutKind, ThreadModeKind};
    use crate::rte::loopback::LoopbackRte;

    fn params(max_iter: u64, warmup_iter: u64, report_interval: u64) -> Parameters {
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
            report_interval,
            thread_count: 1,
            thread_mode: ThreadModeKind::Single,
            flags: 0,
        }
    }

    #[test]
    fn run_stops_after_max_iter_and_reports_final() {
        let p = params(50, 0, 0);
        let mut ctx = PerfContext::new(BufferView::default(), Vec::new(), p.max_iter, p.report_interval);
        let mut rte = LoopbackRte::new();
        let report = run(&p, &mut ctx, &mut rte, Box::new(|_ctx| Ok((1, 64)))).unwrap();
        assert_eq!(report.iters, 50);
        let reports = rte.reports();
        assert!(reports.last().unwrap().1);
    }

    #[test]
    fn warmup_iterations_are_not_counted_in_the_final_result() {
        let p = params(20, 200, 0);
        assert_eq!(p.clamped_warmup_iter(), 2);
        let mut ctx = PerfContext::new(BufferView::default(), Vec::new(), p.max_iter, p.report_interval);
        let mut rte = LoopbackRte::new();
        let report = run(&p, &mut ctx, &mut rte, Box::new(|_ctx| Ok((1, 64)))).unwrap();
        assert_eq!(report.iters, 20);
    }

    #[test]
    fn periodic_partial_reports_are_emitted_with_final_false() {
        let p = params(25, 0, 10);
        let mut ctx = PerfContext::new(BufferView::default(), Vec::new(), p.max_iter, p.report_interval);
        let mut rte = LoopbackRte::new();
        run(&p, &mut ctx, &mut rte, Box::new(|_ctx| Ok((1, 64)))).unwrap();
        let reports = rte.reports();
        assert!(reports.iter().filter(|(_, is_final)| !is_final).count() >= 2);
        assert!(reports.last().unwrap().1);
    }
}
