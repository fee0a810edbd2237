//! # Demo binary
//!
//! Wires a loopback transport and a single-process rendezvous collaborator
//! together to run one perf scenario end to end and print a JSON report:
//! parse args, init logging, validate capabilities, run, print results.
//! A single-process, non-async demo scope throughout.

use std::sync::Mutex;

use anyhow::{anyhow, Result};
use clap::Parser;
use tracing::info;

use ucx_core_rs::am_router::{AmHandlerEntry, HandlerClass, HandlerOutcome};
use ucx_core_rs::atomic_selector::AtomicPolicy;
use ucx_core_rs::capability::{self, Command, FeatureSet, ValidationParams};
use ucx_core_rs::cli::Args;
use ucx_core_rs::logging;
use ucx_core_rs::perf::context::{BufferView, PerfContext};
use ucx_core_rs::perf::params::{CommandKind, Parameters, ThreadModeKind};
use ucx_core_rs::perf::{driver, multi_thread};
use ucx_core_rs::rte::loopback::LoopbackRte;
use ucx_core_rs::transport::loopback::LoopbackFactory;
use ucx_core_rs::transport::{Endpoint, InterfaceConfig, PackedRkey};
use ucx_core_rs::worker::{AsyncContext, ThreadMode, Worker, WorkerConfig};

fn main() -> Result<()> {
    let args = Args::parse();
    if !args.quiet {
        logging::init(args.verbose);
    }

    let params = Parameters::from(&args);
    let msg_size = *params
        .msg_size_list
        .first()
        .ok_or_else(|| anyhow!("message size list must not be empty"))?;

    if matches!(params.command, CommandKind::Am | CommandKind::Tag) && params.thread_count > 1 {
        return Err(anyhow!(
            "active-message and tag commands are demoed single-threaded only; pass --thread-count 1"
        ));
    }

    let features = match params.command {
        CommandKind::Am => FeatureSet::AM,
        CommandKind::Tag => FeatureSet::TAG,
        CommandKind::Add | CommandKind::Fadd | CommandKind::Swap | CommandKind::Cswap => {
            FeatureSet::AMO32 | FeatureSet::AMO64
        }
        _ => FeatureSet::RMA,
    };

    let num_tls = params.thread_count.max(1);
    let worker_cfg = WorkerConfig {
        thread_mode: if num_tls > 1 {
            ThreadMode::Multi
        } else {
            ThreadMode::Single
        },
        async_context: AsyncContext::Thread,
        num_tls,
        features,
        atomic_policy: AtomicPolicy::Cpu,
        cpu_mask: vec![],
    };
    let iface_cfg = InterfaceConfig {
        transport_name: "loopback".into(),
        cpu_mask: vec![],
    };
    let factory = LoopbackFactory;
    let factories: Vec<(&InterfaceConfig, &dyn ucx_core_rs::transport::InterfaceFactory)> =
        (0..num_tls).map(|_| (&iface_cfg, &factory as &dyn ucx_core_rs::transport::InterfaceFactory)).collect();
    let worker = Worker::create(worker_cfg, &factories)?;

    let attrs = worker.with_interface(0, |iface| Ok(iface.query()))?;
    let requirement = capability::validate(
        &ValidationParams {
            command: params.command.into(),
            data_layout: params.data_layout.into(),
            msg_size_list: &params.msg_size_list,
            iov_stride: params.iov_stride,
            am_hdr_size: params.am_hdr_size,
            max_outstanding: params.max_outstanding,
            fc_window: params.fc_window,
            fc_window_bound: usize::MAX,
            flags: params.param_flags(),
        },
        &attrs,
    )?;
    info!(
        "validated {:?} against interface {} (required flags 0x{:x}, size bound [{}, {}])",
        params.command, attrs.device_name, requirement.required_flags.0, requirement.min_size, requirement.max_size
    );

    let mut rte = LoopbackRte::new();
    let output_file = args.output_file.as_deref();

    match params.command {
        CommandKind::Am => run_am_demo(&worker, &params, msg_size, FeatureSet::AM, &mut rte, output_file)?,
        CommandKind::Tag => run_am_demo(&worker, &params, msg_size, FeatureSet::TAG, &mut rte, output_file)?,
        _ => run_one_sided_demo(&worker, &params, msg_size, &mut rte, output_file)?,
    }

    Ok(())
}

fn payload(msg_size: usize) -> Vec<u8> {
    vec![0xab; msg_size]
}

/// Runs a messaging-style command (AM or TAG) over the loopback path: both
/// share the same send/receive/progress mechanics, differing only in the
/// feature flag the handler is registered under.
fn run_am_demo(
    worker: &Worker,
    params: &Parameters,
    msg_size: usize,
    features: FeatureSet,
    rte: &mut LoopbackRte,
    output_file: Option<&std::path::Path>,
) -> Result<()> {
    use std::sync::atomic::{AtomicU64, Ordering};

    let received = std::sync::Arc::new(AtomicU64::new(0));
    let received_in_handler = received.clone();
    let entry = AmHandlerEntry {
        id: 0,
        features,
        class: HandlerClass::Async,
        handler: std::sync::Arc::new(move |msg| {
            received_in_handler.fetch_add(msg.data.len() as u64, Ordering::SeqCst);
            HandlerOutcome::Done
        }),
        tracer: None,
    };
    worker.register_am_handlers(&[entry]);

    let mut ep = worker.with_interface(0, |iface| iface.ep_create())?;
    let data = payload(msg_size);

    let mut ctx = PerfContext::new(BufferView::default(), Vec::new(), params.max_iter, params.report_interval);
    let step = move |_ctx: &mut PerfContext| -> ucx_core_rs::error::CoreResult<(u64, u64)> {
        ep.send_am(0, &[], &data)?;
        worker.progress();
        Ok((1, data.len() as u64))
    };
    let report = driver::run(params, &mut ctx, rte, Box::new(step))?;
    print_report(&serde_json::to_value(&report)?, output_file)?;
    info!("received {} bytes across the run", received.load(Ordering::SeqCst));
    Ok(())
}

fn run_one_sided_demo(
    worker: &Worker,
    params: &Parameters,
    msg_size: usize,
    rte: &mut LoopbackRte,
    output_file: Option<&std::path::Path>,
) -> Result<()> {
    let num_tls = params.thread_count.max(1);
    let data = payload(msg_size);

    let endpoints: Vec<Mutex<(Box<dyn Endpoint>, PackedRkey)>> = (0..num_tls)
        .map(|tls| -> ucx_core_rs::error::CoreResult<_> {
            worker.with_interface(tls, |iface| {
                let handle = iface.mem_alloc(msg_size)?;
                let rkey = iface.mkey_pack(&handle)?;
                let ep = iface.ep_create()?;
                Ok(Mutex::new((ep, rkey)))
            })
        })
        .collect::<ucx_core_rs::error::CoreResult<Vec<_>>>()?;

    let command: Command = params.command.into();

    if num_tls == 1 {
        let mut ctx = PerfContext::new(BufferView::default(), Vec::new(), params.max_iter, params.report_interval);
        let mut out = vec![0u8; msg_size];
        let step = move |_ctx: &mut PerfContext| -> ucx_core_rs::error::CoreResult<(u64, u64)> {
            let mut guard = endpoints[0].lock().expect("endpoint lock poisoned");
            let (ep, rkey) = &mut *guard;
            one_sided_op(command, ep.as_mut(), rkey, &data, &mut out)?;
            Ok((1, data.len() as u64))
        };
        let report = driver::run(params, &mut ctx, rte, Box::new(step))?;
        print_report(&serde_json::to_value(&report)?, output_file)?;
    } else {
        let data_len = data.len();
        let report = multi_thread::run(params, worker, rte, msg_size, move |thread_id, _worker, _ctx| {
            let mut guard = endpoints[thread_id].lock().expect("endpoint lock poisoned");
            let (ep, rkey) = &mut *guard;
            let mut out = vec![0u8; msg_size];
            one_sided_op(command, ep.as_mut(), rkey, &data, &mut out)?;
            Ok((1, data_len as u64))
        })?;
        print_report(&serde_json::to_value(&report)?, output_file)?;
    }
    Ok(())
}

fn one_sided_op(
    command: Command,
    ep: &mut dyn Endpoint,
    rkey: &PackedRkey,
    data: &[u8],
    out: &mut [u8],
) -> ucx_core_rs::error::CoreResult<()> {
    match command {
        Command::Put => ep.put(0, rkey, data),
        Command::Get => ep.get(0, rkey, out),
        Command::Add | Command::Fadd | Command::Swap | Command::Cswap => {
            ep.atomic_add(0, rkey, 1).map(|_| ())
        }
        other => Err(ucx_core_rs::error::CoreError::unsupported(format!(
            "{other:?} not wired into the demo binary"
        ))),
    }
}

fn print_report(report: &serde_json::Value, output_file: Option<&std::path::Path>) -> Result<()> {
    ucx_core_rs::report::write_or_print(report, output_file)?;
    Ok(())
}
