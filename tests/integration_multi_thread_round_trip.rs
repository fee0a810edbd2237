//! End-to-end multi-threaded perf run: several OS threads sharing one
//! `Worker` in MULTI thread mode, each issuing PUTs against its own
//! thread-local interface slot, reduced into one combined report.

use ucx_core_rs::atomic_selector::AtomicPolicy;
use ucx_core_rs::capability::FeatureSet;
use ucx_core_rs::perf::params::{Api, CommandKind, DataLayoutKind, Parameters, TestType, ThreadModeKind};
use ucx_core_rs::perf::multi_thread;
use ucx_core_rs::rte::loopback::LoopbackRte;
use ucx_core_rs::transport::loopback::LoopbackFactory;
use ucx_core_rs::transport::{Interface, InterfaceConfig, InterfaceFactory, PackedRkey};
use ucx_core_rs::worker::{AsyncContext, ThreadMode, Worker, WorkerConfig};

const THREAD_COUNT: usize = 4;
const MSG_SIZE: usize = 64;

fn multi_worker() -> Worker {
    let cfg = WorkerConfig {
        thread_mode: ThreadMode::Multi,
        async_context: AsyncContext::Thread,
        num_tls: THREAD_COUNT,
        features: FeatureSet::RMA,
        atomic_policy: AtomicPolicy::Cpu,
        cpu_mask: vec![],
    };
    let iface_cfg = InterfaceConfig {
        transport_name: "loopback".into(),
        cpu_mask: vec![],
    };
    let factory = LoopbackFactory;
    let factories: Vec<(&InterfaceConfig, &dyn InterfaceFactory)> = (0..THREAD_COUNT)
        .map(|_| (&iface_cfg, &factory as &dyn InterfaceFactory))
        .collect();
    Worker::create(cfg, &factories).unwrap()
}

#[test]
fn every_thread_contributes_to_the_combined_report() {
    let worker = multi_worker();

    let rkeys: Vec<PackedRkey> = (0..THREAD_COUNT)
        .map(|tls| {
            worker
                .with_interface(tls, |iface: &mut dyn Interface| {
                    let handle = iface.mem_alloc(MSG_SIZE)?;
                    iface.mkey_pack(&handle)
                })
                .unwrap()
        })
        .collect();
    let endpoints: Vec<_> = (0..THREAD_COUNT)
        .map(|tls| {
            std::sync::Mutex::new(
                worker
                    .with_interface(tls, |iface: &mut dyn Interface| iface.ep_create())
                    .unwrap(),
            )
        })
        .collect();

    let p = Parameters {
        api: Api::Messaging,
        command: CommandKind::Put,
        test_type: TestType::StreamUni,
        data_layout: DataLayoutKind::Bcopy,
        msg_size_list: vec![MSG_SIZE],
        iov_stride: 0,
        am_hdr_size: 0,
        fc_window: 0,
        max_outstanding: 1,
        alignment: 8,
        warmup_iter: 10,
        max_iter: 40,
        max_time: 0.0,
        report_interval: 0,
        thread_count: THREAD_COUNT,
        thread_mode: ThreadModeKind::Multi,
        flags: 0,
    };
    let data = vec![0x11u8; MSG_SIZE];
    let mut rte = LoopbackRte::new();

    let report = multi_thread::run(&p, &worker, &mut rte, MSG_SIZE, |thread_id, _worker, _ctx| {
        let mut ep = endpoints[thread_id].lock().expect("endpoint lock poisoned");
        ep.put(0, &rkeys[thread_id], &data)?;
        Ok((1, data.len() as u64))
    })
    .unwrap();

    assert_eq!(report.thread_count, THREAD_COUNT);
    assert_eq!(report.iters_per_thread, 40);
    assert!(rte.reports().last().unwrap().1);
}
