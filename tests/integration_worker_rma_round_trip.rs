//! End-to-end one-sided (put/get/atomic) round trip through a real
//! `Worker` over the loopback transport, plus capability validation
//! gating which commands an interface admits.

use ucx_core_rs::atomic_selector::AtomicPolicy;
use ucx_core_rs::capability::{self, Command, DataLayout, FeatureSet, ValidationParams};
use ucx_core_rs::transport::loopback::LoopbackFactory;
use ucx_core_rs::transport::{Interface, InterfaceConfig, InterfaceFactory};
use ucx_core_rs::worker::{AsyncContext, ThreadMode, Worker, WorkerConfig};

fn single_interface_worker() -> Worker {
    let cfg = WorkerConfig {
        thread_mode: ThreadMode::Single,
        async_context: AsyncContext::Thread,
        num_tls: 1,
        features: FeatureSet::RMA | FeatureSet::AMO64,
        atomic_policy: AtomicPolicy::Cpu,
        cpu_mask: vec![],
    };
    let iface_cfg = InterfaceConfig {
        transport_name: "loopback".into(),
        cpu_mask: vec![],
    };
    let factory = LoopbackFactory;
    let factories: Vec<(&InterfaceConfig, &dyn InterfaceFactory)> = vec![(&iface_cfg, &factory)];
    Worker::create(cfg, &factories).unwrap()
}

#[test]
fn put_then_get_round_trips_through_a_worker_owned_endpoint_and_memory() {
    let worker = single_interface_worker();

    let attrs = worker
        .with_interface(0, |iface: &mut dyn Interface| Ok(iface.query()))
        .unwrap();
    capability::validate(
        &ValidationParams {
            command: Command::Put,
            data_layout: DataLayout::Bcopy,
            msg_size_list: &[64],
            iov_stride: 0,
            am_hdr_size: 0,
            max_outstanding: 1,
            fc_window: 0,
            fc_window_bound: usize::MAX,
            flags: capability::ParamFlags::NONE,
        },
        &attrs,
    )
    .expect("loopback interface admits bcopy PUT");

    let (mut ep, rkey) = worker
        .with_interface(0, |iface: &mut dyn Interface| {
            let handle = iface.mem_alloc(64)?;
            let rkey = iface.mkey_pack(&handle)?;
            let ep = iface.ep_create()?;
            Ok((ep, rkey))
        })
        .unwrap();

    ep.put(0, &rkey, b"round trip payload").unwrap();
    let mut out = [0u8; 19];
    ep.get(0, &rkey, &mut out).unwrap();
    assert_eq!(&out, b"round trip payload");
}

#[test]
fn atomic_add_accumulates_across_two_calls() {
    let worker = single_interface_worker();
    let (mut ep, rkey) = worker
        .with_interface(0, |iface: &mut dyn Interface| {
            let handle = iface.mem_alloc(8)?;
            let rkey = iface.mkey_pack(&handle)?;
            let ep = iface.ep_create()?;
            Ok((ep, rkey))
        })
        .unwrap();

    let first = ep.atomic_add(0, &rkey, 7).unwrap();
    let second = ep.atomic_add(0, &rkey, 3).unwrap();
    assert_eq!(first, 0);
    assert_eq!(second, 7);
}

#[test]
fn get_rejects_short_layout_before_any_transport_call() {
    let worker = single_interface_worker();
    let attrs = worker
        .with_interface(0, |iface: &mut dyn Interface| Ok(iface.query()))
        .unwrap();
    let err = capability::validate(
        &ValidationParams {
            command: Command::Get,
            data_layout: DataLayout::Short,
            msg_size_list: &[16],
            iov_stride: 0,
            am_hdr_size: 0,
            max_outstanding: 1,
            fc_window: 0,
            fc_window_bound: usize::MAX,
            flags: capability::ParamFlags::NONE,
        },
        &attrs,
    )
    .unwrap_err();
    assert_eq!(err.kind, ucx_core_rs::ErrorKind::InvalidParam);
}
