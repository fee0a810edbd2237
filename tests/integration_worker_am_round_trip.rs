//! End-to-end active-message round trip through a real `Worker` over the
//! loopback transport: register a handler, create an endpoint, send, and
//! drive delivery through `Worker::progress()`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ucx_core_rs::am_router::{AmHandlerEntry, HandlerClass, HandlerOutcome};
use ucx_core_rs::atomic_selector::AtomicPolicy;
use ucx_core_rs::capability::FeatureSet;
use ucx_core_rs::transport::loopback::LoopbackFactory;
use ucx_core_rs::transport::{Interface, InterfaceConfig, InterfaceFactory};
use ucx_core_rs::worker::{AsyncContext, ThreadMode, Worker, WorkerConfig};

fn single_interface_worker() -> Worker {
    let cfg = WorkerConfig {
        thread_mode: ThreadMode::Single,
        async_context: AsyncContext::Thread,
        num_tls: 1,
        features: FeatureSet::AM,
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
fn active_message_sent_through_a_worker_owned_endpoint_is_delivered_on_progress() {
    let worker = single_interface_worker();

    let received_bytes = Arc::new(AtomicUsize::new(0));
    let received_in_handler = received_bytes.clone();
    let entry = AmHandlerEntry {
        id: 1,
        features: FeatureSet::AM,
        class: HandlerClass::Async,
        handler: Arc::new(move |msg| {
            received_in_handler.fetch_add(msg.data.len(), Ordering::SeqCst);
            HandlerOutcome::Done
        }),
        tracer: None,
    };
    worker.register_am_handlers(&[entry]);

    let mut ep = worker
        .with_interface(0, |iface: &mut dyn Interface| iface.ep_create())
        .unwrap();
    ep.send_am(1, &[], b"hello worker").unwrap();

    let dispatched = worker.progress();
    assert_eq!(dispatched, 1);
    assert_eq!(received_bytes.load(Ordering::SeqCst), b"hello worker".len());
}

#[test]
fn a_message_for_an_unregistered_id_is_silently_dropped() {
    let worker = single_interface_worker();
    let mut ep = worker
        .with_interface(0, |iface: &mut dyn Interface| iface.ep_create())
        .unwrap();
    ep.send_am(9, &[], b"nobody home").unwrap();
    assert_eq!(worker.progress(), 1);
}
