//! # Worker
//!
//! The per-process (optionally per-thread) progress and resource-management
//! unit: owns interfaces, attributes, request pool, wakeup set, endpoint
//! hash, and config cache; provides progress, arm/wait/signal, and
//! reply-endpoint vivification. Grounded on `ucp_worker.c` end to end, with
//! every piece owned by one object rather than split across collaborators.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use uuid::Uuid;

use crate::am_router::{AmHandlerEntry, AmRouter};
use crate::atomic_selector::{self, AtomicMask, AtomicPolicy};
use crate::capability::FeatureSet;
use crate::endpoint_config::EndpointConfigCache;
use crate::error::{CoreError, CoreResult, ErrorKind};
use crate::request_pool::RequestPool;
use crate::transport::{Endpoint, Interface, InterfaceConfig, InterfaceFactory, WakeupFlags};
use crate::wakeup::{self, Signaler, WakeupSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadMode {
    Single,
    Serialized,
    Multi,
}

/// Thread or signal-driven delivery of deferred async work. Neither path
/// does real off-thread dispatch in this crate (no concrete transport
/// needs it) but the distinction is carried so a real backend has
/// somewhere to hang its delivery mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncContext {
    Thread,
    Signal,
}

pub struct WorkerConfig {
    pub thread_mode: ThreadMode,
    pub async_context: AsyncContext,
    pub num_tls: usize,
    pub features: FeatureSet,
    pub atomic_policy: AtomicPolicy,
    pub cpu_mask: Vec<usize>,
}

/// A placeholder endpoint buffering sends until real wireup completes.
/// Modeled as the state machine the design notes call for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubState {
    PendingWire,
    Ready,
    Closed,
}

/// One buffered active-message send, replayed against the real endpoint
/// once it replaces this stub.
struct PendingSend {
    am_id: u8,
    header: Vec<u8>,
    payload: Vec<u8>,
}

pub struct StubEndpoint {
    pub dest_uuid: u128,
    pub state: StubState,
    pending: Vec<PendingSend>,
}

struct WorkerInner {
    interfaces: Vec<Option<Box<dyn Interface>>>,
    am_router: AmRouter,
    endpoint_hash: HashMap<u128, Box<dyn Endpoint>>,
    config_cache: EndpointConfigCache,
    atomic_mask: AtomicMask,
    request_pool: RequestPool<()>,
    stub_list: Vec<StubEndpoint>,
    wakeup: WakeupSet,
}

/// Owns a heterogeneous set of transport interfaces, drives their
/// progress, and provides the blocking wakeup contract.
///
/// All interior state lives behind one lock so `progress()`/`wait()` can
/// take `&self`: MULTI mode genuinely shares a worker across threads, and
/// SINGLE mode pays an uncontended lock acquisition rather than forking
/// the API into locked/unlocked variants.
pub struct Worker {
    pub uuid: u128,
    config: WorkerConfig,
    inner: Mutex<WorkerInner>,
    reentry: AtomicUsize,
    /// A standalone handle to the wakeup set's self-pipe, held outside
    /// `inner`'s lock so `signal()` never contends with a thread blocked
    /// in `wait()`.
    signaler: Signaler,
}

impl Worker {
    /// Create: derives thread mode, allocates dense interface/attribute
    /// arrays sized to `num_tls`, initializes the wakeup set and request
    /// pool, opens one interface per transport resource (unwinding on any
    /// failure), then runs the atomic-resource selector.
    pub fn create(
        config: WorkerConfig,
        factories: &[(&InterfaceConfig, &dyn InterfaceFactory)],
    ) -> CoreResult<Self> {
        let wakeup = WakeupSet::new()?;
        let mut interfaces: Vec<Option<Box<dyn Interface>>> = Vec::with_capacity(config.num_tls);
        for (cfg, factory) in factories {
            match factory.open(cfg) {
                Ok(iface) => interfaces.push(Some(iface)),
                Err(e) => {
                    // unwind: close every interface opened so far, in reverse order.
                    for iface in interfaces.iter_mut().rev().flatten() {
                        iface.close();
                    }
                    return Err(e);
                }
            }
        }
        interfaces.resize_with(config.num_tls, || None);

        let atomic_mask = {
            let attrs: Vec<_> = interfaces
                .iter()
                .map(|i| i.as_ref().map(|i| i.query()))
                .collect();
            atomic_selector::select(config.atomic_policy, &attrs, config.features)
        };

        let flags = WakeupFlags::TX_COMPLETION
            .union(WakeupFlags::RX_AM)
            .union(WakeupFlags::RX_SIGNALED_AM);
        for iface in interfaces.iter_mut().flatten() {
            iface.wakeup_open(flags)?;
        }

        let mut wakeup = wakeup;
        for iface in interfaces.iter().flatten() {
            wakeup.add_source(iface.wakeup_fd())?;
        }
        let signaler = wakeup.signaler()?;

        let inner = WorkerInner {
            interfaces,
            am_router: AmRouter::new(),
            endpoint_hash: HashMap::new(),
            config_cache: EndpointConfigCache::new(config.num_tls),
            atomic_mask,
            request_pool: RequestPool::new(),
            stub_list: Vec::new(),
            wakeup,
        };

        Ok(Self {
            uuid: Uuid::new_v4().as_u128(),
            config,
            inner: Mutex::new(inner),
            reentry: AtomicUsize::new(0),
            signaler,
        })
    }

    pub fn thread_mode(&self) -> ThreadMode {
        self.config.thread_mode
    }

    pub fn atomic_mask(&self) -> AtomicMask {
        self.inner.lock().atomic_mask
    }

    /// Registers active-message handler entries across every interface
    /// whose feature/sync rules admit them.
    pub fn register_am_handlers(&self, entries: &[AmHandlerEntry]) {
        let mut inner = self.inner.lock();
        let features = self.config.features;
        let WorkerInner {
            interfaces,
            am_router,
            ..
        } = &mut *inner;
        for iface_slot in interfaces.iter_mut() {
            let Some(iface) = iface_slot else { continue };
            let attrs = iface.query();
            let supports_sync = attrs.cap_flags.contains(crate::capability::CapFlags::AM_SYNC);
            let admitted: Vec<AmHandlerEntry> = entries
                .iter()
                .cloned()
                .filter(|e| am_router.register_for_iface(e.clone(), features, supports_sync))
                .collect();
            iface.am_set_handlers(admitted);
        }
    }

    /// Drives the underlying progress engine for every interface. Asserts
    /// the reentry counter is zero on entry, as a re-entrant call into the
    /// (non-reentrant) transport progress function is a bug, not a
    /// recoverable condition. Does not block.
    pub fn progress(&self) -> usize {
        let prev = self.reentry.fetch_add(1, Ordering::SeqCst);
        assert_eq!(prev, 0, "re-entrant call into Worker::progress");

        let mut inner = self.inner.lock();
        let mut total = 0;
        for iface in inner.interfaces.iter_mut().flatten() {
            total += iface.progress();
        }

        self.reentry.fetch_sub(1, Ordering::SeqCst);
        total
    }

    /// Blocking wait: obtains the event descriptor, arms it; if arming
    /// reports BUSY, returns immediately since work is already available;
    /// otherwise blocks until woken. The worker lock is held only for the
    /// arm step, not for the blocking poll itself, so a sibling's
    /// `signal()` (which never touches this lock at all) can never
    /// deadlock against a waiter — required for MULTI thread mode, where
    /// one thread may be parked in `wait(None)` while another signals it.
    pub fn wait(&self, timeout: Option<Duration>) -> CoreResult<()> {
        let efd = {
            let mut inner = self.inner.lock();
            let efd = inner.wakeup.get_efd()?;
            let any_pending = inner.interfaces.iter().flatten().any(|i| i.has_pending());
            match inner.wakeup.arm(any_pending) {
                Ok(()) => {}
                Err(ref e) if e.kind == ErrorKind::Busy => return Ok(()),
                Err(e) => return Err(e),
            }
            efd
        };
        wakeup::wait_on_efd(efd, timeout)
    }

    /// Writes to the wakeup set's self-pipe directly, bypassing the worker
    /// lock entirely: safe to call from a thread that never touches any
    /// other worker state, and safe to call while a sibling is blocked in
    /// `wait()`.
    pub fn signal(&self) -> CoreResult<()> {
        self.signaler.signal()
    }

    /// Looks up `dest_uuid` in the endpoint hash; if absent, constructs a
    /// stub endpoint and enrolls it on the stub list. Failure to create a
    /// stub is fatal: callers reach this only on a path that must succeed.
    pub fn get_reply_ep(&self, dest_uuid: u128) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        if inner.endpoint_hash.contains_key(&dest_uuid) {
            return Ok(());
        }
        if inner.stub_list.iter().any(|s| s.dest_uuid == dest_uuid) {
            return Ok(());
        }
        inner.stub_list.push(StubEndpoint {
            dest_uuid,
            state: StubState::PendingWire,
            pending: Vec::new(),
        });
        Ok(())
    }

    /// Sends an active message to `dest_uuid`: if a real endpoint is
    /// already wired, sends it directly; otherwise vivifies (or reuses) a
    /// stub and buffers the send until [`Worker::insert_endpoint`] replaces
    /// the stub with a real one.
    pub fn stub_send_am(
        &self,
        dest_uuid: u128,
        am_id: u8,
        header: &[u8],
        payload: &[u8],
    ) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        if let Some(ep) = inner.endpoint_hash.get_mut(&dest_uuid) {
            return ep.send_am(am_id, header, payload);
        }
        let stub = match inner.stub_list.iter_mut().find(|s| s.dest_uuid == dest_uuid) {
            Some(stub) => stub,
            None => {
                inner.stub_list.push(StubEndpoint {
                    dest_uuid,
                    state: StubState::PendingWire,
                    pending: Vec::new(),
                });
                inner.stub_list.last_mut().expect("just pushed")
            }
        };
        stub.pending.push(PendingSend {
            am_id,
            header: header.to_vec(),
            payload: payload.to_vec(),
        });
        Ok(())
    }

    pub fn with_config_cache<R>(&self, f: impl FnOnce(&mut EndpointConfigCache) -> R) -> R {
        f(&mut self.inner.lock().config_cache)
    }

    /// Runs `f` against the interface bound to thread-local slot `tls`, if
    /// one is open. Exists so callers one layer up (the perf driver, the
    /// demo binary) can reach endpoint creation and memory registration
    /// without this module growing a method for every `Interface` call.
    pub fn with_interface<R>(
        &self,
        tls: usize,
        f: impl FnOnce(&mut dyn Interface) -> CoreResult<R>,
    ) -> CoreResult<R> {
        let mut inner = self.inner.lock();
        let iface = inner
            .interfaces
            .get_mut(tls)
            .and_then(|slot| slot.as_mut())
            .ok_or_else(|| CoreError::no_resource(format!("no interface open at slot {tls}")))?;
        f(iface.as_mut())
    }

    /// Wires a real endpoint for `dest_uuid` into the endpoint hash. If a
    /// stub was buffering sends for this peer, every buffered send is
    /// replayed against the real endpoint, in order, before the stub is
    /// dropped; the first replay failure aborts the worker's endpoint
    /// insert and is returned to the caller.
    pub fn insert_endpoint(&self, dest_uuid: u128, mut ep: Box<dyn Endpoint>) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        if let Some(pos) = inner.stub_list.iter().position(|s| s.dest_uuid == dest_uuid) {
            let stub = inner.stub_list.remove(pos);
            for send in stub.pending {
                ep.send_am(send.am_id, &send.header, &send.payload)?;
            }
        }
        inner.endpoint_hash.insert(dest_uuid, ep);
        Ok(())
    }

    pub fn outstanding_requests(&self) -> usize {
        self.inner.lock().request_pool.outstanding()
    }

    /// Destroy: removes AM handlers, destroys every endpoint reachable
    /// through the hash, closes interfaces, drains the request pool, and
    /// releases the remaining worker-local state. Safe only from a
    /// quiescent worker (no in-flight `progress()`/`wait()` call).
    fn teardown(&mut self) {
        let inner = self.inner.get_mut();
        inner.am_router.teardown();
        for iface in inner.interfaces.iter_mut().flatten() {
            iface.am_clear_handlers();
        }
        inner.endpoint_hash.clear();
        inner.stub_list.clear();
        for iface in inner.interfaces.iter_mut().rev() {
            if let Some(iface) = iface {
                iface.close();
            }
        }
        inner.request_pool.drain();
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::loopback::LoopbackFactory;

    fn single_loopback_worker() -> Worker {
        let cfg = WorkerConfig {
            thread_mode: ThreadMode::Single,
            async_context: AsyncContext::Thread,
            num_tls: 1,
            features: FeatureSet::AM | FeatureSet::AMO64,
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
    fn create_opens_one_interface_per_resource_and_runs_selector() {
        let worker = single_loopback_worker();
        // loopback advertises CPU_ATOMICS, CPU policy should enable it.
        assert!(!worker.atomic_mask().is_empty());
    }

    #[test]
    fn progress_does_not_block_and_returns_event_count() {
        let worker = single_loopback_worker();
        assert_eq!(worker.progress(), 0);
    }

    #[test]
    fn signal_from_another_thread_wakes_a_blocked_wait() {
        use std::sync::Arc;
        use std::thread;

        let worker = Arc::new(single_loopback_worker());
        let waiter = worker.clone();
        let handle = thread::spawn(move || waiter.wait(Some(Duration::from_secs(5))));

        // Give the waiting thread a chance to actually enter wait() before
        // signaling; not signaling yet is not a failure, just a slower test.
        thread::sleep(Duration::from_millis(50));
        worker.signal().unwrap();

        handle.join().expect("waiter thread panicked").unwrap();
    }

    #[test]
    fn get_reply_ep_enrolls_a_stub_for_unknown_peer() {
        let worker = single_loopback_worker();
        worker.get_reply_ep(42).unwrap();
        worker.get_reply_ep(42).unwrap();
        assert_eq!(worker.inner.lock().stub_list.len(), 1);
    }

    #[test]
    fn stub_send_am_buffers_until_insert_endpoint_replays_it() {
        let worker = single_loopback_worker();
        worker.stub_send_am(42, 7, b"hdr", b"payload one").unwrap();
        worker.stub_send_am(42, 7, b"hdr", b"payload two").unwrap();
        assert_eq!(worker.inner.lock().stub_list.len(), 1);
        assert!(worker.inner.lock().endpoint_hash.is_empty());

        let ep = worker.with_interface(0, |iface| iface.ep_create()).unwrap();
        worker.insert_endpoint(42, ep).unwrap();

        assert!(worker.inner.lock().stub_list.is_empty());
        assert!(worker.inner.lock().endpoint_hash.contains_key(&42));
        assert_eq!(worker.progress(), 2);
    }

    #[test]
    #[should_panic(expected = "re-entrant")]
    fn reentrant_progress_is_asserted() {
        let worker = single_loopback_worker();
        worker.reentry.store(1, Ordering::SeqCst);
        worker.progress();
    }
}
