//! # Transport interface boundary
//!
//! The worker and perf engine consume transport back-ends through this
//! trait; no concrete RDMA/TCP/shared-memory backend lives in this crate
//! (see [`transport::loopback`] for the one reference implementation,
//! which exists purely to make the rest of the crate exercisable).
//!
//! A small set of object-safe methods a driver calls through
//! `Box<dyn Interface>`/`Box<dyn Endpoint>`, rather than a generic
//! parameter threaded through every module.

use crate::am_router::AmHandlerEntry;
use crate::capability::InterfaceAttributes;
use crate::error::CoreResult;
use crate::wakeup::WakeupSource;

pub mod loopback;

/// Flags passed to `wakeup_open`: `TX_COMPLETION | RX_AM | RX_SIGNALED_AM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WakeupFlags(pub u32);

impl WakeupFlags {
    pub const TX_COMPLETION: Self = Self(1 << 0);
    pub const RX_AM: Self = Self(1 << 1);
    pub const RX_SIGNALED_AM: Self = Self(1 << 2);

    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

/// An opaque address blob: a packed interface or endpoint address, bytes
/// only meaningful to the transport that produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedAddress(pub Vec<u8>);

/// A packed, transport-opaque remote key authorizing one-sided operations
/// against a registered memory region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedRkey(pub Vec<u8>);

/// A memory handle returned by `iface_mem_alloc`, passed back to
/// `iface_mem_free` and to `md_mkey_pack`.
pub struct MemoryHandle {
    pub ptr: *mut u8,
    pub len: usize,
}

// SAFETY: the pointer is only dereferenced by the transport that produced
// it, on the thread that owns the worker; the worker's own locking
// already serializes access.
unsafe impl Send for MemoryHandle {}

/// One connected remote endpoint on one interface.
///
/// `Send` so a worker (which may run in MULTI thread mode) can share its
/// endpoint table across threads behind its internal lock.
pub trait Endpoint: WakeupSource + Send {
    fn get_address(&self) -> CoreResult<PackedAddress>;
    fn flush(&mut self) -> CoreResult<()>;
    fn send_am(&mut self, id: u8, header: &[u8], payload: &[u8]) -> CoreResult<()>;
    fn put(&mut self, remote_addr: u64, rkey: &PackedRkey, data: &[u8]) -> CoreResult<()>;
    fn get(&mut self, remote_addr: u64, rkey: &PackedRkey, out: &mut [u8]) -> CoreResult<()>;
    fn atomic_add(&mut self, remote_addr: u64, rkey: &PackedRkey, value: u64) -> CoreResult<u64>;
}

/// A transport-instance handle bound to one device and one transport.
/// `Send` for the same reason as `Endpoint`.
pub trait Interface: WakeupSource + Send {
    fn query(&self) -> InterfaceAttributes;

    fn ep_create_connected(&mut self, device_addr: &[u8], iface_addr: &PackedAddress)
        -> CoreResult<Box<dyn Endpoint>>;

    fn ep_create(&mut self) -> CoreResult<Box<dyn Endpoint>>;

    fn ep_connect_to_ep(
        &mut self,
        ep: &mut dyn Endpoint,
        device_addr: &[u8],
        ep_addr: &PackedAddress,
    ) -> CoreResult<()>;

    fn mem_alloc(&mut self, len: usize) -> CoreResult<MemoryHandle>;
    fn mem_free(&mut self, handle: MemoryHandle);
    fn mkey_pack(&self, handle: &MemoryHandle) -> CoreResult<PackedRkey>;
    fn rkey_unpack(&self, packed: &PackedRkey) -> CoreResult<PackedRkey>;

    /// Registers `entries` for local dispatch during `progress()`. Callers
    /// (worker bring-up) have already filtered these through the
    /// active-message router's feature/sync-capability rule.
    fn am_set_handlers(&mut self, entries: Vec<AmHandlerEntry>);

    /// Replaces every registered handler with the drop-all stub, mirroring
    /// the router's own teardown.
    fn am_clear_handlers(&mut self);
    fn am_trace(&self, id: u8, data: &[u8]);

    fn wakeup_open(&mut self, flags: WakeupFlags) -> CoreResult<()>;
    fn wakeup_close(&mut self);

    /// Releases transport resources. Called once, as the last step of
    /// interface teardown.
    fn close(&mut self) {}

    /// Drives pending completions; returns the number of events
    /// processed, as `ucp_worker.c`'s `progress()` loop does to decide
    /// whether to keep spinning.
    fn progress(&mut self) -> usize;

    fn flush(&mut self, comp: Option<&mut dyn FnMut()>) -> CoreResult<()>;

    fn device_name(&self) -> &str;
}

/// Creates interfaces for a configured transport resource. A production
/// build would have one of these per back-end; this crate ships only the
/// loopback one.
pub trait InterfaceFactory {
    fn open(&self, cfg: &InterfaceConfig) -> CoreResult<Box<dyn Interface>>;
}

#[derive(Debug, Clone)]
pub struct InterfaceConfig {
    pub transport_name: String,
    pub cpu_mask: Vec<usize>,
}
