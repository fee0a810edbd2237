//! # Loopback reference transport
//!
//! A single-process, in-memory transport used only by tests and the demo
//! binary. Not a shipped production backend — grounded on the self-transport
//! test idiom (a test double that exercises real dispatch paths without
//! real hardware) rather than on any concrete RDMA/TCP/SHM back-end.

use std::collections::VecDeque;
use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex};

use crate::am_router::{AmHandlerEntry, AmMessage};
use crate::capability::{CapFlags, InterfaceAttributes};
use crate::error::{CoreError, CoreResult, ErrorKind};
use crate::transport::{
    Endpoint, Interface, InterfaceConfig, InterfaceFactory, MemoryHandle, PackedAddress,
    PackedRkey, WakeupFlags,
};
use crate::wakeup::WakeupSource;

struct PendingAm {
    id: u8,
    sender_uuid: u128,
    data: Vec<u8>,
}

/// Shared in-process mailbox standing in for the wire. Every loopback
/// endpoint created against the same interface reads and writes here.
#[derive(Default)]
struct Mailbox {
    queue: VecDeque<PendingAm>,
    memory: Vec<u8>,
}

pub struct LoopbackEndpoint {
    mailbox: Arc<Mutex<Mailbox>>,
    local_uuid: u128,
}

impl WakeupSource for LoopbackEndpoint {
    fn wakeup_fd(&self) -> Option<RawFd> {
        None
    }

    fn has_pending(&self) -> bool {
        !self.mailbox.lock().expect("mailbox lock poisoned").queue.is_empty()
    }
}

impl Endpoint for LoopbackEndpoint {
    fn get_address(&self) -> CoreResult<PackedAddress> {
        Ok(PackedAddress(b"loopback".to_vec()))
    }

    fn flush(&mut self) -> CoreResult<()> {
        Ok(())
    }

    fn send_am(&mut self, id: u8, header: &[u8], payload: &[u8]) -> CoreResult<()> {
        let mut data = Vec::with_capacity(header.len() + payload.len());
        data.extend_from_slice(header);
        data.extend_from_slice(payload);
        self.mailbox
            .lock()
            .expect("mailbox lock poisoned")
            .queue
            .push_back(PendingAm {
                id,
                sender_uuid: self.local_uuid,
                data,
            });
        Ok(())
    }

    fn put(&mut self, remote_addr: u64, _rkey: &PackedRkey, data: &[u8]) -> CoreResult<()> {
        let mut mailbox = self.mailbox.lock().expect("mailbox lock poisoned");
        let start = remote_addr as usize;
        let end = start + data.len();
        if mailbox.memory.len() < end {
            mailbox.memory.resize(end, 0);
        }
        mailbox.memory[start..end].copy_from_slice(data);
        Ok(())
    }

    fn get(&mut self, remote_addr: u64, _rkey: &PackedRkey, out: &mut [u8]) -> CoreResult<()> {
        let mailbox = self.mailbox.lock().expect("mailbox lock poisoned");
        let start = remote_addr as usize;
        let end = start + out.len();
        if mailbox.memory.len() < end {
            return Err(CoreError::new(ErrorKind::InvalidParam, "get past registered region"));
        }
        out.copy_from_slice(&mailbox.memory[start..end]);
        Ok(())
    }

    fn atomic_add(&mut self, remote_addr: u64, _rkey: &PackedRkey, value: u64) -> CoreResult<u64> {
        let mut mailbox = self.mailbox.lock().expect("mailbox lock poisoned");
        let start = remote_addr as usize;
        let end = start + 8;
        if mailbox.memory.len() < end {
            mailbox.memory.resize(end, 0);
        }
        let bytes: [u8; 8] = mailbox.memory[start..end]
            .try_into()
            .expect("8-byte slice");
        let prev = u64::from_le_bytes(bytes);
        let next = prev.wrapping_add(value);
        mailbox.memory[start..end].copy_from_slice(&next.to_le_bytes());
        Ok(prev)
    }
}

pub struct LoopbackInterface {
    mailbox: Arc<Mutex<Mailbox>>,
    handlers: Vec<Option<AmHandlerEntry>>,
    uuid_counter: u128,
    wakeup_enabled: bool,
}

impl LoopbackInterface {
    pub fn new() -> Self {
        Self {
            mailbox: Arc::new(Mutex::new(Mailbox::default())),
            handlers: vec![None; 256],
            uuid_counter: 0,
            wakeup_enabled: false,
        }
    }
}

impl Default for LoopbackInterface {
    fn default() -> Self {
        Self::new()
    }
}

impl WakeupSource for LoopbackInterface {
    fn wakeup_fd(&self) -> Option<RawFd> {
        None
    }

    fn has_pending(&self) -> bool {
        !self.mailbox.lock().expect("mailbox lock poisoned").queue.is_empty()
    }
}

impl Interface for LoopbackInterface {
    fn query(&self) -> InterfaceAttributes {
        InterfaceAttributes {
            cap_flags: CapFlags::AM_SHORT
                | CapFlags::AM_BCOPY
                | CapFlags::AM_ZCOPY
                | CapFlags::AM_SYNC
                | CapFlags::PUT_SHORT
                | CapFlags::PUT_BCOPY
                | CapFlags::PUT_ZCOPY
                | CapFlags::GET_BCOPY
                | CapFlags::GET_ZCOPY
                | CapFlags::ATOMIC32
                | CapFlags::ATOMIC64
                | CapFlags::CPU_ATOMICS,
            min_zcopy: 1,
            max_short: 256,
            max_bcopy: 1 << 16,
            max_zcopy: 1 << 22,
            max_hdr: 64,
            max_iov: 64,
            bandwidth: 1.2e10,
            overhead: 0.05,
            priority: 0,
            memory_domain_index: 0,
            device_name: "loop0".into(),
        }
    }

    fn ep_create_connected(
        &mut self,
        _device_addr: &[u8],
        _iface_addr: &PackedAddress,
    ) -> CoreResult<Box<dyn Endpoint>> {
        self.ep_create()
    }

    fn ep_create(&mut self) -> CoreResult<Box<dyn Endpoint>> {
        self.uuid_counter += 1;
        Ok(Box::new(LoopbackEndpoint {
            mailbox: self.mailbox.clone(),
            local_uuid: self.uuid_counter,
        }))
    }

    fn ep_connect_to_ep(
        &mut self,
        _ep: &mut dyn Endpoint,
        _device_addr: &[u8],
        _ep_addr: &PackedAddress,
    ) -> CoreResult<()> {
        Ok(())
    }

    fn mem_alloc(&mut self, len: usize) -> CoreResult<MemoryHandle> {
        let mut mailbox = self.mailbox.lock().expect("mailbox lock poisoned");
        let base = mailbox.memory.len();
        mailbox.memory.resize(base + len, 0);
        Ok(MemoryHandle {
            ptr: mailbox.memory[base..].as_mut_ptr(),
            len,
        })
    }

    fn mem_free(&mut self, _handle: MemoryHandle) {}

    fn mkey_pack(&self, _handle: &MemoryHandle) -> CoreResult<PackedRkey> {
        Ok(PackedRkey(b"loopback-rkey".to_vec()))
    }

    fn rkey_unpack(&self, packed: &PackedRkey) -> CoreResult<PackedRkey> {
        Ok(packed.clone())
    }

    fn am_set_handlers(&mut self, entries: Vec<AmHandlerEntry>) {
        for entry in entries {
            let id = entry.id as usize;
            self.handlers[id] = Some(entry);
        }
    }

    fn am_clear_handlers(&mut self) {
        for slot in self.handlers.iter_mut() {
            *slot = None;
        }
    }

    fn am_trace(&self, _id: u8, _data: &[u8]) {}

    fn wakeup_open(&mut self, _flags: WakeupFlags) -> CoreResult<()> {
        self.wakeup_enabled = true;
        Ok(())
    }

    fn wakeup_close(&mut self) {
        self.wakeup_enabled = false;
    }

    fn progress(&mut self) -> usize {
        let pending: Vec<PendingAm> = {
            let mut mailbox = self.mailbox.lock().expect("mailbox lock poisoned");
            mailbox.queue.drain(..).collect()
        };
        let n = pending.len();
        for am in pending {
            if let Some(entry) = &self.handlers[am.id as usize] {
                let msg = AmMessage {
                    id: am.id,
                    sender_uuid: am.sender_uuid,
                    data: &am.data,
                };
                (entry.handler)(&msg);
            }
        }
        n
    }

    fn flush(&mut self, comp: Option<&mut dyn FnMut()>) -> CoreResult<()> {
        if let Some(cb) = comp {
            cb();
        }
        Ok(())
    }

    fn device_name(&self) -> &str {
        "loop0"
    }
}

pub struct LoopbackFactory;

impl InterfaceFactory for LoopbackFactory {
    fn open(&self, _cfg: &InterfaceConfig) -> CoreResult<Box<dyn Interface>> {
        Ok(Box::new(LoopbackInterface::new()))
    }
}
