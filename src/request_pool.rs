//! # Request pool
//!
//! A slab allocator for outstanding operation requests: fixed element
//! size, cache-line aligned, growing by slabs of 128 elements without an
//! upper bound. Grounded on `ucp_worker.c`'s request-pool references and
//! the slab-like buffer handling pattern used for shared-memory regions.

const SLAB_LEN: usize = 128;
const CACHE_LINE: usize = 64;

/// An opaque handle to a slot in the pool. Indices are stable across
/// growth (new slabs are appended, never relocated).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestHandle(usize);

#[repr(align(64))]
#[derive(Clone)]
struct Slot<T> {
    value: Option<T>,
}

struct Slab<T> {
    slots: Vec<Slot<T>>,
}

impl<T> Slab<T> {
    fn new() -> Self {
        let mut slots = Vec::with_capacity(SLAB_LEN);
        slots.resize_with(SLAB_LEN, || Slot { value: None });
        Self { slots }
    }
}

/// Cache-line-aligned slab allocator. `T` is the per-request payload the
/// worker associates with an in-flight operation.
pub struct RequestPool<T> {
    slabs: Vec<Slab<T>>,
    free_list: Vec<usize>,
}

impl<T> RequestPool<T> {
    pub fn new() -> Self {
        Self {
            slabs: Vec::new(),
            free_list: Vec::new(),
        }
    }

    fn grow(&mut self) {
        let base = self.slabs.len() * SLAB_LEN;
        self.slabs.push(Slab::new());
        self.free_list.extend((0..SLAB_LEN).rev().map(|i| base + i));
    }

    /// Allocates a slot and stores `value` in it, growing by one slab if
    /// the pool is exhausted. Never fails: growth has no upper bound.
    pub fn alloc(&mut self, value: T) -> RequestHandle {
        if self.free_list.is_empty() {
            self.grow();
        }
        let idx = self.free_list.pop().expect("grow() just replenished free_list");
        let (slab_idx, slot_idx) = (idx / SLAB_LEN, idx % SLAB_LEN);
        self.slabs[slab_idx].slots[slot_idx].value = Some(value);
        RequestHandle(idx)
    }

    pub fn get(&self, handle: RequestHandle) -> Option<&T> {
        let (slab_idx, slot_idx) = (handle.0 / SLAB_LEN, handle.0 % SLAB_LEN);
        self.slabs.get(slab_idx)?.slots[slot_idx].value.as_ref()
    }

    pub fn get_mut(&mut self, handle: RequestHandle) -> Option<&mut T> {
        let (slab_idx, slot_idx) = (handle.0 / SLAB_LEN, handle.0 % SLAB_LEN);
        self.slabs.get_mut(slab_idx)?.slots[slot_idx].value.as_mut()
    }

    /// Releases a slot, returning its payload and returning the index to
    /// the free list for reuse.
    pub fn release(&mut self, handle: RequestHandle) -> Option<T> {
        let (slab_idx, slot_idx) = (handle.0 / SLAB_LEN, handle.0 % SLAB_LEN);
        let slot = &mut self.slabs.get_mut(slab_idx)?.slots[slot_idx];
        let value = slot.value.take();
        if value.is_some() {
            self.free_list.push(handle.0);
        }
        value
    }

    /// Drains every outstanding request without returning them, as worker
    /// teardown does: the pool is about to be destroyed, not reused.
    pub fn drain(&mut self) {
        for slab in &mut self.slabs {
            for slot in &mut slab.slots {
                slot.value = None;
            }
        }
        self.free_list.clear();
    }

    pub fn outstanding(&self) -> usize {
        self.slabs.len() * SLAB_LEN - self.free_list.len()
    }
}

impl<T> Default for RequestPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_line_alignment_of_slot_is_64_bytes() {
        assert_eq!(std::mem::align_of::<Slot<u8>>(), CACHE_LINE);
    }

    #[test]
    fn alloc_and_release_round_trips_a_value() {
        let mut pool: RequestPool<u32> = RequestPool::new();
        let h = pool.alloc(42);
        assert_eq!(pool.get(h), Some(&42));
        assert_eq!(pool.release(h), Some(42));
        assert_eq!(pool.get(h), None);
    }

    #[test]
    fn pool_grows_past_one_slab_without_bound() {
        let mut pool: RequestPool<u32> = RequestPool::new();
        let handles: Vec<_> = (0..SLAB_LEN as u32 + 10).map(|i| pool.alloc(i)).collect();
        assert_eq!(pool.outstanding(), handles.len());
        assert_eq!(pool.get(handles[SLAB_LEN]), Some(&(SLAB_LEN as u32)));
    }

    #[test]
    fn released_slots_are_reused() {
        let mut pool: RequestPool<u32> = RequestPool::new();
        let h1 = pool.alloc(1);
        pool.release(h1);
        let h2 = pool.alloc(2);
        assert_eq!(h1, h2);
    }
}
