//! # Active-message router
//!
//! A static table indexed by 8-bit message id, mapping to
//! `{handler, feature-mask, flag-mask, tracer}`. On interface bring-up,
//! handlers whose features intersect the worker's feature set are
//! registered with the interface; a sync handler is registered only on
//! interfaces that advertise sync capability. On teardown, handlers are
//! replaced by a drop-all stub so late-arriving messages are silently
//! discarded rather than dispatched into a half-torn-down worker.

use std::fmt;
use std::sync::Arc;

use crate::capability::FeatureSet;

/// Which thread an active-message handler is allowed to run on.
///
/// A `Sync` handler must complete synchronously or return
/// [`HandlerOutcome::InProgress`], in which case it retains ownership of
/// the receive descriptor until the application releases it. An `Async`
/// handler is deferred to the worker's async context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerClass {
    Sync,
    Async,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    Done,
    InProgress,
}

/// Payload handed to a registered handler: the raw active-message bytes
/// plus the sender's wire-visible UUID.
pub struct AmMessage<'a> {
    pub id: u8,
    pub sender_uuid: u128,
    pub data: &'a [u8],
}

pub type AmHandlerFn = dyn Fn(&AmMessage<'_>) -> HandlerOutcome + Send + Sync;
pub type AmTracerFn = dyn Fn(&AmMessage<'_>) + Send + Sync;

/// One entry in the router's static table.
#[derive(Clone)]
pub struct AmHandlerEntry {
    pub id: u8,
    pub features: FeatureSet,
    pub class: HandlerClass,
    pub handler: Arc<AmHandlerFn>,
    pub tracer: Option<Arc<AmTracerFn>>,
}

impl fmt::Debug for AmHandlerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AmHandlerEntry")
            .field("id", &self.id)
            .field("features", &self.features)
            .field("class", &self.class)
            .field("tracer", &self.tracer.is_some())
            .finish()
    }
}

const TABLE_SIZE: usize = 256;

fn drop_all_stub(_msg: &AmMessage<'_>) -> HandlerOutcome {
    HandlerOutcome::Done
}

/// Fixed 256-entry active-message dispatch table. Entries start out empty
/// (drop-all); registering an id installs a handler, tearing it down
/// restores the drop-all stub rather than removing the slot.
pub struct AmRouter {
    table: Vec<Option<AmHandlerEntry>>,
}

impl AmRouter {
    pub fn new() -> Self {
        Self {
            table: vec![None; TABLE_SIZE],
        }
    }

    /// Registers `entry` for interface bring-up if its features intersect
    /// `worker_features`, and if it's a sync handler, only when the
    /// interface advertises sync capability. Returns whether registration
    /// happened, so callers (worker bring-up) can log a skip without
    /// treating it as an error.
    pub fn register_for_iface(
        &mut self,
        entry: AmHandlerEntry,
        worker_features: FeatureSet,
        iface_supports_sync: bool,
    ) -> bool {
        if !entry.features.intersects(worker_features) {
            return false;
        }
        if entry.class == HandlerClass::Sync && !iface_supports_sync {
            return false;
        }
        let id = entry.id as usize;
        self.table[id] = Some(entry);
        true
    }

    pub fn lookup(&self, id: u8) -> Option<&AmHandlerEntry> {
        self.table[id as usize].as_ref()
    }

    pub fn dispatch(&self, msg: &AmMessage<'_>) -> HandlerOutcome {
        match self.lookup(msg.id) {
            Some(entry) => {
                if let Some(tracer) = &entry.tracer {
                    tracer(msg);
                }
                (entry.handler)(msg)
            }
            None => drop_all_stub(msg),
        }
    }

    /// Replaces every registered handler with the drop-all stub. Called on
    /// worker teardown: AM handlers are removed before endpoints are torn
    /// down, so messages that arrive mid-teardown are discarded rather
    /// than dispatched into partially-destroyed state.
    pub fn teardown(&mut self) {
        for slot in self.table.iter_mut() {
            *slot = None;
        }
    }
}

impl Default for AmRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn unregistered_id_hits_drop_all_stub() {
        let router = AmRouter::new();
        let msg = AmMessage {
            id: 42,
            sender_uuid: 0,
            data: &[],
        };
        assert_eq!(router.dispatch(&msg), HandlerOutcome::Done);
    }

    #[test]
    fn registration_skipped_when_features_dont_intersect() {
        let mut router = AmRouter::new();
        let entry = AmHandlerEntry {
            id: 5,
            features: FeatureSet::TAG,
            class: HandlerClass::Async,
            handler: Arc::new(|_| HandlerOutcome::Done),
            tracer: None,
        };
        let registered = router.register_for_iface(entry, FeatureSet::RMA, true);
        assert!(!registered);
        assert!(router.lookup(5).is_none());
    }

    #[test]
    fn sync_handler_needs_sync_capable_interface() {
        let mut router = AmRouter::new();
        let entry = AmHandlerEntry {
            id: 7,
            features: FeatureSet::AM,
            class: HandlerClass::Sync,
            handler: Arc::new(|_| HandlerOutcome::Done),
            tracer: None,
        };
        let registered = router.register_for_iface(entry, FeatureSet::AM, false);
        assert!(!registered);
    }

    #[test]
    fn teardown_replaces_handlers_with_drop_all() {
        let mut router = AmRouter::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let entry = AmHandlerEntry {
            id: 1,
            features: FeatureSet::AM,
            class: HandlerClass::Async,
            handler: Arc::new(move |_| {
                calls2.fetch_add(1, Ordering::SeqCst);
                HandlerOutcome::Done
            }),
            tracer: None,
        };
        router.register_for_iface(entry, FeatureSet::AM, true);
        router.teardown();
        let msg = AmMessage {
            id: 1,
            sender_uuid: 0,
            data: &[],
        };
        router.dispatch(&msg);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
