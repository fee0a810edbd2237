//! Single-process rendezvous collaborator: a group of size 1, used by
//! tests and the demo binary where there is exactly one peer (itself).
//! Grounded on the self-transport test idiom; not a network RTE.

use std::sync::{Arc, Mutex};

use crate::error::{CoreError, CoreResult, ErrorKind};
use crate::rte::{ExchangeRequest, Rte};

#[derive(Default)]
struct Posted {
    slots: Vec<Vec<u8>>,
}

pub struct LoopbackRte {
    posted: Arc<Mutex<Posted>>,
    reports: Arc<Mutex<Vec<(Vec<u8>, bool)>>>,
}

impl LoopbackRte {
    pub fn new() -> Self {
        Self {
            posted: Arc::new(Mutex::new(Posted::default())),
            reports: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn reports(&self) -> Vec<(Vec<u8>, bool)> {
        self.reports.lock().expect("reports lock poisoned").clone()
    }
}

impl Default for LoopbackRte {
    fn default() -> Self {
        Self::new()
    }
}

impl Rte for LoopbackRte {
    fn group_size(&self) -> usize {
        1
    }

    fn group_index(&self) -> usize {
        0
    }

    fn post_vec(&mut self, data: Vec<u8>) -> CoreResult<ExchangeRequest> {
        let mut posted = self.posted.lock().expect("posted lock poisoned");
        posted.slots = vec![data];
        Ok(ExchangeRequest(0))
    }

    fn exchange_vec(&mut self, _req: ExchangeRequest) -> CoreResult<()> {
        Ok(())
    }

    fn recv(&self, peer_index: usize) -> CoreResult<Vec<u8>> {
        let posted = self.posted.lock().expect("posted lock poisoned");
        posted
            .slots
            .get(peer_index)
            .cloned()
            .ok_or_else(|| CoreError::new(ErrorKind::InvalidParam, "no peer at that index"))
    }

    fn barrier(&mut self) -> CoreResult<()> {
        Ok(())
    }

    fn report(&mut self, result: &[u8], final_report: bool) -> CoreResult<()> {
        self.reports
            .lock()
            .expect("reports lock poisoned")
            .push((result.to_vec(), final_report));
        Ok(())
    }
}
