//! # Rendezvous collaborator (RTE)
//!
//! The out-of-band transport used for address exchange and barriers at
//! setup and teardown. The core only consumes this as a narrow capability;
//! no network implementation lives here (see [`rte::loopback`] for the one
//! reference implementation used by tests and the demo binary).

use crate::error::CoreResult;

pub mod loopback;

/// A token representing one posted exchange, opaque to callers.
pub struct ExchangeRequest(pub usize);

/// Rendezvous collaborator: peer enumeration, collective exchange, and
/// result reporting.
pub trait Rte {
    fn group_size(&self) -> usize;
    fn group_index(&self) -> usize;

    /// Enqueues `data` as this peer's contribution to a scatter-gather
    /// broadcast, returning a request to pass to `exchange_vec`.
    fn post_vec(&mut self, data: Vec<u8>) -> CoreResult<ExchangeRequest>;

    /// Collectively commits a posted exchange; after this returns, every
    /// peer's contribution is retrievable via `recv`.
    fn exchange_vec(&mut self, req: ExchangeRequest) -> CoreResult<()>;

    /// Retrieves peer `peer_index`'s contribution from the most recently
    /// committed exchange.
    fn recv(&self, peer_index: usize) -> CoreResult<Vec<u8>>;

    fn barrier(&mut self) -> CoreResult<()>;

    /// Forwards a result record. `final_report` distinguishes a periodic
    /// partial report (driven by `report_interval`) from the run's final
    /// one.
    fn report(&mut self, result: &[u8], final_report: bool) -> CoreResult<()>;
}
