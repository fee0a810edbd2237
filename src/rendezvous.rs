//! # Rendezvous and endpoint bring-up
//!
//! Packs local addresses/remote-keys, exchanges them via the rendezvous
//! collaborator, creates and connects endpoints, and distributes remote
//! buffer addresses and keys. Grounded on `libperf.c`'s address-exchange
//! sequence, with a barrier bracketing setup and another bracketing
//! teardown.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult, ErrorKind};
use crate::rte::Rte;
use crate::transport::{Endpoint, Interface, PackedAddress, PackedRkey};

/// Upper bound on one peer's packed rendezvous record.
pub const SCRATCH_BUFFER_CAP: usize = 2048;

/// One peer's wire-level contribution to the rendezvous exchange.
/// `rkey` is only present when the local memory domain advertised
/// `ALLOC`/`REG` capability at setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct InfoRecord {
    recv_buffer: u64,
    rkey: Option<Vec<u8>>,
    iface_addr: Vec<u8>,
    ep_addr: Option<Vec<u8>>,
}

fn pack_local(
    recv_buffer: u64,
    rkey: Option<&PackedRkey>,
    iface_addr: &PackedAddress,
    ep_addr: Option<&PackedAddress>,
) -> CoreResult<Vec<u8>> {
    let record = InfoRecord {
        recv_buffer,
        rkey: rkey.map(|r| r.0.clone()),
        iface_addr: iface_addr.0.clone(),
        ep_addr: ep_addr.map(|a| a.0.clone()),
    };
    let bytes = bincode::serialize(&record)
        .map_err(|e| CoreError::new(ErrorKind::InvalidParam, format!("pack rendezvous record: {e}")))?;
    if bytes.len() > SCRATCH_BUFFER_CAP {
        return Err(CoreError::fatal(format!(
            "rendezvous record {} bytes exceeds scratch buffer cap {SCRATCH_BUFFER_CAP}",
            bytes.len()
        )));
    }
    Ok(bytes)
}

fn unpack_peer(bytes: &[u8]) -> CoreResult<InfoRecord> {
    bincode::deserialize(bytes)
        .map_err(|e| CoreError::new(ErrorKind::InvalidParam, format!("unpack rendezvous record: {e}")))
}

/// One peer's resolved state after bring-up: a connected endpoint plus
/// its remote receive buffer address and unpacked remote key (if any).
pub struct PeerEndpoint {
    pub endpoint: Box<dyn Endpoint>,
    pub remote_recv_buffer: u64,
    pub remote_key: Option<PackedRkey>,
}

/// Runs the full bring-up protocol: pack, post, exchange, connect, flush,
/// barrier. `connect_to_endpoint` selects between the one-step
/// (`ep_create_connected`) and two-step (`ep_create` + exchange addresses
/// + `ep_connect_to_ep`) wireup paths.
pub fn setup_endpoints(
    rte: &mut dyn Rte,
    iface: &mut dyn Interface,
    recv_buffer: u64,
    rkey: Option<&PackedRkey>,
    device_addr: &[u8],
    connect_to_endpoint: bool,
) -> CoreResult<Vec<PeerEndpoint>> {
    let iface_addr = PackedAddress(device_addr.to_vec());

    let mut preallocated: Vec<Box<dyn Endpoint>> = Vec::new();
    let mut local_ep_addr = None;
    if connect_to_endpoint {
        let n_peers = rte.group_size().saturating_sub(1);
        for _ in 0..n_peers {
            preallocated.push(iface.ep_create()?);
        }
        if let Some(ep) = preallocated.first() {
            local_ep_addr = Some(ep.get_address()?);
        }
    }

    let local_bytes = pack_local(recv_buffer, rkey, &iface_addr, local_ep_addr.as_ref())?;
    let req = rte.post_vec(local_bytes)?;
    rte.exchange_vec(req)?;

    let my_index = rte.group_index();
    let mut peers = Vec::new();
    let mut preallocated_iter = preallocated.into_iter();

    for peer_index in 0..rte.group_size() {
        if peer_index == my_index {
            continue;
        }
        let raw = rte.recv(peer_index)?;
        let record = unpack_peer(&raw)?;

        let remote_key = match &record.rkey {
            Some(bytes) => Some(iface.rkey_unpack(&PackedRkey(bytes.clone()))?),
            None => None,
        };

        let endpoint = if connect_to_endpoint {
            let mut ep = preallocated_iter
                .next()
                .ok_or_else(|| CoreError::fatal("preallocated endpoint count mismatch"))?;
            let ep_addr = record
                .ep_addr
                .as_ref()
                .map(|b| PackedAddress(b.clone()))
                .ok_or_else(|| CoreError::new(ErrorKind::InvalidParam, "peer omitted ep_addr"))?;
            iface.ep_connect_to_ep(ep.as_mut(), device_addr, &ep_addr)?;
            ep
        } else {
            iface.ep_create_connected(device_addr, &PackedAddress(record.iface_addr.clone()))?
        };

        peers.push(PeerEndpoint {
            endpoint,
            remote_recv_buffer: record.recv_buffer,
            remote_key,
        });
    }

    for peer in &mut peers {
        peer.endpoint.flush()?;
    }
    rte.barrier()?;

    Ok(peers)
}

/// Messaging-API status exchange: every peer contributes its local
/// status; if any peer reports non-OK, every peer observes that same
/// failure.
pub fn exchange_status(rte: &mut dyn Rte, local_status: CoreResult<()>) -> CoreResult<()> {
    let local_byte = match &local_status {
        Ok(()) => 0u8,
        Err(_) => 1u8,
    };
    let req = rte.post_vec(vec![local_byte])?;
    rte.exchange_vec(req)?;

    let my_index = rte.group_index();
    for peer_index in 0..rte.group_size() {
        if peer_index == my_index {
            continue;
        }
        let peer_status = rte.recv(peer_index)?;
        if peer_status.first().copied().unwrap_or(1) != 0 {
            return local_status.and(Err(CoreError::new(
                ErrorKind::NoMemory,
                format!("peer {peer_index} reported setup failure"),
            )));
        }
    }
    local_status
}

/// Teardown is symmetric with bring-up: barrier, clear AM handlers,
/// destroy endpoints and release remote keys, free the peer array.
pub fn teardown_endpoints(rte: &mut dyn Rte, iface: &mut dyn Interface, mut peers: Vec<PeerEndpoint>) -> CoreResult<()> {
    rte.barrier()?;
    iface.am_clear_handlers();
    peers.clear();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rte::loopback::LoopbackRte;
    use crate::transport::loopback::LoopbackInterface;

    #[test]
    fn pack_local_rejects_oversize_records() {
        let huge_rkey = PackedRkey(vec![0u8; SCRATCH_BUFFER_CAP * 2]);
        let addr = PackedAddress(b"dev".to_vec());
        let err = pack_local(0, Some(&huge_rkey), &addr, None).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Fatal);
    }

    #[test]
    fn single_peer_group_produces_no_remote_peers() {
        let mut rte = LoopbackRte::new();
        let mut iface = LoopbackInterface::new();
        let peers = setup_endpoints(&mut rte, &mut iface, 0, None, b"dev0", false).unwrap();
        assert!(peers.is_empty());
    }

    #[test]
    fn status_exchange_with_single_peer_passes_through_local_status() {
        let mut rte = LoopbackRte::new();
        assert!(exchange_status(&mut rte, Ok(())).is_ok());
        let failing = Err(CoreError::new(ErrorKind::NoMemory, "injected"));
        assert!(exchange_status(&mut rte, failing).is_err());
    }
}
