//! # Atomic-resource selector
//!
//! Chooses which configured interfaces carry atomic operations, under one
//! of three policies. Grounded on `ucp_worker.c`'s resource-scoring and
//! selection idiom for atomic lane assignment.

use crate::capability::{CapFlags, FeatureSet, InterfaceAttributes};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicPolicy {
    Cpu,
    Device,
    Guess,
}

/// Bitmask of enabled interface indices, one bit per configured transport
/// resource. An empty mask is legal when the feature set omits atomics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AtomicMask(pub u64);

impl AtomicMask {
    pub const EMPTY: Self = Self(0);

    pub fn set(&mut self, idx: usize) {
        self.0 |= 1 << idx;
    }

    pub fn is_set(&self, idx: usize) -> bool {
        self.0 & (1 << idx) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

/// A fixed dummy peer profile used to score DEVICE-policy candidates: an
/// idealized peer with infinite bandwidth, no overhead, and every
/// capability flag set. The scoring function ranks interfaces by how well
/// they'd serve this reference peer, not an observed one.
fn dummy_peer_bandwidth() -> f64 {
    1e12
}

fn score(attrs: &InterfaceAttributes) -> f64 {
    let bandwidth = attrs.bandwidth.min(dummy_peer_bandwidth());
    if attrs.overhead <= 0.0 {
        bandwidth
    } else {
        bandwidth / attrs.overhead
    }
}

/// Runs the atomic-resource selector across `interfaces` (dense array,
/// `None` for a permanently null slot) and `worker_features`, returning
/// the enabled mask.
pub fn select(
    policy: AtomicPolicy,
    interfaces: &[Option<InterfaceAttributes>],
    worker_features: FeatureSet,
) -> AtomicMask {
    let wants_atomics = worker_features.intersects(FeatureSet::AMO32 | FeatureSet::AMO64);
    if !wants_atomics {
        tracing::debug!("no support: feature set omits atomics");
        return AtomicMask::EMPTY;
    }

    let effective_policy = match policy {
        AtomicPolicy::Guess => {
            let any_device = interfaces.iter().flatten().any(|a| {
                a.cap_flags.contains(CapFlags::DEVICE_ATOMICS)
            });
            if any_device {
                AtomicPolicy::Device
            } else {
                AtomicPolicy::Cpu
            }
        }
        other => other,
    };

    match effective_policy {
        AtomicPolicy::Cpu => select_cpu(interfaces),
        AtomicPolicy::Device => select_device(interfaces),
        AtomicPolicy::Guess => unreachable!("resolved above"),
    }
}

fn select_cpu(interfaces: &[Option<InterfaceAttributes>]) -> AtomicMask {
    let mut mask = AtomicMask::EMPTY;
    for (idx, attrs) in interfaces.iter().enumerate() {
        if let Some(attrs) = attrs {
            if attrs.cap_flags.contains(CapFlags::CPU_ATOMICS) {
                mask.set(idx);
            }
        }
    }
    mask
}

fn select_device(interfaces: &[Option<InterfaceAttributes>]) -> AtomicMask {
    // Ties broken by higher interface priority; a tie on both score and
    // priority keeps the earliest candidate rather than the last one, so
    // `max_by` (which prefers the last of equal elements) isn't used here.
    let winner = interfaces
        .iter()
        .enumerate()
        .filter_map(|(idx, attrs)| attrs.as_ref().map(|a| (idx, a)))
        .fold(None, |best: Option<(usize, &InterfaceAttributes)>, cand| {
            match best {
                None => Some(cand),
                Some(b) => {
                    let better = score(cand.1) > score(b.1)
                        || (score(cand.1) == score(b.1) && cand.1.priority > b.1.priority);
                    if better {
                        Some(cand)
                    } else {
                        Some(b)
                    }
                }
            }
        });

    let mut mask = AtomicMask::EMPTY;
    let Some((winner_idx, winner_attrs)) = winner else {
        return mask;
    };
    mask.set(winner_idx);

    let device_name_bound = winner_attrs.device_name.len();
    for (idx, attrs) in interfaces.iter().enumerate() {
        if idx == winner_idx {
            continue;
        }
        if let Some(attrs) = attrs {
            let same_domain = attrs.memory_domain_index == winner_attrs.memory_domain_index;
            let same_device = attrs
                .device_name
                .get(..device_name_bound.min(attrs.device_name.len()))
                == winner_attrs.device_name.get(..device_name_bound.min(winner_attrs.device_name.len()));
            if same_domain && same_device {
                mask.set(idx);
            }
        }
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(device_atomics: bool, cpu_atomics: bool, domain: u32, name: &str) -> InterfaceAttributes {
        let mut flags = CapFlags::NONE;
        if device_atomics {
            flags = flags.union(CapFlags::DEVICE_ATOMICS);
        }
        if cpu_atomics {
            flags = flags.union(CapFlags::CPU_ATOMICS);
        }
        InterfaceAttributes {
            cap_flags: flags,
            min_zcopy: 0,
            max_short: 0,
            max_bcopy: 0,
            max_zcopy: 0,
            max_hdr: 0,
            max_iov: 0,
            bandwidth: 1e9,
            overhead: 1.0,
            priority: 0,
            memory_domain_index: domain,
            device_name: name.into(),
        }
    }

    #[test]
    fn empty_mask_when_feature_set_omits_atomics() {
        let interfaces = vec![Some(attrs(true, true, 0, "dev0"))];
        let mask = select(AtomicPolicy::Cpu, &interfaces, FeatureSet::TAG);
        assert!(mask.is_empty());
    }

    #[test]
    fn cpu_policy_enables_every_cpu_atomic_interface() {
        let interfaces = vec![
            Some(attrs(false, true, 0, "dev0")),
            Some(attrs(false, false, 0, "dev1")),
            None,
        ];
        let mask = select(AtomicPolicy::Cpu, &interfaces, FeatureSet::AMO32);
        assert!(mask.is_set(0));
        assert!(!mask.is_set(1));
        assert!(!mask.is_set(2));
    }

    #[test]
    fn guess_falls_back_to_cpu_when_no_device_atomics() {
        let interfaces = vec![Some(attrs(false, true, 0, "dev0"))];
        let mask = select(AtomicPolicy::Guess, &interfaces, FeatureSet::AMO64);
        assert!(mask.is_set(0));
    }

    #[test]
    fn device_policy_enables_winner_and_siblings_sharing_domain_and_device_name() {
        let interfaces = vec![
            Some(attrs(true, false, 1, "mlx5_0")),
            Some(attrs(true, false, 1, "mlx5_0:1")),
            Some(attrs(true, false, 2, "mlx5_1")),
        ];
        let mask = select(AtomicPolicy::Device, &interfaces, FeatureSet::AMO64);
        assert!(mask.is_set(0));
        assert!(mask.is_set(1));
        assert!(!mask.is_set(2));
    }
}
