//! # Capability validator
//!
//! Maps a requested `{command, data_layout, msg_size_list}` onto the
//! transport capability flags and size bounds an interface must advertise,
//! and rejects infeasible combinations with a precise diagnostic. Grounded
//! on `libperf.c`'s parameter validation pass that runs before a test is
//! allowed to dispatch.

use crate::error::{CoreError, CoreResult, ErrorKind};

macro_rules! bitset {
    ($name:ident, $repr:ty) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name(pub $repr);

        impl $name {
            pub const NONE: Self = Self(0);

            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            pub const fn intersects(self, other: Self) -> bool {
                self.0 & other.0 != 0
            }

            pub const fn union(self, other: Self) -> Self {
                Self(self.0 | other.0)
            }
        }

        impl std::ops::BitOr for $name {
            type Output = Self;
            fn bitor(self, rhs: Self) -> Self {
                self.union(rhs)
            }
        }
    };
}

bitset!(FeatureSet, u32);

impl FeatureSet {
    pub const TAG: Self = Self(1 << 0);
    pub const AM: Self = Self(1 << 1);
    pub const RMA: Self = Self(1 << 2);
    pub const AMO32: Self = Self(1 << 3);
    pub const AMO64: Self = Self(1 << 4);
    pub const WAKEUP: Self = Self(1 << 5);
    pub const STREAM: Self = Self(1 << 6);
}

bitset!(CapFlags, u32);

impl CapFlags {
    pub const AM_SHORT: Self = Self(1 << 0);
    pub const AM_BCOPY: Self = Self(1 << 1);
    pub const AM_ZCOPY: Self = Self(1 << 2);
    pub const AM_SYNC: Self = Self(1 << 3);
    pub const PUT_SHORT: Self = Self(1 << 4);
    pub const PUT_BCOPY: Self = Self(1 << 5);
    pub const PUT_ZCOPY: Self = Self(1 << 6);
    pub const GET_BCOPY: Self = Self(1 << 7);
    pub const GET_ZCOPY: Self = Self(1 << 8);
    pub const ATOMIC32: Self = Self(1 << 9);
    pub const ATOMIC64: Self = Self(1 << 10);
    pub const CPU_ATOMICS: Self = Self(1 << 11);
    pub const DEVICE_ATOMICS: Self = Self(1 << 12);
}

bitset!(ParamFlags, u32);

impl ParamFlags {
    pub const VERBOSE: Self = Self(1 << 0);
    pub const ONE_SIDED: Self = Self(1 << 1);
    pub const MAP_NONBLOCK: Self = Self(1 << 2);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Am,
    Put,
    Get,
    Add,
    Fadd,
    Swap,
    Cswap,
    Tag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataLayout {
    Short,
    Bcopy,
    Zcopy,
    None,
}

/// Interface capability attributes, as would be returned by a transport's
/// `query()` call. Populated from the transport in production, hand-built
/// in tests.
#[derive(Debug, Clone)]
pub struct InterfaceAttributes {
    pub cap_flags: CapFlags,
    pub min_zcopy: usize,
    pub max_short: usize,
    pub max_bcopy: usize,
    pub max_zcopy: usize,
    pub max_hdr: usize,
    pub max_iov: usize,
    pub bandwidth: f64,
    pub overhead: f64,
    pub priority: i32,
    pub memory_domain_index: u32,
    pub device_name: String,
}

/// The subset of `Parameters` (§3) the validator needs, kept narrow so unit
/// tests don't have to build a full run configuration.
#[derive(Debug, Clone)]
pub struct ValidationParams<'a> {
    pub command: Command,
    pub data_layout: DataLayout,
    pub msg_size_list: &'a [usize],
    pub iov_stride: usize,
    pub am_hdr_size: usize,
    pub max_outstanding: usize,
    pub fc_window: usize,
    pub fc_window_bound: usize,
    pub flags: ParamFlags,
}

/// What an interface must support to run one validated combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requirement {
    pub required_flags: CapFlags,
    pub min_size: usize,
    pub max_size: usize,
    pub max_iov: usize,
}

fn am_put_flags(layout: DataLayout, short: CapFlags, bcopy: CapFlags, zcopy: CapFlags) -> CapFlags {
    match layout {
        DataLayout::Short => short,
        DataLayout::Bcopy => bcopy,
        DataLayout::Zcopy => zcopy,
        DataLayout::None => CapFlags::NONE,
    }
}

fn size_bounds_short_bcopy_zcopy(
    layout: DataLayout,
    attrs: &InterfaceAttributes,
) -> (usize, usize) {
    match layout {
        DataLayout::Zcopy => (attrs.min_zcopy, attrs.max_zcopy),
        DataLayout::Bcopy => (0, attrs.max_bcopy),
        DataLayout::Short => (0, attrs.max_short),
        DataLayout::None => (0, 0),
    }
}

/// Computes `(required_flag_set, min_size, max_size, max_iov)` for one
/// command/layout combination and validates `params` against it, returning
/// a diagnostic-bearing error when the combination is infeasible.
pub fn validate(params: &ValidationParams<'_>, attrs: &InterfaceAttributes) -> CoreResult<Requirement> {
    let verbose = params.flags.contains(ParamFlags::VERBOSE);
    let diagnose = |msg: String| -> CoreError {
        if verbose {
            CoreError::new(ErrorKind::InvalidParam, msg)
        } else {
            CoreError::new(ErrorKind::InvalidParam, "validation failed")
        }
    };

    if params.msg_size_list.is_empty() {
        return Err(diagnose("msg_size_list must have at least one entry".into()));
    }
    if params.max_outstanding < 1 {
        return Err(diagnose("max_outstanding must be >= 1".into()));
    }
    if params.iov_stride > 0 {
        if let Some(&max) = params.msg_size_list.iter().max() {
            if params.msg_size_list.iter().any(|&s| s > params.iov_stride) {
                return Err(diagnose(format!(
                    "message size entry exceeds iov_stride {} (max requested {})",
                    params.iov_stride, max
                )));
            }
        }
    }
    if params.fc_window > params.fc_window_bound {
        return Err(diagnose(format!(
            "fc_window {} exceeds configured bound {}",
            params.fc_window, params.fc_window_bound
        )));
    }
    if params.command == Command::Am
        && params.flags.contains(ParamFlags::ONE_SIDED)
    {
        tracing::warn!("ONE_SIDED flag combined with AM command, proceeding");
    }

    let (required_flags, min_size, max_size) = match params.command {
        Command::Am => {
            if params.data_layout == DataLayout::Short && params.am_hdr_size != 8 {
                return Err(diagnose(format!(
                    "short AM header size must be 8, got {}",
                    params.am_hdr_size
                )));
            }
            if params.data_layout == DataLayout::Zcopy && params.am_hdr_size > attrs.max_hdr {
                return Err(diagnose(format!(
                    "zero-copy AM header {} exceeds attr.max_hdr {}",
                    params.am_hdr_size, attrs.max_hdr
                )));
            }
            let first_iov = params.msg_size_list[0];
            let total: usize = params.msg_size_list.iter().sum();
            let bound = if params.msg_size_list.len() > 1 {
                first_iov
            } else {
                total
            };
            if params.am_hdr_size > bound {
                return Err(diagnose(format!(
                    "AM header {} exceeds message size bound {}",
                    params.am_hdr_size, bound
                )));
            }
            if params.data_layout == DataLayout::Zcopy
                && params.msg_size_list.len() > attrs.max_iov
            {
                return Err(diagnose(format!(
                    "msg_size_cnt {} exceeds max_iov {} in zero-copy",
                    params.msg_size_list.len(),
                    attrs.max_iov
                )));
            }
            let flags = am_put_flags(
                params.data_layout,
                CapFlags::AM_SHORT,
                CapFlags::AM_BCOPY,
                CapFlags::AM_ZCOPY,
            ) | CapFlags::AM_SYNC;
            let (min, max) = size_bounds_short_bcopy_zcopy(params.data_layout, attrs);
            (flags, min, max)
        }
        Command::Put => {
            let flags = am_put_flags(
                params.data_layout,
                CapFlags::PUT_SHORT,
                CapFlags::PUT_BCOPY,
                CapFlags::PUT_ZCOPY,
            );
            let (min, max) = size_bounds_short_bcopy_zcopy(params.data_layout, attrs);
            (flags, min, max)
        }
        Command::Get => {
            if params.data_layout == DataLayout::Short {
                return Err(diagnose("GET does not support SHORT layout".into()));
            }
            let flags = match params.data_layout {
                DataLayout::Bcopy => CapFlags::GET_BCOPY,
                DataLayout::Zcopy => CapFlags::GET_ZCOPY,
                _ => CapFlags::NONE,
            };
            let (min, max) = if params.data_layout == DataLayout::Zcopy {
                (attrs.min_zcopy, attrs.max_bcopy.max(attrs.max_zcopy))
            } else {
                (0, attrs.max_bcopy.max(attrs.max_zcopy))
            };
            (flags, min, max)
        }
        Command::Add | Command::Fadd | Command::Swap | Command::Cswap => {
            let size = params.msg_size_list[0];
            let flags = match size {
                4 => CapFlags::ATOMIC32,
                8 => CapFlags::ATOMIC64,
                other => {
                    return Err(diagnose(format!(
                        "atomic message size must be 4 or 8 bytes, got {other}"
                    )))
                }
            };
            (flags, 0, 8)
        }
        Command::Tag => {
            // Messaging, like AM: same short/bcopy/zcopy capability split,
            // no AM_SYNC requirement since unsolicited-completion sync is
            // an AM-specific concern TAG doesn't share.
            let flags = am_put_flags(
                params.data_layout,
                CapFlags::AM_SHORT,
                CapFlags::AM_BCOPY,
                CapFlags::AM_ZCOPY,
            );
            let (min, max) = size_bounds_short_bcopy_zcopy(params.data_layout, attrs);
            (flags, min, max)
        }
    };

    for &size in params.msg_size_list {
        if size < 1 || size < min_size || size > max_size {
            return Err(diagnose(format!(
                "message size {size} out of bounds [{}, {}]",
                min_size.max(1),
                max_size
            )));
        }
    }

    if !attrs.cap_flags.contains(required_flags) {
        return Err(CoreError::new(
            ErrorKind::Unsupported,
            "interface does not advertise required capability flags",
        ));
    }

    Ok(Requirement {
        required_flags,
        min_size,
        max_size,
        max_iov: attrs.max_iov,
    })
}
