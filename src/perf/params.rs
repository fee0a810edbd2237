//! # Parameters
//!
//! The immutable input to one perf run. Grounded on `libperf.c`'s
//! `ucx_perf_params_t`; only enough of a full benchmark-suite argument
//! surface is kept here to parameterize one run.

use serde::{Deserialize, Serialize};

use crate::capability::{Command, DataLayout, ParamFlags};
use crate::worker::ThreadMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Api {
    Transport,
    Messaging,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestType {
    PingPong,
    StreamUni,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameters {
    pub api: Api,
    pub command: CommandKind,
    pub test_type: TestType,
    pub data_layout: DataLayoutKind,
    pub msg_size_list: Vec<usize>,
    pub iov_stride: usize,
    pub am_hdr_size: usize,
    pub fc_window: usize,
    pub max_outstanding: usize,
    pub alignment: usize,
    pub warmup_iter: u64,
    /// 0 means unbounded.
    pub max_iter: u64,
    /// 0.0 means unbounded.
    pub max_time: f64,
    pub report_interval: u64,
    pub thread_count: usize,
    pub thread_mode: ThreadModeKind,
    pub flags: u32,
}

/// Serde-friendly mirror of [`Command`] (the capability module's enum
/// isn't `Serialize` since it has no reason to cross a wire boundary on
/// its own).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandKind {
    Am,
    Put,
    Get,
    Add,
    Fadd,
    Swap,
    Cswap,
    Tag,
}

impl From<CommandKind> for Command {
    fn from(value: CommandKind) -> Self {
        match value {
            CommandKind::Am => Command::Am,
            CommandKind::Put => Command::Put,
            CommandKind::Get => Command::Get,
            CommandKind::Add => Command::Add,
            CommandKind::Fadd => Command::Fadd,
            CommandKind::Swap => Command::Swap,
            CommandKind::Cswap => Command::Cswap,
            CommandKind::Tag => Command::Tag,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataLayoutKind {
    Short,
    Bcopy,
    Zcopy,
    None,
}

impl From<DataLayoutKind> for DataLayout {
    fn from(value: DataLayoutKind) -> Self {
        match value {
            DataLayoutKind::Short => DataLayout::Short,
            DataLayoutKind::Bcopy => DataLayout::Bcopy,
            DataLayoutKind::Zcopy => DataLayout::Zcopy,
            DataLayoutKind::None => DataLayout::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThreadModeKind {
    Single,
    Serialized,
    Multi,
}

impl From<ThreadModeKind> for ThreadMode {
    fn from(value: ThreadModeKind) -> Self {
        match value {
            ThreadModeKind::Single => ThreadMode::Single,
            ThreadModeKind::Serialized => ThreadMode::Serialized,
            ThreadModeKind::Multi => ThreadMode::Multi,
        }
    }
}

impl Parameters {
    pub fn param_flags(&self) -> ParamFlags {
        ParamFlags(self.flags)
    }

    /// Clamps warmup iterations the way `libperf.c` does: at most a tenth
    /// of the bounded iteration count. Unbounded (`max_iter == 0`) leaves
    /// warmup untouched, since there's no fraction to take of infinity.
    pub fn clamped_warmup_iter(&self) -> u64 {
        if self.max_iter == 0 {
            self.warmup_iter
        } else {
            self.warmup_iter.min(self.max_iter / 10)
        }
    }
}
