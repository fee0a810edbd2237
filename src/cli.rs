//! # Command-line interface
//!
//! A small clap-derive surface for the demo binary: enough to build one
//! [`Parameters`](crate::perf::params::Parameters) and run it, not the full
//! knob set a production client would expose.

use std::path::PathBuf;
use std::time::Duration;

use clap::{
    builder::styling::{AnsiColor, Styles},
    Parser, ValueEnum,
};

use crate::capability::{Command, DataLayout};
use crate::perf::params::{Api, CommandKind, DataLayoutKind, Parameters, TestType, ThreadModeKind};

fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default())
        .usage(AnsiColor::Yellow.on_default())
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Runs one worker/perf-core scenario over the loopback transport and
/// prints a JSON report.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None, styles = styles())]
pub struct Args {
    /// Command to exercise
    #[arg(short = 'x', long, value_enum, default_value_t = CommandArg::Put, help_heading = "Core Options")]
    pub command: CommandArg,

    /// Test pattern: ping-pong (round-trip) or a one-directional stream
    #[arg(short = 't', long, value_enum, default_value_t = TestTypeArg::PingPong, help_heading = "Core Options")]
    pub test_type: TestTypeArg,

    /// Data layout for the exercised command
    #[arg(short = 'l', long, value_enum, default_value_t = DataLayoutArg::Bcopy, help_heading = "Core Options")]
    pub data_layout: DataLayoutArg,

    /// Message size in bytes
    #[arg(short = 's', long, default_value_t = 4096)]
    pub message_size: usize,

    /// Number of iterations to run (0 = unbounded, bounded only by --duration)
    #[arg(short = 'i', long, default_value_t = 100_000)]
    pub iterations: u64,

    /// Duration to run the benchmark (takes precedence jointly with iterations:
    /// the run stops at whichever bound is hit first). Accepts "500ms", "10s",
    /// "5m", "1h"; a bare number is seconds.
    #[arg(short = 'd', long, value_parser = parse_duration)]
    pub duration: Option<Duration>,

    /// Number of warmup iterations before measurement starts
    #[arg(short = 'w', long, default_value_t = 1000)]
    pub warmup_iterations: u64,

    /// Emit a partial report every N iterations (0 disables periodic reports)
    #[arg(long, default_value_t = 0)]
    pub report_interval: u64,

    /// Number of worker threads (thread_mode is promoted to MULTI when > 1)
    #[arg(short = 'c', long, default_value_t = 1)]
    pub thread_count: usize,

    /// Active-message header size, bytes (AM command only)
    #[arg(long, default_value_t = 8)]
    pub am_hdr_size: usize,

    /// Flow-control window for outstanding active messages
    #[arg(long, default_value_t = 0)]
    pub fc_window: usize,

    /// Maximum outstanding requests before the driver must flush
    #[arg(long, default_value_t = 1)]
    pub max_outstanding: usize,

    /// Required alignment of message buffers, bytes
    #[arg(long, default_value_t = 8)]
    pub alignment: usize,

    /// IOV stride for zero-copy layouts, bytes (0 = contiguous)
    #[arg(long, default_value_t = 0)]
    pub iov_stride: usize,

    /// Write the final JSON report to this file instead of stdout
    #[arg(short = 'o', long)]
    pub output_file: Option<PathBuf>,

    /// Silence user-facing informational output on stdout
    #[arg(short = 'q', long, help_heading = "Output and Logging")]
    pub quiet: bool,

    /// Increase diagnostic log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, help_heading = "Output and Logging")]
    pub verbose: u8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum CommandArg {
    Am,
    Put,
    Get,
    Add,
    Fadd,
    Swap,
    Cswap,
    Tag,
}

impl From<CommandArg> for CommandKind {
    fn from(value: CommandArg) -> Self {
        match value {
            CommandArg::Am => CommandKind::Am,
            CommandArg::Put => CommandKind::Put,
            CommandArg::Get => CommandKind::Get,
            CommandArg::Add => CommandKind::Add,
            CommandArg::Fadd => CommandKind::Fadd,
            CommandArg::Swap => CommandKind::Swap,
            CommandArg::Cswap => CommandKind::Cswap,
            CommandArg::Tag => CommandKind::Tag,
        }
    }
}

impl From<CommandArg> for Command {
    fn from(value: CommandArg) -> Self {
        CommandKind::from(value).into()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum TestTypeArg {
    PingPong,
    StreamUni,
}

impl From<TestTypeArg> for TestType {
    fn from(value: TestTypeArg) -> Self {
        match value {
            TestTypeArg::PingPong => TestType::PingPong,
            TestTypeArg::StreamUni => TestType::StreamUni,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum DataLayoutArg {
    Short,
    Bcopy,
    Zcopy,
    None,
}

impl From<DataLayoutArg> for DataLayoutKind {
    fn from(value: DataLayoutArg) -> Self {
        match value {
            DataLayoutArg::Short => DataLayoutKind::Short,
            DataLayoutArg::Bcopy => DataLayoutKind::Bcopy,
            DataLayoutArg::Zcopy => DataLayoutKind::Zcopy,
            DataLayoutArg::None => DataLayoutKind::None,
        }
    }
}

impl From<DataLayoutArg> for DataLayout {
    fn from(value: DataLayoutArg) -> Self {
        DataLayoutKind::from(value).into()
    }
}

impl From<&Args> for Parameters {
    fn from(args: &Args) -> Self {
        let thread_mode = if args.thread_count > 1 {
            ThreadModeKind::Multi
        } else {
            ThreadModeKind::Single
        };
        Parameters {
            api: Api::Messaging,
            command: args.command.into(),
            test_type: args.test_type.into(),
            data_layout: args.data_layout.into(),
            msg_size_list: vec![args.message_size],
            iov_stride: args.iov_stride,
            am_hdr_size: args.am_hdr_size,
            fc_window: args.fc_window,
            max_outstanding: args.max_outstanding,
            alignment: args.alignment,
            warmup_iter: args.warmup_iterations,
            max_iter: args.iterations,
            max_time: args.duration.map(|d| d.as_secs_f64()).unwrap_or(0.0),
            report_interval: args.report_interval,
            thread_count: args.thread_count.max(1),
            thread_mode,
            flags: 0,
        }
    }
}

/// Parses a human-readable duration ("500ms", "10s", "5m", "1h"; a bare
/// number is assumed to be seconds).
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("duration cannot be empty".to_string());
    }

    let (num_str, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, "h")
    } else {
        (s, "s")
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("invalid number in duration: {num_str}"))?;
    if num < 0.0 {
        return Err("duration cannot be negative".to_string());
    }

    Ok(match unit {
        "ms" => Duration::from_millis(num as u64),
        "s" => Duration::from_secs_f64(num),
        "m" => Duration::from_secs_f64(num * 60.0),
        "h" => Duration::from_secs_f64(num * 3600.0),
        _ => unreachable!(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_accepts_unit_suffixes() {
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("10").unwrap(), Duration::from_secs(10));
    }

    #[test]
    fn parse_duration_rejects_empty_and_negative() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("-5s").is_err());
    }

    #[test]
    fn thread_count_above_one_promotes_thread_mode_to_multi() {
        let mut args = Args::parse_from(["ucx-perf-core"]);
        args.thread_count = 4;
        let params = Parameters::from(&args);
        assert_eq!(params.thread_mode, ThreadModeKind::Multi);
        assert_eq!(params.thread_count, 4);
    }
}
