//! # Logging
//!
//! A custom `tracing` event formatter that colorizes whole log lines by
//! level for clean, user-facing stdout output, plus `-v`/`-vv` verbosity
//! wiring for the demo binary. The file-rotation/non-blocking-writer half
//! of a fuller logging setup is dropped along with `tracing-appender`
//! since this core has no long-running daemon to keep a log file for (see
//! DESIGN.md).

use std::fmt;

use colored::*;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::registry::LookupSpan;

/// Colorizes the entire log line by severity, with no timestamp or level
/// prefix, matching the demo binary's terse console output.
pub struct ColorizedFormatter;

impl<S, N> FormatEvent<S, N> for ColorizedFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let mut buffer = String::new();
        let mut buf_writer = Writer::new(&mut buffer);
        ctx.format_fields(buf_writer.by_ref(), event)?;

        let colored_output = match *event.metadata().level() {
            Level::INFO => buffer.white(),
            Level::WARN => buffer.yellow(),
            Level::ERROR => buffer.red(),
            Level::DEBUG => buffer.blue(),
            Level::TRACE => buffer.purple(),
        };

        writeln!(writer, "{}", colored_output)
    }
}

/// Maps `-v` repeat count to a tracing level: default INFO, `-v` DEBUG,
/// `-vv` and beyond TRACE.
pub fn level_filter(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// Installs the global subscriber: a single stdout layer using
/// [`ColorizedFormatter`], filtered to `level`. Returns an error if a
/// subscriber is already installed.
pub fn init(verbose: u8) {
    use tracing_subscriber::prelude::*;

    let level = level_filter(verbose);
    let stdout_log = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .event_format(ColorizedFormatter)
        .with_filter(level);

    let _ = tracing_subscriber::registry().with(stdout_log).try_init();
}
