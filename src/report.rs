//! Final report output: pretty-printed JSON to a file or to stdout.
//!
//! Trimmed to this crate's one-shot demo scope: no streaming, no
//! combined-mechanism summary.

use std::path::Path;

use crate::error::{CoreError, CoreResult};

/// Writes `report` as pretty-printed JSON to `output_file`, or to stdout
/// when `output_file` is `None`.
pub fn write_or_print(report: &serde_json::Value, output_file: Option<&Path>) -> CoreResult<()> {
    let text = serde_json::to_string_pretty(report)
        .map_err(|e| CoreError::fatal(format!("serializing report: {e}")))?;
    match output_file {
        Some(path) => std::fs::write(path, format!("{text}\n"))
            .map_err(|e| CoreError::fatal(format!("writing report to {}: {e}", path.display())))?,
        None => println!("{text}"),
    }
    Ok(())
}
