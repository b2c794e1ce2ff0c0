use std::io::{self, Write};

use clap::CommandFactory;

use crate::error::{classify_error_code, is_usage_error, VaultMountError};

use super::Cli;

/// Result of writing to an output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutputStatus {
    /// Write completed.
    Written,
    /// Stream was closed by the reader.
    BrokenPipe,
}

fn map_result(result: io::Result<()>) -> io::Result<OutputStatus> {
    match result {
        Ok(()) => Ok(OutputStatus::Written),
        Err(error) if error.kind() == io::ErrorKind::BrokenPipe => Ok(OutputStatus::BrokenPipe),
        Err(error) => Err(error),
    }
}

/// Writes text and a newline to stderr.
pub(crate) fn stderr_line(text: &str) -> io::Result<OutputStatus> {
    let stderr = io::stderr();
    let mut handle = stderr.lock();
    map_result(
        handle
            .write_all(text.as_bytes())
            .and_then(|_| handle.write_all(b"\n"))
            .and_then(|_| handle.flush()),
    )
}

/// Formats an error the way it is printed on stderr.
pub(crate) fn error_lines(error: &VaultMountError) -> Vec<String> {
    let mut lines = vec![format!("error[{}]: {error}", classify_error_code(error))];
    if is_usage_error(error) {
        lines.push(String::new());
        lines.push(Cli::command().render_usage().to_string());
        lines.push("For more information, try '--help'.".to_owned());
    }
    lines
}

/// Prints an error, plus usage for configuration errors.
pub(crate) fn report_error(error: &VaultMountError) {
    for line in error_lines(error) {
        if let Ok(OutputStatus::BrokenPipe) | Err(_) = stderr_line(&line) {
            return;
        }
    }
}
