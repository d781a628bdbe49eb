//! A write-only transport that forwards writes to the `log` facade, line by line.
//!
//! Stands in for the startup-time stdout/stderr-as-logger handles the original environment hands
//! new processes when there's no real console (spec §4.7): rather than writing bytes to an
//! inherited fd, writes here are line-buffered and re-emitted through `log::info!`/`log::warn!`.

use parking_lot::Mutex;

use crate::errno::KernelStatus;
use crate::io_object::{IoTransport, MiscOp, MiscResult};
use crate::kernel::WaitHandle;
use crate::poll_events::PollEvents;

/// Logging level a [`LoggerTransport`] emits at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// `log::info!`
    Info,
    /// `log::warn!`
    Warn,
}

/// A write-only sink that logs complete lines as they're written; partial lines are buffered
/// until a `\n` completes them.
#[derive(Debug)]
pub struct LoggerTransport {
    level: LogLevel,
    target: &'static str,
    pending: Mutex<Vec<u8>>,
}

impl LoggerTransport {
    /// A logger transport tagged with `target` (shown as the log record's module path) at
    /// `level`.
    pub fn new(target: &'static str, level: LogLevel) -> Self {
        LoggerTransport {
            level,
            target,
            pending: Mutex::new(Vec::new()),
        }
    }

    fn emit(&self, line: &str) {
        match self.level {
            LogLevel::Info => log::info!(target: "posix_shim::logger", "{}: {}", self.target, line),
            LogLevel::Warn => log::warn!(target: "posix_shim::logger", "{}: {}", self.target, line),
        }
    }
}

impl IoTransport for LoggerTransport {
    fn close(&self) -> Result<(), KernelStatus> {
        let mut pending = self.pending.lock();
        if !pending.is_empty() {
            self.emit(&String::from_utf8_lossy(&pending));
            pending.clear();
        }
        Ok(())
    }

    fn read(&self, _buf: &mut [u8]) -> Result<usize, KernelStatus> {
        Err(KernelStatus::NotSupported)
    }

    fn write(&self, buf: &[u8]) -> Result<usize, KernelStatus> {
        let mut pending = self.pending.lock();
        pending.extend_from_slice(buf);
        while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = pending.drain(..=pos).collect();
            self.emit(String::from_utf8_lossy(&line[..line.len() - 1]).trim_end());
        }
        Ok(buf.len())
    }

    fn misc(&self, op: MiscOp, _arg: u64, _in_buf: &[u8], _out_buf: &mut [u8]) -> Result<MiscResult, KernelStatus> {
        let _ = op;
        Err(KernelStatus::NotSupported)
    }

    fn wait_begin(&self, _events: PollEvents) -> (WaitHandle, PollEvents) {
        (WaitHandle::INVALID, PollEvents::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_returns_full_length_even_without_a_trailing_newline() {
        let logger = LoggerTransport::new("test", LogLevel::Info);
        assert_eq!(logger.write(b"partial").unwrap(), 7);
    }

    #[test]
    fn close_flushes_a_partial_line() {
        let logger = LoggerTransport::new("test", LogLevel::Info);
        logger.write(b"no newline yet").unwrap();
        logger.close().unwrap();
        assert!(logger.pending.lock().is_empty());
    }

    #[test]
    fn complete_lines_are_drained_immediately() {
        let logger = LoggerTransport::new("test", LogLevel::Warn);
        logger.write(b"line one\nline two\npartial").unwrap();
        assert_eq!(logger.pending.lock().as_slice(), b"partial");
    }
}
