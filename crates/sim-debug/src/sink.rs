//! Debug output sinks

use parking_lot::Mutex;
use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;

/// Shared writer receiving a processor's debug output
pub type DebugSink = Arc<Mutex<dyn Write + Send>>;

/// Sink writing to the process-wide diagnostic stream
pub fn stderr_sink() -> DebugSink {
    Arc::new(Mutex::new(io::stderr()))
}

/// Write formatted output to `sink`, or to stderr when no sink is set
pub fn write_fmt(sink: Option<&DebugSink>, args: fmt::Arguments<'_>) -> io::Result<()> {
    match sink {
        Some(sink) => sink.lock().write_fmt(args),
        None => io::stderr().lock().write_fmt(args),
    }
}

/// In-memory sink, mainly for capturing output in tests and reports
///
/// Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A [`DebugSink`] appending to this buffer
    pub fn sink(&self) -> DebugSink {
        Arc::new(Mutex::new(self.clone()))
    }

    /// Captured output, lossily decoded as UTF-8
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock()).into_owned()
    }

    pub fn clear(&self) {
        self.buffer.lock().clear();
    }
}

impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_shares_buffer() {
        let capture = MemorySink::new();
        let sink = capture.sink();

        write_fmt(Some(&sink), format_args!("pc=0x{:x}\n", 0x1000)).unwrap();
        writeln!(sink.lock(), "done").unwrap();

        assert_eq!(capture.contents(), "pc=0x1000\ndone\n");
        capture.clear();
        assert!(capture.contents().is_empty());
    }

    #[test]
    fn test_default_sink_is_stderr() {
        write_fmt(None, format_args!("")).unwrap();
        let sink = stderr_sink();
        sink.lock().flush().unwrap();
    }
}
