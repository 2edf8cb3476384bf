//! Trace sinks and breakpoints
//!
//! Both are small capability records rather than trait hierarchies: the
//! hot path pays one indirect call per retired instruction when tracing is
//! on, and a set probe when breakpoints exist.

use std::collections::HashSet;

/// Receives one preformatted, C-locale line per retired instruction, plus
/// `tailcall @from -> @to` transfer lines.
pub struct TraceSink {
    emit: Box<dyn FnMut(&str) + Send>,
}

impl TraceSink {
    pub fn new(emit: impl FnMut(&str) + Send + 'static) -> Self {
        TraceSink { emit: Box::new(emit) }
    }

    /// Collect lines into a shared buffer (tests, `--trace` to memory).
    pub fn to_vec(buffer: std::sync::Arc<std::sync::Mutex<Vec<String>>>) -> Self {
        TraceSink::new(move |line| {
            buffer.lock().expect("trace buffer").push(line.to_string());
        })
    }

    /// Write lines to stderr.
    pub fn to_stderr() -> Self {
        TraceSink::new(|line| {
            eprintln!("{}", line);
        })
    }

    pub fn emit(&mut self, line: &str) {
        (self.emit)(line);
    }
}

/// Breakpoints keyed by normalized `(file, line)`. Files are compared by
/// basename so `--break demo.bas:7` matches a module compiled from any
/// path ending in `demo.bas`.
#[derive(Default)]
pub struct BreakTable {
    points: HashSet<(String, u32)>,
}

impl BreakTable {
    pub fn new() -> Self {
        BreakTable::default()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn normalize(file: &str) -> String {
        file.rsplit('/').next().unwrap_or(file).to_string()
    }

    pub fn add(&mut self, file: &str, line: u32) {
        self.points.insert((Self::normalize(file), line));
    }

    pub fn matches(&self, file: &str, line: u32) -> bool {
        self.points.contains(&(Self::normalize(file), line))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breakpoint_normalization() {
        let mut t = BreakTable::new();
        t.add("src/demo.bas", 7);
        assert!(t.matches("demo.bas", 7));
        assert!(t.matches("/abs/path/demo.bas", 7));
        assert!(!t.matches("demo.bas", 8));
        assert!(!t.matches("other.bas", 7));
    }

    #[test]
    fn test_trace_sink_collects() {
        let buf = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut sink = TraceSink::to_vec(buf.clone());
        sink.emit("line one");
        sink.emit("line two");
        assert_eq!(buf.lock().unwrap().len(), 2);
    }
}
