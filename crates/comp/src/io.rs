use std::{
    cell::RefCell,
    io::{self, Write as _},
};

/// Destination for output produced by the `|print` builtin.
///
/// Implement this to capture or redirect print output from embedded code.
/// The default implementation `StdPrint` writes to stdout.
pub trait PrintWriter {
    /// Writes one rendered value, without a trailing newline.
    fn write(&mut self, output: &str);

    /// Writes a single separator or terminator character.
    fn push(&mut self, end: char);
}

thread_local! {
    /// Buffer for `StdPrint`; flushed when the writer drops so interleaved
    /// host output stays ordered.
    static STDOUT_BUFFER: RefCell<String> = const { RefCell::new(String::new()) };
}

/// Default `PrintWriter` that writes to stdout.
#[derive(Debug, Default)]
pub struct StdPrint;

impl PrintWriter for StdPrint {
    fn write(&mut self, output: &str) {
        STDOUT_BUFFER.with(|buffer| buffer.borrow_mut().push_str(output));
    }

    fn push(&mut self, end: char) {
        STDOUT_BUFFER.with(|buffer| buffer.borrow_mut().push(end));
    }
}

impl Drop for StdPrint {
    fn drop(&mut self) {
        STDOUT_BUFFER.with(|buffer| {
            let mut buffer = buffer.borrow_mut();
            if buffer.is_empty() {
                return;
            }
            let _ = io::stdout().write_all(buffer.as_bytes());
            let _ = io::stdout().flush();
            buffer.clear();
        });
    }
}

/// A `PrintWriter` that collects all output into a string.
///
/// Useful for testing or capturing print output programmatically.
#[derive(Debug, Default)]
pub struct CollectStringPrint(String);

impl CollectStringPrint {
    #[must_use]
    pub fn new() -> Self {
        Self(String::new())
    }

    #[must_use]
    pub fn output(&self) -> &str {
        self.0.as_str()
    }

    #[must_use]
    pub fn into_output(self) -> String {
        self.0
    }
}

impl PrintWriter for CollectStringPrint {
    fn write(&mut self, output: &str) {
        self.0.push_str(output);
    }

    fn push(&mut self, end: char) {
        self.0.push(end);
    }
}

/// `PrintWriter` that ignores all output.
#[derive(Debug, Default)]
pub struct NoPrint;

impl PrintWriter for NoPrint {
    fn write(&mut self, _output: &str) {}

    fn push(&mut self, _end: char) {}
}
