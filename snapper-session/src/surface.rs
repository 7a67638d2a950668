//! Output sink for the session controller.

/// Something that renders text: a terminal, a log, a test transcript.
///
/// Writes are fire-and-forget. A surface that can fail reports it through
/// tracing, never back to the controller.
pub trait Surface: Send {
    fn write(&mut self, text: &str);
}

impl<S: Surface + ?Sized> Surface for Box<S> {
    fn write(&mut self, text: &str) {
        (**self).write(text);
    }
}

/// A surface that records every write.
#[derive(Debug, Default, Clone)]
pub struct Transcript {
    writes: Vec<String>,
}

impl Transcript {
    pub fn writes(&self) -> &[String] {
        &self.writes
    }

    /// Everything written so far, concatenated.
    pub fn output(&self) -> String {
        self.writes.concat()
    }

    pub fn clear(&mut self) {
        self.writes.clear();
    }
}

impl Surface for Transcript {
    fn write(&mut self, text: &str) {
        self.writes.push(text.to_string());
    }
}
