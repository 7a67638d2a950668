//! Terminal utilities.
//!
//! Raw mode handling and a [`Surface`] that writes to a real terminal.

use crate::session::SessionError;
use crate::surface::Surface;
use crossterm::terminal;
use std::io::{self, IsTerminal, Write};

/// Check if stdin is a TTY.
pub fn is_tty() -> bool {
    io::stdin().is_terminal()
}

/// Raw terminal mode guard that restores terminal state on drop.
///
/// If stdin is not a TTY (e.g., in CI or tests), this is a no-op.
pub struct RawModeGuard {
    enabled: bool,
}

impl RawModeGuard {
    pub fn new() -> Result<Self, SessionError> {
        if !is_tty() {
            return Ok(Self { enabled: false });
        }
        terminal::enable_raw_mode()?;
        Ok(Self { enabled: true })
    }

    pub fn is_raw(&self) -> bool {
        self.enabled
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.enabled {
            let _ = terminal::disable_raw_mode();
        }
    }
}

/// Leave raw mode without a guard at hand, e.g. from a forced-exit hook.
pub fn restore_terminal() {
    if is_tty() {
        let _ = terminal::disable_raw_mode();
    }
}

/// Surface over any writer, stdout by default.
///
/// In raw mode the terminal does no output processing, so bare `\n` is
/// turned into `\r\n` when `crlf` is set.
pub struct TerminalSurface<W: Write + Send = io::Stdout> {
    out: W,
    crlf: bool,
    last_was_cr: bool,
}

impl TerminalSurface<io::Stdout> {
    pub fn stdout(crlf: bool) -> Self {
        Self::new(io::stdout(), crlf)
    }
}

impl<W: Write + Send> TerminalSurface<W> {
    pub fn new(out: W, crlf: bool) -> Self {
        Self {
            out,
            crlf,
            last_was_cr: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn translate(&mut self, text: &str) -> String {
        let mut out = String::with_capacity(text.len() + 8);
        for c in text.chars() {
            if c == '\n' && !self.last_was_cr {
                out.push('\r');
            }
            out.push(c);
            self.last_was_cr = c == '\r';
        }
        out
    }
}

impl<W: Write + Send> Surface for TerminalSurface<W> {
    fn write(&mut self, text: &str) {
        let result = if self.crlf {
            let text = self.translate(text);
            self.out.write_all(text.as_bytes())
        } else {
            self.out.write_all(text.as_bytes())
        };
        if let Err(err) = result.and_then(|()| self.out.flush()) {
            tracing::warn!("terminal: write failed: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_mode_only_on_a_tty() {
        let guard = RawModeGuard::new().unwrap();
        assert_eq!(guard.is_raw(), is_tty());
    }

    #[test]
    fn bare_newlines_become_crlf() {
        let mut surface = TerminalSurface::new(Vec::new(), true);
        surface.write("a\nb\r\nc");
        surface.write("\r");
        surface.write("\n");
        assert_eq!(surface.into_inner(), b"a\r\nb\r\nc\r\n");
    }

    #[test]
    fn passthrough_without_crlf() {
        let mut surface = TerminalSurface::new(Vec::new(), false);
        surface.write("a\nb");
        assert_eq!(surface.into_inner(), b"a\nb");
    }
}
