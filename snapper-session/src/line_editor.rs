//! Single-line input buffer fed one keystroke at a time.

use crate::surface::Surface;

/// Sequence that erases the character left of the cursor.
pub const ERASE: &str = "\x08 \x08";

const CTRL_C: &str = "\x03";
const CTRL_D: &str = "\x04";

/// What a keystroke amounted to, beyond its effect on the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    /// The keystroke was consumed (or discarded) by the editor.
    Edited,
    /// Enter was pressed; the buffer content is handed over and the buffer is
    /// already empty again.
    Submit(String),
    /// Ctrl-C.
    Interrupt,
    /// Ctrl-D on an empty line.
    EndOfInput,
}

#[derive(Debug, Default)]
pub struct LineEditor {
    buffer: String,
}

impl LineEditor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Apply one keystroke, echoing to `surface` where appropriate.
    pub fn feed(&mut self, key: &str, surface: &mut dyn Surface) -> LineEvent {
        match key {
            "" => LineEvent::Edited,
            "\r" | "\n" | "\r\n" => LineEvent::Submit(std::mem::take(&mut self.buffer)),
            "\x7f" | "\x08" => {
                if self.buffer.pop().is_some() {
                    surface.write(ERASE);
                }
                LineEvent::Edited
            }
            CTRL_C => LineEvent::Interrupt,
            CTRL_D if self.buffer.is_empty() => LineEvent::EndOfInput,
            // Arrow keys and every other escape sequence: no cursor
            // movement inside the line.
            key if key.starts_with('\x1b') => LineEvent::Edited,
            key => {
                let printable: String = key.chars().filter(|c| !c.is_control()).collect();
                if !printable.is_empty() {
                    self.buffer.push_str(&printable);
                    surface.write(&printable);
                }
                LineEvent::Edited
            }
        }
    }
}
