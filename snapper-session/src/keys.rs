//! Keystroke feed.
//!
//! Raw input bytes are split into keystrokes: one printable character, one
//! control byte or one complete escape sequence per item. A stdin reader
//! thread hands the bytes to a task that splits them and sends the
//! keystrokes to the controller over a channel.

use std::io::Read;
use std::time::Duration;
use tokio::sync::mpsc;

const ESC: u8 = 0x1b;

/// How long a trailing escape waits for the rest of its sequence before it
/// counts as the Escape key.
const ESCAPE_TIMEOUT: Duration = Duration::from_millis(50);

/// Splits a byte stream into keystrokes, carrying incomplete sequences over
/// to the next [`KeySplitter::push`].
#[derive(Debug, Default)]
pub struct KeySplitter {
    pending: Vec<u8>,
}

impl KeySplitter {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut keys = Vec::new();
        let mut at = 0;

        while at < self.pending.len() {
            match key_len(&self.pending[at..]) {
                Some(len) => {
                    let raw = &self.pending[at..at + len];
                    let key = match std::str::from_utf8(raw) {
                        Ok(key) => key.to_string(),
                        Err(_) => char::REPLACEMENT_CHARACTER.to_string(),
                    };
                    keys.push(key);
                    at += len;
                }
                None => break,
            }
        }

        self.pending.drain(..at);
        keys
    }

    /// Whether bytes are held back waiting for the rest of a keystroke.
    pub fn is_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Give up waiting and emit the held-back bytes as one keystroke.
    pub fn flush(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let key = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(key)
    }
}

/// Length of the keystroke at the start of `bytes`, `None` if it is not
/// complete yet.
fn key_len(bytes: &[u8]) -> Option<usize> {
    let first = *bytes.first()?;
    match first {
        ESC => match bytes.get(1) {
            // The rest of the sequence may come with the next read.
            None => None,
            Some(&ESC) => Some(1),
            Some(b'[') => {
                // CSI: parameters and intermediates, then one final byte.
                let end = bytes[2..].iter().position(|b| (0x40..=0x7e).contains(b))?;
                Some(2 + end + 1)
            }
            Some(b'O') => bytes.get(2).map(|_| 3),
            Some(next) if next.is_ascii() => Some(2),
            Some(_) => Some(1),
        },
        b'\r' if bytes.get(1) == Some(&b'\n') => Some(2),
        0x00..=0x7f => Some(1),
        _ => {
            let width = match first {
                0xc2..=0xdf => 2,
                0xe0..=0xef => 3,
                0xf0..=0xf4 => 4,
                // Stray continuation byte or invalid lead byte.
                _ => return Some(1),
            };
            if bytes.len() < width {
                return None;
            }
            if bytes[1..width].iter().all(|b| (0x80..=0xbf).contains(b)) {
                Some(width)
            } else {
                Some(1)
            }
        }
    }
}

/// Read keystrokes from `source` on a dedicated thread.
///
/// A trailing escape is held for [`ESCAPE_TIMEOUT`] so a sequence split
/// across reads stays whole. The channel closes when `source` reaches end of
/// input or fails. Must be called within a tokio runtime.
pub fn spawn_key_reader(source: Box<dyn Read + Send>) -> mpsc::Receiver<String> {
    let (bytes_tx, mut bytes_rx) = mpsc::channel::<Vec<u8>>(64);
    let (tx, rx) = mpsc::channel(256);

    std::thread::spawn(move || {
        let mut source = source;
        let mut buf = [0u8; 1024];
        loop {
            match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if bytes_tx.blocking_send(buf[..n].to_vec()).is_err() {
                        return;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!("keys: stdin read error: {}", e);
                    break;
                }
            }
        }
    });

    tokio::spawn(async move {
        let mut splitter = KeySplitter::default();
        loop {
            let bytes = if splitter.is_pending() {
                match tokio::time::timeout(ESCAPE_TIMEOUT, bytes_rx.recv()).await {
                    Ok(bytes) => bytes,
                    Err(_) => {
                        if let Some(key) = splitter.flush()
                            && tx.send(key).await.is_err()
                        {
                            return;
                        }
                        continue;
                    }
                }
            } else {
                bytes_rx.recv().await
            };

            let Some(bytes) = bytes else { break };
            for key in splitter.push(&bytes) {
                if tx.send(key).await.is_err() {
                    return;
                }
            }
        }

        if let Some(key) = splitter.flush() {
            let _ = tx.send(key).await;
        }
    });

    rx
}

/// Keystrokes typed on stdin.
pub fn stdin_keys() -> mpsc::Receiver<String> {
    spawn_key_reader(Box::new(std::io::stdin()))
}
