//! Status-marker decoding for executor output.
//!
//! The executor appends a single `PROCESS_STATUS: True|False` line to the
//! output of every command. [`SentinelDecoder`] removes that line from the
//! text forwarded to the surface and reports the flag it carried. Decoding is
//! incremental: each chunk is handled as it arrives and nothing but (at most)
//! a partial marker line is ever retained.

/// Prefix of the status marker line.
pub const MARKER_PREFIX: &str = "PROCESS_STATUS: ";

const MARKER_TRUE: &str = "PROCESS_STATUS: True";
const MARKER_FALSE: &str = "PROCESS_STATUS: False";

/// Text to forward plus the status flag found in it, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decoded {
    pub text: String,
    pub status: Option<bool>,
}

/// How markers split across chunk boundaries are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MarkerMode {
    /// Every chunk is decoded on its own. A marker split over two chunks is
    /// not recognised and its pieces are forwarded as ordinary text.
    #[default]
    PerChunk,
    /// A trailing partial line that could still turn into a marker is held
    /// back until the next chunk (or [`SentinelDecoder::finish`]).
    CarryPartial,
}

#[derive(Debug, Default)]
pub struct SentinelDecoder {
    mode: MarkerMode,
    held: String,
}

impl SentinelDecoder {
    pub fn new(mode: MarkerMode) -> Self {
        Self {
            mode,
            held: String::new(),
        }
    }

    /// Decode one chunk.
    pub fn decode(&mut self, chunk: &str) -> Decoded {
        match self.mode {
            MarkerMode::PerChunk => strip_markers(chunk),
            MarkerMode::CarryPartial => {
                let mut input = std::mem::take(&mut self.held);
                input.push_str(chunk);
                let split = partial_marker_start(&input);
                self.held = input.split_off(split);
                strip_markers(&input)
            }
        }
    }

    /// Flush whatever is still held back. Call once, when the stream ends.
    pub fn finish(&mut self) -> Decoded {
        let rest = std::mem::take(&mut self.held);
        strip_markers(&rest)
    }
}

/// Parse a marker line (without its line terminator).
pub fn parse_marker(line: &str) -> Option<bool> {
    match line.strip_prefix(MARKER_PREFIX)? {
        "True" => Some(true),
        "False" => Some(false),
        _ => None,
    }
}

/// Remove every marker line from `text`, together with the newline that ends
/// it and the newline right before it. The last marker wins.
fn strip_markers(text: &str) -> Decoded {
    let mut decoded = Decoded {
        text: String::with_capacity(text.len()),
        status: None,
    };

    for piece in text.split_inclusive('\n') {
        let line = piece.strip_suffix('\n').unwrap_or(piece);
        let line = line.strip_suffix('\r').unwrap_or(line);
        match parse_marker(line) {
            Some(flag) => {
                decoded.status = Some(flag);
                if decoded.text.ends_with('\n') {
                    decoded.text.pop();
                    if decoded.text.ends_with('\r') {
                        decoded.text.pop();
                    }
                }
            }
            None => decoded.text.push_str(piece),
        }
    }

    decoded
}

/// Byte offset where a trailing line that may still become a marker begins,
/// including the newline in front of it. `text.len()` when there is none.
fn partial_marker_start(text: &str) -> usize {
    let line_start = text.rfind('\n').map_or(0, |i| i + 1);
    let tail = &text[line_start..];
    let tail = tail.strip_suffix('\r').unwrap_or(tail);

    let could_be_marker = !tail.is_empty()
        && (MARKER_TRUE.starts_with(tail) || MARKER_FALSE.starts_with(tail));
    if !could_be_marker {
        return text.len();
    }

    if line_start > 0 {
        let before = &text[..line_start - 1];
        if before.ends_with('\r') {
            line_start - 2
        } else {
            line_start - 1
        }
    } else {
        0
    }
}

/// Incremental UTF-8 decoding of body chunks.
///
/// A multi-byte character split across two chunks is completed with the
/// next chunk instead of turning into replacement characters.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match err.error_len() {
                        Some(invalid) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + invalid);
                        }
                        None => {
                            // Incomplete sequence at the end, wait for more.
                            self.pending.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }

        out
    }

    /// Whatever is left over once the stream has ended.
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn per_chunk(chunks: &[&str]) -> (String, Option<bool>) {
        let mut decoder = SentinelDecoder::new(MarkerMode::PerChunk);
        let mut text = String::new();
        let mut status = None;
        for chunk in chunks {
            let decoded = decoder.decode(chunk);
            text.push_str(&decoded.text);
            status = decoded.status.or(status);
        }
        (text, status)
    }

    fn carried(chunks: &[&str]) -> (String, Option<bool>) {
        let mut decoder = SentinelDecoder::new(MarkerMode::CarryPartial);
        let mut text = String::new();
        let mut status = None;
        for chunk in chunks {
            let decoded = decoder.decode(chunk);
            text.push_str(&decoded.text);
            status = decoded.status.or(status);
        }
        let tail = decoder.finish();
        text.push_str(&tail.text);
        (text, tail.status.or(status))
    }

    #[test]
    fn marker_chunk_is_stripped_entirely() {
        assert_eq!(
            per_chunk(&["hi\n", "PROCESS_STATUS: True\n"]),
            ("hi\n".to_string(), Some(true))
        );
    }

    #[test]
    fn executor_framing_removes_both_newlines() {
        assert_eq!(
            per_chunk(&["done\n", "\nPROCESS_STATUS: False\n"]),
            ("done\n".to_string(), Some(false))
        );
    }

    #[test]
    fn marker_inside_a_chunk_takes_the_preceding_newline() {
        assert_eq!(
            per_chunk(&["hi\nPROCESS_STATUS: True\n"]),
            ("hi".to_string(), Some(true))
        );
    }

    #[test]
    fn marker_without_trailing_newline_at_chunk_end() {
        assert_eq!(
            per_chunk(&["out\nPROCESS_STATUS: True"]),
            ("out".to_string(), Some(true))
        );
    }

    #[test]
    fn crlf_marker_is_recognised() {
        assert_eq!(
            per_chunk(&["a\r\n\r\nPROCESS_STATUS: True\r\n"]),
            ("a\r\n".to_string(), Some(true))
        );
    }

    #[test]
    fn other_spellings_are_ordinary_text() {
        for line in [
            "PROCESS_STATUS: true\n",
            "PROCESS_STATUS: TRUE\n",
            "PROCESS_STATUS:True\n",
            " PROCESS_STATUS: True\n",
            "PROCESS_STATUS: True \n",
            "PROCESS_STATUS: 1\n",
        ] {
            assert_eq!(per_chunk(&[line]), (line.to_string(), None), "{line:?}");
        }
    }

    #[test]
    fn last_marker_wins() {
        assert_eq!(
            per_chunk(&["PROCESS_STATUS: True\nPROCESS_STATUS: False\n"]),
            (String::new(), Some(false))
        );
    }

    #[test]
    fn split_marker_is_missed_per_chunk() {
        let (text, status) = per_chunk(&["ok\nPROCESS_STA", "TUS: True\n"]);
        assert_eq!(status, None);
        assert_eq!(text, "ok\nPROCESS_STATUS: True\n");
    }

    #[test]
    fn split_marker_is_found_when_carrying() {
        assert_eq!(
            carried(&["ok\nPROCESS_STA", "TUS: True\n"]),
            ("ok".to_string(), Some(true))
        );
        assert_eq!(
            carried(&["ok\n", "\nPROCESS_STATUS: Fa", "lse", "\n"]),
            ("ok\n".to_string(), Some(false))
        );
    }

    #[test]
    fn carrying_releases_lines_that_turn_out_not_to_be_markers() {
        assert_eq!(
            carried(&["PROCESS", "ING data\n"]),
            ("PROCESSING data\n".to_string(), None)
        );
        assert_eq!(
            carried(&["tail\nPROCESS_"]),
            ("tail\nPROCESS_".to_string(), None)
        );
    }

    #[test]
    fn carrying_forwards_unrelated_partial_lines_immediately() {
        let mut decoder = SentinelDecoder::new(MarkerMode::CarryPartial);
        assert_eq!(decoder.decode("progress 10%").text, "progress 10%");
        assert_eq!(decoder.decode("\nnext").text, "\nnext");
    }

    #[test]
    fn utf8_sequences_split_across_chunks_are_joined() {
        let bytes = "héllo ✓".as_bytes();
        let mut decoder = Utf8Decoder::default();
        let mut out = String::new();
        for byte in bytes {
            out.push_str(&decoder.push(std::slice::from_ref(byte)));
        }
        out.push_str(&decoder.finish());
        assert_eq!(out, "héllo ✓");
    }

    #[test]
    fn invalid_utf8_becomes_replacement_characters() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.push(b"a\xffb"), "a\u{FFFD}b");
        assert_eq!(decoder.push(b"\xe2\x9c"), "");
        assert_eq!(decoder.finish(), "\u{FFFD}");
    }

    proptest! {
        #[test]
        fn marker_never_survives_per_chunk(lines in proptest::collection::vec("[a-z ]{0,12}", 0..8), ok in any::<bool>()) {
            let mut chunks: Vec<String> = lines.iter().map(|l| format!("{l}\n")).collect();
            chunks.push(format!("\nPROCESS_STATUS: {}\n", if ok { "True" } else { "False" }));
            let refs: Vec<&str> = chunks.iter().map(String::as_str).collect();
            let (text, status) = per_chunk(&refs);
            prop_assert_eq!(status, Some(ok));
            prop_assert!(!text.contains(MARKER_PREFIX));
        }

        #[test]
        fn carrying_finds_the_marker_at_any_split(body in "[a-z\n]{0,40}", at in 0usize..64, ok in any::<bool>()) {
            let stream = format!("{body}\nPROCESS_STATUS: {}\n", if ok { "True" } else { "False" });
            let at = at.min(stream.len());
            let (head, tail) = stream.split_at(at);
            let (text, status) = carried(&[head, tail]);
            prop_assert_eq!(status, Some(ok));
            prop_assert!(!text.contains(MARKER_PREFIX));
        }
    }
}
