//! Line framer: turns one fetched byte window into complete lines.
//!
//! The fragment after the last `\n` is never emitted; its bytes are left out
//! of `consumed` so the next poll fetches it again from its first byte. That
//! is what keeps a line straddling two polls (the writer was mid-line, or the
//! window was capped) from being emitted truncated or twice.

/// One fetched byte range `[start, end)` of the resource.
#[derive(Debug, Clone)]
pub struct FetchWindow {
    pub start: u64,
    pub end: u64,
    pub bytes: Vec<u8>,
    /// The window stops short of the probed resource size, so it may end
    /// in the middle of a line.
    pub truncated_tail: bool,
    /// The window stopped because it hit `max_bytes`, not because the server
    /// sent less than asked.
    pub capped: bool,
}

impl FetchWindow {
    pub fn new(start: u64, bytes: Vec<u8>, total_size: u64, max_bytes: u64) -> Self {
        let end = start + bytes.len() as u64;
        let truncated_tail = end < total_size;
        Self {
            start,
            end,
            capped: truncated_tail && bytes.len() as u64 >= max_bytes,
            bytes,
            truncated_tail,
        }
    }
}

/// Result of framing one window.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Framed {
    /// Non-empty lines, terminator stripped, in resource order.
    pub lines: Vec<String>,
    /// Bytes attributed to emitted or skipped lines. The withheld tail is
    /// not included.
    pub consumed: u64,
    /// Set when a full-size window held no terminator and was emitted whole.
    pub oversized: bool,
}

impl Framed {
    /// Offset to resume from after this window.
    pub fn next_offset(&self, window: &FetchWindow) -> u64 {
        window.start + self.consumed
    }
}

/// Split `window` into lines.
///
/// With `eof_terminates` set, an untruncated window's trailing fragment is
/// emitted as the final line (end of resource counts as a terminator).
pub fn frame(window: &FetchWindow, eof_terminates: bool) -> Framed {
    let bytes = window.bytes.as_slice();

    let Some(last_newline) = bytes.iter().rposition(|&b| b == b'\n') else {
        return frame_unterminated(window, eof_terminates);
    };

    let (complete, tail) = bytes.split_at(last_newline + 1);
    let mut framed = Framed {
        lines: split_lines(&complete[..complete.len() - 1]),
        consumed: complete.len() as u64,
        oversized: false,
    };

    if !tail.is_empty() && eof_terminates && !window.truncated_tail {
        push_line(&mut framed.lines, tail);
        framed.consumed += tail.len() as u64;
    }

    framed
}

/// A window with no `\n` at all.
fn frame_unterminated(window: &FetchWindow, eof_terminates: bool) -> Framed {
    let bytes = window.bytes.as_slice();
    let mut framed = Framed::default();
    if bytes.is_empty() {
        return framed;
    }

    if window.capped {
        // The whole window is one line longer than the cap. Withholding it
        // would refetch the same window forever.
        push_line(&mut framed.lines, bytes);
        framed.consumed = bytes.len() as u64;
        framed.oversized = true;
    } else if eof_terminates && !window.truncated_tail {
        push_line(&mut framed.lines, bytes);
        framed.consumed = bytes.len() as u64;
    }

    framed
}

fn split_lines(bytes: &[u8]) -> Vec<String> {
    let mut lines = Vec::new();
    for raw in bytes.split(|&b| b == b'\n') {
        push_line(&mut lines, raw);
    }
    lines
}

/// Strip one trailing `\r`, drop blank lines.
fn push_line(lines: &mut Vec<String>, raw: &[u8]) {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    if raw.is_empty() {
        return;
    }
    lines.push(String::from_utf8_lossy(raw).into_owned());
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Window that filled its cap exactly.
    fn window(start: u64, bytes: &[u8], total: u64) -> FetchWindow {
        FetchWindow::new(start, bytes.to_vec(), total, bytes.len() as u64)
    }

    #[test]
    fn complete_lines_are_emitted_in_order() {
        let w = window(0, b"alpha\nbeta\n", 11);
        let framed = frame(&w, false);
        assert_eq!(framed.lines, vec!["alpha", "beta"]);
        assert_eq!(framed.consumed, 11);
        assert_eq!(framed.next_offset(&w), 11);
        assert!(!framed.oversized);
    }

    #[test]
    fn unterminated_tail_is_withheld() {
        let w = window(11, b"gam", 14);
        let framed = frame(&w, false);
        assert!(framed.lines.is_empty());
        assert_eq!(framed.next_offset(&w), 11);

        let w = window(11, b"gamma\ndel", 20);
        let framed = frame(&w, false);
        assert_eq!(framed.lines, vec!["gamma"]);
        assert_eq!(framed.next_offset(&w), 17);
    }

    #[test]
    fn eof_terminates_final_line_when_enabled() {
        let w = window(0, b"one\ntwo", 7);
        let framed = frame(&w, true);
        assert_eq!(framed.lines, vec!["one", "two"]);
        assert_eq!(framed.consumed, 7);

        let w = window(0, b"solo", 4);
        assert_eq!(frame(&w, true).lines, vec!["solo"]);
    }

    #[test]
    fn capped_window_never_treats_its_tail_as_terminated() {
        // Resource is 30 bytes, window capped at 7.
        let w = window(0, b"one\ntwo", 30);
        assert!(w.truncated_tail);
        let framed = frame(&w, true);
        assert_eq!(framed.lines, vec!["one"]);
        assert_eq!(framed.consumed, 4);
    }

    #[test]
    fn terminator_on_last_byte_of_capped_window() {
        let w = window(0, b"abcdefghi\n", 25);
        let framed = frame(&w, false);
        assert_eq!(framed.lines, vec!["abcdefghi"]);
        assert_eq!(framed.consumed, 10);
    }

    #[test]
    fn blank_lines_are_consumed_but_not_emitted() {
        let w = window(5, b"\n\r\n\n", 9);
        let framed = frame(&w, false);
        assert!(framed.lines.is_empty());
        assert_eq!(framed.next_offset(&w), 9);
    }

    #[test]
    fn crlf_terminators_are_stripped() {
        let w = window(0, b"GET /\r\nPOST /x\r\n", 16);
        assert_eq!(frame(&w, false).lines, vec!["GET /", "POST /x"]);
    }

    #[test]
    fn oversized_line_in_capped_window_is_emitted_whole() {
        let w = window(40, b"0123456789", 100);
        let framed = frame(&w, false);
        assert!(framed.oversized);
        assert_eq!(framed.lines, vec!["0123456789"]);
        assert_eq!(framed.next_offset(&w), 50);
    }

    #[test]
    fn short_body_without_terminator_is_withheld() {
        // Asked for up to 1024 bytes of a 20-byte resource, got 7.
        let w = FetchWindow::new(0, b"partial".to_vec(), 20, 1024);
        assert!(w.truncated_tail);
        assert!(!w.capped);
        for eof_terminates in [false, true] {
            let framed = frame(&w, eof_terminates);
            assert!(framed.lines.is_empty());
            assert!(!framed.oversized);
            assert_eq!(framed.next_offset(&w), 0);
        }
    }

    #[test]
    fn empty_window_consumes_nothing() {
        let w = window(3, b"", 3);
        assert_eq!(frame(&w, true), Framed::default());
    }

    #[test]
    fn invalid_utf8_is_replaced_not_dropped() {
        let w = window(0, b"caf\xe9\n", 5);
        let framed = frame(&w, false);
        assert_eq!(framed.lines, vec!["caf\u{fffd}"]);
        assert_eq!(framed.consumed, 5);
    }
}
