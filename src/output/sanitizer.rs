//! Streaming cleanup of interactive terminal output.
//!
//! The package manager draws spinners, progress bars and colors when it runs
//! inside a terminal. [`Sanitizer`] turns that byte stream into plain text with
//! `\n` as the only line terminator. It keeps partial UTF-8 sequences, partial
//! escape sequences and the line under construction between calls, so the
//! result does not depend on how the input was chunked.

const SPINNER_CHARS: [char; 4] = ['-', '\\', '|', '/'];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum EscapeState {
    #[default]
    Ground,
    Escape,
    Csi,
    Osc,
    OscEscape,
    Designator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineEnd {
    Newline,
    CarriageReturn,
    Eof,
}

#[derive(Debug, Default)]
pub struct Sanitizer {
    utf8_remainder: Vec<u8>,
    escape: EscapeState,
    line: String,
    pending_cr: bool,
    after_cr: bool,
}

impl Sanitizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a raw chunk and returns the completed lines it produced.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        let mut out = String::new();
        let mut buffer = std::mem::take(&mut self.utf8_remainder);
        buffer.extend_from_slice(bytes);

        let mut rest = buffer.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    self.feed_str(valid, &mut out);
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    // `valid` is guaranteed UTF-8 by `valid_up_to`.
                    self.feed_str(std::str::from_utf8(valid).unwrap_or_default(), &mut out);
                    match err.error_len() {
                        Some(len) => {
                            self.feed('\u{FFFD}', &mut out);
                            rest = &after[len..];
                        }
                        None => {
                            self.utf8_remainder = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    pub fn push_str(&mut self, text: &str) -> String {
        self.push(text.as_bytes())
    }

    /// Flushes carried state at end of stream. An unterminated last line is
    /// returned without a trailing newline.
    pub fn finish(&mut self) -> String {
        let mut out = String::new();
        if !self.utf8_remainder.is_empty() {
            self.utf8_remainder.clear();
            self.feed('\u{FFFD}', &mut out);
        }
        if self.pending_cr {
            self.pending_cr = false;
            self.end_line(LineEnd::CarriageReturn, &mut out);
        }
        self.escape = EscapeState::Ground;
        if !self.line.is_empty() {
            self.end_line(LineEnd::Eof, &mut out);
        }
        self.after_cr = false;
        out
    }

    fn feed_str(&mut self, text: &str, out: &mut String) {
        for ch in text.chars() {
            self.feed(ch, out);
        }
    }

    fn feed(&mut self, ch: char, out: &mut String) {
        if self.pending_cr {
            self.pending_cr = false;
            if ch == '\n' {
                self.end_line(LineEnd::Newline, out);
                return;
            }
            self.end_line(LineEnd::CarriageReturn, out);
        }

        match self.escape {
            EscapeState::Ground => {}
            EscapeState::Escape => {
                self.escape = match ch {
                    '[' => EscapeState::Csi,
                    ']' => EscapeState::Osc,
                    '(' | ')' | '*' | '+' | '#' | '%' => EscapeState::Designator,
                    _ => EscapeState::Ground,
                };
                return;
            }
            EscapeState::Csi => {
                if ('\x40'..='\x7e').contains(&ch) {
                    self.escape = EscapeState::Ground;
                }
                return;
            }
            EscapeState::Osc => {
                match ch {
                    '\x07' => self.escape = EscapeState::Ground,
                    '\x1b' => self.escape = EscapeState::OscEscape,
                    _ => {}
                }
                return;
            }
            EscapeState::OscEscape => {
                if ch == '\\' {
                    self.escape = EscapeState::Ground;
                } else {
                    // ESC ended the OSC string and starts a new sequence.
                    self.escape = EscapeState::Escape;
                    self.feed(ch, out);
                }
                return;
            }
            EscapeState::Designator => {
                self.escape = EscapeState::Ground;
                return;
            }
        }

        match ch {
            '\x1b' => self.escape = EscapeState::Escape,
            '\u{9b}' => self.escape = EscapeState::Csi,
            '\r' => self.pending_cr = true,
            '\n' => self.end_line(LineEnd::Newline, out),
            '\x08' => {
                self.line.pop();
            }
            '\t' => self.line.push(ch),
            c if c.is_control() => {}
            c => self.line.push(c),
        }
    }

    fn end_line(&mut self, end: LineEnd, out: &mut String) {
        let mut line = std::mem::take(&mut self.line);
        let started_after_cr = self.after_cr;
        self.after_cr = end == LineEnd::CarriageReturn;

        if is_spinner_frame(&line) {
            return;
        }

        let was_blank = line.trim().is_empty();
        if end == LineEnd::CarriageReturn {
            strip_trailing_spinner(&mut line);
        }
        if started_after_cr {
            strip_leading_spinner(&mut line);
        }
        if is_spinner_frame(&line) {
            return;
        }
        let is_blank = line.trim().is_empty();
        if is_blank && (!was_blank || end == LineEnd::CarriageReturn) {
            return;
        }
        if end == LineEnd::Eof && line.is_empty() {
            return;
        }

        out.push_str(&line);
        if end != LineEnd::Eof {
            out.push('\n');
        }
    }
}

/// Sanitizes a complete piece of output in one go.
pub fn sanitize(text: &str) -> String {
    let mut sanitizer = Sanitizer::new();
    let mut out = sanitizer.push_str(text);
    out.push_str(&sanitizer.finish());
    out
}

fn is_spinner(c: char) -> bool {
    SPINNER_CHARS.contains(&c)
}

fn is_spinner_frame(line: &str) -> bool {
    let mut chars = line.trim().chars();
    matches!((chars.next(), chars.next()), (Some(c), None) if is_spinner(c))
}

// A spinner run counts only when it stands alone as a token, so `1.0-beta`
// or a `/path` survive a redraw.
fn strip_trailing_spinner(line: &mut String) {
    let body = line.trim_end_matches(is_spinner);
    if body.len() == line.len() {
        return;
    }
    if body.is_empty() || body.ends_with(char::is_whitespace) {
        let keep = body.trim_end().len();
        line.truncate(keep);
    }
}

fn strip_leading_spinner(line: &mut String) {
    let indent = line.len() - line.trim_start().len();
    let rest = line[indent..].trim_start_matches(is_spinner);
    let run = line.len() - indent - rest.len();
    if run == 0 {
        return;
    }
    if rest.is_empty() || rest.starts_with(char::is_whitespace) {
        let rest = rest.trim_start().to_string();
        *line = rest;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const NOISY: &str = concat!(
        "\x1b[2K\r   - \r   \\ \r\x1b]0;winget\x07\x1b[32mFound\x1b[0m Google Chrome [Google.Chrome]\r\n",
        "Downloading ab\x08\x08https://example.invalid/setup.exe\r\n",
        "  \u{2588}\u{2588}\u{2592}\u{2592}  1.00 MB / 2.00 MB\r  \u{2588}\u{2588}\u{2588}\u{2588}  2.00 MB / 2.00 MB\r\n",
        "|\r\n",
        "Successfully verified installer hash\r\n",
        "Starting package install...",
    );

    #[test]
    fn strips_csi_and_osc_sequences() {
        assert_eq!(
            sanitize("\x1b[1;32mok\x1b[0m \x1b]0;title\x07done\x1b]8;;x\x1b\\\n"),
            "ok done\n"
        );
    }

    #[test]
    fn c1_csi_and_charset_designators_are_removed() {
        assert_eq!(sanitize("\u{9b}31mred\x1b(Bplain\x1b=\n"), "redplain\n");
    }

    #[test]
    fn backspace_removes_previous_character() {
        assert_eq!(sanitize("abc\x08\x08xy\n"), "axy\n");
        assert_eq!(sanitize("\x08\x08start\n"), "start\n");
        assert_eq!(sanitize("-\x08\\\x08|\x08/\x08Done\n"), "Done\n");
    }

    #[test]
    fn bare_cr_terminates_a_line() {
        assert_eq!(sanitize("10%\r20%\r\n"), "10%\n20%\n");
    }

    #[test]
    fn spinner_frames_around_cr_are_removed() {
        assert_eq!(sanitize("\r-\r\\\r|\r/\rName  Id\r\n"), "Name  Id\n");
        assert_eq!(sanitize("Searching /\rSearching \\\r"), "Searching\nSearching\n");
        assert_eq!(sanitize("- \rInstalling\n"), "Installing\n");
    }

    #[test]
    fn spinner_characters_inside_tokens_survive() {
        assert_eq!(sanitize("1.0-\rnext\n"), "1.0-\nnext\n");
        assert_eq!(sanitize("a\r/usr/bin\n"), "a\n/usr/bin\n");
    }

    #[test]
    fn lone_spinner_lines_are_dropped() {
        assert_eq!(sanitize("before\n  |  \nafter\n"), "before\nafter\n");
        assert_eq!(sanitize("-----\n"), "-----\n");
    }

    #[test]
    fn spinner_left_over_after_stripping_is_dropped() {
        assert_eq!(sanitize("a\r- |\n"), "a\n");
        assert_eq!(sanitize("| -\rnext\n"), "next\n");
    }

    #[test]
    fn blank_lf_lines_are_kept() {
        assert_eq!(sanitize("a\n\nb\n"), "a\n\nb\n");
    }

    #[test]
    fn unterminated_tail_is_flushed_without_newline() {
        let mut sanitizer = Sanitizer::new();
        assert_eq!(sanitizer.push_str("line\npart"), "line\n");
        assert_eq!(sanitizer.finish(), "part");
    }

    #[test]
    fn split_utf8_and_escape_sequences_are_carried() {
        let mut sanitizer = Sanitizer::new();
        let bytes = "\x1b[31mcaf\u{e9}\x1b[0m\n".as_bytes();
        let mut out = String::new();
        for byte in bytes {
            out.push_str(&sanitizer.push(std::slice::from_ref(byte)));
        }
        out.push_str(&sanitizer.finish());
        assert_eq!(out, "caf\u{e9}\n");
    }

    #[test]
    fn invalid_utf8_becomes_replacement_character() {
        let mut sanitizer = Sanitizer::new();
        let mut out = sanitizer.push(b"a\xffb\n\xe2\x82");
        out.push_str(&sanitizer.finish());
        assert_eq!(out, "a\u{FFFD}b\n\u{FFFD}");
    }

    #[test]
    fn chunk_boundaries_do_not_change_the_result() {
        let whole = sanitize(NOISY);
        let bytes = NOISY.as_bytes();
        for split in 0..=bytes.len() {
            let mut sanitizer = Sanitizer::new();
            let mut out = sanitizer.push(&bytes[..split]);
            out.push_str(&sanitizer.push(&bytes[split..]));
            out.push_str(&sanitizer.finish());
            assert_eq!(out, whole, "split at byte {split}");
        }
    }

    #[test]
    fn sanitizing_twice_is_a_no_op() {
        let samples = [
            NOISY,
            "plain text\nwith lines\n",
            "a\r\n\r\nb\r- \r",
            "\x1b[31m|\x1b[0m\n  / \nvalue\tcol\n",
            "trailing \\",
            "a\r- |\n",
            "| -\rnext\n",
        ];
        for sample in samples {
            let once = sanitize(sample);
            assert_eq!(sanitize(&once), once, "sample {sample:?}");
        }
    }

    #[test]
    fn noisy_install_output_reads_cleanly() {
        assert_eq!(
            sanitize(NOISY),
            concat!(
                "Found Google Chrome [Google.Chrome]\n",
                "Downloading https://example.invalid/setup.exe\n",
                "  \u{2588}\u{2588}\u{2592}\u{2592}  1.00 MB / 2.00 MB\n",
                "  \u{2588}\u{2588}\u{2588}\u{2588}  2.00 MB / 2.00 MB\n",
                "Successfully verified installer hash\n",
                "Starting package install...",
            )
        );
    }
}
