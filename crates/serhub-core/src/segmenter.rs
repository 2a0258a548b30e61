use serhub_decode::DecodedFrame;

use crate::encoding::{StreamDecoder, TextEncoding};
use crate::logbuf::CapturedLine;

/// Splits one channel's received text into newline-terminated lines.
///
/// Decoder frames for a chunk ride on the first line that chunk completes.
/// Later lines from the same chunk carry none.
pub struct LineSegmenter {
    decoder: StreamDecoder,
    pending: String,
    pending_chars: usize,
    overflow_chars: usize,
}

impl LineSegmenter {
    pub fn new(encoding: TextEncoding, overflow_chars: usize) -> Self {
        Self {
            decoder: StreamDecoder::new(encoding),
            pending: String::new(),
            pending_chars: 0,
            overflow_chars,
        }
    }

    /// Text received since the last emitted line.
    pub fn pending(&self) -> &str {
        &self.pending
    }

    pub fn push(&mut self, chunk: &[u8], frames: Vec<DecodedFrame>) -> Vec<CapturedLine> {
        let text = self.decoder.decode(chunk);
        self.pending_chars += text.chars().count();
        self.pending.push_str(&text);

        let mut frames = Some(frames);
        let mut lines = Vec::new();
        let mut consumed = 0;

        while let Some(offset) = self.pending[consumed..].find('\n') {
            let end = consumed + offset;
            let line = &self.pending[consumed..end];
            let line = line.strip_suffix('\r').unwrap_or(line);
            lines.push(CapturedLine::inbound(line.to_string(), frames.take().unwrap_or_default()));
            consumed = end + 1;
        }

        if consumed > 0 {
            self.pending.drain(..consumed);
            self.pending_chars = self.pending.chars().count();
        }

        if self.pending_chars > self.overflow_chars {
            let text = std::mem::take(&mut self.pending);
            self.pending_chars = 0;
            lines.push(CapturedLine::inbound(text, frames.take().unwrap_or_default()));
        }

        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logbuf::Direction;

    fn frame(tag: &str) -> DecodedFrame {
        DecodedFrame::new("TEST").with_summary(tag)
    }

    fn texts(lines: &[CapturedLine]) -> Vec<&str> {
        lines.iter().map(|l| l.data.as_str()).collect()
    }

    #[test]
    fn splits_lines_and_strips_single_cr() {
        let mut seg = LineSegmenter::new(TextEncoding::Utf8, 5000);
        let lines = seg.push(b"one\r\ntwo\nthree\r\r\n", Vec::new());
        assert_eq!(texts(&lines), ["one", "two", "three\r"]);
        assert!(lines.iter().all(|l| l.direction == Direction::Rx && l.raw.is_none()));
        assert_eq!(seg.pending(), "");
    }

    #[test]
    fn keeps_partial_line_between_chunks() {
        let mut seg = LineSegmenter::new(TextEncoding::Utf8, 5000);
        assert!(seg.push(b"hel", Vec::new()).is_empty());
        assert_eq!(seg.pending(), "hel");
        let lines = seg.push(b"lo\r", Vec::new());
        assert!(lines.is_empty());
        let lines = seg.push(b"\nwor", Vec::new());
        assert_eq!(texts(&lines), ["hello"]);
        assert_eq!(seg.pending(), "wor");
    }

    #[test]
    fn empty_lines_are_kept() {
        let mut seg = LineSegmenter::new(TextEncoding::Utf8, 5000);
        let lines = seg.push(b"\n\r\nx\n", Vec::new());
        assert_eq!(texts(&lines), ["", "", "x"]);
    }

    #[test]
    fn frames_attach_to_first_line_only() {
        let mut seg = LineSegmenter::new(TextEncoding::Utf8, 5000);
        let lines = seg.push(b"a\nb\nc\n", vec![frame("f1"), frame("f2")]);
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].frames.len(), 2);
        assert_eq!(lines[0].frames[0].summary(), "f1");
        assert!(lines[1].frames.is_empty());
        assert!(lines[2].frames.is_empty());
    }

    #[test]
    fn frames_without_a_line_are_dropped() {
        let mut seg = LineSegmenter::new(TextEncoding::Utf8, 5000);
        assert!(seg.push(b"partial", vec![frame("lost")]).is_empty());
        let lines = seg.push(b" end\n", Vec::new());
        assert_eq!(texts(&lines), ["partial end"]);
        assert!(lines[0].frames.is_empty());
    }

    #[test]
    fn overflow_flushes_once() {
        let mut seg = LineSegmenter::new(TextEncoding::Utf8, 5000);
        let block = "x".repeat(1000);
        for _ in 0..5 {
            assert!(seg.push(block.as_bytes(), Vec::new()).is_empty());
        }
        let lines = seg.push(b"yz", vec![frame("ovf")]);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].data.len(), 5002);
        assert!(lines[0].data.ends_with("yz"));
        assert_eq!(lines[0].frames.len(), 1);
        assert_eq!(seg.pending(), "");

        assert!(seg.push(b"next", Vec::new()).is_empty());
        assert_eq!(seg.pending(), "next");
    }

    #[test]
    fn overflow_after_lines_carries_no_frames() {
        let mut seg = LineSegmenter::new(TextEncoding::Utf8, 10);
        let lines = seg.push(b"ok\n0123456789AB", vec![frame("f")]);
        assert_eq!(texts(&lines), ["ok", "0123456789AB"]);
        assert_eq!(lines[0].frames.len(), 1);
        assert!(lines[1].frames.is_empty());
    }

    #[test]
    fn overflow_counts_characters_not_bytes() {
        let mut seg = LineSegmenter::new(TextEncoding::Utf8, 4);
        assert!(seg.push("éééé".as_bytes(), Vec::new()).is_empty());
        assert_eq!(seg.push("é".as_bytes(), Vec::new()).len(), 1);
    }

    #[test]
    fn invalid_bytes_are_replaced() {
        let mut seg = LineSegmenter::new(TextEncoding::Utf8, 5000);
        let lines = seg.push(&[0xC0, 0x01, 0xFF, b'\n'], Vec::new());
        assert_eq!(lines.len(), 1);
        assert!(lines[0].data.contains('\u{FFFD}'));
    }
}
