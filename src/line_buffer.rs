/// Incremental splitter turning arbitrary byte chunks into complete lines.
///
/// Between calls the buffer only ever holds the unterminated tail of the
/// stream plus the leading bytes of a character that was cut in half by a
/// chunk boundary. The tail is never returned as a line, so a line that
/// looks complete is not processed until its terminator arrives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineBuffer {
    tail: String,
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pure transition: consume `chunk` and return the next state together
    /// with the lines it completed, in order and without their `\n`.
    pub fn feed(mut self, chunk: &[u8]) -> (Self, Vec<String>) {
        let lines = self.push(chunk);
        (self, lines)
    }

    /// In-place form of [`LineBuffer::feed`].
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let text = self.decode(chunk);
        self.tail.push_str(&text);
        let Some(last_newline) = self.tail.rfind('\n') else {
            return Vec::new();
        };
        let rest = self.tail.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.tail, rest);
        complete
            .strip_suffix('\n')
            .unwrap_or(&complete)
            .split('\n')
            .map(str::to_string)
            .collect()
    }

    /// The unterminated tail held back for the next chunk.
    pub fn tail(&self) -> &str {
        &self.tail
    }

    /// Whether nothing is buffered at all.
    pub fn is_empty(&self) -> bool {
        self.tail.is_empty() && self.pending.is_empty()
    }

    /// Decode `chunk` as UTF-8, carrying an incomplete trailing character
    /// over to the next call. Invalid sequences become U+FFFD.
    fn decode(&mut self, chunk: &[u8]) -> String {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(chunk);
        let mut out = String::with_capacity(bytes.len());
        let mut rest: &[u8] = &bytes;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }
        self.pending = rest.to_vec();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holds_back_unterminated_tail() {
        let mut buf = LineBuffer::new();
        assert!(buf.push(b"data: [DONE]").is_empty());
        assert_eq!(buf.tail(), "data: [DONE]");
        assert_eq!(buf.push(b"\n\n"), vec!["data: [DONE]".to_string(), String::new()]);
        assert!(buf.is_empty());
    }

    #[test]
    fn splits_many_lines_in_one_chunk() {
        let (buf, lines) = LineBuffer::new().feed(b"a\nb\n\nc");
        assert_eq!(lines, vec!["a", "b", ""]);
        assert_eq!(buf.tail(), "c");
    }

    #[test]
    fn rejoins_multibyte_characters_split_across_chunks() {
        let text = "data: {\"token\":\"héllo 日本\"}\n";
        let bytes = text.as_bytes();
        let split = text.find('日').unwrap() + 1;
        let (buf, first) = LineBuffer::new().feed(&bytes[..split]);
        assert!(first.is_empty());
        assert!(!buf.is_empty());
        let (buf, second) = buf.feed(&bytes[split..]);
        assert_eq!(second, vec![text.trim_end_matches('\n').to_string()]);
        assert!(buf.is_empty());
    }

    #[test]
    fn every_split_point_yields_same_lines() {
        let stream = "data: {\"token\":\"the \"}\n\ndata: {\"token\":\"ünïcødé \"}\n\ndata: [DONE]\n\n";
        let bytes = stream.as_bytes();
        let (_, whole) = LineBuffer::new().feed(bytes);
        for i in 0..=bytes.len() {
            for j in i..=bytes.len() {
                let (buf, mut lines) = LineBuffer::new().feed(&bytes[..i]);
                let (buf, more) = buf.feed(&bytes[i..j]);
                lines.extend(more);
                let (_, more) = buf.feed(&bytes[j..]);
                lines.extend(more);
                assert_eq!(lines, whole, "split at {i}/{j}");
            }
        }
    }

    #[test]
    fn invalid_bytes_become_replacement_characters() {
        let mut buf = LineBuffer::new();
        assert_eq!(buf.push(b"a\xffb\n"), vec!["a\u{FFFD}b".to_string()]);
    }
}
