use tracing::trace;

const UTF8_BOM: &[u8] = b"\xef\xbb\xbf";

/// Incremental UTF-8 decoder.
///
/// A multi-byte sequence cut by a chunk boundary is held back and completed by the next
/// chunk. Invalid bytes decode to U+FFFD rather than failing the stream. A leading byte order
/// mark is dropped.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    carry: Vec<u8>,
    bom_checked: bool,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `bytes` onto the end of `out`.
    pub fn decode(&mut self, bytes: &[u8], out: &mut String) {
        if !self.bom_checked {
            self.carry.extend_from_slice(bytes);
            if self.carry.len() < UTF8_BOM.len() && UTF8_BOM.starts_with(&self.carry) {
                return;
            }
            self.bom_checked = true;
            let mut joined = std::mem::take(&mut self.carry);
            if joined.starts_with(UTF8_BOM) {
                joined.drain(..UTF8_BOM.len());
            }
            let rest = decode_into(&joined, out);
            self.carry = rest.to_vec();
        } else if self.carry.is_empty() {
            let rest = decode_into(bytes, out);
            self.carry.extend_from_slice(rest);
        } else {
            let mut joined = std::mem::take(&mut self.carry);
            joined.extend_from_slice(bytes);
            let rest = decode_into(&joined, out);
            self.carry = rest.to_vec();
        }
    }

    /// End of stream: bytes still held back can never complete.
    pub fn finish(&mut self, out: &mut String) {
        if !self.carry.is_empty() {
            trace!(bytes = self.carry.len(), "incomplete UTF-8 sequence at end of stream");
            self.carry.clear();
            out.push(char::REPLACEMENT_CHARACTER);
        }
    }
}

/// Decodes as much of `input` as possible and returns the incomplete tail.
fn decode_into<'a>(mut input: &'a [u8], out: &mut String) -> &'a [u8] {
    loop {
        match std::str::from_utf8(input) {
            Ok(s) => {
                out.push_str(s);
                return &[];
            }
            Err(e) => {
                let (valid, after) = input.split_at(e.valid_up_to());
                out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                match e.error_len() {
                    Some(bad) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        input = &after[bad..];
                    }
                    None => return after,
                }
            }
        }
    }
}

/// Reassembles complete lines from arbitrarily split byte chunks.
///
/// Lines are `\n` terminated; a trailing `\r` is stripped. Empty lines are dropped.
#[derive(Debug, Default)]
pub struct LineSplitter {
    decoder: Utf8Decoder,
    pending: String,
    /// Start of the first unconsumed byte in `pending`.
    cursor: usize,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode another chunk into the pending buffer. Drain complete lines with
    /// [`next_line`](Self::next_line) afterwards.
    pub fn push(&mut self, chunk: &[u8]) {
        self.compact();
        self.decoder.decode(chunk, &mut self.pending);
    }

    /// Next complete, non-empty line, or `None` once only a partial line remains.
    pub fn next_line(&mut self) -> Option<String> {
        loop {
            let rest = &self.pending[self.cursor..];
            let nl = rest.find('\n')?;
            let raw = &rest[..nl];
            let line = raw.strip_suffix('\r').unwrap_or(raw);
            let line = (!line.is_empty()).then(|| line.to_string());
            self.cursor += nl + 1;
            if line.is_some() {
                return line;
            }
        }
    }

    /// Drain every complete line currently buffered.
    pub fn lines(&mut self) -> impl Iterator<Item = String> + '_ {
        std::iter::from_fn(move || self.next_line())
    }

    /// Tail flush: the residual unterminated text, trimmed, if any of it is not whitespace.
    pub fn finish(&mut self) -> Option<String> {
        self.decoder.finish(&mut self.pending);
        let tail = self.pending[self.cursor..].trim().to_string();
        self.pending.clear();
        self.cursor = 0;
        (!tail.is_empty()).then_some(tail)
    }

    /// Bytes of text decoded but not yet handed out as lines.
    pub fn buffered(&self) -> usize {
        self.pending.len() - self.cursor
    }

    fn compact(&mut self) {
        if self.cursor > 0 {
            self.pending.drain(..self.cursor);
            self.cursor = 0;
        }
    }
}
