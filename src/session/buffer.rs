//! Accumulated shell output
//!
//! Holds the raw bytes read from a shell channel together with their decoded
//! text. The drainer is the only writer; command execution reads and resets.

use encoding_rs::{CoderResult, Decoder, UTF_8};
use parking_lot::Mutex;

struct Inner {
    raw: Vec<u8>,
    text: String,
    decoder: Decoder,
}

/// Raw and decoded output of one shell
pub struct OutputBuffers {
    inner: Mutex<Inner>,
}

impl OutputBuffers {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                raw: Vec::new(),
                text: String::new(),
                decoder: UTF_8.new_decoder(),
            }),
        }
    }

    /// Append a chunk in arrival order.
    ///
    /// A multi-byte character split across chunks stays in the decoder until
    /// its remaining bytes arrive.
    pub fn append(&self, chunk: &[u8]) {
        let mut inner = self.inner.lock();
        inner.raw.extend_from_slice(chunk);

        let Inner { text, decoder, .. } = &mut *inner;
        let mut input = chunk;
        loop {
            let needed = decoder
                .max_utf8_buffer_length(input.len())
                .unwrap_or(input.len() * 3 + 4);
            text.reserve(needed);
            let (result, read, _) = decoder.decode_to_string(input, text, false);
            input = &input[read..];
            if let CoderResult::InputEmpty = result {
                break;
            }
        }
    }

    /// Decoded text accumulated so far
    pub fn text(&self) -> String {
        self.inner.lock().text.clone()
    }

    /// Raw bytes accumulated so far
    pub fn raw(&self) -> Vec<u8> {
        self.inner.lock().raw.clone()
    }

    pub fn raw_len(&self) -> usize {
        self.inner.lock().raw.len()
    }

    /// Drop everything accumulated so far
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.raw.clear();
        inner.text.clear();
    }
}

impl Default for OutputBuffers {
    fn default() -> Self {
        Self::new()
    }
}
