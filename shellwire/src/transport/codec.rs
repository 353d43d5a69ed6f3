//! Text encoding between the session (UTF-8) and the process's stdio.

use encoding_rs::{CoderResult, Decoder, Encoding, UTF_8};

use crate::error::{Result, TransportError};

/// The character encoding a process speaks.
#[derive(Debug, Clone, Copy)]
pub struct Codec {
    encoding: &'static Encoding,
}

impl Default for Codec {
    fn default() -> Self {
        Self { encoding: UTF_8 }
    }
}

impl Codec {
    /// Look up an encoding by WHATWG label; UTF-8 when `None`.
    pub fn for_label(label: Option<&str>) -> Result<Self> {
        match label {
            None => Ok(Self::default()),
            Some(label) => Encoding::for_label(label.as_bytes())
                .map(|encoding| Self { encoding })
                .ok_or_else(|| TransportError::UnknownEncoding(label.to_string()).into()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.encoding.name()
    }

    /// A decoder for one output stream.
    pub fn decoder(&self) -> StreamDecoder {
        StreamDecoder {
            decoder: self.encoding.new_decoder(),
        }
    }

    /// Encode UTF-8 input for the process.
    pub fn encode(&self, data: &[u8]) -> Vec<u8> {
        if self.encoding == UTF_8 {
            return data.to_vec();
        }
        let text = String::from_utf8_lossy(data);
        let (encoded, _, _) = self.encoding.encode(&text);
        encoded.into_owned()
    }
}

/// Incremental decoder that carries partial sequences across reads.
pub struct StreamDecoder {
    decoder: Decoder,
}

impl StreamDecoder {
    /// Decode a chunk; `last` flushes any trailing partial sequence.
    pub fn decode(&mut self, mut bytes: &[u8], last: bool) -> String {
        let mut out = String::new();
        loop {
            let needed = self
                .decoder
                .max_utf8_buffer_length(bytes.len())
                .unwrap_or(bytes.len() * 3 + 4);
            out.reserve(needed);
            let (result, read, _) = self.decoder.decode_to_string(bytes, &mut out, last);
            bytes = &bytes[read..];
            match result {
                CoderResult::InputEmpty => return out,
                CoderResult::OutputFull => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_label() {
        assert!(Codec::for_label(Some("not-an-encoding")).is_err());
        assert_eq!(Codec::for_label(None).unwrap().name(), "UTF-8");
    }

    #[test]
    fn test_split_utf8_sequence() {
        let mut decoder = Codec::default().decoder();
        let bytes = "héllo".as_bytes();
        // Split inside the two-byte 'é'.
        let first = decoder.decode(&bytes[..2], false);
        let second = decoder.decode(&bytes[2..], false);
        assert_eq!(first, "h");
        assert_eq!(second, "éllo");
    }

    #[test]
    fn test_legacy_encoding_roundtrip() {
        let codec = Codec::for_label(Some("windows-1252")).unwrap();
        assert_eq!(codec.encode("café".as_bytes()), b"caf\xe9");
        assert_eq!(codec.decoder().decode(b"caf\xe9", true), "café");
    }

    #[test]
    fn test_expanding_input_fully_decoded() {
        let codec = Codec::for_label(Some("windows-1252")).unwrap();
        let bytes = vec![0x80u8; 10_000];
        let text = codec.decoder().decode(&bytes, true);
        assert_eq!(text.chars().count(), 10_000);
        assert!(text.chars().all(|c| c == '€'));
    }

    #[test]
    fn test_last_flushes_partial_sequence() {
        let mut decoder = Codec::default().decoder();
        assert_eq!(decoder.decode(b"h\xc3", false), "h");
        assert_eq!(decoder.decode(b"", true), "\u{FFFD}");
    }
}
