use bytes::Bytes;
use encoding_rs::{DecoderResult, Encoder, EncoderResult, Encoding, UTF_8};

use super::{PipelineError, StageEvent, StreamStage};

/// Encoding every frontend speaks.
pub const CANONICAL_CHARSET: &str = "UTF-8";

/// Charset assumed when a request does not declare one.
pub fn default_charset() -> &'static str {
    if cfg!(windows) {
        "GB18030"
    } else {
        CANONICAL_CHARSET
    }
}

fn lookup(label: &str) -> Result<&'static Encoding, PipelineError> {
    Encoding::for_label(label.trim().as_bytes())
        .ok_or_else(|| PipelineError::UnknownCharset(label.to_string()))
}

/// Streaming decoder from a declared charset to UTF-8.
///
/// Incomplete multi-byte sequences at the end of a chunk stay inside the
/// decoder state (never more than one character's width) and are completed by
/// the next chunk. A UTF-8 source is forwarded untouched, chunk for chunk.
pub struct CharsetTranscoder {
    encoding: &'static Encoding,
    decoder: Option<encoding_rs::Decoder>,
    offset: usize,
}

impl CharsetTranscoder {
    pub fn new(charset: &str) -> Result<Self, PipelineError> {
        let encoding = lookup(charset)?;
        let decoder = if encoding == UTF_8 {
            None
        } else {
            Some(encoding.new_decoder_without_bom_handling())
        };
        Ok(Self {
            encoding,
            decoder,
            offset: 0,
        })
    }

    pub fn charset(&self) -> &'static str {
        self.encoding.name()
    }

    pub fn is_passthrough(&self) -> bool {
        self.decoder.is_none()
    }

    fn decode(&mut self, chunk: &[u8]) -> Result<String, PipelineError> {
        let Some(decoder) = self.decoder.as_mut() else {
            return Ok(String::new());
        };

        let mut out = String::with_capacity(
            decoder
                .max_utf8_buffer_length_without_replacement(chunk.len())
                .unwrap_or(chunk.len() * 3 + 4),
        );
        let mut consumed = 0;
        loop {
            let (result, read) =
                decoder.decode_to_string_without_replacement(&chunk[consumed..], &mut out, false);
            consumed += read;
            match result {
                DecoderResult::InputEmpty => break,
                DecoderResult::OutputFull => {
                    let rest = chunk.len() - consumed;
                    out.reserve(
                        decoder
                            .max_utf8_buffer_length_without_replacement(rest)
                            .unwrap_or(rest * 3 + 4),
                    );
                }
                DecoderResult::Malformed(bad, after) => {
                    let offset = self.offset + consumed - bad as usize - after as usize;
                    return Err(PipelineError::Malformed {
                        charset: self.encoding.name(),
                        offset,
                    });
                }
            }
        }
        self.offset += chunk.len();
        Ok(out)
    }
}

impl StreamStage for CharsetTranscoder {
    fn name(&self) -> &'static str {
        "transcode"
    }

    fn process(&mut self, chunk: Bytes, _events: &mut Vec<StageEvent>) -> Result<Bytes, PipelineError> {
        if self.is_passthrough() {
            return Ok(chunk);
        }
        self.decode(&chunk).map(Bytes::from)
    }

    fn finish(&mut self) -> Result<(), PipelineError> {
        if let Some(decoder) = self.decoder.as_mut() {
            let mut tail = String::with_capacity(16);
            let (result, _) = decoder.decode_to_string_without_replacement(&[], &mut tail, true);
            if let DecoderResult::Malformed(..) = result {
                log::debug!(
                    "Dropping incomplete {} sequence at end of stream",
                    self.encoding.name()
                );
            }
        }
        Ok(())
    }
}

/// Longest incomplete UTF-8 prefix that can wait for more bytes.
const MAX_UTF8_CARRY: usize = 3;

/// Streaming encoder from UTF-8 frontend input to a declared charset.
///
/// Characters split across frames are held in a carry of at most three bytes.
/// Characters the target charset cannot represent become `?`.
pub struct InputEncoder {
    encoding: &'static Encoding,
    encoder: Option<Encoder>,
    carry: Vec<u8>,
}

impl InputEncoder {
    pub fn new(charset: &str) -> Result<Self, PipelineError> {
        let encoding = lookup(charset)?.output_encoding();
        let encoder = if encoding == UTF_8 {
            None
        } else {
            Some(encoding.new_encoder())
        };
        Ok(Self {
            encoding,
            encoder,
            carry: Vec::with_capacity(MAX_UTF8_CARRY),
        })
    }

    pub fn carry_len(&self) -> usize {
        self.carry.len()
    }

    fn complete_prefix(&mut self, chunk: &[u8]) -> Result<String, PipelineError> {
        let mut buf = std::mem::take(&mut self.carry);
        buf.extend_from_slice(chunk);

        match std::str::from_utf8(&buf) {
            Ok(_) => Ok(String::from_utf8(buf).unwrap_or_default()),
            Err(e) if e.error_len().is_none() => {
                let valid = e.valid_up_to();
                debug_assert!(buf.len() - valid <= MAX_UTF8_CARRY);
                self.carry = buf.split_off(valid);
                Ok(String::from_utf8(buf).unwrap_or_default())
            }
            Err(e) => Err(PipelineError::Malformed {
                charset: "UTF-8",
                offset: e.valid_up_to(),
            }),
        }
    }

    fn encode(&mut self, text: &str) -> Vec<u8> {
        let Some(encoder) = self.encoder.as_mut() else {
            return text.as_bytes().to_vec();
        };

        let mut out = vec![
            0u8;
            encoder
                .max_buffer_length_from_utf8_without_replacement(text.len())
                .unwrap_or(text.len() * 4 + 4)
        ];
        let mut read_total = 0;
        let mut written_total = 0;
        loop {
            let (result, read, written) = encoder.encode_from_utf8_without_replacement(
                &text[read_total..],
                &mut out[written_total..],
                false,
            );
            read_total += read;
            written_total += written;
            match result {
                EncoderResult::InputEmpty => break,
                EncoderResult::Unmappable(_) => {
                    if written_total >= out.len() {
                        out.resize(out.len() + 16, 0);
                    }
                    out[written_total] = b'?';
                    written_total += 1;
                }
                EncoderResult::OutputFull => {
                    let grow = encoder
                        .max_buffer_length_from_utf8_without_replacement(text.len() - read_total)
                        .unwrap_or(16);
                    out.resize(out.len() + grow, 0);
                }
            }
        }
        out.truncate(written_total);
        out
    }
}

impl StreamStage for InputEncoder {
    fn name(&self) -> &'static str {
        "encode"
    }

    fn process(&mut self, chunk: Bytes, _events: &mut Vec<StageEvent>) -> Result<Bytes, PipelineError> {
        if self.encoder.is_none() {
            return Ok(chunk);
        }
        let text = self.complete_prefix(&chunk)?;
        if text.is_empty() {
            return Ok(Bytes::new());
        }
        Ok(Bytes::from(self.encode(&text)))
    }

    fn finish(&mut self) -> Result<(), PipelineError> {
        if !self.carry.is_empty() {
            log::debug!(
                "Dropping {} incomplete UTF-8 bytes bound for {}",
                self.carry.len(),
                self.encoding.name()
            );
            self.carry.clear();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEXT: &str = "中国中国中国中国中国";

    fn gb18030(text: &str) -> Vec<u8> {
        let (bytes, _, unmappable) = encoding_rs::GB18030.encode(text);
        assert!(!unmappable);
        bytes.into_owned()
    }

    fn feed(t: &mut CharsetTranscoder, chunks: &[&[u8]]) -> String {
        let mut events = Vec::new();
        let mut out = Vec::new();
        for chunk in chunks {
            let emitted = t.process(Bytes::copy_from_slice(chunk), &mut events).unwrap();
            out.extend_from_slice(&emitted);
        }
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_byte_at_a_time() {
        let encoded = gb18030(TEXT);
        let mut t = CharsetTranscoder::new("GB18030").unwrap();
        let chunks: Vec<&[u8]> = encoded.chunks(1).collect();
        assert_eq!(feed(&mut t, &chunks), TEXT);
    }

    #[test]
    fn test_uneven_split() {
        let encoded = gb18030(TEXT);
        let mut t = CharsetTranscoder::new("gb18030").unwrap();
        let out = feed(&mut t, &[&encoded[..1], &encoded[1..3], &encoded[3..]]);
        assert_eq!(out, TEXT);
    }

    #[test]
    fn test_every_chunk_size() {
        let text = "tpt> 显示 版本 status: 正常\r\n";
        let encoded = gb18030(text);
        for size in 1..=encoded.len() {
            let mut t = CharsetTranscoder::new("GB18030").unwrap();
            let chunks: Vec<&[u8]> = encoded.chunks(size).collect();
            assert_eq!(feed(&mut t, &chunks), text, "chunk size {}", size);
        }
    }

    #[test]
    fn test_four_byte_sequence_split() {
        // U+20000 is a four-byte sequence in GB18030.
        let text = "a\u{20000}b";
        let encoded = gb18030(text);
        assert_eq!(encoded.len(), 6);
        let mut t = CharsetTranscoder::new("GB18030").unwrap();
        let out = feed(&mut t, &[&encoded[..2], &encoded[2..4], &encoded[4..]]);
        assert_eq!(out, text);
    }

    #[test]
    fn test_incomplete_emits_nothing() {
        let mut t = CharsetTranscoder::new("GB18030").unwrap();
        let mut events = Vec::new();
        let out = t.process(Bytes::from_static(&[0xB9]), &mut events).unwrap();
        assert!(out.is_empty());
        let out = t.process(Bytes::from_static(&[0xFA]), &mut events).unwrap();
        assert_eq!(std::str::from_utf8(&out).unwrap(), "国");
    }

    #[test]
    fn test_canonical_is_passthrough() {
        let mut t = CharsetTranscoder::new("utf8").unwrap();
        assert!(t.is_passthrough());
        let mut events = Vec::new();
        // Even invalid UTF-8 is forwarded byte for byte.
        let chunk = Bytes::from_static(&[0xE4, 0xB8]);
        let out = t.process(chunk.clone(), &mut events).unwrap();
        assert_eq!(out, chunk);
    }

    #[test]
    fn test_malformed_is_error() {
        let mut t = CharsetTranscoder::new("Shift_JIS").unwrap();
        let mut events = Vec::new();
        let err = t
            .process(Bytes::from_static(b"ok\x82\x20"), &mut events)
            .unwrap_err();
        assert!(matches!(err, PipelineError::Malformed { offset: 2, .. }));
    }

    #[test]
    fn test_unknown_charset() {
        assert!(matches!(
            CharsetTranscoder::new("klingon"),
            Err(PipelineError::UnknownCharset(_))
        ));
    }

    #[test]
    fn test_input_encoder_split_utf8() {
        let mut enc = InputEncoder::new("GB18030").unwrap();
        let mut events = Vec::new();
        let utf8 = "中".as_bytes();
        let first = enc
            .process(Bytes::copy_from_slice(&utf8[..2]), &mut events)
            .unwrap();
        assert!(first.is_empty());
        assert_eq!(enc.carry_len(), 2);
        let second = enc
            .process(Bytes::copy_from_slice(&utf8[2..]), &mut events)
            .unwrap();
        assert_eq!(&second[..], &[0xD6, 0xD0]);
        assert_eq!(enc.carry_len(), 0);
    }

    #[test]
    fn test_input_encoder_unmappable() {
        let mut enc = InputEncoder::new("windows-1252").unwrap();
        let mut events = Vec::new();
        let out = enc.process(Bytes::from("a中b"), &mut events).unwrap();
        assert_eq!(&out[..], b"a?b");
    }

    #[test]
    fn test_default_charset() {
        if cfg!(windows) {
            assert_eq!(default_charset(), "GB18030");
        } else {
            assert_eq!(default_charset(), CANONICAL_CHARSET);
        }
    }
}
