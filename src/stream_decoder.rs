//! Decoding of the line-delimited answer stream produced by the chat endpoint.
//!
//! Two line shapes carry text:
//!
//! ```text
//! 0:"<json string literal>"
//! data: {"content": "<text>"}
//! ```
//!
//! Anything else is ignored. Lines may be split across network chunks at any
//! byte, so complete lines are only cut from the carry buffer at `\n`.

use futures::{Stream, StreamExt};
use serde_json::Value;

pub const FRAGMENT_PREFIX: &str = "0:";
pub const DATA_PREFIX: &str = "data: ";

/// Accumulates raw bytes and hands out complete lines.
///
/// Splitting happens on bytes, before UTF-8 decoding, so a multi-byte
/// character cut in half by a chunk boundary is reassembled intact.
#[derive(Debug, Default)]
pub struct LineBuffer {
    carry: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.carry.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0usize;
        while let Some(pos) = self.carry[start..].iter().position(|b| *b == b'\n') {
            let end = start + pos;
            lines.push(to_line(&self.carry[start..end]));
            start = end + 1;
        }
        self.carry.drain(..start);
        lines
    }

    /// The incomplete line still buffered, if any.
    pub fn take_remainder(&mut self) -> Option<String> {
        if self.carry.is_empty() {
            return None;
        }
        let line = to_line(&self.carry);
        self.carry.clear();
        Some(line)
    }
}

fn to_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

#[derive(Debug, Clone, PartialEq)]
pub enum LineEvent {
    Fragment(String),
    Ignored,
    Malformed(String),
}

pub fn decode_line(line: &str) -> LineEvent {
    if line.trim().is_empty() {
        return LineEvent::Ignored;
    }

    if let Some(rest) = line.strip_prefix(FRAGMENT_PREFIX) {
        return match serde_json::from_str::<Value>(rest) {
            Ok(Value::String(text)) => LineEvent::Fragment(text),
            Ok(_) => LineEvent::Ignored,
            Err(e) => LineEvent::Malformed(e.to_string()),
        };
    }

    if let Some(rest) = line.strip_prefix(DATA_PREFIX) {
        return match serde_json::from_str::<Value>(rest) {
            Ok(value) => match value.get("content").and_then(Value::as_str) {
                Some(text) if !text.is_empty() => LineEvent::Fragment(text.to_string()),
                _ => LineEvent::Ignored,
            },
            Err(e) => LineEvent::Malformed(e.to_string()),
        };
    }

    LineEvent::Ignored
}

/// Turns chunks of the answer stream into text fragments.
#[derive(Debug, Default)]
pub struct FragmentDecoder {
    lines: LineBuffer,
}

impl FragmentDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.lines
            .push(chunk)
            .iter()
            .filter_map(|line| fragment_of(line))
            .collect()
    }

    /// Decodes whatever is left once the stream has ended. An upstream that
    /// closes without a trailing newline still delivers its last fragment.
    pub fn finish(mut self) -> Vec<String> {
        self.lines
            .take_remainder()
            .and_then(|line| fragment_of(&line))
            .into_iter()
            .collect()
    }
}

fn fragment_of(line: &str) -> Option<String> {
    match decode_line(line) {
        LineEvent::Fragment(text) => Some(text),
        LineEvent::Ignored => None,
        LineEvent::Malformed(reason) => {
            log::warn!("skipping malformed stream line {line:?}: {reason}");
            None
        }
    }
}

/// Lazily decodes a byte stream into fragments. A transport error is yielded
/// once and ends the sequence.
pub fn decode_fragments<S, B, E>(stream: S) -> impl Stream<Item = Result<String, E>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    async_stream::stream! {
        let mut decoder = FragmentDecoder::new();
        let mut failed = false;
        futures::pin_mut!(stream);

        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => {
                    for fragment in decoder.push(bytes.as_ref()) {
                        yield Ok(fragment);
                    }
                }
                Err(e) => {
                    failed = true;
                    yield Err(e);
                    break;
                }
            }
        }

        if !failed {
            for fragment in decoder.finish() {
                yield Ok(fragment);
            }
        }
    }
}

/// Encodes one fragment as a `0:` line.
pub fn encode_fragment(text: &str) -> String {
    format!("{FRAGMENT_PREFIX}{}\n", Value::String(text.to_string()))
}

/// Encodes a whole answer as a single `data: ` line.
pub fn encode_content_line(text: &str) -> String {
    format!("{DATA_PREFIX}{}\n", serde_json::json!({ "content": text }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    const PAYLOAD: &str = "0:\"Paris is\"\n\
        0:\" the capital [1].\"\n\
        \n\
        e:{\"finishReason\":\"stop\"}\n\
        0:\" Caf\\u00e9 ☕ 日本\"\n\
        data: {\"content\":\" extra\"}\n\
        0:not json\n\
        0:\"done\"\n";

    fn decode_chunks(chunks: &[&[u8]]) -> Vec<String> {
        let mut decoder = FragmentDecoder::new();
        let mut out = Vec::new();
        for chunk in chunks {
            out.extend(decoder.push(chunk));
        }
        out.extend(decoder.finish());
        out
    }

    #[test]
    fn test_decode_line_shapes() {
        assert_eq!(
            decode_line(r#"0:"hello""#),
            LineEvent::Fragment("hello".into())
        );
        assert_eq!(
            decode_line(r#"0:"line\nbreak""#),
            LineEvent::Fragment("line\nbreak".into())
        );
        assert_eq!(decode_line("0:42"), LineEvent::Ignored);
        assert!(matches!(decode_line("0:\"unterminated"), LineEvent::Malformed(_)));
        assert_eq!(
            decode_line(r#"data: {"content":"hi"}"#),
            LineEvent::Fragment("hi".into())
        );
        assert_eq!(decode_line(r#"data: {"content":""}"#), LineEvent::Ignored);
        assert_eq!(decode_line(r#"data: {"other":1}"#), LineEvent::Ignored);
        assert!(matches!(decode_line("data: [DONE]"), LineEvent::Malformed(_)));
        assert_eq!(decode_line(r#"e:{"x":1}"#), LineEvent::Ignored);
        assert_eq!(decode_line("   "), LineEvent::Ignored);
    }

    #[test]
    fn test_line_buffer_holds_partial_line() {
        let mut buf = LineBuffer::new();
        assert!(buf.push(b"0:\"ab").is_empty());
        assert_eq!(buf.push(b"c\"\r\n0:"), vec!["0:\"abc\"".to_string()]);
        assert_eq!(buf.take_remainder(), Some("0:".to_string()));
        assert_eq!(buf.take_remainder(), None);
    }

    #[test]
    fn test_decoder_is_chunk_boundary_invariant() {
        let bytes = PAYLOAD.as_bytes();
        let expected = decode_chunks(&[bytes]);
        assert_eq!(
            expected,
            vec!["Paris is", " the capital [1].", " Café ☕ 日本", " extra", "done"]
        );

        for split in 0..=bytes.len() {
            let (a, b) = bytes.split_at(split);
            assert_eq!(decode_chunks(&[a, b]), expected, "split at {split}");
        }

        let singles: Vec<&[u8]> = bytes.chunks(1).collect();
        assert_eq!(decode_chunks(&singles), expected);
    }

    #[test]
    fn test_multibyte_character_split_across_chunks() {
        let line = encode_fragment("☕");
        let bytes = line.as_bytes();
        // the coffee cup is three bytes long; cut through its middle
        let cut = bytes.iter().position(|b| *b >= 0x80).unwrap() + 1;
        let (a, b) = bytes.split_at(cut);
        assert_eq!(decode_chunks(&[a, b]), vec!["☕".to_string()]);
    }

    #[test]
    fn test_final_line_without_newline_is_flushed() {
        assert_eq!(
            decode_chunks(&[&b"0:\"a\"\n0:\"b\""[..]]),
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn test_encode_roundtrips_through_decoder() {
        let text = "quote \" backslash \\ newline \n tab \t";
        let encoded = encode_fragment(text);
        assert!(encoded.starts_with("0:\""));
        assert!(encoded.ends_with('\n'));
        assert_eq!(decode_chunks(&[encoded.as_bytes()]), vec![text.to_string()]);

        let content = encode_content_line(text);
        assert!(content.starts_with("data: "));
        assert_eq!(decode_chunks(&[content.as_bytes()]), vec![text.to_string()]);
    }

    #[tokio::test]
    async fn test_decode_fragments_stream() {
        let chunks: Vec<Result<&[u8], String>> = vec![
            Ok(&b"0:\"Paris"[..]),
            Ok(&b" is\"\n0:\" the"[..]),
            Ok(&b" capital [1].\"\n"[..]),
        ];
        let fragments: Vec<Result<String, String>> =
            decode_fragments(stream::iter(chunks)).collect().await;
        assert_eq!(
            fragments,
            vec![Ok("Paris is".to_string()), Ok(" the capital [1].".to_string())]
        );
    }

    #[tokio::test]
    async fn test_decode_fragments_stops_on_error() {
        let chunks: Vec<Result<&[u8], String>> = vec![
            Ok(&b"0:\"a\"\n0:\"partial"[..]),
            Err("connection reset".to_string()),
            Ok(&b"0:\"never\"\n"[..]),
        ];
        let fragments: Vec<Result<String, String>> =
            decode_fragments(stream::iter(chunks)).collect().await;
        assert_eq!(
            fragments,
            vec![Ok("a".to_string()), Err("connection reset".to_string())]
        );
    }
}
