//! Frame codec for the JSON-RPC wire protocol.
//!
//! Frame format:
//! ```text
//! Content-Length: <n>\r\n
//! [Content-Type: application/vscode-jsonrpc; charset=<cs>\r\n]
//! \r\n
//! <n bytes of JSON>
//! ```
//! Bytes arrive in arbitrary chunks; the decoder buffers partial headers and
//! partial bodies until a whole frame is available and keeps any surplus for
//! the next one.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::types::{Error, Result};

/// Charset assumed when the header does not name one.
pub const DEFAULT_CHARSET: &str = "utf-8";
/// Content type written on every outbound frame.
pub const CONTENT_TYPE: &str = "application/vscode-jsonrpc";

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
/// Longest header block accepted before the buffered bytes are dropped.
pub const MAX_HEADER_BYTES: usize = 8 * 1024;

/// One unit produced by [`FrameCodec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete body and the charset it is encoded in.
    Message { body: Bytes, charset: String },
    /// A frame declared larger than the configured limit. Its body is
    /// skipped as it arrives.
    Oversized { length: usize },
    /// Bytes dropped because no header terminator showed up within
    /// [`MAX_HEADER_BYTES`].
    Unframed { skipped: usize },
}

/// Content-Length framing as a `tokio_util` codec.
#[derive(Debug)]
pub struct FrameCodec {
    max_frame_bytes: usize,
    /// Body bytes of an oversized frame still to be skipped.
    discard: usize,
}

impl FrameCodec {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            discard: 0,
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(crate::types::RpcConfig::default().max_frame_bytes)
    }
}

/// Parsed header block.
#[derive(Debug, PartialEq, Eq)]
struct Header {
    content_length: Option<usize>,
    charset: Option<String>,
}

fn parse_header(raw: &[u8]) -> Header {
    let text = String::from_utf8_lossy(raw);
    let mut header = Header {
        content_length: None,
        charset: None,
    };

    for line in text.split("\r\n") {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        if name.eq_ignore_ascii_case("content-length") {
            header.content_length = value.trim().parse().ok();
        } else if name.eq_ignore_ascii_case("content-type") {
            header.charset = value
                .split(';')
                .skip(1)
                .filter_map(|param| param.split_once('='))
                .find(|(key, _)| key.trim().eq_ignore_ascii_case("charset"))
                .map(|(_, cs)| cs.trim().trim_matches('"').to_string())
                .filter(|cs| !cs.is_empty());
        }
    }

    header
}

fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_TERMINATOR.len())
        .position(|w| w == HEADER_TERMINATOR)
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> std::io::Result<Option<Frame>> {
        if self.discard > 0 {
            let n = self.discard.min(src.len());
            src.advance(n);
            self.discard -= n;
            if self.discard > 0 {
                return Ok(None);
            }
        }

        let Some(pos) = find_terminator(src) else {
            if src.len() > MAX_HEADER_BYTES {
                // keep a tail that may be the start of a terminator
                let skipped = src.len() - (HEADER_TERMINATOR.len() - 1);
                src.advance(skipped);
                return Ok(Some(Frame::Unframed { skipped }));
            }
            return Ok(None);
        };

        let header = parse_header(&src[..pos]);
        // A missing or unparsable length still has to make progress: take one
        // byte and let the message decoder report the parse failure.
        let length = header.content_length.unwrap_or(1);
        let header_len = pos + HEADER_TERMINATOR.len();

        if length > self.max_frame_bytes {
            src.advance(header_len);
            let n = length.min(src.len());
            src.advance(n);
            self.discard = length - n;
            return Ok(Some(Frame::Oversized { length }));
        }

        if src.len() < header_len + length {
            src.reserve(header_len + length - src.len());
            return Ok(None);
        }

        src.advance(header_len);
        let body = src.split_to(length).freeze();
        let charset = header
            .charset
            .unwrap_or_else(|| DEFAULT_CHARSET.to_string());

        Ok(Some(Frame::Message { body, charset }))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = std::io::Error;

    fn encode(&mut self, body: Bytes, dst: &mut BytesMut) -> std::io::Result<()> {
        let header = format!(
            "Content-Length: {}\r\nContent-Type: {}; charset={}\r\n\r\n",
            body.len(),
            CONTENT_TYPE,
            DEFAULT_CHARSET
        );
        dst.reserve(header.len() + body.len());
        dst.put_slice(header.as_bytes());
        dst.put_slice(&body);
        Ok(())
    }
}

/// Encode a body into a standalone wire frame.
pub fn encode_frame(body: &[u8]) -> Bytes {
    let mut dst = BytesMut::new();
    // Encoding into memory cannot fail.
    let _ = FrameCodec::default().encode(Bytes::copy_from_slice(body), &mut dst);
    dst.freeze()
}

/// Decode a frame body as text in its declared charset.
pub fn body_text<'a>(body: &'a [u8], charset: &str) -> Result<&'a str> {
    let cs = charset.trim().to_ascii_lowercase();
    if cs != "utf-8" && cs != "utf8" {
        return Err(Error::parse(format!("unsupported charset: {}", charset)));
    }
    std::str::from_utf8(body).map_err(|e| Error::parse(format!("invalid utf-8 body: {}", e)))
}
