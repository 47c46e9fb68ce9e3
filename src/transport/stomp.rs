//! STOMP 1.0-1.2 client transport
//!
//! ## Frame Structure
//!
//! ```text
//! COMMAND\n
//! header1:value1\n
//! header2:value2\n
//! \n
//! body bytes\0
//! ```
//!
//! Bodies with a `content-length` header are read by length and may contain NUL
//! bytes (binary feeds rely on this). Without it the body ends at the first NUL.
//! Bare EOLs between frames are heart-beats and are skipped.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::{Decoder, Encoder, Framed};
use tracing::{debug, info, trace};

use super::{Connector, Inbound, InboundMessage, Link, Outbound};
use crate::config::BrokerConfig;
use crate::types::Headers;
use crate::{FeedError, Result};

/// Default upper bound on a single frame, headers and body included.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Protocol versions offered in CONNECT.
const ACCEPT_VERSION: &str = "1.0,1.1,1.2";

/// One STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StompFrame {
    pub command: String,
    pub headers: Headers,
    pub body: Bytes,
}

impl StompFrame {
    pub fn new(command: impl Into<String>) -> Self {
        Self { command: command.into(), headers: Headers::new(), body: Bytes::new() }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// CONNECT frame for `config`, heart-beats disabled.
    pub fn connect(config: &BrokerConfig) -> Self {
        StompFrame::new("CONNECT")
            .header("accept-version", ACCEPT_VERSION)
            .header("host", config.host.as_str())
            .header("login", config.login.as_str())
            .header("passcode", config.passcode.as_str())
            .header("heart-beat", "0,0")
    }

    /// Broker error description from an ERROR frame.
    pub fn error_message(&self) -> String {
        let summary = self.headers.get("message").unwrap_or("broker error");
        let details = String::from_utf8_lossy(&self.body);
        let details = details.trim_matches(|c: char| c.is_whitespace() || c == '\0');
        if details.is_empty() { summary.to_string() } else { format!("{summary}: {details}") }
    }
}

/// Frame codec for use with [`Framed`].
#[derive(Debug, Clone)]
pub struct StompCodec {
    max_frame_size: usize,
    /// Header escaping, on once a 1.1+ session is negotiated
    escape_headers: bool,
}

impl Default for StompCodec {
    fn default() -> Self {
        Self { max_frame_size: DEFAULT_MAX_FRAME_SIZE, escape_headers: false }
    }
}

impl StompCodec {
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size, ..Self::default() }
    }

    pub fn set_escape_headers(&mut self, escape: bool) {
        self.escape_headers = escape;
    }

    fn check_size(&self, buffered: usize) -> Result<()> {
        if buffered > self.max_frame_size {
            return Err(FeedError::protocol(format!(
                "Frame exceeds {} bytes without terminating",
                self.max_frame_size
            )));
        }
        Ok(())
    }
}

fn uses_escaping(command: &str) -> bool {
    command != "CONNECT" && command != "CONNECTED"
}

fn unescape(value: &str) -> Result<String> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            Some('\\') => out.push('\\'),
            other => {
                return Err(FeedError::protocol(format!("Invalid header escape '\\{other:?}'")));
            }
        }
    }
    Ok(out)
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

/// Index of the blank line ending the header block and the body start offset.
fn find_header_end(buf: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while let Some(pos) = buf[i..].iter().position(|&b| b == b'\n') {
        let nl = i + pos;
        match buf.get(nl + 1) {
            Some(b'\n') => return Some((nl, nl + 2)),
            Some(b'\r') if buf.get(nl + 2) == Some(&b'\n') => return Some((nl, nl + 3)),
            _ => i = nl + 1,
        }
    }
    None
}

impl Decoder for StompCodec {
    type Item = StompFrame;
    type Error = FeedError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<StompFrame>> {
        let heart_beats = src.iter().take_while(|&&b| b == b'\n' || b == b'\r').count();
        if heart_beats > 0 {
            trace!(heart_beats, "Skipping heart-beat EOLs");
            src.advance(heart_beats);
        }
        if src.is_empty() {
            return Ok(None);
        }

        let Some((head_end, body_start)) = find_header_end(src) else {
            self.check_size(src.len())?;
            return Ok(None);
        };

        let head = std::str::from_utf8(&src[..head_end])
            .map_err(|e| FeedError::protocol(format!("Frame headers are not UTF-8: {e}")))?;
        let mut lines = head.split('\n').map(|line| line.strip_suffix('\r').unwrap_or(line));
        let command = lines.next().unwrap_or_default().to_string();
        if command.is_empty() {
            return Err(FeedError::protocol("Frame has no command"));
        }

        let escaped = self.escape_headers && uses_escaping(&command);
        let mut headers = Headers::new();
        for line in lines {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| FeedError::protocol(format!("Malformed header line '{line}'")))?;
            if escaped {
                headers.insert(unescape(name)?, unescape(value)?);
            } else {
                headers.insert(name, value);
            }
        }

        let (body_len, frame_len) = match headers.get("content-length") {
            Some(len) => {
                let len: usize = len.trim().parse().map_err(|_| {
                    FeedError::protocol(format!("Invalid content-length '{len}'"))
                })?;
                self.check_size(len)?;
                let frame_len =
                    body_start.checked_add(len).and_then(|n| n.checked_add(1)).ok_or_else(|| {
                        FeedError::protocol(format!("content-length {len} overflows frame size"))
                    })?;
                self.check_size(frame_len)?;
                if src.len() < frame_len {
                    src.reserve(frame_len - src.len());
                    return Ok(None);
                }
                if src[frame_len - 1] != 0 {
                    return Err(FeedError::protocol("Body is not NUL-terminated after content-length"));
                }
                (len, frame_len)
            }
            None => match src[body_start..].iter().position(|&b| b == 0) {
                Some(len) => (len, body_start + len + 1),
                None => {
                    self.check_size(src.len())?;
                    return Ok(None);
                }
            },
        };

        let mut frame = src.split_to(frame_len);
        frame.advance(body_start);
        frame.truncate(body_len);

        trace!(%command, body = body_len, "Decoded STOMP frame");
        Ok(Some(StompFrame { command, headers, body: frame.freeze() }))
    }
}

impl Encoder<StompFrame> for StompCodec {
    type Error = FeedError;

    fn encode(&mut self, frame: StompFrame, dst: &mut BytesMut) -> Result<()> {
        let escaped = self.escape_headers && uses_escaping(&frame.command);
        dst.reserve(frame.command.len() + frame.body.len() + 64);
        dst.put_slice(frame.command.as_bytes());
        dst.put_u8(b'\n');
        for (name, value) in frame.headers.iter() {
            if escaped {
                dst.put_slice(escape(name).as_bytes());
                dst.put_u8(b':');
                dst.put_slice(escape(value).as_bytes());
            } else {
                dst.put_slice(name.as_bytes());
                dst.put_u8(b':');
                dst.put_slice(value.as_bytes());
            }
            dst.put_u8(b'\n');
        }
        if !frame.body.is_empty() && frame.headers.get("content-length").is_none() {
            dst.put_slice(format!("content-length:{}\n", frame.body.len()).as_bytes());
        }
        dst.put_u8(b'\n');
        dst.put_slice(&frame.body);
        dst.put_u8(0);
        Ok(())
    }
}

type StompStream = Framed<TcpStream, StompCodec>;

/// Connects to a STOMP broker over TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct StompConnector;

#[async_trait::async_trait]
impl Connector for StompConnector {
    async fn connect(&self, config: &BrokerConfig) -> Result<Link> {
        let address = config.address();
        let limit = config.timeout();
        debug!(%address, "Opening STOMP connection");

        let stream = timeout(limit, TcpStream::connect(&address))
            .await
            .map_err(|_| FeedError::timeout("connect", limit))?
            .map_err(|e| {
                FeedError::connection_failed_with_source(format!("Cannot reach {address}"), Box::new(e))
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%address, error = %e, "Cannot disable Nagle on STOMP socket");
        }

        let mut framed = Framed::new(stream, StompCodec::default());
        framed.send(StompFrame::connect(config)).await?;

        let reply = timeout(limit, framed.next())
            .await
            .map_err(|_| FeedError::timeout("STOMP handshake", limit))?;
        let connected = match reply {
            Some(Ok(frame)) if frame.command == "CONNECTED" => frame,
            Some(Ok(frame)) if frame.command == "ERROR" => {
                return Err(FeedError::connection_failed(format!(
                    "Broker rejected connection: {}",
                    frame.error_message()
                )));
            }
            Some(Ok(frame)) => {
                return Err(FeedError::protocol(format!(
                    "Expected CONNECTED, got {}",
                    frame.command
                )));
            }
            Some(Err(e)) => return Err(e),
            None => return Err(FeedError::connection_failed("Broker closed during handshake")),
        };

        let version = connected.headers.get("version").unwrap_or("1.0").to_string();
        framed.codec_mut().set_escape_headers(version != "1.0");
        info!(
            %address,
            %version,
            server = connected.headers.get("server").unwrap_or("unknown"),
            "STOMP session established"
        );

        let (sink, stream) = framed.split();
        Ok(Link {
            outbound: Box::new(StompOutbound { sink }),
            inbound: Box::new(StompInbound { stream }),
        })
    }
}

struct StompOutbound {
    sink: SplitSink<StompStream, StompFrame>,
}

#[async_trait::async_trait]
impl Outbound for StompOutbound {
    async fn subscribe(&mut self, id: &str, destination: &str) -> Result<()> {
        let frame = StompFrame::new("SUBSCRIBE")
            .header("id", id)
            .header("destination", destination)
            .header("ack", "auto");
        self.sink.send(frame).await
    }

    async fn unsubscribe(&mut self, id: &str) -> Result<()> {
        self.sink.send(StompFrame::new("UNSUBSCRIBE").header("id", id)).await
    }

    async fn send(&mut self, destination: &str, body: Bytes) -> Result<()> {
        let frame = StompFrame::new("SEND").header("destination", destination).body(body);
        self.sink.send(frame).await
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.sink.send(StompFrame::new("DISCONNECT")).await?;
        self.sink.close().await
    }
}

struct StompInbound {
    stream: SplitStream<StompStream>,
}

#[async_trait::async_trait]
impl Inbound for StompInbound {
    async fn next_message(&mut self) -> Result<Option<InboundMessage>> {
        while let Some(frame) = self.stream.next().await {
            let frame = frame?;
            match frame.command.as_str() {
                "MESSAGE" => return Ok(Some(InboundMessage::new(frame.headers, frame.body))),
                "ERROR" => return Err(FeedError::connection_failed(frame.error_message())),
                other => debug!(command = other, "Ignoring STOMP frame"),
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Result, ensure};

    fn decode_all(codec: &mut StompCodec, bytes: &[u8]) -> Result<Vec<StompFrame>> {
        let mut buf = BytesMut::from(bytes);
        let mut frames = Vec::new();
        while let Some(frame) = codec.decode(&mut buf)? {
            frames.push(frame);
        }
        Ok(frames)
    }

    #[test]
    fn decodes_nul_terminated_frame() -> Result<()> {
        let frames = decode_all(&mut StompCodec::default(), b"CONNECTED\nversion:1.2\n\n\0")?;
        ensure!(frames.len() == 1);
        ensure!(frames[0].command == "CONNECTED");
        ensure!(frames[0].headers.get("version") == Some("1.2"));
        ensure!(frames[0].body.is_empty());
        Ok(())
    }

    #[test]
    fn content_length_bodies_may_contain_nul() -> Result<()> {
        let body = b"G\0\0\0\x01binary\0payload";
        let mut wire = format!("MESSAGE\ndestination:/topic/t\ncontent-length:{}\n\n", body.len()).into_bytes();
        wire.extend_from_slice(body);
        wire.push(0);
        let frames = decode_all(&mut StompCodec::default(), &wire)?;
        ensure!(frames.len() == 1);
        ensure!(frames[0].body.as_ref() == body);
        Ok(())
    }

    #[test]
    fn heart_beats_and_crlf_are_tolerated() -> Result<()> {
        let frames = decode_all(
            &mut StompCodec::default(),
            b"\n\r\nMESSAGE\r\ndestination:/topic/t\r\n\r\nK\0\n\nRECEIPT\nreceipt-id:1\n\n\0",
        )?;
        ensure!(frames.len() == 2);
        ensure!(frames[0].headers.destination() == Some("/topic/t"));
        ensure!(frames[0].body.as_ref() == b"K");
        ensure!(frames[1].command == "RECEIPT");
        Ok(())
    }

    #[test]
    fn partial_frames_wait_for_more_bytes() -> Result<()> {
        let mut codec = StompCodec::default();
        let mut buf = BytesMut::from(&b"MESSAGE\ncontent-length:4\n\nab"[..]);
        ensure!(codec.decode(&mut buf)?.is_none());
        buf.extend_from_slice(b"cd\0");
        let frame = codec.decode(&mut buf)?.ok_or_else(|| anyhow::anyhow!("frame incomplete"))?;
        ensure!(frame.body.as_ref() == b"abcd");
        ensure!(buf.is_empty());
        Ok(())
    }

    #[test]
    fn escaped_headers_round_trip() -> Result<()> {
        let mut codec = StompCodec::default();
        codec.set_escape_headers(true);
        let frame = StompFrame::new("SEND").header("destination", "/topic/a:b\\c\nd").body("x");
        let mut buf = BytesMut::new();
        codec.encode(frame.clone(), &mut buf)?;
        ensure!(buf.windows(4).any(|w| w == b"a\\cb"));
        let decoded = codec.decode(&mut buf)?.ok_or_else(|| anyhow::anyhow!("no frame"))?;
        ensure!(decoded.headers.destination() == Some("/topic/a:b\\c\nd"));
        ensure!(decoded.headers.get("content-length") == Some("1"));
        ensure!(decoded.body.as_ref() == b"x");
        Ok(())
    }

    #[test]
    fn oversized_frames_are_rejected() {
        let mut codec = StompCodec::with_max_frame_size(32);
        let mut buf = BytesMut::from(&[b'M'; 64][..]);
        assert!(matches!(codec.decode(&mut buf), Err(FeedError::Protocol { .. })));

        let mut buf = BytesMut::from(&b"MESSAGE\ncontent-length:100\n\n"[..]);
        assert!(matches!(codec.decode(&mut buf), Err(FeedError::Protocol { .. })));
    }

    #[test]
    fn huge_content_length_is_protocol_error() {
        let mut codec = StompCodec::default();
        let mut buf = BytesMut::from(&b"MESSAGE\ncontent-length:18446744073709551615\n\nab\0"[..]);
        assert!(matches!(codec.decode(&mut buf), Err(FeedError::Protocol { .. })));

        let mut codec = StompCodec::with_max_frame_size(usize::MAX);
        let wire = format!("MESSAGE\ncontent-length:{}\n\nab\0", usize::MAX - 2);
        let mut buf = BytesMut::from(wire.as_bytes());
        assert!(matches!(codec.decode(&mut buf), Err(FeedError::Protocol { .. })));
    }

    #[test]
    fn missing_terminator_after_content_length_is_protocol_error() {
        let mut buf = BytesMut::from(&b"MESSAGE\ncontent-length:1\n\nab"[..]);
        assert!(matches!(StompCodec::default().decode(&mut buf), Err(FeedError::Protocol { .. })));
    }

    #[test]
    fn invalid_escape_is_protocol_error() {
        let mut codec = StompCodec::default();
        codec.set_escape_headers(true);
        let mut buf = BytesMut::from(&b"MESSAGE\nbad:\\t\n\n\0"[..]);
        assert!(matches!(codec.decode(&mut buf), Err(FeedError::Protocol { .. })));
    }

    #[test]
    fn error_frames_summarize_message_and_body() {
        let frame = StompFrame::new("ERROR").header("message", "Authentication failed").body("bad user\n\0");
        assert_eq!(frame.error_message(), "Authentication failed: bad user");
    }
}
