//! STOMP 1.2 frames: model, encoder and a streaming parser

use crate::error::{RealtimeError, Result};
use crate::protocol::heartbeat::HeartBeat;
use std::fmt;

/// Upper bound on buffered, not yet complete frame data
const MAX_BUFFERED_BYTES: usize = 16 << 20;

/// STOMP frame command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    // client
    Connect,
    Stomp,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Disconnect,
    // server
    Connected,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Stomp => "STOMP",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Ack => "ACK",
            Command::Nack => "NACK",
            Command::Begin => "BEGIN",
            Command::Commit => "COMMIT",
            Command::Abort => "ABORT",
            Command::Disconnect => "DISCONNECT",
            Command::Connected => "CONNECTED",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let command = match s {
            "CONNECT" => Command::Connect,
            "STOMP" => Command::Stomp,
            "SEND" => Command::Send,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "ACK" => Command::Ack,
            "NACK" => Command::Nack,
            "BEGIN" => Command::Begin,
            "COMMIT" => Command::Commit,
            "ABORT" => Command::Abort,
            "DISCONNECT" => Command::Disconnect,
            "CONNECTED" => Command::Connected,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            _ => return None,
        };
        Some(command)
    }

    /// CONNECT and CONNECTED headers are never escaped
    fn escapes_headers(&self) -> bool {
        !matches!(self, Command::Connect | Command::Stomp | Command::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Look up a header; the first occurrence wins
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn destination(&self) -> Option<&str> {
        self.get("destination")
    }

    pub fn connect(host: &str, heart_beat: HeartBeat) -> Self {
        Frame::new(Command::Connect)
            .header("accept-version", "1.2,1.1,1.0")
            .header("host", host)
            .header("heart-beat", heart_beat.header_value())
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Frame::new(Command::Subscribe)
            .header("id", id)
            .header("destination", destination)
    }

    pub fn unsubscribe(id: &str) -> Self {
        Frame::new(Command::Unsubscribe).header("id", id)
    }

    pub fn send(destination: &str, body: impl Into<Vec<u8>>) -> Self {
        Frame::new(Command::Send)
            .header("destination", destination)
            .header("content-type", "application/json")
            .with_body(body)
    }

    pub fn disconnect() -> Self {
        Frame::new(Command::Disconnect)
    }

    /// Serialize to the text form carried by the transport
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');

        let escape = self.command.escapes_headers();
        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }

        // Length of what is written, which differs from the raw body when it is not UTF-8
        let body = String::from_utf8_lossy(&self.body);
        if !body.is_empty() && self.get("content-length").is_none() {
            out.push_str(&format!("content-length:{}\n", body.len()));
        }

        out.push('\n');
        out.push_str(&body);
        out.push('\0');
        out
    }
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
    out
}

fn unescape_header(raw: &str) -> Result<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => {
                return Err(RealtimeError::MalformedFrame(format!(
                    "invalid header escape \\{}",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(out)
}

/// One unit read off the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Heartbeat,
    Frame(Frame),
}

/// Result of feeding one transport message to a [`FrameParser`]
///
/// A malformed frame only costs itself: units completed before or after it in
/// the same message are still returned.
#[derive(Debug, Default)]
pub struct Parsed {
    pub units: Vec<Inbound>,
    pub errors: Vec<RealtimeError>,
}

/// Incremental parser; frames may span or share transport messages
#[derive(Debug, Default)]
pub struct FrameParser {
    buf: Vec<u8>,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes received but not yet forming a complete frame
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Feed transport data and return everything that is now complete
    ///
    /// A frame that fails to parse is skipped up to its NUL terminator, or the
    /// whole buffer is dropped when no terminator has arrived yet.
    pub fn push(&mut self, data: &[u8]) -> Parsed {
        self.buf.extend_from_slice(data);

        let mut parsed = Parsed::default();
        loop {
            match self.next_unit() {
                Ok(Some(unit)) => parsed.units.push(unit),
                Ok(None) => break,
                Err(e) => {
                    parsed.errors.push(e);
                    self.skip_frame();
                }
            }
        }

        if self.buf.len() > MAX_BUFFERED_BYTES {
            self.buf.clear();
            parsed.errors.push(RealtimeError::MalformedFrame(
                "frame exceeds maximum buffered size".into(),
            ));
        }

        parsed
    }

    fn skip_frame(&mut self) {
        match self.buf.iter().position(|b| *b == 0) {
            Some(nul) => {
                self.buf.drain(..=nul);
            }
            None => self.buf.clear(),
        }
    }

    fn next_unit(&mut self) -> Result<Option<Inbound>> {
        match self.buf.first() {
            None => return Ok(None),
            Some(b'\n') => {
                self.buf.drain(..1);
                return Ok(Some(Inbound::Heartbeat));
            }
            Some(b'\r') => {
                return match self.buf.get(1) {
                    None => Ok(None),
                    Some(b'\n') => {
                        self.buf.drain(..2);
                        Ok(Some(Inbound::Heartbeat))
                    }
                    Some(_) => Err(RealtimeError::MalformedFrame("stray carriage return".into())),
                };
            }
            Some(_) => {}
        }

        // Command line, then headers up to the first empty line
        let mut lines = Vec::new();
        let mut pos = 0;
        let body_start = loop {
            let Some(nl) = self.buf[pos..].iter().position(|b| *b == b'\n') else {
                return Ok(None);
            };
            let mut line = &self.buf[pos..pos + nl];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }
            pos += nl + 1;
            if line.is_empty() {
                break pos;
            }
            let line = std::str::from_utf8(line)
                .map_err(|_| RealtimeError::MalformedFrame("header is not UTF-8".into()))?;
            lines.push(line.to_string());
        };

        let mut lines = lines.into_iter();
        let command_line = lines.next().unwrap_or_default();
        let command = Command::parse(&command_line).ok_or_else(|| {
            RealtimeError::MalformedFrame(format!("unknown command {:?}", command_line))
        })?;

        let mut frame = Frame::new(command);
        for line in lines {
            let (name, value) = line.split_once(':').ok_or_else(|| {
                RealtimeError::MalformedFrame(format!("header without ':' {:?}", line))
            })?;
            if command.escapes_headers() {
                frame
                    .headers
                    .push((unescape_header(name)?, unescape_header(value)?));
            } else {
                frame.headers.push((name.to_string(), value.to_string()));
            }
        }

        let body_end = match frame.get("content-length") {
            Some(len) => {
                let len: usize = len.trim().parse().map_err(|_| {
                    RealtimeError::MalformedFrame(format!("invalid content-length {:?}", len))
                })?;
                let end = body_start
                    .checked_add(len)
                    .filter(|_| len <= MAX_BUFFERED_BYTES)
                    .ok_or_else(|| {
                        RealtimeError::MalformedFrame(format!("content-length {} too large", len))
                    })?;
                match self.buf.get(end) {
                    None => return Ok(None),
                    Some(0) => end,
                    Some(_) => {
                        return Err(RealtimeError::MalformedFrame(
                            "body longer than content-length".into(),
                        ))
                    }
                }
            }
            None => match self.buf[body_start..].iter().position(|b| *b == 0) {
                Some(offset) => body_start + offset,
                None => return Ok(None),
            },
        };

        frame.body = self.buf[body_start..body_end].to_vec();
        self.buf.drain(..=body_end);

        Ok(Some(Inbound::Frame(frame)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn frames(parsed: Parsed) -> Vec<Frame> {
        assert!(parsed.errors.is_empty(), "unexpected errors {:?}", parsed.errors);
        parsed
            .units
            .into_iter()
            .filter_map(|u| match u {
                Inbound::Frame(f) => Some(f),
                Inbound::Heartbeat => None,
            })
            .collect()
    }

    #[test]
    fn test_encode_subscribe() {
        let frame = Frame::subscribe("sub-0", "/topic/stock-price/TCS");
        assert_eq!(
            frame.encode(),
            "SUBSCRIBE\nid:sub-0\ndestination:/topic/stock-price/TCS\n\n\0"
        );
    }

    #[test]
    fn test_encode_send_adds_content_length() {
        let frame = Frame::send("/app/stock-price/TCS", r#"{"symbol":"TCS"}"#);
        assert_eq!(
            frame.encode(),
            "SEND\ndestination:/app/stock-price/TCS\ncontent-type:application/json\ncontent-length:16\n\n{\"symbol\":\"TCS\"}\0"
        );
    }

    #[test]
    fn test_encode_connect_is_not_escaped() {
        let hb = HeartBeat::new(Duration::from_secs(4), Duration::from_secs(4));
        let encoded = Frame::connect("localhost:8080", hb).encode();
        assert_eq!(
            encoded,
            "CONNECT\naccept-version:1.2,1.1,1.0\nhost:localhost:8080\nheart-beat:4000,4000\n\n\0"
        );
    }

    #[test]
    fn test_header_escaping_round_trip() {
        let frame = Frame::new(Command::Send).header("note", "a:b\nc\\d");
        let encoded = frame.encode();
        assert!(encoded.contains("note:a\\cb\\nc\\\\d\n"));

        let mut parser = FrameParser::new();
        let parsed = frames(parser.push(encoded.as_bytes()));
        assert_eq!(parsed, vec![frame]);
    }

    #[test]
    fn test_parse_message_frame() {
        let raw = "MESSAGE\ndestination:/topic/stock-price/TCS\nsubscription:sub-0\nmessage-id:7\n\n{\"symbol\":\"TCS\"}\0";
        let mut parser = FrameParser::new();
        let parsed = frames(parser.push(raw.as_bytes()));

        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].command, Command::Message);
        assert_eq!(parsed[0].destination(), Some("/topic/stock-price/TCS"));
        assert_eq!(parsed[0].get("subscription"), Some("sub-0"));
        assert_eq!(parsed[0].body, br#"{"symbol":"TCS"}"#.to_vec());
        assert_eq!(parser.buffered(), 0);
    }

    #[test]
    fn test_parse_heartbeats_and_crlf() {
        let mut parser = FrameParser::new();
        let units = parser
            .push(b"\n\r\nCONNECTED\r\nversion:1.2\r\nheart-beat:0,0\r\n\r\n\0\n")
            .units;

        assert_eq!(units[0], Inbound::Heartbeat);
        assert_eq!(units[1], Inbound::Heartbeat);
        match &units[2] {
            Inbound::Frame(frame) => {
                assert_eq!(frame.command, Command::Connected);
                assert_eq!(frame.get("heart-beat"), Some("0,0"));
            }
            other => panic!("expected frame, got {:?}", other),
        }
        assert_eq!(units[3], Inbound::Heartbeat);
    }

    #[test]
    fn test_parse_frame_split_across_messages() {
        let mut parser = FrameParser::new();
        assert!(frames(parser.push(b"MESSAGE\ndestination:a/b\n")).is_empty());
        assert!(frames(parser.push(b"\n{\"x\":")).is_empty());
        let parsed = frames(parser.push(b"1}\0"));

        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].body, b"{\"x\":1}".to_vec());
    }

    #[test]
    fn test_parse_multiple_frames_in_one_message() {
        let raw = "RECEIPT\nreceipt-id:1\n\n\0MESSAGE\ndestination:a/b\n\n{}\0";
        let mut parser = FrameParser::new();
        let parsed = frames(parser.push(raw.as_bytes()));

        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].command, Command::Receipt);
        assert_eq!(parsed[1].command, Command::Message);
    }

    #[test]
    fn test_parse_content_length_allows_nul_in_body() {
        let mut raw = b"MESSAGE\ndestination:a/b\ncontent-length:3\n\n".to_vec();
        raw.extend_from_slice(b"a\0b\0");

        let mut parser = FrameParser::new();
        let parsed = frames(parser.push(&raw));
        assert_eq!(parsed[0].body, b"a\0b".to_vec());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let mut parser = FrameParser::new();
        let parsed = parser.push(b"HELLO\n\n\0");
        assert!(parsed.units.is_empty());
        assert!(matches!(parsed.errors[..], [RealtimeError::MalformedFrame(_)]));
        assert_eq!(parser.buffered(), 0);

        let parsed = parser.push(b"MESSAGE\nno-colon\n\n\0");
        assert!(matches!(parsed.errors[..], [RealtimeError::MalformedFrame(_)]));

        let parsed = parser.push(b"MESSAGE\nbad:esc\\qape\n\n\0");
        assert!(matches!(parsed.errors[..], [RealtimeError::MalformedFrame(_)]));

        // parser recovers on the next message
        let parsed = frames(parser.push(b"RECEIPT\nreceipt-id:9\n\n\0"));
        assert_eq!(parsed.len(), 1);
    }

    #[test]
    fn test_parse_rejects_oversized_content_length() {
        let mut parser = FrameParser::new();
        let raw = format!(
            "MESSAGE\ndestination:a/b\ncontent-length:{}\n\n{{}}\0",
            usize::MAX
        );
        let parsed = parser.push(raw.as_bytes());
        assert!(parsed.units.is_empty());
        assert!(matches!(parsed.errors[..], [RealtimeError::MalformedFrame(_)]));
        assert_eq!(parser.buffered(), 0);

        let raw = format!(
            "MESSAGE\ndestination:a/b\ncontent-length:{}\n\n{{}}\0",
            MAX_BUFFERED_BYTES + 1
        );
        assert_eq!(parser.push(raw.as_bytes()).errors.len(), 1);
        assert_eq!(parser.buffered(), 0);
    }

    #[test]
    fn test_bad_frame_keeps_its_neighbours() {
        let raw = "MESSAGE\ndestination:a/b\n\n{\"p\":1}\0BOGUS\n\n\0MESSAGE\ndestination:a/b\n\n{\"p\":2}\0";
        let mut parser = FrameParser::new();
        let parsed = parser.push(raw.as_bytes());

        assert_eq!(parsed.errors.len(), 1);
        let bodies: Vec<Vec<u8>> = parsed
            .units
            .into_iter()
            .filter_map(|u| match u {
                Inbound::Frame(f) => Some(f.body),
                Inbound::Heartbeat => None,
            })
            .collect();
        assert_eq!(bodies, vec![br#"{"p":1}"#.to_vec(), br#"{"p":2}"#.to_vec()]);
        assert_eq!(parser.buffered(), 0);
    }

    #[test]
    fn test_encode_counts_written_body_bytes() {
        let frame = Frame::send("a/b", vec![0xff, b'a']);
        let encoded = frame.encode();
        // U+FFFD is three bytes
        assert!(encoded.contains("content-length:4\n"));

        let parsed = frames(FrameParser::new().push(encoded.as_bytes()));
        assert_eq!(parsed[0].body, "\u{FFFD}a".as_bytes().to_vec());
    }
}
