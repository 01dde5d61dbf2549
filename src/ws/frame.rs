//! STOMP 1.2 frame model and text codec.
//!
//! One frame travels per WebSocket text message:
//!
//! ```text
//! COMMAND
//! header1:value1
//! header2:value2
//!
//! body^@
//! ```
//!
//! A message made only of end-of-line bytes is a heartbeat. Header values
//! are escaped (`\\`, `\n`, `\r`, `\c`) on every frame except CONNECT and
//! CONNECTED.

use std::fmt;

use crate::error::SessionError;

/// Frame commands the client sends or understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Client → broker: open the session.
    Connect,
    /// Broker → client: session accepted.
    Connected,
    /// Client → broker: publish to a destination.
    Send,
    /// Client → broker: register interest in a destination.
    Subscribe,
    /// Client → broker: drop a registration.
    Unsubscribe,
    /// Client → broker: graceful close.
    Disconnect,
    /// Broker → client: a message for a subscription.
    Message,
    /// Broker → client: acknowledgement of a `receipt` header.
    Receipt,
    /// Broker → client: protocol or authorization error.
    Error,
}

impl Command {
    /// Returns the wire name of the command.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Disconnect => "DISCONNECT",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    /// CONNECT and CONNECTED headers are never escaped.
    const fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Command {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CONNECT" | "STOMP" => Ok(Self::Connect),
            "CONNECTED" => Ok(Self::Connected),
            "SEND" => Ok(Self::Send),
            "SUBSCRIBE" => Ok(Self::Subscribe),
            "UNSUBSCRIBE" => Ok(Self::Unsubscribe),
            "DISCONNECT" => Ok(Self::Disconnect),
            "MESSAGE" => Ok(Self::Message),
            "RECEIPT" => Ok(Self::Receipt),
            "ERROR" => Ok(Self::Error),
            other => Err(SessionError::MalformedFrame(format!(
                "unknown command `{other}`"
            ))),
        }
    }
}

/// A single STOMP frame with a UTF-8 body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame command.
    pub command: Command,
    /// Headers in wire order. Repeated keys are kept; the first one wins
    /// on lookup.
    pub headers: Vec<(String, String)>,
    /// Frame body (UTF-8 JSON for application payloads).
    pub body: String,
}

impl Frame {
    /// Creates a frame with no headers and an empty body.
    #[must_use]
    pub const fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// Appends a header.
    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Returns the first value of the header `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Serializes the frame to its wire text, NUL terminator included.
    ///
    /// A `content-length` header is added for non-empty bodies unless one
    /// is already present.
    #[must_use]
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (key, value) in &self.headers {
            push_header_part(&mut out, key, escape);
            out.push(':');
            push_header_part(&mut out, value, escape);
            out.push('\n');
        }
        if !self.body.is_empty() && self.get("content-length").is_none() {
            out.push_str("content-length:");
            out.push_str(&self.body.len().to_string());
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Parses one frame from wire text.
    ///
    /// Returns `Ok(None)` for a heartbeat (only end-of-line bytes).
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MalformedFrame`] on an unknown command, a
    /// header line without `:`, an invalid escape sequence, a missing
    /// header terminator, or a `content-length` exceeding the body.
    pub fn decode(text: &str) -> Result<Option<Self>, SessionError> {
        let text = text.trim_start_matches(['\r', '\n']);
        if text.is_empty() {
            return Ok(None);
        }

        let mut head = Vec::new();
        let mut body_start = None;
        let mut offset = 0;
        for line in text.split_inclusive('\n') {
            offset += line.len();
            let line = line.trim_end_matches('\n').trim_end_matches('\r');
            if line.is_empty() {
                body_start = Some(offset);
                break;
            }
            head.push(line);
        }
        let body_start = body_start
            .ok_or_else(|| SessionError::MalformedFrame("missing blank line".to_string()))?;

        let mut lines = head.into_iter();
        let command: Command = lines
            .next()
            .ok_or_else(|| SessionError::MalformedFrame("missing command".to_string()))?
            .parse()?;

        let unescape = command.escapes_headers();
        let mut headers = Vec::new();
        for line in lines {
            let (key, value) = line.split_once(':').ok_or_else(|| {
                SessionError::MalformedFrame(format!("header without separator: `{line}`"))
            })?;
            if unescape {
                headers.push((unescape_header(key)?, unescape_header(value)?));
            } else {
                headers.push((key.to_string(), value.to_string()));
            }
        }

        let rest = text.get(body_start..).unwrap_or_default();
        let frame = Self {
            command,
            headers,
            body: String::new(),
        };
        let body = match frame.get("content-length").map(str::parse::<usize>) {
            Some(Ok(len)) => rest.get(..len).ok_or_else(|| {
                SessionError::MalformedFrame(format!("content-length {len} exceeds body"))
            })?,
            _ => rest.split('\0').next().unwrap_or_default(),
        };

        Ok(Some(Self {
            body: body.to_string(),
            ..frame
        }))
    }
}

fn push_header_part(out: &mut String, raw: &str, escape: bool) {
    if !escape {
        out.push_str(raw);
        return;
    }
    for ch in raw.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
}

fn unescape_header(raw: &str) -> Result<String, SessionError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => {
                return Err(SessionError::MalformedFrame(format!(
                    "invalid header escape `\\{}`",
                    other.map(String::from).unwrap_or_default()
                )));
            }
        }
    }
    Ok(out)
}
