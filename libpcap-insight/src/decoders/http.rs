//! HTTP/1.x request and response heads
//!
//! Only what fits in a single segment is decoded. Anything that does not follow
//! the request-line or status-line grammar is left undecoded.

use super::{ApplicationDecoder, DecodeResult, L4Info};
use crate::layers::ApplicationLayer;
use serde::Serialize;

const METHODS: &[&str] = &[
    "GET", "POST", "PUT", "DELETE", "HEAD", "OPTIONS", "PATCH", "CONNECT", "TRACE",
];

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum HttpStartLine {
    #[serde(rename_all = "camelCase")]
    Request {
        method: String,
        uri: String,
        version: String,
    },
    #[serde(rename_all = "camelCase")]
    Response {
        version: String,
        status_code: u16,
        reason: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HttpHeader {
    pub name: String,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpLayer {
    #[serde(flatten)]
    pub start_line: HttpStartLine,
    pub headers: Vec<HttpHeader>,
    /// Lossy UTF-8 rendering of the first body bytes
    pub body_preview: String,
    /// Body bytes present in this segment
    pub body_length: usize,
}

impl HttpLayer {
    pub fn is_request(&self) -> bool {
        matches!(self.start_line, HttpStartLine::Request { .. })
    }

    pub fn status_code(&self) -> Option<u16> {
        match self.start_line {
            HttpStartLine::Response { status_code, .. } => Some(status_code),
            _ => None,
        }
    }

    /// First header with this name (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    pub fn host(&self) -> Option<&str> {
        self.header("Host")
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
    }

    /// Request line or status line, as it appeared on the wire
    pub fn summary(&self) -> String {
        match self.start_line {
            HttpStartLine::Request {
                ref method,
                ref uri,
                ref version,
            } => format!("{} {} {}", method, uri, version),
            HttpStartLine::Response {
                ref version,
                status_code,
                ref reason,
            } => {
                if reason.is_empty() {
                    format!("{} {}", version, status_code)
                } else {
                    format!("{} {} {}", version, status_code, reason)
                }
            }
        }
    }
}

pub struct HttpDecoder {
    body_preview: usize,
}

impl HttpDecoder {
    pub fn new(body_preview: usize) -> Self {
        HttpDecoder { body_preview }
    }
}

impl ApplicationDecoder for HttpDecoder {
    fn name(&self) -> &'static str {
        "http"
    }

    fn probe(&self, _l4: &L4Info, payload: &[u8]) -> bool {
        payload.starts_with(b"HTTP/")
            || METHODS.iter().any(|m| {
                payload.len() > m.len()
                    && payload.starts_with(m.as_bytes())
                    && payload[m.len()] == b' '
            })
    }

    fn decode(&self, _l4: &L4Info, payload: &[u8]) -> DecodeResult {
        Ok(parse_http(payload, self.body_preview).map(ApplicationLayer::Http))
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Parse an HTTP message head and the body bytes following it
pub fn parse_http(payload: &[u8], body_preview: usize) -> Option<HttpLayer> {
    // a message head needs at least one complete line
    find(payload, b"\n")?;
    let (head_end, body_start) = match find(payload, b"\r\n\r\n") {
        Some(pos) => (pos, pos + 4),
        None => match find(payload, b"\n\n") {
            Some(pos) => (pos, pos + 2),
            None => (payload.len(), payload.len()),
        },
    };
    let head = std::str::from_utf8(&payload[..head_end]).ok()?;
    let mut lines = head.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));
    let start_line = parse_start_line(lines.next()?)?;

    let mut headers: Vec<HttpHeader> = Vec::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            // obsolete line folding
            let last = headers.last_mut()?;
            last.value.push(' ');
            last.value.push_str(line.trim());
            continue;
        }
        let (name, value) = line.split_once(':')?;
        if name.is_empty() || name.contains(|c: char| c.is_ascii_whitespace()) {
            return None;
        }
        headers.push(HttpHeader {
            name: name.to_string(),
            value: value.trim().to_string(),
        });
    }

    let body = &payload[body_start..];
    let preview = &body[..body.len().min(body_preview)];
    Some(HttpLayer {
        start_line,
        headers,
        body_preview: String::from_utf8_lossy(preview).into_owned(),
        body_length: body.len(),
    })
}

fn is_http_version(s: &str) -> bool {
    match s.strip_prefix("HTTP/") {
        Some(v) => {
            !v.is_empty() && v.chars().all(|c| c.is_ascii_digit() || c == '.') && !v.starts_with('.')
        }
        None => false,
    }
}

fn parse_start_line(line: &str) -> Option<HttpStartLine> {
    if line.starts_with("HTTP/") {
        let (version, rest) = line.split_once(' ')?;
        if !is_http_version(version) {
            return None;
        }
        let code = rest.get(..3)?;
        if !code.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let reason = &rest[3..];
        if !reason.is_empty() && !reason.starts_with(' ') {
            return None;
        }
        return Some(HttpStartLine::Response {
            version: version.to_string(),
            status_code: code.parse().ok()?,
            reason: reason.trim().to_string(),
        });
    }
    let mut parts = line.splitn(3, ' ');
    let method = parts.next()?;
    let uri = parts.next()?;
    let version = parts.next()?;
    if !METHODS.contains(&method) || uri.is_empty() || !is_http_version(version) {
        return None;
    }
    Some(HttpStartLine::Request {
        method: method.to_string(),
        uri: uri.to_string(),
        version: version.to_string(),
    })
}
