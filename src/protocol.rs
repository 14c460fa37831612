//! Protocol definitions for VDX
//!
//! This module defines the text framing shared by server and client:
//! - Request lines `command: k1=v1;k2=v2`
//! - Response headers `ok: k=v;...` and `error: message`
//! - Response bodies (text lines or a compressed binary payload)

use std::collections::BTreeMap;
use std::fmt;

use crate::error::ProtocolError;

/// Protocol revision announced by `version`
pub const PROTOCOL_VERSION: u32 = 1;

/// Header key naming the body type
pub const KEY_TYPE: &str = "type";
/// Header key with the binary body length
pub const KEY_BYTES: &str = "bytes";
/// Header key with the text body line count
pub const KEY_LINES: &str = "lines";

/// Parameter map of a request or an `ok` header
pub type Params = BTreeMap<String, String>;

/// Parse `k1=v1;k2=v2`; empty segments are skipped
pub fn parse_params(text: &str) -> Result<Params, ProtocolError> {
    let mut params = Params::new();
    for pair in text.split(';') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| ProtocolError::MalformedParameter(pair.to_string()))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(ProtocolError::MalformedParameter(pair.to_string()));
        }
        params.insert(key.to_string(), value.trim().to_string());
    }
    Ok(params)
}

/// Format a parameter map as `k1=v1;k2=v2`
pub fn format_params(params: &Params) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, sanitize(v)))
        .collect::<Vec<_>>()
        .join(";")
}

/// Values may not break the framing
fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            ';' | '\n' | '\r' => ' ',
            c => c,
        })
        .collect()
}

/// A parsed command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Command name, lower case
    pub command: String,
    /// Parameters
    pub params: Params,
}

impl Request {
    /// Create a request without parameters
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            params: Params::new(),
        }
    }

    /// Add a parameter
    pub fn with_param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.insert(key.into(), value.to_string());
        self
    }

    /// Parse one command line (without its terminator)
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim_end_matches(['\r', '\n']).trim();
        if line.is_empty() {
            return Err(ProtocolError::EmptyCommand);
        }
        let (command, rest) = match line.split_once(':') {
            Some((command, rest)) => (command.trim(), rest),
            None => (line, ""),
        };
        if command.is_empty() {
            return Err(ProtocolError::EmptyCommand);
        }
        Ok(Self {
            command: command.to_ascii_lowercase(),
            params: parse_params(rest)?,
        })
    }

    /// Wire form, newline-terminated
    pub fn to_line(&self) -> String {
        if self.params.is_empty() {
            format!("{}\n", self.command)
        } else {
            format!("{}: {}\n", self.command, format_params(&self.params))
        }
    }

    /// Optional parameter
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Required parameter
    pub fn require(&self, key: &'static str) -> Result<&str, ProtocolError> {
        self.get(key).ok_or(ProtocolError::MissingParameter(key))
    }
}

/// Status line of a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseHeader {
    /// Success with parameters
    Ok(Params),
    /// Failure with a message
    Error(String),
}

impl ResponseHeader {
    /// Wire form, newline-terminated
    pub fn to_line(&self) -> String {
        match self {
            ResponseHeader::Ok(params) if params.is_empty() => "ok\n".to_string(),
            ResponseHeader::Ok(params) => format!("ok: {}\n", format_params(params)),
            ResponseHeader::Error(message) => format!("error: {}\n", sanitize_message(message)),
        }
    }

    /// Parse a status line (client side)
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let line = line.trim_end_matches(['\r', '\n']);
        let malformed = || ProtocolError::MalformedHeader(line.to_string());
        let (status, rest) = line.split_once(':').unwrap_or((line, ""));
        match status.trim() {
            "ok" => Ok(ResponseHeader::Ok(parse_params(rest).map_err(|_| malformed())?)),
            "error" => Ok(ResponseHeader::Error(rest.trim().to_string())),
            _ => Err(malformed()),
        }
    }

    /// Check for success
    pub fn is_ok(&self) -> bool {
        matches!(self, ResponseHeader::Ok(_))
    }

    /// Header parameter, `None` on errors
    pub fn param(&self, key: &str) -> Option<&str> {
        match self {
            ResponseHeader::Ok(params) => params.get(key).map(String::as_str),
            ResponseHeader::Error(_) => None,
        }
    }
}

fn sanitize_message(message: &str) -> String {
    message.replace(['\n', '\r'], " ")
}

/// Body following a header
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Body {
    /// Header only
    #[default]
    None,
    /// `lines=N` text lines
    Lines(Vec<String>),
    /// `bytes=N` compressed bytes
    Binary(Vec<u8>),
}

/// A complete reply, written to the socket in one piece
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Status line
    pub header: ResponseHeader,
    /// Body, consistent with the header
    pub body: Body,
}

impl Response {
    /// `ok` without a body
    pub fn ok(params: Params) -> Self {
        Self {
            header: ResponseHeader::Ok(params),
            body: Body::None,
        }
    }

    /// `error: message`
    pub fn error(message: impl fmt::Display) -> Self {
        Self {
            header: ResponseHeader::Error(message.to_string()),
            body: Body::None,
        }
    }

    /// `ok: type=text;lines=N` followed by the lines
    pub fn text(lines: Vec<String>) -> Self {
        let mut params = Params::new();
        params.insert(KEY_TYPE.to_string(), "text".to_string());
        params.insert(KEY_LINES.to_string(), lines.len().to_string());
        // one line per entry, embedded newlines would desync the count
        let lines = lines.iter().map(|l| sanitize_message(l)).collect();
        Self {
            header: ResponseHeader::Ok(params),
            body: Body::Lines(lines),
        }
    }

    /// `ok: type=binary;bytes=N;...` followed by the payload
    pub fn binary(mut params: Params, payload: Vec<u8>) -> Self {
        params.insert(KEY_TYPE.to_string(), "binary".to_string());
        params.insert(KEY_BYTES.to_string(), payload.len().to_string());
        Self {
            header: ResponseHeader::Ok(params),
            body: Body::Binary(payload),
        }
    }

    /// Check for success
    pub fn is_ok(&self) -> bool {
        self.header.is_ok()
    }

    /// Serialize header and body
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.header.to_line().into_bytes();
        match &self.body {
            Body::None => {}
            Body::Lines(lines) => {
                for line in lines {
                    out.extend_from_slice(line.as_bytes());
                    out.push(b'\n');
                }
            }
            Body::Binary(payload) => out.extend_from_slice(payload),
        }
        out
    }

    /// Size of the body in bytes
    pub fn body_len(&self) -> usize {
        match &self.body {
            Body::None => 0,
            Body::Lines(lines) => lines.iter().map(|l| l.len() + 1).sum(),
            Body::Binary(payload) => payload.len(),
        }
    }
}
