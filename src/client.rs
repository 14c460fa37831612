//! Blocking protocol client
//!
//! Speaks the line protocol over a plain [`TcpStream`]: writes one request
//! line, reads the status line and then exactly the body the header
//! announces.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::decoder::Decoder;
use crate::error::{ProtocolError, Result};
use crate::matrix::DataMatrix;
use crate::protocol::{Request, ResponseHeader, KEY_BYTES, KEY_LINES, KEY_TYPE};

/// One decoded reply
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Status line
    pub header: ResponseHeader,
    /// Text body lines
    pub lines: Vec<String>,
    /// Decoded binary body
    pub matrices: Vec<DataMatrix>,
}

impl Reply {
    /// Check for success
    pub fn is_ok(&self) -> bool {
        self.header.is_ok()
    }

    /// Error message of an `error:` reply
    pub fn error_message(&self) -> Option<&str> {
        match &self.header {
            ResponseHeader::Error(message) => Some(message),
            ResponseHeader::Ok(_) => None,
        }
    }

    /// Header parameter
    pub fn param(&self, key: &str) -> Option<&str> {
        self.header.param(key)
    }
}

/// Connection to a VDX server
#[derive(Debug)]
pub struct Client {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    decoder: Decoder,
}

impl Client {
    /// Connect to a server
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        let writer = stream.try_clone()?;
        Ok(Self {
            reader: BufReader::new(stream),
            writer,
            decoder: Decoder::new(),
        })
    }

    /// Set read and write timeouts
    pub fn set_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.writer.set_read_timeout(timeout)?;
        self.writer.set_write_timeout(timeout)?;
        Ok(())
    }

    /// Send a request and read the full reply
    pub fn send(&mut self, request: &Request) -> Result<Reply> {
        self.send_line(&request.to_line())
    }

    /// Send a raw line (a newline is appended if missing)
    pub fn send_line(&mut self, line: &str) -> Result<Reply> {
        self.writer.write_all(line.as_bytes())?;
        if !line.ends_with('\n') {
            self.writer.write_all(b"\n")?;
        }
        self.writer.flush()?;
        self.read_reply()
    }

    /// Read one reply
    pub fn read_reply(&mut self) -> Result<Reply> {
        let status = self.read_line()?;
        let header = ResponseHeader::parse(&status)?;
        let mut reply = Reply {
            header,
            lines: Vec::new(),
            matrices: Vec::new(),
        };

        let body_type = reply.param(KEY_TYPE).map(str::to_string);
        match body_type.as_deref() {
            Some("text") => {
                let count = count_param(&reply.header, KEY_LINES)?;
                for _ in 0..count {
                    let line = self.read_line()?;
                    reply.lines.push(line.trim_end_matches(['\r', '\n']).to_string());
                }
            }
            Some("binary") => {
                let len = count_param(&reply.header, KEY_BYTES)?;
                // body length is bounded like the decompressed output
                if len > self.decoder.max_payload() {
                    return Err(ProtocolError::MalformedHeader(reply.header.to_line()).into());
                }
                let mut payload = vec![0u8; len];
                self.reader.read_exact(&mut payload)?;
                let matrices = self.decoder.decode_payload(&payload)?;
                let columns = reply.param("columns").map(str::to_string);
                reply.matrices = name_columns(matrices, columns.as_deref());
            }
            _ => {}
        }
        Ok(reply)
    }

    fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed by server",
            )
            .into());
        }
        Ok(line)
    }

    /// Server version string
    pub fn version(&mut self) -> Result<Reply> {
        self.send(&Request::new("version"))
    }

    /// Source menu
    pub fn menu(&mut self) -> Result<Reply> {
        self.send(&Request::new("menu"))
    }

    /// Run a `getdata` request given as `(key, value)` pairs
    pub fn get_data(&mut self, params: &[(&str, &str)]) -> Result<Reply> {
        let request = params
            .iter()
            .fold(Request::new("getdata"), |req, (k, v)| req.with_param(*k, v));
        self.send(&request)
    }
}

fn count_param(header: &ResponseHeader, key: &'static str) -> Result<usize> {
    let raw = header
        .param(key)
        .ok_or_else(|| ProtocolError::MalformedHeader(header.to_line()))?;
    raw.parse()
        .map_err(|_| ProtocolError::MalformedHeader(header.to_line()).into())
}

/// Apply the announced column names where the widths agree
fn name_columns(matrices: Vec<DataMatrix>, columns: Option<&str>) -> Vec<DataMatrix> {
    let Some(columns) = columns.filter(|c| !c.is_empty()) else {
        return matrices;
    };
    let names: Vec<&str> = columns.split(',').collect();
    matrices
        .into_iter()
        .map(|m| {
            if m.cols() == names.len() {
                m.clone().with_column_names(names.as_slice()).unwrap_or(m)
            } else {
                m
            }
        })
        .collect()
}
