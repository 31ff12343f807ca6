//! Output filter stack for [`HttpConnection`](super::device::HttpConnection).
//!
//! Filters buffer or transform response body writes before they reach the
//! socket. They stack: each write goes to the top filter, and collapsing
//! the stack feeds each filter's output to the one below it.

use std::io;

/// A stage in the output filter stack.
pub trait OutputFilter: Send {
    fn name(&self) -> &str;

    /// Accept body bytes. Returns the number of bytes consumed.
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Total size of the final output, when knowable without flushing.
    /// Filters that add framing of their own return `None`.
    fn buffered_size(&self) -> Option<usize>;

    /// Drain the transformed output, leaving the filter empty.
    fn take_output(&mut self) -> Vec<u8>;
}

/// Buffers everything written to it, unchanged. Used to defer a response
/// body until its total length is known.
#[derive(Debug, Default)]
pub struct BufferFilter {
    buf: Vec<u8>,
}

impl BufferFilter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutputFilter for BufferFilter {
    fn name(&self) -> &str {
        "buffer"
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn buffered_size(&self) -> Option<usize> {
        Some(self.buf.len())
    }

    fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}

/// Wraps the buffered body as one entity of a multipart stream: boundary
/// line, entity header with a Content-Length, blank line, body, CRLF.
#[derive(Debug)]
pub struct MultipartEncodeFilter {
    boundary: String,
    uri: Option<String>,
    buf: Vec<u8>,
}

impl MultipartEncodeFilter {
    pub fn new(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            uri: None,
            buf: Vec::new(),
        }
    }

    /// Tag the entity with an X-URI field naming its source.
    pub fn with_uri(boundary: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            uri: Some(uri.into()),
            buf: Vec::new(),
        }
    }
}

impl OutputFilter for MultipartEncodeFilter {
    fn name(&self) -> &str {
        "multipart-encode"
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn buffered_size(&self) -> Option<usize> {
        // Framing is added on output, so the final size is not the
        // buffered size.
        None
    }

    fn take_output(&mut self) -> Vec<u8> {
        let body = std::mem::take(&mut self.buf);
        let mut head = format!("--{}\r\n", self.boundary);
        if let Some(uri) = &self.uri {
            head.push_str(&format!("X-URI: {uri}\r\n"));
        }
        head.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
        let mut out = head.into_bytes();
        out.extend_from_slice(&body);
        out.extend_from_slice(b"\r\n");
        out
    }
}
