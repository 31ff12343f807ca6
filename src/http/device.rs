//! Incremental HTTP/1.1 connection device.
//!
//! [`HttpConnection`] owns one socket and speaks one side of HTTP over it,
//! one request/response cycle at a time. Headers are read incrementally
//! against configured limits, body reads are bounded by Content-Length,
//! and response writes pass through an optional [`OutputFilter`] stack so
//! a handler can produce a body before its length is known.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use http::Method;
use smallvec::SmallVec;
use tracing::trace;

use crate::config::HttpConfig;
use crate::error::FrameError;
use crate::http::filter::OutputFilter;
use crate::http::header::{RequestHeader, ResponseHeader};
use crate::http::multipart::BufferedRead;
use crate::http::variant::Variant;
use crate::socket::{ProgressController, SocketHandle};

const FILL_CHUNK: usize = 4096;

/// Which side of the protocol this connection speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    Client,
    Server,
}

type ItemList = SmallVec<[(String, String); 8]>;

pub struct HttpConnection {
    socket: SocketHandle,
    mode: ConnectionMode,
    limits: HttpConfig,
    controller: Arc<dyn ProgressController>,
    read_buf: VecDeque<u8>,

    pub request: RequestHeader,
    pub response: ResponseHeader,

    header_read: bool,
    header_sent: bool,
    body_read_started: bool,
    finished: bool,
    close_after: bool,

    header_length: usize,
    /// Body length from Content-Length; -1 when unknown (stream to EOF).
    body_length: i64,
    body_bytes_read: u64,
    bytes_written: u64,
    /// Bytes read since the last [`restart`](Self::restart). Zero on a
    /// header error means the peer went away between requests, which is
    /// not worth logging.
    cycle_bytes_read: u64,

    query_items: Option<ItemList>,
    form_items: Option<ItemList>,

    filters: Vec<Box<dyn OutputFilter>>,
}

impl HttpConnection {
    /// A server-side connection: reads requests, writes responses.
    pub fn server(socket: SocketHandle, limits: HttpConfig) -> Self {
        Self::new(socket, ConnectionMode::Server, limits)
    }

    /// A client-side connection: writes requests, reads responses.
    pub fn client(socket: SocketHandle, limits: HttpConfig) -> Self {
        Self::new(socket, ConnectionMode::Client, limits)
    }

    fn new(socket: SocketHandle, mode: ConnectionMode, limits: HttpConfig) -> Self {
        Self {
            socket,
            mode,
            limits,
            controller: Arc::new(crate::socket::FreeRun),
            read_buf: VecDeque::new(),
            request: RequestHeader::default(),
            response: ResponseHeader::default(),
            header_read: false,
            header_sent: false,
            body_read_started: false,
            finished: false,
            close_after: false,
            header_length: 0,
            body_length: -1,
            body_bytes_read: 0,
            bytes_written: 0,
            cycle_bytes_read: 0,
            query_items: None,
            form_items: None,
            filters: Vec::new(),
        }
    }

    pub fn set_controller(&mut self, controller: Arc<dyn ProgressController>) {
        self.controller = controller;
    }

    /// Override how long a blocking read may wait. Long-lived streams use
    /// this to outwait quiet periods that a request cycle would not.
    pub fn set_read_timeout(&mut self, timeout: Duration) {
        self.limits.read_timeout = timeout;
    }

    pub fn socket(&self) -> &SocketHandle {
        &self.socket
    }

    pub fn mode(&self) -> ConnectionMode {
        self.mode
    }

    pub fn header_read(&self) -> bool {
        self.header_read
    }

    pub fn header_sent(&self) -> bool {
        self.header_sent
    }

    pub fn cycle_bytes_read(&self) -> u64 {
        self.cycle_bytes_read
    }

    /// Force the connection closed after the current cycle completes.
    pub fn close_after(&mut self) {
        self.close_after = true;
    }

    /// Whether another request/response cycle may follow this one.
    pub fn persistent(&self) -> bool {
        if self.close_after || !self.socket.is_writable() {
            return false;
        }
        let wants_close = |v: Option<&str>| {
            v.map(|c| c.eq_ignore_ascii_case("close")).unwrap_or(false)
        };
        !wants_close(self.request.fields.get("connection"))
            && !wants_close(self.response.fields.get("connection"))
    }

    // ---- inbound ---------------------------------------------------------

    /// Read and parse the incoming header for this cycle. Idempotent.
    pub fn read_header(&mut self) -> Result<(), FrameError> {
        if self.header_read {
            return Ok(());
        }
        let mut raw = String::new();
        loop {
            let line = self.read_raw_line()?;
            self.header_length += line.len() + 2;
            if self.header_length > self.limits.header_size_limit {
                return Err(FrameError::HeaderTooLarge);
            }
            if line.is_empty() {
                break;
            }
            raw.push_str(&line);
            raw.push_str("\r\n");
        }
        let fields = match self.mode {
            ConnectionMode::Server => {
                self.request = RequestHeader::parse(&raw)?;
                &self.request.fields
            }
            ConnectionMode::Client => {
                self.response = ResponseHeader::parse(&raw)?;
                &self.response.fields
            }
        };
        self.body_length = match fields.content_length() {
            Some(n) => n as i64,
            // A request without a Content-Length carries no body; a
            // response without one streams until the peer closes.
            None => match self.mode {
                ConnectionMode::Server => 0,
                ConnectionMode::Client => -1,
            },
        };
        if self.body_length > self.limits.message_size_limit as i64 {
            return Err(FrameError::MessageTooLarge);
        }
        self.header_read = true;
        trace!(
            bytes = self.header_length,
            body = self.body_length,
            "header read"
        );
        Ok(())
    }

    /// Read one CRLF-terminated line of the raw stream, without its
    /// terminator. Used for header parsing and stream preambles.
    fn read_raw_line(&mut self) -> Result<String, FrameError> {
        loop {
            if let Some(pos) = self.read_buf.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = self.read_buf.drain(..=pos).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return String::from_utf8(line)
                    .map_err(|_| FrameError::InvalidFormat("non-UTF-8 header line".into()));
            }
            if self.read_buf.len() > self.limits.header_size_limit {
                return Err(FrameError::HeaderTooLarge);
            }
            self.fill_from_socket()?;
        }
    }

    fn fill_from_socket(&mut self) -> Result<(), FrameError> {
        let mut chunk = [0u8; FILL_CHUNK];
        let n = self
            .socket
            .read_waited(&mut chunk, self.limits.read_timeout, self.controller.as_ref())?;
        if n == 0 {
            return Err(FrameError::UnexpectedEof);
        }
        self.cycle_bytes_read += n as u64;
        self.read_buf.extend(&chunk[..n]);
        Ok(())
    }

    /// Read body bytes, bounded by the Content-Length when one was given.
    /// Returns `Ok(0)` at the end of the body.
    pub fn read_body(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.header_read {
            self.read_header().map_err(io_from_frame)?;
        }
        self.body_read_started = true;
        let remaining = if self.body_length < 0 {
            u64::MAX
        } else {
            (self.body_length as u64).saturating_sub(self.body_bytes_read)
        };
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min(remaining.min(usize::MAX as u64) as usize);
        if !self.read_buf.is_empty() {
            let n = want.min(self.read_buf.len());
            for (i, b) in self.read_buf.drain(..n).enumerate() {
                buf[i] = b;
            }
            self.body_bytes_read += n as u64;
            return Ok(n);
        }
        let n = self
            .socket
            .read_waited(&mut buf[..want], self.limits.read_timeout, self.controller.as_ref())?;
        self.cycle_bytes_read += n as u64;
        self.body_bytes_read += n as u64;
        Ok(n)
    }

    /// Push body bytes back so the next read returns them again.
    pub fn unread(&mut self, data: &[u8]) {
        for &b in data.iter().rev() {
            self.read_buf.push_front(b);
        }
        self.body_bytes_read = self.body_bytes_read.saturating_sub(data.len() as u64);
    }

    /// Read one CRLF-terminated body line, without its terminator.
    pub fn read_line(&mut self) -> io::Result<String> {
        let mut line = Vec::new();
        let mut chunk = [0u8; 256];
        loop {
            let n = self.read_body(&mut chunk)?;
            if n == 0 {
                break;
            }
            if let Some(pos) = chunk[..n].iter().position(|&b| b == b'\n') {
                line.extend_from_slice(&chunk[..pos]);
                self.unread(&chunk[pos + 1..n]);
                break;
            }
            line.extend_from_slice(&chunk[..n]);
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        String::from_utf8(line)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "non-UTF-8 line"))
    }

    /// Read and discard whatever remains of the request body, so a
    /// keep-alive connection starts the next cycle aligned.
    pub fn drain_request_body(&mut self) -> io::Result<()> {
        if !self.header_read || self.body_length < 0 {
            return Ok(());
        }
        let mut sink = [0u8; FILL_CHUNK];
        while self.read_body(&mut sink)? > 0 {}
        Ok(())
    }

    /// Read the whole body into memory, bounded by the message size limit.
    pub fn read_body_to_end(&mut self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut chunk = [0u8; FILL_CHUNK];
        loop {
            let n = self.read_body(&mut chunk)?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&chunk[..n]);
            if out.len() > self.limits.message_size_limit {
                return Err(io_from_frame(FrameError::MessageTooLarge));
            }
        }
    }

    // ---- query and form items -------------------------------------------

    fn parse_items(raw: &str) -> ItemList {
        let mut items = ItemList::new();
        for pair in raw.split('&').filter(|p| !p.is_empty()) {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            let name = urlencoding::decode(name).map(|c| c.into_owned());
            let value = urlencoding::decode(value).map(|c| c.into_owned());
            if let (Ok(name), Ok(value)) = (name, value) {
                items.push((name, value));
            }
        }
        items
    }

    fn ensure_query_items(&mut self) {
        if self.query_items.is_none() {
            let raw = self.request.query().unwrap_or("");
            self.query_items = Some(Self::parse_items(raw));
        }
    }

    /// Decode a urlencoded POST body into form items. Only possible before
    /// any body read, and only for that media type; otherwise a no-op.
    fn ensure_form_items(&mut self) -> io::Result<()> {
        if self.form_items.is_some() {
            return Ok(());
        }
        if self.mode != ConnectionMode::Server {
            self.form_items = Some(ItemList::new());
            return Ok(());
        }
        self.read_header().map_err(io_from_frame)?;
        let urlencoded = self
            .request
            .fields
            .media_type()
            .map(|t| t == "application/x-www-form-urlencoded")
            .unwrap_or(false);
        if self.request.method() != Method::POST || !urlencoded || self.body_read_started {
            self.form_items = Some(ItemList::new());
            return Ok(());
        }
        let body = self.read_body_to_end()?;
        let raw = String::from_utf8_lossy(&body).into_owned();
        self.form_items = Some(Self::parse_items(&raw));
        Ok(())
    }

    /// All query items in request order, form items appended for
    /// urlencoded POSTs.
    pub fn request_items(&mut self) -> io::Result<Vec<(String, String)>> {
        self.ensure_query_items();
        self.ensure_form_items()?;
        let mut items: Vec<(String, String)> = Vec::new();
        if let Some(q) = &self.query_items {
            items.extend(q.iter().cloned());
        }
        if let Some(f) = &self.form_items {
            items.extend(f.iter().cloned());
        }
        Ok(items)
    }

    /// The value of a named query (or form) item, decoded as a variant.
    /// A repeated name yields a list, in request order.
    pub fn query_value(&mut self, name: &str) -> io::Result<Option<Variant>> {
        let matches: Vec<Variant> = self
            .request_items()?
            .into_iter()
            .filter(|(k, _)| k == name)
            .map(|(_, v)| Variant::decode(v.as_bytes()))
            .collect();
        Ok(match matches.len() {
            0 => None,
            1 => matches.into_iter().next(),
            _ => Some(Variant::List(matches)),
        })
    }

    /// Append a variant-encoded item to the outgoing request's query
    /// string. Client side, before the header is sent.
    pub fn add_query_value(&mut self, name: &str, value: &Variant) {
        let encoded = value.encode();
        let item = format!(
            "{}={}",
            urlencoding::encode(name),
            urlencoding::encode(&String::from_utf8_lossy(&encoded))
        );
        let target = self.request.target().to_string();
        let sep = if target.contains('?') { '&' } else { '?' };
        self.request.set_target(format!("{target}{sep}{item}"));
    }

    /// Replace the outgoing request line. Client side.
    pub fn set_request(&mut self, method: Method, target: impl Into<String>) {
        self.request.set_method(method);
        self.request.set_target(target);
    }

    // ---- outbound --------------------------------------------------------

    /// Serialize and send the outgoing header. Idempotent. A server
    /// response with no Content-Length forces `Connection: close` so the
    /// peer still finds the end of the body.
    pub fn send_header(&mut self) -> io::Result<()> {
        if self.header_sent {
            return Ok(());
        }
        let wire = match self.mode {
            ConnectionMode::Server => {
                if !self.response.fields.contains("content-length")
                    && !self.response.fields.contains("connection")
                {
                    self.response.fields.set("Connection", "close");
                    self.close_after = true;
                }
                self.response.to_wire()
            }
            ConnectionMode::Client => self.request.to_wire(),
        };
        self.socket.write_all_waited(
            wire.as_bytes(),
            self.limits.write_timeout,
            self.controller.as_ref(),
        )?;
        self.header_sent = true;
        Ok(())
    }

    pub fn push_output_filter(&mut self, filter: Box<dyn OutputFilter>) {
        self.filters.push(filter);
    }

    /// Pop filters down to and including the one called `name`, forwarding
    /// each filter's buffered output to the layer below. Without a name
    /// only the top is popped. Popping the last filter before the header
    /// went out sets the Content-Length from its buffered size when known.
    pub fn end_output_filtering(&mut self, name: Option<&str>) -> io::Result<()> {
        loop {
            let Some(mut top) = self.filters.pop() else {
                return Ok(());
            };
            if self.filters.is_empty() && !self.header_sent {
                if let Some(size) = top.buffered_size() {
                    self.set_content_length(size as u64);
                }
            }
            let done = name.map(|n| top.name() == n).unwrap_or(true);
            let output = top.take_output();
            self.write_all(&output)?;
            if done {
                return Ok(());
            }
        }
    }

    fn set_content_length(&mut self, len: u64) {
        match self.mode {
            ConnectionMode::Server => {
                self.response.fields.set("Content-Length", len.to_string())
            }
            ConnectionMode::Client => {
                self.request.fields.set("Content-Length", len.to_string())
            }
        }
    }

    /// Collapse the whole filter stack onto the wire, sending the header
    /// on the way. The connection then writes raw.
    pub fn flush_output_filters(&mut self) -> io::Result<()> {
        while !self.filters.is_empty() {
            self.end_output_filtering(None)?;
        }
        self.send_header()
    }

    /// Write body bytes through the filter stack, or raw once the stack is
    /// empty.
    pub fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if let Some(top) = self.filters.last_mut() {
            return top.write(data);
        }
        self.send_header()?;
        self.socket.write_all_waited(
            data,
            self.limits.write_timeout,
            self.controller.as_ref(),
        )?;
        self.bytes_written += data.len() as u64;
        Ok(data.len())
    }

    pub fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let mut rest = data;
        while !rest.is_empty() {
            let n = self.write(rest)?;
            rest = &rest[n..];
        }
        Ok(())
    }

    /// Send a complete body in one go, with its Content-Length.
    pub fn send_body(&mut self, body: &[u8]) -> io::Result<()> {
        if !self.header_sent && self.filters.is_empty() {
            self.set_content_length(body.len() as u64);
        }
        self.write_all(body)
    }

    /// Complete the current cycle: collapse filters, and guarantee a
    /// header with an accurate length went out even for an empty body.
    pub fn finish(&mut self) -> io::Result<()> {
        if self.finished {
            return Ok(());
        }
        while !self.filters.is_empty() {
            self.end_output_filtering(None)?;
        }
        if !self.header_sent && self.bytes_written == 0 {
            self.set_content_length(0);
        }
        self.send_header()?;
        self.finished = true;
        Ok(())
    }

    /// Reset per-cycle state for the next request on a keep-alive
    /// connection. Unconsumed input stays buffered.
    pub fn restart(&mut self) {
        self.request = RequestHeader::default();
        self.response = ResponseHeader::default();
        self.header_read = false;
        self.header_sent = false;
        self.body_read_started = false;
        self.finished = false;
        self.header_length = 0;
        self.body_length = -1;
        self.body_bytes_read = 0;
        self.bytes_written = 0;
        self.cycle_bytes_read = 0;
        self.query_items = None;
        self.form_items = None;
        self.filters.clear();
    }
}

impl BufferedRead for HttpConnection {
    fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_body(buf)
    }

    fn unread(&mut self, data: &[u8]) {
        HttpConnection::unread(self, data);
    }
}

fn io_from_frame(err: FrameError) -> io::Error {
    match err {
        FrameError::Io(e) => e,
        FrameError::UnexpectedEof => {
            io::Error::new(io::ErrorKind::UnexpectedEof, "peer closed the stream")
        }
        other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
    }
}

impl std::fmt::Debug for HttpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpConnection")
            .field("mode", &self.mode)
            .field("socket", &self.socket)
            .field("header_read", &self.header_read)
            .field("header_sent", &self.header_sent)
            .field("body_length", &self.body_length)
            .finish()
    }
}
