//! Streaming multipart MIME decoder.
//!
//! The decoder walks a multipart body one entity at a time without ever
//! buffering a whole entity. Nested multipart entities become containers
//! on a stack, so `multipart/mixed` inside `multipart/form-data` reads as
//! a flat sequence of leaf entities with [`depth`](MultipartDecoder::depth)
//! reporting the nesting.
//!
//! Entities with a Content-Length are read by count; entities without one
//! are delimited by scanning for the enclosing boundary, holding back a
//! partial-match tail between reads so a boundary split across two socket
//! reads is still found.

use std::io;

use crate::http::header::MimeHeader;

/// A readable source that can take bytes back.
///
/// Scanning for a boundary inevitably reads past the data it returns; the
/// excess is pushed back with `unread` so the next read sees it again.
pub trait BufferedRead {
    fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn unread(&mut self, data: &[u8]);
}

struct Container {
    header: MimeHeader,
    boundary: String,
}

struct Entity {
    header: MimeHeader,
    /// Bytes left to read when the entity declared a Content-Length.
    remaining: Option<u64>,
    done: bool,
}

pub struct MultipartDecoder<'a, R: BufferedRead + ?Sized> {
    input: &'a mut R,
    containers: Vec<Container>,
    current: Option<Entity>,
}

impl<'a, R: BufferedRead + ?Sized> MultipartDecoder<'a, R> {
    /// Decode a stream whose outermost boundary is already known, e.g.
    /// from the Content-Type of the enclosing HTTP message.
    pub fn new(input: &'a mut R, boundary: impl Into<String>) -> Self {
        Self {
            input,
            containers: vec![Container {
                header: MimeHeader::default(),
                boundary: boundary.into(),
            }],
            current: None,
        }
    }

    /// Current container nesting depth. 1 for a flat multipart body.
    pub fn depth(&self) -> usize {
        self.containers.len()
    }

    /// Header of a container, `level` 0 being the innermost. The outermost
    /// container's preamble collects any bytes before its first boundary.
    pub fn container_header(&self, level: usize) -> Option<&MimeHeader> {
        let idx = self.containers.len().checked_sub(level + 1)?;
        self.containers.get(idx).map(|c| &c.header)
    }

    /// Header of the entity currently being read.
    pub fn entity_header(&self) -> Option<&MimeHeader> {
        self.current.as_ref().map(|e| &e.header)
    }

    /// Advance to the next leaf entity. Skips any unread remainder of the
    /// current one, descends into nested multipart entities, and pops
    /// containers at their closing boundary. `Ok(false)` once the
    /// outermost container closes or the stream ends cleanly.
    pub fn next_entity(&mut self) -> io::Result<bool> {
        loop {
            if self.current.is_some() {
                let mut sink = [0u8; 4096];
                while self.read_data(&mut sink)? > 0 {}
                self.current = None;
            }
            let Some(container) = self.containers.last() else {
                return Ok(false);
            };
            let open = format!("--{}", container.boundary);
            let close = format!("--{}--", container.boundary);
            let Some(line) = self.read_input_line()? else {
                return Ok(false);
            };
            if line == close {
                self.containers.pop();
                if self.containers.is_empty() {
                    return Ok(false);
                }
                continue;
            }
            if line == open {
                let header = self.read_entity_header()?;
                if header.is_multipart() {
                    let boundary = header.boundary().ok_or_else(|| {
                        io::Error::new(
                            io::ErrorKind::InvalidData,
                            "nested multipart entity without a boundary",
                        )
                    })?;
                    self.containers.push(Container { header, boundary });
                    continue;
                }
                let remaining = header.content_length();
                self.current = Some(Entity {
                    header,
                    remaining,
                    done: false,
                });
                return Ok(true);
            }
            // Preamble bytes before the first boundary belong to the
            // innermost container.
            if let Some(c) = self.containers.last_mut() {
                c.header.preamble.extend_from_slice(line.as_bytes());
                c.header.preamble.push(b'\n');
            }
        }
    }

    /// Read body bytes of the current entity. `Ok(0)` once it ends.
    pub fn read_data(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let boundary = match self.containers.last() {
            Some(c) => c.boundary.clone(),
            None => return Ok(0),
        };
        let Some(entity) = self.current.as_mut() else {
            return Ok(0);
        };
        if entity.done || buf.is_empty() {
            return Ok(0);
        }
        match entity.remaining {
            Some(0) => {
                consume_crlf(self.input)?;
                entity.done = true;
                Ok(0)
            }
            Some(ref mut rem) => {
                let want = buf.len().min((*rem).min(usize::MAX as u64) as usize);
                let n = self.input.read_some(&mut buf[..want])?;
                if n == 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "stream ended inside a sized entity",
                    ));
                }
                *rem -= n as u64;
                Ok(n)
            }
            None => self.read_until_boundary(&boundary, buf),
        }
    }

    /// Scan for `\r\n--boundary`, returning the bytes before it. The
    /// boundary line itself is pushed back for [`next_entity`] to
    /// re-read; a partial match at the end of a read is held back too.
    ///
    /// [`next_entity`]: MultipartDecoder::next_entity
    fn read_until_boundary(&mut self, boundary: &str, buf: &mut [u8]) -> io::Result<usize> {
        let needle = format!("\r\n--{boundary}").into_bytes();
        let entity = match self.current.as_mut() {
            Some(e) => e,
            None => return Ok(0),
        };
        let mut tmp = vec![0u8; buf.len() + needle.len()];
        let mut filled = 0;
        while filled < needle.len() {
            let n = self.input.read_some(&mut tmp[filled..])?;
            if n == 0 {
                // Stream closed without a final boundary. Hand back what
                // we have and call the entity complete.
                entity.done = true;
                buf[..filled].copy_from_slice(&tmp[..filled]);
                return Ok(filled);
            }
            filled += n;
        }
        if let Some(pos) = find(&tmp[..filled], &needle) {
            // Push back from after the CRLF so the "--boundary" line is
            // the next line read.
            self.input.unread(&tmp[pos + 2..filled]);
            entity.done = true;
            buf[..pos].copy_from_slice(&tmp[..pos]);
            return Ok(pos);
        }
        let keep = filled - (needle.len() - 1);
        self.input.unread(&tmp[keep..filled]);
        buf[..keep].copy_from_slice(&tmp[..keep]);
        Ok(keep)
    }

    fn read_entity_header(&mut self) -> io::Result<MimeHeader> {
        let mut raw = String::new();
        loop {
            let line = self.read_input_line()?.ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "stream ended inside an entity header",
                )
            })?;
            if line.is_empty() {
                break;
            }
            raw.push_str(&line);
            raw.push_str("\r\n");
        }
        MimeHeader::parse(&raw)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
    }

    /// One CRLF-terminated line, or `None` on clean end of stream.
    fn read_input_line(&mut self) -> io::Result<Option<String>> {
        let mut line = Vec::new();
        let mut chunk = [0u8; 256];
        loop {
            let n = self.input.read_some(&mut chunk)?;
            if n == 0 {
                if line.is_empty() {
                    return Ok(None);
                }
                break;
            }
            if let Some(pos) = chunk[..n].iter().position(|&b| b == b'\n') {
                line.extend_from_slice(&chunk[..pos]);
                self.input.unread(&chunk[pos + 1..n]);
                break;
            }
            line.extend_from_slice(&chunk[..n]);
        }
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        String::from_utf8(line)
            .map(Some)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "non-UTF-8 boundary line"))
    }

    /// Read the whole current entity into memory.
    pub fn read_entity_to_end(&mut self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = self.read_data(&mut chunk)?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&chunk[..n]);
        }
    }
}

fn consume_crlf<R: BufferedRead + ?Sized>(input: &mut R) -> io::Result<()> {
    let mut two = [0u8; 2];
    let mut got = 0;
    while got < 2 {
        let n = input.read_some(&mut two[got..])?;
        if n == 0 {
            break;
        }
        got += n;
    }
    if two[..got] != b"\r\n"[..got] {
        input.unread(&two[..got]);
    }
    Ok(())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// In-memory source with a configurable per-read cap, to exercise
    /// boundary matches split across reads.
    struct ChunkSource {
        data: Vec<u8>,
        pos: usize,
        cap: usize,
    }

    impl ChunkSource {
        fn new(data: &[u8], cap: usize) -> Self {
            Self {
                data: data.to_vec(),
                pos: 0,
                cap,
            }
        }
    }

    impl BufferedRead for ChunkSource {
        fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf
                .len()
                .min(self.cap)
                .min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }

        fn unread(&mut self, data: &[u8]) {
            assert!(self.pos >= data.len());
            self.pos -= data.len();
            assert_eq!(&self.data[self.pos..self.pos + data.len()], data);
        }
    }

    fn collect_entities(body: &[u8], boundary: &str, cap: usize) -> Vec<(Option<String>, Vec<u8>)> {
        let mut source = ChunkSource::new(body, cap);
        let mut decoder = MultipartDecoder::new(&mut source, boundary);
        let mut out = Vec::new();
        while decoder.next_entity().unwrap() {
            let name = decoder.entity_header().and_then(|h| h.entity_name());
            let data = decoder.read_entity_to_end().unwrap();
            out.push((name, data));
        }
        out
    }

    #[test]
    fn two_sized_parts() {
        let body = b"--bnd\r\n\
            Content-Disposition: form-data; name=\"a\"\r\n\
            Content-Length: 5\r\n\r\nhello\r\n\
            --bnd\r\n\
            Content-Disposition: form-data; name=\"b\"\r\n\
            Content-Length: 2\r\n\r\nhi\r\n\
            --bnd--\r\n";
        let parts = collect_entities(body, "bnd", 4096);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0], (Some("a".into()), b"hello".to_vec()));
        assert_eq!(parts[1], (Some("b".into()), b"hi".to_vec()));
    }

    #[test]
    fn unsized_part_is_delimited_by_boundary_scan() {
        let body = b"--bnd\r\n\
            Content-Disposition: form-data; name=\"a\"\r\n\r\n\
            line one\r\nline two\r\n\
            --bnd--\r\n";
        for cap in [3, 7, 4096] {
            let parts = collect_entities(body, "bnd", cap);
            assert_eq!(parts.len(), 1, "cap {cap}");
            assert_eq!(parts[0].1, b"line one\r\nline two", "cap {cap}");
        }
    }

    #[test]
    fn skipping_an_unread_entity_still_finds_the_next() {
        let body = b"--bnd\r\n\
            Content-Length: 4\r\n\r\nskip\r\n\
            --bnd\r\n\
            Content-Length: 4\r\n\r\nkeep\r\n\
            --bnd--\r\n";
        let mut source = ChunkSource::new(body, 4096);
        let mut decoder = MultipartDecoder::new(&mut source, "bnd");
        assert!(decoder.next_entity().unwrap());
        // Do not read the first entity at all.
        assert!(decoder.next_entity().unwrap());
        assert_eq!(decoder.read_entity_to_end().unwrap(), b"keep");
        assert!(!decoder.next_entity().unwrap());
    }

    #[test]
    fn nested_multipart_flattens_with_depth() {
        let body = b"--outer\r\n\
            Content-Type: multipart/mixed; boundary=inner\r\n\r\n\
            --inner\r\n\
            Content-Length: 3\r\n\r\none\r\n\
            --inner--\r\n\
            --outer\r\n\
            Content-Length: 3\r\n\r\ntwo\r\n\
            --outer--\r\n";
        let mut source = ChunkSource::new(body, 4096);
        let mut decoder = MultipartDecoder::new(&mut source, "outer");

        assert!(decoder.next_entity().unwrap());
        assert_eq!(decoder.depth(), 2);
        assert!(decoder.container_header(0).unwrap().is_multipart());
        assert_eq!(decoder.read_entity_to_end().unwrap(), b"one");

        assert!(decoder.next_entity().unwrap());
        assert_eq!(decoder.depth(), 1);
        assert_eq!(decoder.read_entity_to_end().unwrap(), b"two");

        assert!(!decoder.next_entity().unwrap());
    }

    #[test]
    fn preamble_is_collected_not_treated_as_data() {
        let body = b"id-line-here\r\n\
            --bnd\r\n\
            Content-Length: 2\r\n\r\nok\r\n\
            --bnd--\r\n";
        let mut source = ChunkSource::new(body, 4096);
        let mut decoder = MultipartDecoder::new(&mut source, "bnd");
        assert!(decoder.next_entity().unwrap());
        assert_eq!(decoder.read_entity_to_end().unwrap(), b"ok");
        assert_eq!(decoder.container_header(0).unwrap().preamble, b"id-line-here\n");
    }

    #[test]
    fn clean_eof_without_closing_boundary_ends_iteration() {
        let body = b"--bnd\r\n\
            Content-Length: 2\r\n\r\nok\r\n";
        let mut source = ChunkSource::new(body, 4096);
        let mut decoder = MultipartDecoder::new(&mut source, "bnd");
        assert!(decoder.next_entity().unwrap());
        assert_eq!(decoder.read_entity_to_end().unwrap(), b"ok");
        assert!(!decoder.next_entity().unwrap());
    }
}
