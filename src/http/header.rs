//! HTTP and MIME header objects.
//!
//! [`FieldMap`] keeps fields in insertion order and matches names
//! case-insensitively, which is what both RFC 7230 header handling and the
//! multipart sub-headers need. Request, response and MIME entity headers
//! build on it.

use http::{Method, StatusCode};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::FrameError;

static BOUNDARY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)boundary\s*=\s*"?([^";]+)"?"#).expect("boundary regex"));

/// Ordered, case-insensitive header field collection.
#[derive(Debug, Clone, Default)]
pub struct FieldMap {
    fields: Vec<(String, String)>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Replace any existing field with the same name.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.fields.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.fields.push((name.to_string(), value.into()));
    }

    /// Append without replacing; repeated fields keep their order.
    pub fn add(&mut self, name: &str, value: impl Into<String>) {
        self.fields.push((name.to_string(), value.into()));
    }

    pub fn remove(&mut self, name: &str) {
        self.fields.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn content_length(&self) -> Option<u64> {
        self.get("content-length").and_then(|v| v.trim().parse().ok())
    }

    /// Media type without parameters, lowercased.
    pub fn media_type(&self) -> Option<String> {
        self.get("content-type")
            .map(|v| v.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
    }

    /// Multipart boundary parameter of the Content-Type field.
    pub fn boundary(&self) -> Option<String> {
        let value = self.get("content-type")?;
        BOUNDARY_RE
            .captures(value)
            .map(|c| c[1].trim().to_string())
    }

    pub fn serialize_into(&self, out: &mut String) {
        for (name, value) in &self.fields {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
    }

    /// Parse a raw header block without a start line. Lines must be
    /// CRLF-separated `Name: value` pairs.
    pub fn parse_block(raw: &str) -> Result<Self, FrameError> {
        let mut map = Self::new();
        for line in raw.split("\r\n").filter(|l| !l.is_empty()) {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| FrameError::InvalidFormat(format!("bad header line: {line:?}")))?;
            if name.is_empty() || name.contains(' ') {
                return Err(FrameError::InvalidFormat(format!(
                    "bad header name: {name:?}"
                )));
            }
            map.add(name.trim(), value.trim());
        }
        Ok(map)
    }
}

/// An HTTP request header (request line plus fields).
#[derive(Debug, Clone)]
pub struct RequestHeader {
    method: Method,
    target: String,
    version: String,
    pub fields: FieldMap,
}

impl Default for RequestHeader {
    fn default() -> Self {
        Self::new(Method::GET, "/")
    }
}

impl RequestHeader {
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            version: "HTTP/1.1".to_string(),
            fields: FieldMap::new(),
        }
    }

    pub fn parse(raw: &str) -> Result<Self, FrameError> {
        let (line, rest) = raw
            .split_once("\r\n")
            .unwrap_or((raw, ""));
        let mut parts = line.split(' ').filter(|p| !p.is_empty());
        let method = parts
            .next()
            .and_then(|m| m.parse::<Method>().ok())
            .ok_or_else(|| FrameError::InvalidFormat(format!("bad request line: {line:?}")))?;
        let target = parts
            .next()
            .ok_or_else(|| FrameError::InvalidFormat(format!("bad request line: {line:?}")))?
            .to_string();
        let version = parts
            .next()
            .ok_or_else(|| FrameError::InvalidFormat(format!("bad request line: {line:?}")))?;
        if !version.starts_with("HTTP/") {
            return Err(FrameError::InvalidFormat(format!(
                "bad HTTP version: {version:?}"
            )));
        }
        Ok(Self {
            method,
            target,
            version: version.to_string(),
            fields: FieldMap::parse_block(rest)?,
        })
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    /// Full request target including any query string.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn set_target(&mut self, target: impl Into<String>) {
        self.target = target.into();
    }

    /// Path portion of the target, before any `?`.
    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or("/")
    }

    /// Query portion of the target, after the first `?`.
    pub fn query(&self) -> Option<&str> {
        self.target.split_once('?').map(|(_, q)| q)
    }

    pub fn to_wire(&self) -> String {
        let mut out = format!("{} {} {}\r\n", self.method, self.target, self.version);
        self.fields.serialize_into(&mut out);
        out.push_str("\r\n");
        out
    }
}

/// An HTTP response header (status line plus fields).
#[derive(Debug, Clone)]
pub struct ResponseHeader {
    status: StatusCode,
    version: String,
    pub fields: FieldMap,
}

impl Default for ResponseHeader {
    fn default() -> Self {
        Self::new(StatusCode::OK)
    }
}

impl ResponseHeader {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            version: "HTTP/1.1".to_string(),
            fields: FieldMap::new(),
        }
    }

    pub fn parse(raw: &str) -> Result<Self, FrameError> {
        let (line, rest) = raw.split_once("\r\n").unwrap_or((raw, ""));
        let mut parts = line.splitn(3, ' ');
        let version = parts
            .next()
            .filter(|v| v.starts_with("HTTP/"))
            .ok_or_else(|| FrameError::InvalidFormat(format!("bad status line: {line:?}")))?;
        let status = parts
            .next()
            .and_then(|c| c.parse::<u16>().ok())
            .and_then(|c| StatusCode::from_u16(c).ok())
            .ok_or_else(|| FrameError::InvalidFormat(format!("bad status line: {line:?}")))?;
        Ok(Self {
            status,
            version: version.to_string(),
            fields: FieldMap::parse_block(rest)?,
        })
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn to_wire(&self) -> String {
        let mut out = format!(
            "{} {} {}\r\n",
            self.version,
            self.status.as_u16(),
            self.status.canonical_reason().unwrap_or("Unknown")
        );
        self.fields.serialize_into(&mut out);
        out.push_str("\r\n");
        out
    }
}

/// Header block of one MIME entity inside a multipart body.
#[derive(Debug, Clone, Default)]
pub struct MimeHeader {
    pub fields: FieldMap,
    /// Raw bytes between the start of a multipart body and its first
    /// boundary. For the channel protocol the first preamble line carries
    /// the channel id.
    pub preamble: Vec<u8>,
}

impl MimeHeader {
    pub fn parse(raw: &str) -> Result<Self, FrameError> {
        Ok(Self {
            fields: FieldMap::parse_block(raw)?,
            preamble: Vec::new(),
        })
    }

    /// A header block for a multipart container with the given boundary.
    pub fn multipart(boundary: &str) -> Self {
        let mut fields = FieldMap::new();
        fields.set(
            "Content-Type",
            format!("multipart/mixed; boundary=\"{boundary}\""),
        );
        Self {
            fields,
            preamble: Vec::new(),
        }
    }

    pub fn is_multipart(&self) -> bool {
        self.fields
            .media_type()
            .map(|t| t.starts_with("multipart/"))
            .unwrap_or(false)
    }

    pub fn boundary(&self) -> Option<String> {
        self.fields.boundary()
    }

    pub fn content_length(&self) -> Option<u64> {
        self.fields.content_length()
    }

    /// A named parameter of the Content-Disposition field, e.g. `name` or
    /// `filename`.
    pub fn disposition_param(&self, param: &str) -> Option<String> {
        let value = self.fields.get("content-disposition")?;
        let re = Regex::new(&format!(
            r#"(?i)\b{}\s*=\s*"?([^";]+)"?"#,
            regex::escape(param)
        ))
        .ok()?;
        re.captures(value).map(|c| c[1].to_string())
    }

    pub fn entity_name(&self) -> Option<String> {
        self.disposition_param("name")
    }

    pub fn file_name(&self) -> Option<String> {
        self.disposition_param("filename")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_lookup_is_case_insensitive() {
        let mut fields = FieldMap::new();
        fields.set("Content-Type", "text/plain");
        assert_eq!(fields.get("content-type"), Some("text/plain"));
        fields.set("content-TYPE", "text/html");
        assert_eq!(fields.get("Content-Type"), Some("text/html"));
    }

    #[test]
    fn parses_request_line_and_fields() {
        let raw = "POST /obj/functions/add?x=1 HTTP/1.1\r\nHost: example\r\nContent-Length: 4\r\n";
        let header = RequestHeader::parse(raw).unwrap();
        assert_eq!(header.method(), &Method::POST);
        assert_eq!(header.path(), "/obj/functions/add");
        assert_eq!(header.query(), Some("x=1"));
        assert_eq!(header.fields.content_length(), Some(4));
    }

    #[test]
    fn parses_status_line_with_spaces_in_reason() {
        let raw = "HTTP/1.1 503 Service Unavailable\r\nConnection: close\r\n";
        let header = ResponseHeader::parse(raw).unwrap();
        assert_eq!(header.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(header.fields.get("connection"), Some("close"));
    }

    #[test]
    fn extracts_boundary_with_and_without_quotes() {
        let mut fields = FieldMap::new();
        fields.set("Content-Type", "multipart/mixed; boundary=\"abc-123\"");
        assert_eq!(fields.boundary().as_deref(), Some("abc-123"));
        fields.set("Content-Type", "multipart/form-data; boundary=xyz");
        assert_eq!(fields.boundary().as_deref(), Some("xyz"));
    }

    #[test]
    fn disposition_params() {
        let raw = "Content-Disposition: form-data; name=\"field1\"; filename=\"a.txt\"\r\n";
        let header = MimeHeader::parse(raw).unwrap();
        assert_eq!(header.entity_name().as_deref(), Some("field1"));
        assert_eq!(header.file_name().as_deref(), Some("a.txt"));
    }

    #[test]
    fn malformed_header_line_is_rejected() {
        assert!(FieldMap::parse_block("no colon here\r\n").is_err());
    }
}
