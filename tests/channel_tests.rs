//! Push channel streaming over raw sockets.
//!
//! # Test Coverage
//! - Opening a channel streams the id line and multipart entities
//! - Subscriptions gate which signals a channel receives
//! - A channel tolerates only one pusher; a second attach gets 409
//! - Closing a channel sends the terminating boundary and ends the stream
//!
//! # Test Strategy
//! The push stream is consumed with a `BufReader` line by line, so the
//! asserted framing is the literal multipart text a client parser sees.
//! Signals are emitted server-side through the fixture's handle.

mod common;

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use objgate::server::StopMode;
use objgate::Variant;

struct PushStream {
    reader: BufReader<TcpStream>,
    pub channel_id: String,
    pub boundary: String,
}

impl PushStream {
    /// Open `channels/new` and consume the response header plus the
    /// leading channel id line.
    fn open(fixture: &common::TestServer) -> Self {
        let mut stream = TcpStream::connect(fixture.socket_addr()).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream
            .write_all(b"GET /counter/channels/new HTTP/1.1\r\nHost: test\r\n\r\n")
            .unwrap();
        let mut reader = BufReader::new(stream);

        let mut status_line = String::new();
        reader.read_line(&mut status_line).unwrap();
        assert!(status_line.contains("200"), "unexpected {status_line:?}");
        let mut boundary = String::new();
        loop {
            let mut field = String::new();
            reader.read_line(&mut field).unwrap();
            let field = field.trim_end();
            if field.is_empty() {
                break;
            }
            if let Some(value) = field.to_ascii_lowercase().strip_prefix("content-type:") {
                assert!(value.contains("multipart/mixed"), "unexpected {field:?}");
                let marker = "boundary=\"";
                let start = field.find(marker).unwrap() + marker.len();
                let end = field[start..].find('"').unwrap();
                boundary = field[start..start + end].to_string();
            }
        }
        assert!(!boundary.is_empty(), "no multipart boundary in header");

        let mut id_line = String::new();
        reader.read_line(&mut id_line).unwrap();
        let channel_id = id_line.trim_end().to_string();
        assert_eq!(boundary, format!("ch-{channel_id}"));

        Self {
            reader,
            channel_id,
            boundary,
        }
    }

    /// Read one framed entity, returning its X-URI and payload.
    fn read_entity(&mut self) -> (String, Vec<u8>) {
        let mut line = String::new();
        self.reader.read_line(&mut line).unwrap();
        assert_eq!(line.trim_end(), format!("--{}", self.boundary));

        let mut uri = String::new();
        let mut length = 0usize;
        loop {
            let mut field = String::new();
            self.reader.read_line(&mut field).unwrap();
            let field = field.trim_end();
            if field.is_empty() {
                break;
            }
            if let Some(value) = field.strip_prefix("X-URI:") {
                uri = value.trim().to_string();
            } else if let Some(value) = field.to_ascii_lowercase().strip_prefix("content-length:")
            {
                length = value.trim().parse().unwrap();
            }
        }
        let mut payload = vec![0u8; length];
        self.reader.read_exact(&mut payload).unwrap();
        let mut crlf = [0u8; 2];
        self.reader.read_exact(&mut crlf).unwrap();
        assert_eq!(&crlf, b"\r\n");
        (uri, payload)
    }

    fn expect_closed(mut self) {
        let mut line = String::new();
        self.reader.read_line(&mut line).unwrap();
        assert_eq!(line.trim_end(), format!("--{}--", self.boundary));
        let mut rest = Vec::new();
        self.reader.read_to_end(&mut rest).unwrap();
        assert!(rest.is_empty(), "bytes after close: {rest:?}");
    }
}

#[test]
fn subscribed_signals_arrive_as_entities() {
    let fixture = common::start_object_server();
    let addr = fixture.socket_addr();
    let mut stream = PushStream::open(&fixture);
    let id = stream.channel_id.clone();

    let (status, _) = common::http_get(
        addr,
        &format!("/counter/channels/{id}/connect?uri=signals%2Ftick"),
    );
    assert_eq!(status, 200);
    let (status, _) = common::http_get(
        addr,
        &format!("/counter/channels/{id}/connect?uri=signals%2Fchanged%28int%29"),
    );
    assert_eq!(status, 200);

    fixture.remote.emit("tick", &[]).unwrap();
    let (uri, payload) = stream.read_entity();
    assert_eq!(uri, "signals/tick");
    assert!(payload.is_empty());

    fixture.remote.emit("changed", &[Variant::Int(7)]).unwrap();
    let (uri, payload) = stream.read_entity();
    assert_eq!(uri, "signals/changed(int)");
    assert_eq!(payload, b"7");

    // Dropping one subscription silences only that signal.
    let (status, _) = common::http_get(
        addr,
        &format!("/counter/channels/{id}/disconnect?uri=signals%2Ftick"),
    );
    assert_eq!(status, 200);
    fixture.remote.emit("tick", &[]).unwrap();
    fixture.remote.emit("changed", &[Variant::Int(9)]).unwrap();
    let (uri, payload) = stream.read_entity();
    assert_eq!(uri, "signals/changed(int)");
    assert_eq!(payload, b"9");

    fixture.handle.stop(StopMode::Interrupt);
}

#[test]
fn channel_refuses_a_second_pusher() {
    let fixture = common::start_object_server();
    let addr = fixture.socket_addr();
    let stream = PushStream::open(&fixture);
    let id = stream.channel_id.clone();

    let (status, _) = common::http_get(
        addr,
        &format!("/counter/channels/reconnect?id={id}"),
    );
    assert_eq!(status, 409);

    // The original stream is unaffected by the refused attach.
    let (status, _) = common::http_get(
        addr,
        &format!("/counter/channels/{id}/connect?uri=signals%2Ftick"),
    );
    assert_eq!(status, 200);
    let mut stream = stream;
    fixture.remote.emit("tick", &[]).unwrap();
    let (uri, _) = stream.read_entity();
    assert_eq!(uri, "signals/tick");

    fixture.handle.stop(StopMode::Interrupt);
}

#[test]
fn close_terminates_the_stream() {
    let fixture = common::start_object_server();
    let addr = fixture.socket_addr();
    let stream = PushStream::open(&fixture);
    let id = stream.channel_id.clone();

    let (status, _) = common::http_get(addr, &format!("/counter/channels/{id}/close"));
    assert_eq!(status, 200);
    stream.expect_closed();

    // The id is gone afterwards.
    let (status, _) = common::http_get(
        addr,
        &format!("/counter/channels/{id}/connect?uri=signals%2Ftick"),
    );
    assert_eq!(status, 404);

    fixture.handle.stop(StopMode::Interrupt);
}

#[test]
fn subscribing_an_unknown_push_uri_is_not_found() {
    let fixture = common::start_object_server();
    let addr = fixture.socket_addr();
    let stream = PushStream::open(&fixture);
    let id = stream.channel_id.clone();

    let (status, _) = common::http_get(
        addr,
        &format!("/counter/channels/{id}/connect?uri=signals%2Fnope"),
    );
    assert_eq!(status, 404);

    fixture.handle.stop(StopMode::Interrupt);
}
