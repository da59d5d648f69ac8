//! Sans-IO HTTP/1.1 client connection with request pipelining.
//!
//! `H1Connection` is a pure state machine: queue requests with `request()`,
//! pull outgoing bytes with `take_pending_send()`, feed received bytes in via
//! `recv()`, and drain framed events with `poll_event()`.
//!
//! HTTP/1.1 delivers responses in request order, so correlation is a FIFO of
//! outstanding references: each decoded response is tagged with the front
//! reference, which is retired when the response completes. References come
//! from a process-wide counter and are never reused, not even across
//! connections.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::{Bytes, BytesMut};

/// Opaque reference identifying one outstanding request.
pub type ReqId = u64;

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

/// Events produced by the connection for the application.
#[derive(Debug)]
pub enum H1Event {
    /// Response status line decoded.
    Status { id: ReqId, code: u16 },
    /// Response header block decoded.
    Headers {
        id: ReqId,
        headers: Vec<(String, String)>,
    },
    /// A slice of response body.
    Data { id: ReqId, chunk: Bytes },
    /// The response is complete; the reference is retired.
    Done { id: ReqId },
}

/// Errors produced while encoding or decoding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum H1Error {
    /// Malformed status line or header block.
    #[error("malformed response head")]
    BadHead,
    /// Malformed chunked transfer encoding.
    #[error("malformed chunked encoding")]
    BadChunk,
    /// A response arrived with no outstanding request to match it.
    #[error("response without outstanding request")]
    UnexpectedResponse,
    /// The peer already closed the connection.
    #[error("connection closed")]
    Closed,
}

/// Decoder phase. Body phases carry the reference they are decoding for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Head,
    FixedBody { id: ReqId, remaining: usize },
    ChunkSize { id: ReqId },
    ChunkData { id: ReqId, remaining: usize },
    ChunkDataEnd { id: ReqId },
    ChunkTrailer { id: ReqId },
    UntilClose { id: ReqId },
}

/// Client-side HTTP/1.1 connection state machine.
pub struct H1Connection {
    /// References awaiting a response, in request order.
    outstanding: VecDeque<ReqId>,
    phase: Phase,
    recv_buf: BytesMut,
    send_buf: Vec<u8>,
    events: VecDeque<H1Event>,
    closed: bool,
}

impl Default for H1Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl H1Connection {
    pub fn new() -> Self {
        Self {
            outstanding: VecDeque::new(),
            phase: Phase::Head,
            recv_buf: BytesMut::new(),
            send_buf: Vec::new(),
            events: VecDeque::new(),
            closed: false,
        }
    }

    /// Encode a request into the send buffer. Returns the reference that
    /// response events for this request will carry.
    pub fn request(
        &mut self,
        method: &str,
        path: &str,
        host: &str,
        extra_headers: &[(&str, &str)],
        body: Option<&[u8]>,
    ) -> Result<ReqId, H1Error> {
        if self.closed {
            return Err(H1Error::Closed);
        }

        let id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);

        let buf = &mut self.send_buf;
        buf.extend_from_slice(method.as_bytes());
        buf.push(b' ');
        buf.extend_from_slice(path.as_bytes());
        buf.extend_from_slice(b" HTTP/1.1\r\nhost: ");
        buf.extend_from_slice(host.as_bytes());
        buf.extend_from_slice(b"\r\n");

        for (name, value) in extra_headers {
            buf.extend_from_slice(name.as_bytes());
            buf.extend_from_slice(b": ");
            buf.extend_from_slice(value.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }

        if let Some(b) = body
            && !b.is_empty()
        {
            buf.extend_from_slice(b"content-length: ");
            buf.extend_from_slice(b.len().to_string().as_bytes());
            buf.extend_from_slice(b"\r\n");
        }

        buf.extend_from_slice(b"\r\n");

        if let Some(b) = body
            && !b.is_empty()
        {
            buf.extend_from_slice(b);
        }

        self.outstanding.push_back(id);
        Ok(id)
    }

    /// Forget a reference whose request bytes never reached the wire.
    pub fn cancel(&mut self, id: ReqId) {
        self.outstanding.retain(|&o| o != id);
    }

    /// Take all pending bytes to send to the transport.
    pub fn take_pending_send(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.send_buf)
    }

    /// Whether there are bytes pending to send.
    pub fn has_pending_send(&self) -> bool {
        !self.send_buf.is_empty()
    }

    /// Feed received bytes from the transport.
    pub fn recv(&mut self, data: &[u8]) -> Result<(), H1Error> {
        if self.closed {
            return Err(H1Error::Closed);
        }
        self.recv_buf.extend_from_slice(data);
        self.process()
    }

    /// Poll the next event, if any.
    pub fn poll_event(&mut self) -> Option<H1Event> {
        self.events.pop_front()
    }

    /// The reference whose response is currently being decoded, if any.
    pub fn current(&self) -> Option<ReqId> {
        self.outstanding.front().copied()
    }

    /// Number of references still awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.outstanding.len()
    }

    /// The peer closed the connection. Completes a close-delimited body if
    /// one is in progress; further `request()`/`recv()` calls fail.
    pub fn handle_eof(&mut self) {
        if let Phase::UntilClose { id } = self.phase {
            self.complete(id);
        }
        self.closed = true;
    }

    /// Whether the connection has seen EOF.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    // ── Internal decoding ───────────────────────────────────────────────

    fn process(&mut self) -> Result<(), H1Error> {
        loop {
            match self.phase {
                Phase::Head => {
                    let Some(end) = find_header_end(&self.recv_buf) else {
                        return Ok(());
                    };
                    let head = self.recv_buf.split_to(end + 4);
                    let parsed = parse_head(&head[..end])?;
                    if (100..200).contains(&parsed.status) {
                        // Interim response: carries no body and does not
                        // complete the request.
                        continue;
                    }
                    let id = match self.outstanding.front() {
                        Some(id) => *id,
                        None => return Err(H1Error::UnexpectedResponse),
                    };
                    self.events.push_back(H1Event::Status {
                        id,
                        code: parsed.status,
                    });
                    self.events.push_back(H1Event::Headers {
                        id,
                        headers: parsed.headers,
                    });
                    if parsed.status == 204
                        || parsed.status == 304
                        || parsed.content_length == Some(0)
                    {
                        self.complete(id);
                    } else if let Some(n) = parsed.content_length {
                        self.phase = Phase::FixedBody { id, remaining: n };
                    } else if parsed.chunked {
                        self.phase = Phase::ChunkSize { id };
                    } else {
                        self.phase = Phase::UntilClose { id };
                    }
                }
                Phase::FixedBody { id, remaining } => {
                    if self.recv_buf.is_empty() {
                        return Ok(());
                    }
                    let take = remaining.min(self.recv_buf.len());
                    let chunk = self.recv_buf.split_to(take).freeze();
                    self.events.push_back(H1Event::Data { id, chunk });
                    if remaining == take {
                        self.complete(id);
                    } else {
                        self.phase = Phase::FixedBody {
                            id,
                            remaining: remaining - take,
                        };
                    }
                }
                Phase::ChunkSize { id } => {
                    let Some(pos) = find_crlf(&self.recv_buf) else {
                        return Ok(());
                    };
                    let line = self.recv_buf.split_to(pos + 2);
                    let size = parse_chunk_size(&line[..pos])?;
                    if size == 0 {
                        self.phase = Phase::ChunkTrailer { id };
                    } else {
                        self.phase = Phase::ChunkData { id, remaining: size };
                    }
                }
                Phase::ChunkData { id, remaining } => {
                    if self.recv_buf.is_empty() {
                        return Ok(());
                    }
                    let take = remaining.min(self.recv_buf.len());
                    let chunk = self.recv_buf.split_to(take).freeze();
                    self.events.push_back(H1Event::Data { id, chunk });
                    if remaining == take {
                        self.phase = Phase::ChunkDataEnd { id };
                    } else {
                        self.phase = Phase::ChunkData {
                            id,
                            remaining: remaining - take,
                        };
                    }
                }
                Phase::ChunkDataEnd { id } => {
                    if self.recv_buf.len() < 2 {
                        return Ok(());
                    }
                    let sep = self.recv_buf.split_to(2);
                    if &sep[..] != b"\r\n" {
                        return Err(H1Error::BadChunk);
                    }
                    self.phase = Phase::ChunkSize { id };
                }
                Phase::ChunkTrailer { id } => {
                    let Some(pos) = find_crlf(&self.recv_buf) else {
                        return Ok(());
                    };
                    // Trailer fields are consumed but not surfaced.
                    let _ = self.recv_buf.split_to(pos + 2);
                    if pos == 0 {
                        self.complete(id);
                    }
                }
                Phase::UntilClose { id } => {
                    if self.recv_buf.is_empty() {
                        return Ok(());
                    }
                    let chunk = self.recv_buf.split_to(self.recv_buf.len()).freeze();
                    self.events.push_back(H1Event::Data { id, chunk });
                    return Ok(());
                }
            }
        }
    }

    fn complete(&mut self, id: ReqId) {
        self.events.push_back(H1Event::Done { id });
        self.outstanding.pop_front();
        self.phase = Phase::Head;
    }
}

struct Head {
    status: u16,
    headers: Vec<(String, String)>,
    content_length: Option<usize>,
    chunked: bool,
}

/// Parse a response head (everything before `\r\n\r\n`).
fn parse_head(data: &[u8]) -> Result<Head, H1Error> {
    let text = std::str::from_utf8(data).map_err(|_| H1Error::BadHead)?;
    let mut lines = text.split("\r\n");

    // Status line: HTTP/1.1 200 OK
    let status_line = lines.next().ok_or(H1Error::BadHead)?;
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().ok_or(H1Error::BadHead)?;
    if !version.starts_with("HTTP/1.") {
        return Err(H1Error::BadHead);
    }
    let status: u16 = parts
        .next()
        .ok_or(H1Error::BadHead)?
        .parse()
        .map_err(|_| H1Error::BadHead)?;

    let mut headers = Vec::new();
    let mut content_length = None;
    let mut chunked = false;

    for line in lines {
        if line.is_empty() {
            break;
        }
        let (name, value) = line.split_once(':').ok_or(H1Error::BadHead)?;
        let name = name.trim();
        let value = value.trim();

        if name.eq_ignore_ascii_case("content-length") {
            content_length = Some(value.parse().map_err(|_| H1Error::BadHead)?);
        }
        if name.eq_ignore_ascii_case("transfer-encoding") && value.eq_ignore_ascii_case("chunked") {
            chunked = true;
        }

        headers.push((name.to_string(), value.to_string()));
    }

    Ok(Head {
        status,
        headers,
        content_length,
        chunked,
    })
}

/// Parse a chunk-size line, ignoring chunk extensions (`;key=value`).
fn parse_chunk_size(line: &[u8]) -> Result<usize, H1Error> {
    let text = std::str::from_utf8(line).map_err(|_| H1Error::BadChunk)?;
    let size_hex = text.split(';').next().unwrap_or("").trim();
    usize::from_str_radix(size_hex, 16).map_err(|_| H1Error::BadChunk)
}

/// Position of the first `\r\n\r\n`, if present.
fn find_header_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Position of the first `\r\n`, if present.
fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == b"\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(conn: &mut H1Connection) -> Vec<H1Event> {
        let mut events = Vec::new();
        while let Some(ev) = conn.poll_event() {
            events.push(ev);
        }
        events
    }

    /// Collect the full body delivered for `id`, asserting Done arrives.
    fn collect_body(events: &[H1Event], id: ReqId) -> Vec<u8> {
        let mut body = Vec::new();
        let mut done = false;
        for ev in events {
            match ev {
                H1Event::Data { id: i, chunk } if *i == id => body.extend_from_slice(chunk),
                H1Event::Done { id: i } if *i == id => done = true,
                _ => {}
            }
        }
        assert!(done, "missing Done for {id}");
        body
    }

    #[test]
    fn request_encoding() {
        let mut conn = H1Connection::new();
        let id = conn
            .request(
                "POST",
                "/v1/data/app",
                "opa.internal",
                &[("content-type", "application/json")],
                Some(b"{\"input\":{}}"),
            )
            .unwrap();
        assert!(id > 0);

        let wire = conn.take_pending_send();
        let text = std::str::from_utf8(&wire).unwrap();
        assert!(text.starts_with("POST /v1/data/app HTTP/1.1\r\n"));
        assert!(text.contains("host: opa.internal\r\n"));
        assert!(text.contains("content-type: application/json\r\n"));
        assert!(text.contains("content-length: 12\r\n"));
        assert!(text.ends_with("\r\n\r\n{\"input\":{}}"));
        assert!(!conn.has_pending_send());
    }

    #[test]
    fn get_has_no_content_length() {
        let mut conn = H1Connection::new();
        conn.request("GET", "/health", "localhost", &[], None).unwrap();
        let wire = conn.take_pending_send();
        let text = std::str::from_utf8(&wire).unwrap();
        assert!(!text.contains("content-length"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn references_are_unique() {
        let mut a = H1Connection::new();
        let mut b = H1Connection::new();
        let id1 = a.request("GET", "/x", "h", &[], None).unwrap();
        let id2 = b.request("GET", "/x", "h", &[], None).unwrap();
        let id3 = a.request("GET", "/y", "h", &[], None).unwrap();
        assert_ne!(id1, id2);
        assert_ne!(id1, id3);
        assert_ne!(id2, id3);
    }

    #[test]
    fn fixed_length_response() {
        let mut conn = H1Connection::new();
        let id = conn.request("GET", "/x", "h", &[], None).unwrap();
        conn.take_pending_send();

        conn.recv(b"HTTP/1.1 200 OK\r\ncontent-length: 5\r\n\r\nhello")
            .unwrap();

        let events = drain(&mut conn);
        assert!(matches!(events[0], H1Event::Status { id: i, code: 200 } if i == id));
        assert!(matches!(events[1], H1Event::Headers { .. }));
        assert_eq!(collect_body(&events, id), b"hello");
        assert_eq!(conn.pending_count(), 0);
    }

    #[test]
    fn response_split_across_arbitrary_feeds() {
        let mut conn = H1Connection::new();
        let id = conn.request("GET", "/x", "h", &[], None).unwrap();
        conn.take_pending_send();

        let wire = b"HTTP/1.1 200 OK\r\ncontent-length: 10\r\n\r\n0123456789";
        let mut events = Vec::new();
        for byte in wire {
            conn.recv(std::slice::from_ref(byte)).unwrap();
            events.extend(drain(&mut conn));
        }
        assert_eq!(collect_body(&events, id), b"0123456789");
    }

    #[test]
    fn pipelined_responses_in_one_feed() {
        let mut conn = H1Connection::new();
        let first = conn.request("GET", "/a", "h", &[], None).unwrap();
        let second = conn.request("GET", "/b", "h", &[], None).unwrap();
        conn.take_pending_send();

        conn.recv(
            b"HTTP/1.1 200 OK\r\ncontent-length: 3\r\n\r\naaa\
              HTTP/1.1 200 OK\r\ncontent-length: 3\r\n\r\nbbb",
        )
        .unwrap();

        let events = drain(&mut conn);
        assert_eq!(collect_body(&events, first), b"aaa");
        assert_eq!(collect_body(&events, second), b"bbb");
        assert_eq!(conn.pending_count(), 0);
    }

    #[test]
    fn no_body_status_completes_immediately() {
        let mut conn = H1Connection::new();
        let id = conn.request("POST", "/x", "h", &[], Some(b"{}")).unwrap();
        conn.take_pending_send();

        conn.recv(b"HTTP/1.1 204 No Content\r\n\r\n").unwrap();

        let events = drain(&mut conn);
        assert!(matches!(events[0], H1Event::Status { id: i, code: 204 } if i == id));
        assert!(matches!(events.last(), Some(H1Event::Done { id: i }) if *i == id));
        assert_eq!(conn.pending_count(), 0);
    }

    #[test]
    fn chunked_response_with_trailer() {
        let mut conn = H1Connection::new();
        let id = conn.request("GET", "/x", "h", &[], None).unwrap();
        conn.take_pending_send();

        conn.recv(
            b"HTTP/1.1 200 OK\r\ntransfer-encoding: chunked\r\n\r\n\
              5\r\nhello\r\n6\r\n world\r\n0\r\nx-extra: t\r\n\r\n",
        )
        .unwrap();

        let events = drain(&mut conn);
        assert_eq!(collect_body(&events, id), b"hello world");
        assert_eq!(conn.pending_count(), 0);
    }

    #[test]
    fn close_delimited_body_completes_on_eof() {
        let mut conn = H1Connection::new();
        let id = conn.request("GET", "/x", "h", &[], None).unwrap();
        conn.take_pending_send();

        conn.recv(b"HTTP/1.1 200 OK\r\n\r\npartial").unwrap();
        let mut events = drain(&mut conn);
        conn.handle_eof();
        events.extend(drain(&mut conn));

        assert_eq!(collect_body(&events, id), b"partial");
        assert!(conn.is_closed());
    }

    #[test]
    fn request_after_eof_is_rejected() {
        let mut conn = H1Connection::new();
        conn.handle_eof();
        assert_eq!(
            conn.request("GET", "/x", "h", &[], None),
            Err(H1Error::Closed)
        );
    }

    #[test]
    fn response_without_request_is_an_error() {
        let mut conn = H1Connection::new();
        let err = conn
            .recv(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n")
            .unwrap_err();
        assert_eq!(err, H1Error::UnexpectedResponse);
    }

    #[test]
    fn malformed_status_line_is_an_error() {
        let mut conn = H1Connection::new();
        let id = conn.request("GET", "/x", "h", &[], None).unwrap();
        let err = conn.recv(b"SPEAK FRIEND\r\n\r\n").unwrap_err();
        assert_eq!(err, H1Error::BadHead);
        // The affected reference stays identifiable for error attribution.
        assert_eq!(conn.current(), Some(id));
    }

    #[test]
    fn cancel_removes_outstanding_reference() {
        let mut conn = H1Connection::new();
        let id = conn.request("GET", "/x", "h", &[], None).unwrap();
        conn.cancel(id);
        assert_eq!(conn.pending_count(), 0);
        // The next response now has nothing to correlate to.
        let err = conn
            .recv(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\n\r\n")
            .unwrap_err();
        assert_eq!(err, H1Error::UnexpectedResponse);
    }

    #[test]
    fn interim_response_is_skipped() {
        let mut conn = H1Connection::new();
        let id = conn.request("GET", "/x", "h", &[], None).unwrap();
        conn.take_pending_send();

        conn.recv(b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\nok")
            .unwrap();

        let events = drain(&mut conn);
        assert!(matches!(events[0], H1Event::Status { code: 200, .. }));
        assert_eq!(collect_body(&events, id), b"ok");
    }
}
