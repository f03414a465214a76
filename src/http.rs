//! Minimal HTTP/1.1 handling for the inference front end.
//!
//! Requests are parsed incrementally out of the per-connection receive
//! buffer: locate the blank-line terminator, honor `Content-Length` when
//! present, record the `Connection` preference. Responses are a fixed
//! header block plus a JSON body.

use chrono::Utc;

/// Parsed request head. `total_len` is how many buffer bytes the request
/// spans (head + body); bytes beyond it belong to a pipelined follow-up.
pub struct RequestHead {
    pub header_len: usize,
    pub body_len: usize,
    pub total_len: usize,
    pub keep_alive: bool,
}

/// Result of attempting to parse a request from a byte buffer.
pub enum ParseResult {
    /// A full request (head and body) is buffered.
    Complete(RequestHead),
    /// Need more data. Contains minimum bytes still needed.
    Incomplete(usize),
    /// Protocol error; the connection is unrecoverable.
    Error(&'static str),
}

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Try to parse one request from the buffer.
///
/// Without a `Content-Length` header everything buffered after the
/// terminator is taken as the body, so callers should only parse once the
/// socket has drained to EAGAIN.
pub fn try_parse_request(buf: &[u8]) -> ParseResult {
    let Some(term) = find_terminator(buf) else {
        return ParseResult::Incomplete(1);
    };
    let header_len = term + HEADER_TERMINATOR.len();
    let head = &buf[..term];

    let keep_alive = match header_value(head, "Connection") {
        Some(v) => v.eq_ignore_ascii_case("keep-alive"),
        None => false,
    };

    let body_len = match header_value(head, "Content-Length") {
        Some(v) => match v.parse::<usize>() {
            Ok(n) => n,
            Err(_) => return ParseResult::Error("bad Content-Length"),
        },
        None => buf.len() - header_len,
    };

    let total_len = header_len + body_len;
    if buf.len() < total_len {
        return ParseResult::Incomplete(total_len - buf.len());
    }

    ParseResult::Complete(RequestHead {
        header_len,
        body_len,
        total_len,
        keep_alive,
    })
}

fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_TERMINATOR.len())
        .position(|w| w == HEADER_TERMINATOR)
}

/// Value of the first header with the given name (ASCII case-insensitive),
/// trimmed. `head` is the request bytes up to the blank line.
pub fn header_value<'a>(head: &'a [u8], name: &str) -> Option<&'a str> {
    for line in head.split(|&b| b == b'\n') {
        let Ok(line) = std::str::from_utf8(line) else {
            continue;
        };
        let Some((key, value)) = line.trim_end_matches('\r').split_once(':') else {
            continue;
        };
        if key.trim().eq_ignore_ascii_case(name) {
            return Some(value.trim());
        }
    }
    None
}

/// Append a `200 OK` response head for a body of `body_len` bytes.
pub fn write_response_head(out: &mut Vec<u8>, body_len: usize, keep_alive: bool) {
    let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT");
    let connection = if keep_alive { "Keep-Alive" } else { "Close" };
    out.extend_from_slice(
        format!(
            "HTTP/1.1 200 OK\r\n\
             Date: {date}\r\n\
             Server: infercore\r\n\
             Content-Length: {body_len}\r\n\
             Connection: {connection}\r\n\r\n"
        )
        .as_bytes(),
    );
}
