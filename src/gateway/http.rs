/*!
HTTP helpers for the bridge: tolerant request parsing, endpoint classification and JSON responses.

Parses a single request from a Read stream. Accepts both CRLFCRLF and LFLF header
termination, caps headers at 64 KiB and bodies at 2 MiB, and supports Content-Length
as well as chunked transfer encoding.
*/

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read, Write};

const HDR_CAP: usize = 64 * 1024;
pub const BODY_CAP: usize = 2 * 1024 * 1024;

/// Supported HTTP methods (minimal)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Other(String),
}

/// Bridge endpoints we recognize
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Health,
    Run,
}

/// Simple case-insensitive header map (keys lowercased)
pub type HeaderMap = HashMap<String, String>;

/// Parsed HTTP request (lowercased path without query, normalized headers)
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub path_lc: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

#[derive(Debug)]
pub enum ReadError {
    HeadersTooLarge,
    BodyTooLarge(usize),
    Malformed(String),
    Io(io::Error),
}

impl From<io::Error> for ReadError {
    fn from(e: io::Error) -> Self {
        ReadError::Io(e)
    }
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadError::HeadersTooLarge => f.write_str("request headers too large"),
            ReadError::BodyTooLarge(n) => {
                write!(f, "request body of {n} bytes exceeds {BODY_CAP} bytes")
            }
            ReadError::Malformed(msg) => write!(f, "malformed request: {msg}"),
            ReadError::Io(e) => write!(f, "read failed: {e}"),
        }
    }
}

impl ReadError {
    pub fn status(&self) -> u16 {
        match self {
            ReadError::HeadersTooLarge => 431,
            ReadError::BodyTooLarge(_) => 413,
            ReadError::Malformed(_) | ReadError::Io(_) => 400,
        }
    }
}

/// Find end of HTTP headers, accepting either CRLF-CRLF or LF-LF separators.
/// Returns (index of header end, separator length).
fn find_header_end(buf: &[u8]) -> Option<(usize, usize)> {
    if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
        return Some((pos, 4));
    }
    buf.windows(2).position(|w| w == b"\n\n").map(|pos| (pos, 2))
}

/// Parse a single HTTP request from a reader.
pub fn read_http_request<R: Read>(reader: &mut R) -> Result<HttpRequest, ReadError> {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 4096];

    let (header_end, sep_len) = loop {
        if let Some(found) = find_header_end(&buf) {
            break found;
        }
        if buf.len() > HDR_CAP {
            return Err(ReadError::HeadersTooLarge);
        }
        let n = reader.read(&mut tmp)?;
        if n == 0 {
            return Err(ReadError::Malformed("missing header terminator".to_string()));
        }
        buf.extend_from_slice(&tmp[..n]);
    };
    if header_end > HDR_CAP {
        return Err(ReadError::HeadersTooLarge);
    }

    let header_str = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = header_str.lines();
    let request_line = lines.next().unwrap_or_default().trim().to_string();
    let (method, path_lc) = parse_request_line(&request_line)?;
    let headers = parse_headers(lines);

    let already: Vec<u8> = buf[header_end + sep_len..].to_vec();
    let te = headers
        .get("transfer-encoding")
        .map(|s| s.to_ascii_lowercase())
        .unwrap_or_default();
    let body = if te.contains("chunked") {
        read_chunked_body(reader, already)?
    } else {
        let content_len: usize = match headers.get("content-length") {
            Some(v) => v
                .trim()
                .parse()
                .map_err(|_| ReadError::Malformed(format!("bad content-length '{}'", v)))?,
            None => 0,
        };
        if content_len > BODY_CAP {
            return Err(ReadError::BodyTooLarge(content_len));
        }
        read_exact_body(reader, already, content_len)?
    };

    Ok(HttpRequest {
        method,
        path_lc,
        headers,
        body,
    })
}

fn read_exact_body<R: Read>(
    reader: &mut R,
    mut body: Vec<u8>,
    content_len: usize,
) -> Result<Vec<u8>, ReadError> {
    if body.len() > content_len {
        return Err(ReadError::Malformed(
            "body longer than content-length".to_string(),
        ));
    }
    let mut tmp = [0u8; 8192];
    while body.len() < content_len {
        let want = (content_len - body.len()).min(tmp.len());
        let n = reader.read(&mut tmp[..want])?;
        if n == 0 {
            return Err(ReadError::Malformed("truncated request body".to_string()));
        }
        body.extend_from_slice(&tmp[..n]);
    }
    Ok(body)
}

fn read_chunked_body<R: Read>(reader: &mut R, mut rbuf: Vec<u8>) -> Result<Vec<u8>, ReadError> {
    fn fill<R2: Read>(reader: &mut R2, rbuf: &mut Vec<u8>) -> Result<(), ReadError> {
        let mut tmp = [0u8; 4096];
        let n = reader.read(&mut tmp)?;
        if n == 0 {
            return Err(ReadError::Malformed("truncated chunked body".to_string()));
        }
        rbuf.extend_from_slice(&tmp[..n]);
        Ok(())
    }

    fn take_line<R2: Read>(reader: &mut R2, rbuf: &mut Vec<u8>) -> Result<String, ReadError> {
        loop {
            if let Some(pos) = rbuf.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = rbuf.drain(..=pos).collect();
                return Ok(String::from_utf8_lossy(&line).trim().to_string());
            }
            fill(reader, rbuf)?;
        }
    }

    let mut body = Vec::new();
    loop {
        let line = take_line(reader, &mut rbuf)?;
        if line.is_empty() {
            continue;
        }
        // Chunk size is hex; extensions after ';' are ignored
        let size_hex = line.split(';').next().unwrap_or(&line).trim();
        let size = usize::from_str_radix(size_hex, 16)
            .map_err(|_| ReadError::Malformed(format!("bad chunk size '{}'", size_hex)))?;
        if size == 0 {
            // Trailers are not used; consume until blank line or EOF
            while let Ok(tr) = take_line(reader, &mut rbuf) {
                if tr.is_empty() {
                    break;
                }
            }
            return Ok(body);
        }
        if size > BODY_CAP.saturating_sub(body.len()) {
            return Err(ReadError::BodyTooLarge(body.len().saturating_add(size)));
        }
        while rbuf.len() < size {
            fill(reader, &mut rbuf)?;
        }
        body.extend(rbuf.drain(..size));
    }
}

/// Classify a lowercased path into a known endpoint.
pub fn classify_endpoint(path_lc: &str) -> Option<Endpoint> {
    match path_lc.trim_end_matches('/') {
        "/health" => Some(Endpoint::Health),
        "/run" | "/copilot/run" => Some(Endpoint::Run),
        _ => None,
    }
}

fn parse_headers<'a, I: Iterator<Item = &'a str>>(lines: I) -> HeaderMap {
    let mut map = HeaderMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            map.insert(k.trim().to_ascii_lowercase(), v.trim().to_string());
        }
    }
    map
}

fn parse_request_line(request_line: &str) -> Result<(Method, String), ReadError> {
    let mut parts = request_line.split_whitespace();
    let method = match parts.next().unwrap_or("").to_ascii_uppercase().as_str() {
        "" => return Err(ReadError::Malformed("empty request line".to_string())),
        "GET" => Method::Get,
        "POST" => Method::Post,
        other => Method::Other(other.to_string()),
    };
    let target = parts.next().unwrap_or("/");
    let path_lc = target
        .split('?')
        .next()
        .unwrap_or(target)
        .to_ascii_lowercase();
    Ok((method, path_lc))
}

pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

/// Write a complete JSON response and flush.
pub fn write_json_response<W: Write>(w: &mut W, status: u16, payload: &Value) -> io::Result<()> {
    let body = serde_json::to_vec(payload)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let mut head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n",
        status,
        reason_phrase(status),
        body.len()
    );
    if status == 405 {
        head.push_str("Allow: GET, POST\r\n");
    }
    head.push_str("\r\n");
    w.write_all(head.as_bytes())?;
    w.write_all(&body)?;
    w.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn parse(raw: &[u8]) -> Result<HttpRequest, ReadError> {
        read_http_request(&mut Cursor::new(raw.to_vec()))
    }

    #[test]
    fn test_parse_post_with_content_length() {
        let raw = b"POST /Run?x=1 HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: 13\r\n\r\n{\"prompt\":\"\"}";
        let req = parse(raw).expect("parse");
        assert_eq!(req.method, Method::Post);
        assert_eq!(req.path_lc, "/run");
        assert_eq!(req.headers.get("content-type").map(String::as_str), Some("application/json"));
        assert_eq!(req.body, b"{\"prompt\":\"\"}");
    }

    #[test]
    fn test_parse_lf_only_headers() {
        let raw = b"GET /health HTTP/1.1\nHost: x\n\n";
        let req = parse(raw).expect("parse");
        assert_eq!(req.method, Method::Get);
        assert_eq!(classify_endpoint(&req.path_lc), Some(Endpoint::Health));
        assert!(req.body.is_empty());
    }

    #[test]
    fn test_parse_chunked_body() {
        let raw = b"POST /run HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\n{\"a\":\r\n3;ext=1\r\n 1}\r\n0\r\n\r\n";
        let req = parse(raw).expect("parse");
        assert_eq!(req.body, b"{\"a\": 1}");
    }

    #[test]
    fn test_huge_chunk_size_is_rejected_as_too_large() {
        let raw = b"POST /run HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\nfffffffffffffffd\r\nab";
        let err = parse(raw).expect_err("should fail");
        assert!(matches!(err, ReadError::BodyTooLarge(_)), "got {err:?}");
        assert_eq!(err.status(), 413);
    }

    #[test]
    fn test_chunks_summing_past_cap_are_rejected() {
        let mut raw = b"POST /run HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n".to_vec();
        let chunk = vec![b'x'; BODY_CAP - 1];
        raw.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
        raw.extend_from_slice(&chunk);
        raw.extend_from_slice(b"\r\n2\r\n");
        let err = parse(&raw).expect_err("should fail");
        assert_eq!(err.status(), 413);
    }

    #[test]
    fn test_truncated_body_is_malformed() {
        let raw = b"POST /run HTTP/1.1\r\nContent-Length: 50\r\n\r\n{}";
        let err = parse(raw).expect_err("should fail");
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn test_oversized_body_rejected_before_reading() {
        let raw = format!(
            "POST /run HTTP/1.1\r\nContent-Length: {}\r\n\r\n",
            BODY_CAP + 1
        );
        let err = parse(raw.as_bytes()).expect_err("should fail");
        assert_eq!(err.status(), 413);
    }

    #[test]
    fn test_oversized_headers_rejected() {
        let mut raw = String::from("GET /health HTTP/1.1\r\n");
        while raw.len() <= HDR_CAP + 10 {
            raw.push_str("X-Filler: aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa\r\n");
        }
        raw.push_str("\r\n");
        let err = parse(raw.as_bytes()).expect_err("should fail");
        assert_eq!(err.status(), 431);
    }

    #[test]
    fn test_classify_endpoint_aliases() {
        assert_eq!(classify_endpoint("/run"), Some(Endpoint::Run));
        assert_eq!(classify_endpoint("/run/"), Some(Endpoint::Run));
        assert_eq!(classify_endpoint("/copilot/run"), Some(Endpoint::Run));
        assert_eq!(classify_endpoint("/health"), Some(Endpoint::Health));
        assert_eq!(classify_endpoint("/exec"), None);
    }

    #[test]
    fn test_write_json_response_framing() {
        let mut out = Vec::new();
        write_json_response(&mut out, 400, &serde_json::json!({"ok": false, "error": "x"}))
            .expect("write");
        let text = String::from_utf8(out).expect("utf8");
        assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(text.contains("Content-Length: 24\r\n"));
        let (_, body) = text.split_once("\r\n\r\n").expect("header terminator");
        let v: Value = serde_json::from_str(body).expect("json body");
        assert_eq!(v["ok"], false);
        assert_eq!(v["error"], "x");
    }
}
