//! Plain-HTTP exchanges through a forwarding proxy.
//!
//! # Design
//! A forwarding proxy expects the request line in absolute form
//! (`GET http://origin/path HTTP/1.1`) on an ordinary connection. ureq only
//! speaks CONNECT to proxies, which is right for https targets and wrong for
//! http ones, so http targets behind a proxy are written here by hand over a
//! `TcpStream`. One connection per exchange, closed by `Connection: close`.

use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use tracing::debug;

use crate::adapter::AbortSignal;
use crate::http::{EncodedRequest, HttpMethod, RequestBody, ResponseHead};
use crate::transport::{BodyReader, TransportError, TransportResponse};

const MAX_HEAD_LINES: usize = 256;

/// Send `request` (already rewritten for the proxy) and return once the
/// response head has been read.
pub(crate) fn send(
    request: EncodedRequest,
    user_agent: &str,
    timeout: Option<Duration>,
    signal: &AbortSignal,
    connected: &mut dyn FnMut(),
) -> Result<TransportResponse, TransportError> {
    let failed = |e: io::Error| {
        if signal.is_aborted() {
            TransportError::Aborted
        } else {
            TransportError::Failed(e.to_string())
        }
    };

    let stream = TcpStream::connect((request.host.as_str(), request.port)).map_err(failed)?;
    stream.set_read_timeout(timeout).map_err(failed)?;
    stream.set_write_timeout(timeout).map_err(failed)?;
    connected();

    let method = request.method;
    let target = request.path.clone();
    let writer = BufWriter::new(stream.try_clone().map_err(failed)?);
    write_request(writer, request, user_agent, signal).map_err(failed)?;

    let mut reader = BufReader::new(stream);
    let head = read_head(&mut reader).map_err(failed)?;
    debug!(%target, status = head.status, "response head received from proxy");

    let body = response_body(method, &head, reader).map_err(failed)?;
    Ok(TransportResponse { head, body })
}

/// Authority of an absolute URL, for the `Host` header.
fn authority(target: &str) -> Option<String> {
    let url = url::Url::parse(target).ok()?;
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

/// Write the request line, headers and body.
///
/// A caller-supplied `Content-Length` is sent as given. Producer and stream
/// bodies without one go out chunked, one chunk per pull.
fn write_request<W: Write>(
    mut w: W,
    request: EncodedRequest,
    user_agent: &str,
    signal: &AbortSignal,
) -> io::Result<()> {
    write!(w, "{} {} HTTP/1.1\r\n", request.method, request.path)?;
    if request.header("host").is_none() {
        if let Some(host) = authority(&request.path) {
            write!(w, "Host: {host}\r\n")?;
        }
    }
    if request.header("user-agent").is_none() && !user_agent.is_empty() {
        write!(w, "User-Agent: {user_agent}\r\n")?;
    }
    if request.header("connection").is_none() {
        w.write_all(b"Connection: close\r\n")?;
    }

    let explicit_length = request.header("content-length").is_some();
    for (name, value) in &request.headers {
        if name.eq_ignore_ascii_case("transfer-encoding") {
            continue;
        }
        write!(w, "{name}: {value}\r\n")?;
    }

    match request.body {
        RequestBody::Empty => w.write_all(b"\r\n")?,
        RequestBody::Fixed(bytes) => {
            if !explicit_length {
                write!(w, "Content-Length: {}\r\n", bytes.len())?;
            }
            w.write_all(b"\r\n")?;
            w.write_all(&bytes)?;
        }
        RequestBody::Producer(producer) => {
            let reader = BodyReader::producer(producer, signal.clone());
            write_streamed(&mut w, reader, explicit_length)?;
        }
        RequestBody::Stream(stream) => {
            let reader = BodyReader::stream(stream, signal.clone());
            write_streamed(&mut w, reader, explicit_length)?;
        }
    }
    w.flush()
}

fn write_streamed<W: Write>(w: &mut W, mut body: impl Read, explicit_length: bool) -> io::Result<()> {
    if explicit_length {
        w.write_all(b"\r\n")?;
        io::copy(&mut body, w)?;
        return Ok(());
    }
    w.write_all(b"Transfer-Encoding: chunked\r\n\r\n")?;
    let mut buf = vec![0u8; 16 * 1024];
    loop {
        let n = body.read(&mut buf)?;
        if n == 0 {
            break;
        }
        write!(w, "{n:x}\r\n")?;
        w.write_all(&buf[..n])?;
        w.write_all(b"\r\n")?;
    }
    w.write_all(b"0\r\n\r\n")
}

fn read_line<R: BufRead>(r: &mut R) -> io::Result<String> {
    let mut line = String::new();
    if r.read_line(&mut line)? == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed before the response head",
        ));
    }
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// Read the status line and headers, skipping interim 1xx responses.
fn read_head<R: BufRead>(r: &mut R) -> io::Result<ResponseHead> {
    loop {
        let status_line = read_line(r)?;
        let mut parts = status_line.split_whitespace();
        let version = parts.next().unwrap_or_default();
        if !version.starts_with("HTTP/") {
            return Err(invalid(format!("bad status line: {status_line}")));
        }
        let status: u16 = parts
            .next()
            .and_then(|code| code.parse().ok())
            .ok_or_else(|| invalid(format!("bad status line: {status_line}")))?;

        let mut headers = Vec::new();
        loop {
            let line = read_line(r)?;
            if line.is_empty() {
                break;
            }
            if headers.len() == MAX_HEAD_LINES {
                return Err(invalid("too many response headers"));
            }
            let Some((name, value)) = line.split_once(':') else {
                return Err(invalid(format!("bad header line: {line}")));
            };
            headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
        }

        if (100..200).contains(&status) {
            continue;
        }
        return Ok(ResponseHead { status, headers });
    }
}

/// Pick the body framing the response head declares.
fn response_body<R: BufRead + 'static>(
    method: HttpMethod,
    head: &ResponseHead,
    reader: R,
) -> io::Result<Box<dyn Read>> {
    if method == HttpMethod::Head || matches!(head.status, 204 | 304) {
        return Ok(Box::new(io::empty()));
    }
    let chunked = head
        .header("transfer-encoding")
        .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"));
    if chunked {
        return Ok(Box::new(ChunkedReader::new(reader)));
    }
    match head.header("content-length") {
        Some(raw) => {
            let len: u64 = raw
                .trim()
                .parse()
                .map_err(|_| invalid(format!("bad content-length: {raw}")))?;
            Ok(Box::new(reader.take(len)))
        }
        None => Ok(Box::new(reader)),
    }
}

/// Decoder for a `Transfer-Encoding: chunked` response body.
struct ChunkedReader<R> {
    inner: R,
    remaining: u64,
    done: bool,
}

impl<R: BufRead> ChunkedReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            remaining: 0,
            done: false,
        }
    }

    /// Read the next size line; `0` also consumes the trailer section.
    fn next_size(&mut self) -> io::Result<u64> {
        let line = read_line(&mut self.inner)?;
        let hex = line.split(';').next().unwrap_or_default().trim();
        let size = u64::from_str_radix(hex, 16)
            .map_err(|_| invalid(format!("bad chunk size: {line}")))?;
        if size == 0 {
            while !read_line(&mut self.inner)?.is_empty() {}
        }
        Ok(size)
    }
}

impl<R: BufRead> Read for ChunkedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.done || buf.is_empty() {
            return Ok(0);
        }
        if self.remaining == 0 {
            self.remaining = self.next_size()?;
            if self.remaining == 0 {
                self.done = true;
                return Ok(0);
            }
        }
        let max = self.remaining.min(buf.len() as u64) as usize;
        let n = self.inner.read(&mut buf[..max])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed inside a chunk",
            ));
        }
        self.remaining -= n as u64;
        if self.remaining == 0 {
            let mut crlf = [0u8; 2];
            self.inner.read_exact(&mut crlf)?;
        }
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{ChunkProducer, Scheme};

    fn proxied(method: HttpMethod, headers: &[(&str, &str)], body: RequestBody) -> EncodedRequest {
        EncodedRequest {
            method,
            scheme: Scheme::Http,
            host: "proxy.test".to_string(),
            port: 3128,
            path: "http://origin.test/a?b=c".to_string(),
            proxied: true,
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body,
        }
    }

    fn written(request: EncodedRequest) -> String {
        let mut out = Vec::new();
        write_request(&mut out, request, "httpc-tests/1", &AbortSignal::new()).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn request_line_uses_absolute_form() {
        let wire = written(proxied(HttpMethod::Get, &[("Accept", "*/*")], RequestBody::Empty));
        assert_eq!(
            wire,
            "GET http://origin.test/a?b=c HTTP/1.1\r\n\
             Host: origin.test\r\n\
             User-Agent: httpc-tests/1\r\n\
             Connection: close\r\n\
             Accept: */*\r\n\r\n"
        );
    }

    #[test]
    fn explicit_port_is_kept_in_host_header() {
        let mut request = proxied(HttpMethod::Get, &[], RequestBody::Empty);
        request.path = "http://origin.test:8080/".to_string();
        assert!(written(request).contains("\r\nHost: origin.test:8080\r\n"));
    }

    #[test]
    fn caller_content_length_is_sent_as_given() {
        let request = proxied(
            HttpMethod::Post,
            &[("Content-Length", "3")],
            RequestBody::Fixed(b"abc".to_vec()),
        );
        let wire = written(request);
        assert_eq!(wire.matches("Content-Length").count(), 1);
        assert!(wire.ends_with("Content-Length: 3\r\n\r\nabc"));
    }

    #[test]
    fn fixed_body_without_length_gets_one() {
        let wire = written(proxied(HttpMethod::Put, &[], RequestBody::Fixed(b"hello".to_vec())));
        assert!(wire.ends_with("Content-Length: 5\r\n\r\nhello"));
    }

    #[test]
    fn producer_body_is_chunk_encoded() {
        let producer = ChunkProducer::new(vec![b"ab".to_vec(), b"cde".to_vec()]);
        let request = proxied(
            HttpMethod::Post,
            &[("Transfer-Encoding", "chunked")],
            RequestBody::Producer(producer),
        );
        let wire = written(request);
        assert_eq!(wire.matches("Transfer-Encoding").count(), 1);
        let (head, body) = wire.split_once("\r\n\r\n").unwrap();
        assert!(head.ends_with("Transfer-Encoding: chunked"));
        assert_eq!(body, "2\r\nab\r\n3\r\ncde\r\n0\r\n\r\n");
    }

    #[test]
    fn head_skips_interim_responses() {
        let raw = "HTTP/1.1 100 Continue\r\n\r\n\
                   HTTP/1.1 201 Created\r\nContent-Type: text/plain\r\nX-Id:  7 \r\n\r\nrest";
        let mut reader = io::Cursor::new(raw.as_bytes().to_vec());
        let head = read_head(&mut reader).unwrap();
        assert_eq!(head.status, 201);
        assert_eq!(head.content_type(), Some("text/plain"));
        assert_eq!(head.header("x-id"), Some("7"));

        let mut rest = String::new();
        reader.read_to_string(&mut rest).unwrap();
        assert_eq!(rest, "rest");
    }

    #[test]
    fn garbage_status_line_is_rejected() {
        let mut reader = io::Cursor::new(b"SSH-2.0-OpenSSH\r\n\r\n".to_vec());
        let err = read_head(&mut reader).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn chunked_body_is_decoded_with_extensions_and_trailers() {
        let raw = "4;ext=1\r\ntick\r\n6\r\n-tock!\r\n0\r\nX-Trailer: yes\r\n\r\nnext";
        let mut reader = ChunkedReader::new(io::Cursor::new(raw.as_bytes().to_vec()));
        let mut body = String::new();
        reader.read_to_string(&mut body).unwrap();
        assert_eq!(body, "tick-tock!");

        let mut rest = String::new();
        reader.inner.read_to_string(&mut rest).unwrap();
        assert_eq!(rest, "next");
    }

    #[test]
    fn truncated_chunk_is_an_error() {
        let mut reader = ChunkedReader::new(io::Cursor::new(b"a\r\nshort".to_vec()));
        let mut body = Vec::new();
        assert!(reader.read_to_end(&mut body).is_err());
    }

    #[test]
    fn content_length_bounds_the_body() {
        let head = ResponseHead {
            status: 200,
            headers: vec![("content-length".to_string(), "3".to_string())],
        };
        let mut body = response_body(HttpMethod::Get, &head, io::Cursor::new(b"abcdef".to_vec())).unwrap();
        let mut out = Vec::new();
        body.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abc");
    }

    #[test]
    fn head_and_no_content_responses_have_no_body() {
        let head = ResponseHead {
            status: 200,
            headers: vec![("content-length".to_string(), "3".to_string())],
        };
        let mut body = response_body(HttpMethod::Head, &head, io::Cursor::new(b"abc".to_vec())).unwrap();
        let mut out = Vec::new();
        body.read_to_end(&mut out).unwrap();
        assert!(out.is_empty());
    }
}
