/// Request/response transport: size probe, byte-range fetch, directory listing.
///
/// `HttpTransport` speaks HTTP through a single shared `ureq` agent. Status
/// codes are never turned into errors by the agent itself; the 2xx check and
/// the Unreachable/Unexpected split happen here.

use crate::error::FetchError;

use std::collections::BTreeMap;
use std::io::Read;
use std::time::Duration;
use ureq::http::{header, Response, StatusCode};

const USER_AGENT: &str = concat!("httptail/", env!("CARGO_PKG_VERSION"));

/// Bytes returned for one range request.
#[derive(Debug, Clone, Default)]
pub struct RangeBody {
    pub bytes: Vec<u8>,
    /// `Content-Length` of the answer, when the server sent one.
    pub reported_length: Option<u64>,
}

/// Operations the tailing engine needs from the remote side.
pub trait Transport: Send + Sync {
    /// Current total size of the resource, without transferring its body.
    fn probe_size(&self, locator: &str) -> Result<u64, FetchError>;

    /// Bytes `[start, end)` of the resource. Never returns more than
    /// `end - start` bytes; may return fewer.
    fn fetch_range(&self, locator: &str, start: u64, end: u64) -> Result<RangeBody, FetchError>;

    /// Body of a directory listing, as text.
    fn fetch_listing(&self, locator: &str) -> Result<String, FetchError>;
}

// ── HTTP ────────────────────────────────────────────────────────────

pub struct HttpTransport {
    agent: ureq::Agent,
    headers: Vec<(String, String)>,
}

impl HttpTransport {
    /// `timeout` bounds every call end to end; `headers` are attached to
    /// every request as-is.
    pub fn new(timeout: Duration, headers: &BTreeMap<String, String>) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into();
        Self {
            agent,
            headers: headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    fn decorate<B>(&self, mut request: ureq::RequestBuilder<B>) -> ureq::RequestBuilder<B> {
        request = request.header("User-Agent", USER_AGENT);
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        request
    }
}

impl Transport for HttpTransport {
    fn probe_size(&self, locator: &str) -> Result<u64, FetchError> {
        let response = self
            .decorate(self.agent.head(locator))
            .header("Accept-Encoding", "identity")
            .call()
            .map_err(unreachable)?;
        require_success(&response)?;
        content_length(&response).ok_or(FetchError::MissingLength)
    }

    fn fetch_range(&self, locator: &str, start: u64, end: u64) -> Result<RangeBody, FetchError> {
        let wanted = end.saturating_sub(start);
        if wanted == 0 {
            return Ok(RangeBody {
                bytes: Vec::new(),
                reported_length: Some(0),
            });
        }

        let mut response = self
            .decorate(self.agent.get(locator))
            .header("Range", format!("bytes={}-{}", start, end - 1))
            .header("Accept-Encoding", "identity")
            .call()
            .map_err(unreachable)?;
        require_success(&response)?;

        let reported_length = content_length(&response);
        let partial = response.status() == StatusCode::PARTIAL_CONTENT;
        let mut reader = response.body_mut().as_reader();

        if !partial {
            // Range ignored: the body is the whole representation.
            log::debug!("{locator} ignored the Range header, cutting [{start}, {end}) locally");
            std::io::copy(&mut reader.by_ref().take(start), &mut std::io::sink())
                .map_err(|e| FetchError::Unreachable(e.to_string()))?;
        }

        let mut bytes = Vec::with_capacity(wanted.min(1 << 20) as usize);
        reader
            .take(wanted)
            .read_to_end(&mut bytes)
            .map_err(|e| FetchError::Unreachable(e.to_string()))?;

        Ok(RangeBody {
            bytes,
            reported_length,
        })
    }

    fn fetch_listing(&self, locator: &str) -> Result<String, FetchError> {
        let mut response = self
            .decorate(self.agent.get(locator))
            .call()
            .map_err(unreachable)?;
        require_success(&response)?;
        response.body_mut().read_to_string().map_err(unreachable)
    }
}

fn unreachable(err: ureq::Error) -> FetchError {
    FetchError::Unreachable(err.to_string())
}

fn require_success<B>(response: &Response<B>) -> Result<(), FetchError> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        Err(FetchError::Unexpected {
            status: status.as_u16(),
        })
    }
}

fn content_length<B>(response: &Response<B>) -> Option<u64> {
    response
        .headers()
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::{BufRead, BufReader, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::{Arc, Mutex};

    const BODY: &[u8] = b"alpha\nbeta\ngamma\n";
    const LISTING: &str = "<html><body><A HREF=\"app.log\">app.log</A></body></html>";

    /// Minimal HTTP/1.1 server: one request per connection.
    struct FakeServer {
        base: String,
        seen_headers: Arc<Mutex<Vec<String>>>,
    }

    impl FakeServer {
        fn start(honor_ranges: bool) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let base = format!("http://{}", listener.local_addr().unwrap());
            let seen_headers = Arc::new(Mutex::new(Vec::new()));
            let seen = Arc::clone(&seen_headers);
            std::thread::spawn(move || {
                for stream in listener.incoming().flatten() {
                    handle(stream, honor_ranges, &seen);
                }
            });
            Self { base, seen_headers }
        }

        fn url(&self, path: &str) -> String {
            format!("{}{path}", self.base)
        }

        fn saw_header(&self, name: &str, value: &str) -> bool {
            self.seen_headers.lock().unwrap().iter().any(|line| {
                line.split_once(':').is_some_and(|(n, v)| {
                    n.trim().eq_ignore_ascii_case(name) && v.trim() == value
                })
            })
        }
    }

    fn handle(mut stream: TcpStream, honor_ranges: bool, seen: &Mutex<Vec<String>>) {
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut request_line = String::new();
        if reader.read_line(&mut request_line).unwrap_or(0) == 0 {
            return;
        }
        let mut range = None;
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).unwrap_or(0) == 0 {
                break;
            }
            let line = line.trim_end().to_string();
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                if name.trim().eq_ignore_ascii_case("range") {
                    range = parse_range(value.trim());
                }
            }
            seen.lock().unwrap().push(line);
        }

        let mut parts = request_line.split_whitespace();
        let method = parts.next().unwrap_or("");
        let path = parts.next().unwrap_or("");

        let response: Vec<u8> = match (method, path) {
            ("HEAD", "/app.log") => {
                format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n", BODY.len())
                    .into_bytes()
            }
            ("GET", "/app.log") => match range {
                Some((start, last)) if honor_ranges => {
                    let last = last.min(BODY.len() - 1);
                    let slice = &BODY[start..=last];
                    let mut out = format!(
                        "HTTP/1.1 206 Partial Content\r\nContent-Range: bytes {start}-{last}/{}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        BODY.len(),
                        slice.len()
                    )
                    .into_bytes();
                    out.extend_from_slice(slice);
                    out
                }
                _ => {
                    let mut out = format!(
                        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        BODY.len()
                    )
                    .into_bytes();
                    out.extend_from_slice(BODY);
                    out
                }
            },
            ("GET", "/logs/") => format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{LISTING}",
                LISTING.len()
            )
            .into_bytes(),
            _ => b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_vec(),
        };
        let _ = stream.write_all(&response);
        let _ = stream.flush();
    }

    fn parse_range(value: &str) -> Option<(usize, usize)> {
        let range = value.strip_prefix("bytes=")?;
        let (start, last) = range.split_once('-')?;
        Some((start.parse().ok()?, last.parse().ok()?))
    }

    fn transport() -> HttpTransport {
        let mut headers = BTreeMap::new();
        headers.insert("Authorization".to_string(), "Basic dGFpbDp0YWls".to_string());
        HttpTransport::new(Duration::from_secs(5), &headers)
    }

    #[test]
    fn probe_reads_content_length() {
        let server = FakeServer::start(true);
        let size = transport().probe_size(&server.url("/app.log")).unwrap();
        assert_eq!(size, BODY.len() as u64);
    }

    #[test]
    fn range_fetch_returns_exact_window() {
        let server = FakeServer::start(true);
        let body = transport().fetch_range(&server.url("/app.log"), 6, 11).unwrap();
        assert_eq!(body.bytes, b"beta\n");
        assert_eq!(body.reported_length, Some(5));
        assert!(server.saw_header("range", "bytes=6-10"));
        assert!(server.saw_header("authorization", "Basic dGFpbDp0YWls"));
    }

    #[test]
    fn window_is_cut_locally_when_server_ignores_ranges() {
        let server = FakeServer::start(false);
        let body = transport().fetch_range(&server.url("/app.log"), 6, 11).unwrap();
        assert_eq!(body.bytes, b"beta\n");
        assert_eq!(body.reported_length, Some(BODY.len() as u64));
    }

    #[test]
    fn empty_range_makes_no_request() {
        let body = transport()
            .fetch_range("http://127.0.0.1:9/never", 10, 10)
            .unwrap();
        assert!(body.bytes.is_empty());
    }

    #[test]
    fn non_success_status_is_unexpected() {
        let server = FakeServer::start(true);
        let t = transport();
        assert!(matches!(
            t.probe_size(&server.url("/missing.log")),
            Err(FetchError::Unexpected { status: 404 })
        ));
        assert!(matches!(
            t.fetch_range(&server.url("/missing.log"), 0, 10),
            Err(FetchError::Unexpected { status: 404 })
        ));
    }

    #[test]
    fn refused_connection_is_unreachable() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let err = transport()
            .probe_size(&format!("http://127.0.0.1:{port}/app.log"))
            .unwrap_err();
        assert!(err.is_unreachable(), "got {err:?}");
    }

    #[test]
    fn listing_body_is_returned_as_text() {
        let server = FakeServer::start(true);
        let body = transport().fetch_listing(&server.url("/logs/")).unwrap();
        assert_eq!(body, LISTING);
    }
}
