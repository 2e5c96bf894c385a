use std::collections::{HashMap, VecDeque};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

#[derive(Debug, Clone)]
struct ScriptedResponse {
    status_line: String,
    body: String,
}

type Routes = Arc<Mutex<HashMap<(String, String), VecDeque<ScriptedResponse>>>>;

/// Scripted HTTP mock of the conversation API.
///
/// Each `respond` call queues one answer for a method and path; requests with nothing
/// queued get a 404. Every request is captured, in arrival order.
pub struct MockApi {
    base_url: String,
    routes: Routes,
    requests: mpsc::Receiver<CapturedRequest>,
}

impl MockApi {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
        let addr = listener.local_addr().expect("read mock server addr");
        let routes: Routes = Arc::new(Mutex::new(HashMap::new()));
        let (tx, rx) = mpsc::channel();

        let routes_for_server = routes.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else {
                    continue;
                };
                let Some(req) = read_http_request(&mut stream) else {
                    continue;
                };
                let scripted = routes_for_server
                    .lock()
                    .expect("routes lock")
                    .get_mut(&(req.method.clone(), req.path.clone()))
                    .and_then(VecDeque::pop_front);
                let resp = scripted.unwrap_or_else(|| ScriptedResponse {
                    status_line: "404 Not Found".into(),
                    body: r#"{"error":"no scripted response"}"#.into(),
                });
                if tx.send(req).is_err() {
                    return;
                }
                write_response(&mut stream, &resp);
            }
        });

        Self {
            base_url: format!("http://{addr}"),
            routes,
            requests: rx,
        }
    }

    pub fn url(&self) -> &str {
        &self.base_url
    }

    /// Queue one response for `method path`, e.g. `respond("GET", "/jobs/completed", "200 OK", "[]")`.
    pub fn respond(&self, method: &str, path: &str, status_line: &str, body: &str) {
        self.routes
            .lock()
            .expect("routes lock")
            .entry((method.to_string(), path.to_string()))
            .or_default()
            .push_back(ScriptedResponse {
                status_line: status_line.to_string(),
                body: body.to_string(),
            });
    }

    pub fn next_request(&self, timeout: Duration) -> Option<CapturedRequest> {
        self.requests.recv_timeout(timeout).ok()
    }

    /// Everything captured so far, without waiting.
    pub fn drain_requests(&self) -> Vec<CapturedRequest> {
        self.requests.try_iter().collect()
    }
}

fn write_response(stream: &mut TcpStream, resp: &ScriptedResponse) {
    let response = format!(
        "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
        resp.status_line,
        resp.body.len(),
        resp.body
    );
    let _ = stream.write_all(response.as_bytes());
}

/// Reads one request: headers up to the blank line, then `content-length` body bytes.
/// `None` when the peer hangs up before a full head arrives.
fn read_http_request(stream: &mut TcpStream) -> Option<CapturedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let (head_len, headers) = loop {
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(idx) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break (idx + 4, String::from_utf8_lossy(&buf[..idx]).into_owned());
        }
    };

    let mut lines = headers.lines();
    let mut parts = lines.next()?.split_whitespace();
    let method = parts.next()?.to_string();
    let path = parts.next()?.to_string();
    let headers: HashMap<String, String> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();

    let content_length = headers
        .get("content-length")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < head_len + content_length {
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body_end = buf.len().min(head_len + content_length);
    let body = String::from_utf8_lossy(&buf[head_len..body_end]).into_owned();

    Some(CapturedRequest {
        method,
        path,
        headers,
        body,
    })
}
