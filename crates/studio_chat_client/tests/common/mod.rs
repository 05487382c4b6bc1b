//! Minimal in-process HTTP/1.1 server for integration tests. Each accepted
//! connection gets the next canned response, written chunk by chunk, then the
//! connection is closed.
#![allow(dead_code)]

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// One response to play back.
pub struct Canned {
    pub status: u16,
    pub content_type: &'static str,
    pub chunks: Vec<Vec<u8>>,
    /// Advertise this Content-Length instead of closing to end the body.
    /// A value larger than the bytes sent simulates a connection cut mid-stream.
    pub declared_len: Option<usize>,
}

impl Canned {
    pub fn sse(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            status: 200,
            content_type: "text/event-stream",
            chunks,
            declared_len: None,
        }
    }

    pub fn json(body: &str) -> Self {
        Self {
            status: 200,
            content_type: "application/json",
            chunks: vec![body.as_bytes().to_vec()],
            declared_len: Some(body.len()),
        }
    }

    pub fn status(status: u16, body: &str) -> Self {
        Self {
            status,
            ..Self::json(body)
        }
    }
}

/// What the server saw for one request.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub body: String,
}

/// Split `body` into pieces of `size` bytes, ignoring character boundaries.
pub fn split_every(body: &str, size: usize) -> Vec<Vec<u8>> {
    body.as_bytes().chunks(size).map(<[u8]>::to_vec).collect()
}

/// Frame each JSON value as `data: <json>\n\n`.
pub fn sse_body(events: &[serde_json::Value]) -> String {
    events.iter().map(|e| format!("data: {}\n\n", e)).collect()
}

async fn read_request(tcp: &mut TcpStream) -> Option<Recorded> {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 4096];
    let header_end = loop {
        let n = tcp.read(&mut tmp).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&tmp[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.lines();
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();
    let content_length = lines
        .filter_map(|l| l.split_once(':'))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < header_end + content_length {
        let n = tcp.read(&mut tmp).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&tmp[..n]);
    }
    let body = String::from_utf8_lossy(&buf[header_end..]).to_string();
    Some(Recorded { method, path, body })
}

async fn write_response(tcp: &mut TcpStream, canned: Canned) {
    let mut head = format!(
        "HTTP/1.1 {} X\r\nContent-Type: {}\r\nConnection: close\r\n",
        canned.status, canned.content_type
    );
    if let Some(len) = canned.declared_len {
        head.push_str(&format!("Content-Length: {}\r\n", len));
    }
    head.push_str("\r\n");
    if tcp.write_all(head.as_bytes()).await.is_err() {
        return;
    }
    for chunk in canned.chunks {
        if tcp.write_all(&chunk).await.is_err() {
            return;
        }
        let _ = tcp.flush().await;
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    let _ = tcp.shutdown().await;
}

/// Serve `responses` in order, one per connection. Returns the API base URL
/// and a receiver of recorded requests.
pub async fn serve(responses: Vec<Canned>) -> (String, mpsc::UnboundedReceiver<Recorded>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        for canned in responses {
            let Ok((mut tcp, _)) = listener.accept().await else {
                return;
            };
            if let Some(recorded) = read_request(&mut tcp).await {
                let _ = tx.send(recorded);
            }
            write_response(&mut tcp, canned).await;
        }
    });
    (format!("http://127.0.0.1:{}/api", port), rx)
}

/// [`serve`] on its own thread and runtime, for tests that run the binary.
pub fn serve_in_thread(responses: Vec<Canned>) -> (String, std::thread::JoinHandle<()>) {
    let (url_tx, url_rx) = std::sync::mpsc::channel();
    let handle = std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let (url, mut requests) = serve(responses).await;
            url_tx.send(url).unwrap();
            // Keep the runtime alive until the server task has answered everything.
            while requests.recv().await.is_some() {}
        });
    });
    (url_rx.recv().unwrap(), handle)
}
