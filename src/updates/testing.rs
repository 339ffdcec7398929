//! Throwaway HTTP server for exercising the update pipeline in tests.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Canned response for one request path.
#[derive(Debug, Clone)]
pub struct TestRoute {
    pub path: String,
    pub status: u16,
    pub body: Vec<u8>,
    /// Send `Content-Length`; otherwise the body is delimited by closing the connection
    pub content_length: bool,
    /// `Content-Length` to announce instead of the real body size
    pub declared_length: Option<usize>,
}

impl TestRoute {
    pub fn json(path: &str, body: serde_json::Value) -> Self {
        Self {
            path: path.to_string(),
            status: 200,
            body: body.to_string().into_bytes(),
            content_length: true,
            declared_length: None,
        }
    }

    pub fn bytes(path: &str, body: Vec<u8>) -> Self {
        Self {
            path: path.to_string(),
            status: 200,
            body,
            content_length: true,
            declared_length: None,
        }
    }

    pub fn status(path: &str, status: u16) -> Self {
        Self {
            path: path.to_string(),
            status,
            body: b"{\"message\":\"nope\"}".to_vec(),
            content_length: true,
            declared_length: None,
        }
    }

    pub fn without_length(mut self) -> Self {
        self.content_length = false;
        self
    }

    /// Announce `declared` bytes but close the connection after the real body.
    pub fn truncated(mut self, declared: usize) -> Self {
        self.content_length = true;
        self.declared_length = Some(declared);
        self
    }
}

/// Serve `routes` on an ephemeral port and return the base URL.
///
/// Unknown paths get a 404. The server runs until the test runtime shuts down.
pub async fn serve(routes: Vec<TestRoute>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind test server");
    let addr = listener.local_addr().expect("failed to read local addr");
    let routes = Arc::new(routes);

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let routes = routes.clone();
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }

                let head = String::from_utf8_lossy(&request);
                let path = head
                    .lines()
                    .next()
                    .and_then(|line| line.split_whitespace().nth(1))
                    .unwrap_or("/")
                    .to_string();

                let route = routes
                    .iter()
                    .find(|r| r.path == path)
                    .cloned()
                    .unwrap_or_else(|| TestRoute::status(&path, 404));

                let mut response = format!(
                    "HTTP/1.1 {} Test\r\nContent-Type: application/octet-stream\r\nConnection: close\r\n",
                    route.status
                );
                if route.content_length {
                    let length = route.declared_length.unwrap_or(route.body.len());
                    response.push_str(&format!("Content-Length: {length}\r\n"));
                }
                response.push_str("\r\n");

                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.write_all(&route.body).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    format!("http://{addr}")
}
