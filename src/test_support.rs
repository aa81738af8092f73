// Loopback HTTP server for exercising the reqwest-based clients in tests,
// plus a scripted ranking source for driving the pipeline without a network.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::dongchedi_api::{PageQuery, RankingSource};
use crate::error::FetchError;
use crate::models::RankPage;

/// One request as received by [`canned_server`].
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub request_line: String,
    pub head: String,
    pub body: String,
}

impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim().eq_ignore_ascii_case(name).then(|| value.trim())
        })
    }
}

/// Answers one connection per scripted `(status, body)` pair, in order.
/// The returned handle yields every captured request once the script is done.
pub async fn canned_server(responses: Vec<(u16, &'static str)>) -> (String, JoinHandle<Vec<CapturedRequest>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let handle = tokio::spawn(async move {
        let mut captured = Vec::new();
        for (status, body) in responses {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            let head_end = loop {
                let n = socket.read(&mut chunk).await.unwrap();
                assert!(n > 0, "connection closed before headers were complete");
                buf.extend_from_slice(&chunk[..n]);
                if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                    break pos + 4;
                }
            };
            let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
            let content_length = head
                .lines()
                .find_map(|line| {
                    let (key, value) = line.split_once(':')?;
                    key.trim().eq_ignore_ascii_case("content-length").then(|| value.trim().parse::<usize>().ok())?
                })
                .unwrap_or(0);
            while buf.len() < head_end + content_length {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            captured.push(CapturedRequest {
                request_line: head.lines().next().unwrap_or_default().to_string(),
                body: String::from_utf8_lossy(&buf[head_end..]).to_string(),
                head,
            });

            let response = format!(
                "HTTP/1.1 {status} Canned\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        }
        captured
    });
    (base_url, handle)
}

/// A client that never routes loopback traffic through an ambient proxy.
pub fn direct_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// Replays scripted pages and records every query it receives. Once the
/// script runs out every further page is empty.
pub struct ScriptedSource {
    pages: Mutex<VecDeque<Result<RankPage, FetchError>>>,
    queries: Mutex<Vec<PageQuery>>,
}

impl ScriptedSource {
    pub fn new(pages: Vec<Result<RankPage, FetchError>>) -> Self {
        Self {
            pages: Mutex::new(pages.into()),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<PageQuery> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl RankingSource for ScriptedSource {
    async fn fetch_page(&self, query: &PageQuery) -> Result<RankPage, FetchError> {
        self.queries.lock().unwrap().push(*query);
        self.pages
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(RankPage::default()))
    }
}
