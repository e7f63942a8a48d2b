//! Common test utilities for integration tests

use async_trait::async_trait;
use pa_opendata_cli::downloader::Fetcher;
use pa_opendata_cli::errors::{FetchError, FetchErrorKind};
use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

/// Helper function to create a test ZIP file with specified files
#[allow(dead_code)]
pub fn create_test_zip(
    zip_path: &Path,
    files: &[(&str, &str)],
) -> Result<(), Box<dyn std::error::Error>> {
    fs::write(zip_path, zip_bytes(files))?;
    Ok(())
}

/// In-memory ZIP archive with the given entries
#[allow(dead_code)]
pub fn zip_bytes(files: &[(&str, &str)]) -> Vec<u8> {
    use zip::write::FileOptions;
    use zip::ZipWriter;

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for (name, content) in files {
        zip.start_file(*name, options).unwrap();
        zip.write_all(content.as_bytes()).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// Fetcher serving canned bodies; unknown URLs answer 404.
#[allow(dead_code)]
#[derive(Default)]
pub struct MockFetcher {
    bodies: HashMap<String, Vec<u8>>,
    calls: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

#[allow(dead_code)]
impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_body(mut self, url: &str, body: impl Into<Vec<u8>>) -> Self {
        self.bodies.insert(url.to_string(), body.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str, dest: &mut tokio::fs::File) -> Result<u64, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let body = self
            .bodies
            .get(url)
            .ok_or_else(|| FetchError::new(url, FetchErrorKind::Status(404)))?;
        let io = |e: std::io::Error| FetchError::new(url, FetchErrorKind::Io(e.to_string()));
        dest.set_len(0).await.map_err(io)?;
        dest.seek(SeekFrom::Start(0)).await.map_err(io)?;
        dest.write_all(body).await.map_err(io)?;
        dest.flush().await.map_err(io)?;
        Ok(body.len() as u64)
    }
}

/// Runs `fetcher` into an anonymous temp file and returns what it wrote.
#[allow(dead_code)]
pub async fn fetch_bytes(fetcher: &dyn Fetcher, url: &str) -> Result<Vec<u8>, FetchError> {
    let mut dest = tokio::fs::File::from_std(tempfile::tempfile().unwrap());
    let written = fetcher.fetch(url, &mut dest).await?;
    dest.seek(SeekFrom::Start(0)).await.unwrap();
    let mut body = Vec::new();
    dest.read_to_end(&mut body).await.unwrap();
    assert_eq!(body.len() as u64, written);
    Ok(body)
}

/// A localhost URL nothing listens on.
#[allow(dead_code)]
pub async fn unreachable_url(path: &str) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}{path}")
}

/// Minimal HTTP/1.1 server on localhost.
///
/// `routes` maps a request path to a status code and body; other paths get
/// 404. Returns the base URL and a counter of requests served.
#[allow(dead_code)]
pub async fn serve(routes: Vec<(&'static str, u16, Vec<u8>)>) -> (String, Arc<AtomicUsize>) {
    use tokio::net::TcpListener;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let routes = Arc::new(routes);

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let routes = routes.clone();
            let counter = counter.clone();
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                counter.fetch_add(1, Ordering::SeqCst);

                let text = String::from_utf8_lossy(&request);
                let path = text.split_whitespace().nth(1).unwrap_or("/").to_string();
                let (status, body) = routes
                    .iter()
                    .find(|(p, _, _)| *p == path)
                    .map(|(_, s, b)| (*s, b.clone()))
                    .unwrap_or((404, b"not found".to_vec()));

                let head = format!(
                    "HTTP/1.1 {status} X\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    body.len()
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(&body).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (base, hits)
}
