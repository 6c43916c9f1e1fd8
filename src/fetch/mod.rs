// src/fetch/mod.rs

use std::future::Future;

use futures::stream::BoxStream;
use tracing::debug;

use crate::error::{IngestError, IngestResult};

/// Chunks of raw bytes in arrival order.
pub type ChunkStream = BoxStream<'static, IngestResult<Vec<u8>>>;

/// An opened byte source.
pub struct OpenedSource {
    /// Expected length in bytes, `0` when the source gives no hint.
    pub total_bytes: u64,
    /// Incremental body, `None` when the source can only be read whole.
    pub body: Option<ChunkStream>,
}

/// Something CSV bytes can be streamed from.
pub trait ByteSource: Send + Sync {
    /// Human-readable location used in errors and logs.
    fn location(&self) -> String;

    fn open(&self) -> impl Future<Output = IngestResult<OpenedSource>> + Send;
}

/// Module for streaming a CSV over HTTP
pub mod http {
    use super::*;
    use futures::StreamExt;
    use reqwest::{Client, StatusCode};
    use url::Url;

    #[derive(Debug, Clone)]
    pub struct HttpSource {
        client: Client,
        url: Url,
    }

    impl HttpSource {
        pub fn new(client: Client, url: Url) -> Self {
            Self { client, url }
        }
    }

    impl ByteSource for HttpSource {
        fn location(&self) -> String {
            self.url.to_string()
        }

        async fn open(&self) -> IngestResult<OpenedSource> {
            let location = self.location();
            let resp = self
                .client
                .get(self.url.clone())
                .send()
                .await
                .map_err(|e| IngestError::source_failure(&location, e))?;

            let status = resp.status();
            if !status.is_success() {
                return Err(IngestError::source_failure(
                    location,
                    format!("HTTP error: {}", status),
                ));
            }

            let total_bytes = resp.content_length().unwrap_or(0);
            debug!(url = %location, total_bytes, %status, "response headers received");

            if matches!(status, StatusCode::NO_CONTENT | StatusCode::RESET_CONTENT) {
                return Ok(OpenedSource {
                    total_bytes,
                    body: None,
                });
            }

            let body = resp
                .bytes_stream()
                .map(move |chunk| {
                    chunk
                        .map(|b| b.to_vec())
                        .map_err(|e| IngestError::source_failure(location.clone(), e))
                })
                .boxed();

            Ok(OpenedSource {
                total_bytes,
                body: Some(body),
            })
        }
    }
}

/// Module for streaming a CSV from local disk
pub mod file {
    use super::*;
    use futures::{stream, StreamExt};
    use std::path::PathBuf;
    use tokio::{fs::File, io::AsyncReadExt};

    pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

    #[derive(Debug, Clone)]
    pub struct FileSource {
        path: PathBuf,
        chunk_size: usize,
    }

    impl FileSource {
        pub fn new(path: impl Into<PathBuf>) -> Self {
            Self {
                path: path.into(),
                chunk_size: DEFAULT_CHUNK_SIZE,
            }
        }

        pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
            self.chunk_size = chunk_size.max(1);
            self
        }
    }

    impl ByteSource for FileSource {
        fn location(&self) -> String {
            self.path.display().to_string()
        }

        async fn open(&self) -> IngestResult<OpenedSource> {
            let location = self.location();
            let file = File::open(&self.path)
                .await
                .map_err(|e| IngestError::source_failure(&location, e))?;
            let meta = file
                .metadata()
                .await
                .map_err(|e| IngestError::source_failure(&location, e))?;
            if meta.is_dir() {
                return Err(IngestError::source_failure(location, "is a directory"));
            }
            debug!(path = %location, total_bytes = meta.len(), "opened file");

            let chunk_size = self.chunk_size;
            let body = stream::unfold(Some(file), move |state| {
                let location = location.clone();
                async move {
                    let mut file = state?;
                    let mut buf = vec![0u8; chunk_size];
                    match file.read(&mut buf).await {
                        Ok(0) => None,
                        Ok(n) => {
                            buf.truncate(n);
                            Some((Ok(buf), Some(file)))
                        }
                        Err(e) => Some((Err(IngestError::source_failure(location, e)), None)),
                    }
                }
            })
            .boxed();

            Ok(OpenedSource {
                total_bytes: meta.len(),
                body: Some(body),
            })
        }
    }
}

/// Module for serving bytes already held in memory
pub mod memory {
    use super::*;
    use futures::{stream, StreamExt};

    /// Replays a fixed list of chunks. Handy for embedding data and for exercising chunk
    /// boundaries.
    #[derive(Debug, Clone)]
    pub struct MemorySource {
        chunks: Vec<Vec<u8>>,
        streaming: bool,
        announce_length: bool,
    }

    impl MemorySource {
        pub fn new(chunks: Vec<Vec<u8>>) -> Self {
            Self {
                chunks,
                streaming: true,
                announce_length: true,
            }
        }

        /// Split `data` into chunks of `size` bytes, ignoring UTF-8 boundaries.
        pub fn chunked(data: &[u8], size: usize) -> Self {
            Self::new(data.chunks(size.max(1)).map(<[u8]>::to_vec).collect())
        }

        /// Behave like an environment that cannot stream the body.
        pub fn without_streaming(mut self) -> Self {
            self.streaming = false;
            self
        }

        /// Do not report a total length.
        pub fn without_length(mut self) -> Self {
            self.announce_length = false;
            self
        }
    }

    impl ByteSource for MemorySource {
        fn location(&self) -> String {
            "memory".to_string()
        }

        async fn open(&self) -> IngestResult<OpenedSource> {
            let total_bytes = if self.announce_length {
                self.chunks.iter().map(|c| c.len() as u64).sum()
            } else {
                0
            };
            let body = self.streaming.then(|| {
                stream::iter(self.chunks.clone().into_iter().map(Ok::<_, IngestError>)).boxed()
            });
            Ok(OpenedSource { total_bytes, body })
        }
    }
}

pub use file::FileSource;
pub use http::HttpSource;
pub use memory::MemorySource;

/// A source chosen from a location string: `http(s)://` URLs stream over HTTP, `file://` URLs
/// and everything else are read from disk.
#[derive(Debug, Clone)]
pub enum Source {
    Http(HttpSource),
    File(FileSource),
}

impl Source {
    pub fn parse(location: &str, client: &reqwest::Client) -> Self {
        match url::Url::parse(location) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {
                Source::Http(HttpSource::new(client.clone(), url))
            }
            Ok(url) if url.scheme() == "file" => match url.to_file_path() {
                Ok(path) => Source::File(FileSource::new(path)),
                Err(()) => Source::File(FileSource::new(location)),
            },
            _ => Source::File(FileSource::new(location)),
        }
    }
}

impl ByteSource for Source {
    fn location(&self) -> String {
        match self {
            Source::Http(s) => s.location(),
            Source::File(s) => s.location(),
        }
    }

    async fn open(&self) -> IngestResult<OpenedSource> {
        match self {
            Source::Http(s) => s.open().await,
            Source::File(s) => s.open().await,
        }
    }
}
