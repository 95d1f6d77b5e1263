//! Blocking fetch facade.
//!
//! Wraps the async [`HttpFetcher`](crate::HttpFetcher) in a private tokio
//! runtime so synchronous code can issue requests:
//!
//! ```ignore
//! use http_fetch::blocking::HttpFetcher;
//! use http_fetch::FetchOptions;
//!
//! let fetcher = HttpFetcher::with_defaults()?;
//! let response = fetcher.fetch(FetchOptions::parse("http://nvr.local/api")?.json())?;
//! println!("{}", response.body);
//! ```
//!
//! None of these methods may be called from within an async task.

use std::io::{self, Read};
use std::sync::Arc;

use bytes::{Buf, Bytes};
use tokio::runtime::Runtime;

use crate::codec::{ByteStream, Readable, ResponseBody, ResponseType};
use crate::config::FetcherConfig;
use crate::error::Result;
use crate::types::{FetchOptions, HttpFetchResponse, ResponseTypeTag};

pub struct HttpFetcher {
    runtime: Arc<Runtime>,
    inner: crate::HttpFetcher,
}

impl HttpFetcher {
    pub fn new(config: FetcherConfig) -> Result<Self> {
        // One worker keeps I/O progressing for readers between calls.
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("http-fetch-blocking")
            .enable_all()
            .build()?;

        Ok(Self {
            runtime: Arc::new(runtime),
            inner: crate::HttpFetcher::new(config),
        })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(FetcherConfig::default())
    }

    /// Block until the response is fully received and decoded.
    pub fn fetch<R: ResponseType>(
        &self,
        options: FetchOptions<R>,
    ) -> Result<HttpFetchResponse<R::Output>> {
        self.runtime.block_on(self.inner.fetch(options))
    }

    pub fn fetch_dynamic<R>(
        &self,
        options: FetchOptions<R>,
        tag: ResponseTypeTag,
    ) -> Result<HttpFetchResponse<ResponseBody>> {
        self.runtime.block_on(self.inner.fetch_dynamic(options, tag))
    }

    /// Block until the response head arrives, then hand back the body as a
    /// [`std::io::Read`] that pulls from the connection on demand.
    pub fn fetch_reader(
        &self,
        options: FetchOptions<Readable>,
    ) -> Result<HttpFetchResponse<BodyReader>> {
        let response = self.runtime.block_on(self.inner.fetch(options))?;
        let runtime = self.runtime.clone();
        Ok(response.map(|stream| BodyReader::new(stream, runtime)))
    }
}

/// Synchronous reader over a live response body.
pub struct BodyReader {
    stream: ByteStream,
    pending: Bytes,
    runtime: Arc<Runtime>,
    done: bool,
}

impl BodyReader {
    fn new(stream: ByteStream, runtime: Arc<Runtime>) -> Self {
        Self {
            stream,
            pending: Bytes::new(),
            runtime,
            done: false,
        }
    }
}

impl Read for BodyReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pending.is_empty() {
            if self.done {
                return Ok(0);
            }
            match self.runtime.block_on(self.stream.chunk()) {
                Ok(Some(chunk)) => self.pending = chunk,
                Ok(None) => self.done = true,
                Err(e) => return Err(io::Error::other(e)),
            }
        }
        let len = buf.len().min(self.pending.len());
        buf[..len].copy_from_slice(&self.pending[..len]);
        self.pending.advance(len);
        Ok(len)
    }
}
