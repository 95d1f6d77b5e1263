//! Response body parsers and request body normalization.
//!
//! Each response type is its own [`FetchParser`]: [`Buffer`] collects raw
//! bytes, [`Text`] decodes them as UTF-8, [`Json`] parses them as JSON and
//! [`Readable`] hands the live stream back untouched. None of them builds on
//! another's trait impl; the buffering ones share [`ByteStream::collect_bytes`].
//!
//! Buffering parsers impose no size cap. Callers fetching from untrusted
//! servers should prefer [`Readable`] and bound the read themselves.

use std::fmt;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, BoxStream, Stream, StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{BoxError, Error, Result};
use crate::types::ResponseTypeTag;

/// A forward-only, non-restartable sequence of byte chunks.
///
/// Ends when the underlying source signals end-of-body and keeps returning
/// `None` afterwards. Dropping it releases the source (for a response, the
/// connection).
pub struct ByteStream {
    inner: BoxStream<'static, Result<Bytes>>,
}

impl ByteStream {
    /// Wrap any fallible stream of byte chunks.
    pub fn from_stream<S, B, E>(source: S) -> Self
    where
        S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
        B: Into<Bytes> + 'static,
        E: Into<BoxError> + 'static,
    {
        Self {
            inner: source
                .map_ok(Into::<Bytes>::into)
                .map_err(|e| Error::Stream(e.into()))
                .fuse()
                .boxed(),
        }
    }

    /// A stream that yields `data` once, then ends.
    pub fn once(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            inner: stream::once(async move { Ok(data) }).boxed(),
        }
    }

    pub fn empty() -> Self {
        Self {
            inner: stream::empty().boxed(),
        }
    }

    pub(crate) fn from_response(response: reqwest::Response, timeout: Option<Duration>) -> Self {
        Self {
            inner: response
                .bytes_stream()
                .map_err(move |e| Error::from_transport(e, timeout))
                .fuse()
                .boxed(),
        }
    }

    /// Next chunk, or `None` once the body has ended.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>> {
        self.inner.next().await.transpose()
    }

    /// Read to the end, concatenating chunks in arrival order.
    // TODO: accept a maximum-size guard so buffering parsers can refuse oversized bodies.
    pub async fn collect_bytes(mut self) -> Result<Bytes> {
        let mut buffer = BytesMut::new();
        while let Some(chunk) = self.chunk().await? {
            buffer.extend_from_slice(&chunk);
        }
        Ok(buffer.freeze())
    }

    /// Read to the end and discard everything. Returns the number of bytes dropped.
    pub async fn drain(mut self) -> Result<u64> {
        let mut discarded = 0u64;
        while let Some(chunk) = self.chunk().await? {
            discarded += chunk.len() as u64;
        }
        Ok(discarded)
    }
}

impl Stream for ByteStream {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteStream").finish_non_exhaustive()
    }
}

/// Turns a response byte stream into a typed body.
#[async_trait]
pub trait FetchParser: Send + Sync {
    type Output: Send;

    async fn parse(&self, body: ByteStream) -> Result<Self::Output>;
}

/// A parser that also names its response type, which decides the default
/// `Accept` header.
pub trait ResponseType: FetchParser {
    fn tag(&self) -> ResponseTypeTag;
}

/// Raw bytes. The default response type.
#[derive(Debug, Clone, Copy, Default)]
pub struct Buffer;

/// UTF-8 text. Invalid sequences are replaced with U+FFFD.
#[derive(Debug, Clone, Copy, Default)]
pub struct Text;

/// A JSON document deserialized into `T`.
pub struct Json<T = serde_json::Value> {
    target: PhantomData<fn() -> T>,
}

/// The live response stream, unconsumed. The caller must drain or drop it.
#[derive(Debug, Clone, Copy, Default)]
pub struct Readable;

impl<T> Json<T> {
    pub fn new() -> Self {
        Self {
            target: PhantomData,
        }
    }
}

impl<T> Default for Json<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Json<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> Copy for Json<T> {}

impl<T> fmt::Debug for Json<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Json<{}>", std::any::type_name::<T>())
    }
}

#[async_trait]
impl FetchParser for Buffer {
    type Output = Bytes;

    async fn parse(&self, body: ByteStream) -> Result<Bytes> {
        body.collect_bytes().await
    }
}

#[async_trait]
impl FetchParser for Text {
    type Output = String;

    async fn parse(&self, body: ByteStream) -> Result<String> {
        let bytes = body.collect_bytes().await?;
        Ok(decode_text(bytes))
    }
}

#[async_trait]
impl<T> FetchParser for Json<T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Output = T;

    async fn parse(&self, body: ByteStream) -> Result<T> {
        let bytes = body.collect_bytes().await?;
        serde_json::from_slice(&bytes).map_err(Error::Parse)
    }
}

#[async_trait]
impl FetchParser for Readable {
    type Output = ByteStream;

    async fn parse(&self, body: ByteStream) -> Result<ByteStream> {
        Ok(body)
    }
}

impl ResponseType for Buffer {
    fn tag(&self) -> ResponseTypeTag {
        ResponseTypeTag::Buffer
    }
}

impl ResponseType for Text {
    fn tag(&self) -> ResponseTypeTag {
        ResponseTypeTag::Text
    }
}

impl<T> ResponseType for Json<T>
where
    T: DeserializeOwned + Send + 'static,
{
    fn tag(&self) -> ResponseTypeTag {
        ResponseTypeTag::Json
    }
}

impl ResponseType for Readable {
    fn tag(&self) -> ResponseTypeTag {
        ResponseTypeTag::Readable
    }
}

fn decode_text(bytes: Bytes) -> String {
    match String::from_utf8(bytes.to_vec()) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

/// A body whose representation was chosen at runtime by a [`ResponseTypeTag`].
#[derive(Debug)]
pub enum ResponseBody {
    Buffer(Bytes),
    Text(String),
    Json(serde_json::Value),
    Readable(ByteStream),
}

impl ResponseBody {
    pub fn tag(&self) -> ResponseTypeTag {
        match self {
            ResponseBody::Buffer(_) => ResponseTypeTag::Buffer,
            ResponseBody::Text(_) => ResponseTypeTag::Text,
            ResponseBody::Json(_) => ResponseTypeTag::Json,
            ResponseBody::Readable(_) => ResponseTypeTag::Readable,
        }
    }
}

#[async_trait]
impl FetchParser for ResponseTypeTag {
    type Output = ResponseBody;

    async fn parse(&self, body: ByteStream) -> Result<ResponseBody> {
        Ok(match self {
            ResponseTypeTag::Buffer => ResponseBody::Buffer(Buffer.parse(body).await?),
            ResponseTypeTag::Text => ResponseBody::Text(Text.parse(body).await?),
            ResponseTypeTag::Json => {
                ResponseBody::Json(Json::<serde_json::Value>::new().parse(body).await?)
            }
            ResponseTypeTag::Readable => ResponseBody::Readable(Readable.parse(body).await?),
        })
    }
}

impl ResponseType for ResponseTypeTag {
    fn tag(&self) -> ResponseTypeTag {
        *self
    }
}

const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";
const JSON_CONTENT_TYPE: &str = "application/json";

/// A request body: either an in-memory payload or a live stream.
///
/// Payloads are sent as-is and can be replayed across redirects. Streams are
/// piped to the connection once and never buffered.
pub enum RequestBody {
    Payload {
        data: Bytes,
        /// `Content-Type` to send when the caller set none.
        content_type: Option<&'static str>,
    },
    Stream(ByteStream),
}

impl RequestBody {
    /// Serialize `value` as JSON text.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        let data = serde_json::to_vec(value).map_err(Error::Serialize)?;
        Ok(RequestBody::Payload {
            data: data.into(),
            content_type: Some(JSON_CONTENT_TYPE),
        })
    }

    pub fn bytes(data: impl Into<Bytes>) -> Self {
        RequestBody::Payload {
            data: data.into(),
            content_type: None,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        RequestBody::Payload {
            data: Bytes::from(text.into()),
            content_type: Some(TEXT_CONTENT_TYPE),
        }
    }

    pub fn stream(stream: ByteStream) -> Self {
        RequestBody::Stream(stream)
    }

    /// Content type synthesized for this body, if any.
    pub fn content_type(&self) -> Option<&'static str> {
        match self {
            RequestBody::Payload { content_type, .. } => *content_type,
            RequestBody::Stream(_) => None,
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, RequestBody::Stream(_))
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Payload { data, content_type } => f
                .debug_struct("Payload")
                .field("len", &data.len())
                .field("content_type", content_type)
                .finish(),
            RequestBody::Stream(_) => f.write_str("Stream"),
        }
    }
}

impl From<String> for RequestBody {
    fn from(text: String) -> Self {
        RequestBody::text(text)
    }
}

impl From<&str> for RequestBody {
    fn from(text: &str) -> Self {
        RequestBody::text(text)
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(data: Vec<u8>) -> Self {
        RequestBody::bytes(data)
    }
}

impl From<&'static [u8]> for RequestBody {
    fn from(data: &'static [u8]) -> Self {
        RequestBody::bytes(data)
    }
}

impl From<Bytes> for RequestBody {
    fn from(data: Bytes) -> Self {
        RequestBody::bytes(data)
    }
}

impl From<serde_json::Value> for RequestBody {
    fn from(value: serde_json::Value) -> Self {
        RequestBody::Payload {
            data: value.to_string().into(),
            content_type: Some(JSON_CONTENT_TYPE),
        }
    }
}

impl From<ByteStream> for RequestBody {
    fn from(stream: ByteStream) -> Self {
        RequestBody::Stream(stream)
    }
}

/// A request body ready for the wire.
pub(crate) enum WireBody {
    /// Cheap to clone, so it can be resent after a redirect.
    Replayable(Bytes),
    /// Taken on first send; `None` afterwards.
    Once(Option<ByteStream>),
}

impl WireBody {
    /// Produce the body for the next attempt, or `None` if a stream was already spent.
    pub(crate) fn take(&mut self) -> Option<reqwest::Body> {
        match self {
            WireBody::Replayable(data) => Some(reqwest::Body::from(data.clone())),
            WireBody::Once(stream) => stream.take().map(reqwest::Body::wrap_stream),
        }
    }

    pub(crate) fn is_replayable(&self) -> bool {
        matches!(self, WireBody::Replayable(_))
    }
}

/// Split a request body into its wire form and the content type to default to.
pub(crate) fn normalize_body(body: RequestBody) -> (WireBody, Option<&'static str>) {
    match body {
        RequestBody::Payload { data, content_type } => (WireBody::Replayable(data), content_type),
        RequestBody::Stream(stream) => (WireBody::Once(Some(stream)), None),
    }
}
