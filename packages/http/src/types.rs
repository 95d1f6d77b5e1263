use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use http::Method;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::codec::{Buffer, Json, Readable, RequestBody, ResponseType, Text};
use crate::error::Error;
use crate::headers::HeaderMultimap;

/// Accept value sent when the caller set none and no specific type applies.
pub const ACCEPT_ANY: &str = "*/*";

/// Which representation the response body is decoded into.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResponseTypeTag {
    #[default]
    Buffer,
    Text,
    Json,
    Readable,
}

impl ResponseTypeTag {
    /// `Accept` header injected when the caller did not provide one.
    pub fn default_accept(self) -> &'static str {
        match self {
            ResponseTypeTag::Json => "application/json",
            ResponseTypeTag::Buffer | ResponseTypeTag::Text | ResponseTypeTag::Readable => {
                ACCEPT_ANY
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResponseTypeTag::Buffer => "buffer",
            ResponseTypeTag::Text => "text",
            ResponseTypeTag::Json => "json",
            ResponseTypeTag::Readable => "readable",
        }
    }
}

impl fmt::Display for ResponseTypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResponseTypeTag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buffer" => Ok(ResponseTypeTag::Buffer),
            "text" => Ok(ResponseTypeTag::Text),
            "json" => Ok(ResponseTypeTag::Json),
            "readable" => Ok(ResponseTypeTag::Readable),
            other => Err(Error::UnknownResponseType {
                name: other.to_string(),
            }),
        }
    }
}

/// IP address family used for the outbound connection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    #[serde(rename = "4")]
    V4,
    #[serde(rename = "6")]
    V6,
}

impl TryFrom<u8> for AddressFamily {
    type Error = Error;

    fn try_from(family: u8) -> Result<Self, Self::Error> {
        match family {
            4 => Ok(AddressFamily::V4),
            6 => Ok(AddressFamily::V6),
            other => Err(Error::InvalidAddressFamily { family: other }),
        }
    }
}

/// Everything needed to issue one fetch.
///
/// `R` picks the response parser, and with it the body type of the returned
/// [`HttpFetchResponse`]. It defaults to [`Buffer`].
///
/// ```ignore
/// let options = FetchOptions::parse("http://camera.local/api/status")?.json();
/// let response = fetcher.fetch(options).await?;
/// let status: serde_json::Value = response.body;
/// ```
#[derive(Debug)]
pub struct FetchOptions<R = Buffer> {
    pub url: Url,

    /// Explicit method. When absent, `POST` if there is a body, else `GET`.
    pub method: Option<Method>,

    pub headers: HeaderMultimap,

    pub body: Option<RequestBody>,

    /// Deadline for the whole request, redirects and body included.
    pub timeout: Option<Duration>,

    /// Reject servers whose TLS certificate does not verify.
    pub reject_unauthorized: bool,

    pub family: Option<AddressFamily>,

    /// Return non-2xx responses instead of failing with [`Error::HttpStatus`].
    pub ignore_status_code: bool,

    pub(crate) response_type: R,
}

impl FetchOptions<Buffer> {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            method: None,
            headers: HeaderMultimap::new(),
            body: None,
            timeout: None,
            reject_unauthorized: true,
            family: None,
            ignore_status_code: false,
            response_type: Buffer,
        }
    }

    /// Parse `url` and build options for it.
    pub fn parse(url: &str) -> Result<Self, Error> {
        Ok(Self::new(Url::parse(url)?))
    }
}

impl<R> FetchOptions<R> {
    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Set the method from its textual name, e.g. `"PATCH"`.
    pub fn method_str(self, method: &str) -> Result<Self, Error> {
        let parsed = Method::from_bytes(method.as_bytes()).map_err(|_| Error::InvalidMethod {
            method: method.to_string(),
        })?;
        Ok(self.method(parsed))
    }

    /// Append a header value, keeping earlier values for the same name.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Append every entry of `headers`.
    pub fn headers(mut self, headers: impl Into<HeaderMultimap>) -> Self {
        let extra: HeaderMultimap = headers.into();
        self.headers.extend(extra.iter());
        self
    }

    pub fn body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as a JSON body.
    pub fn json_body<T: Serialize + ?Sized>(self, value: &T) -> Result<Self, Error> {
        Ok(self.body(RequestBody::json(value)?))
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn timeout_ms(self, millis: u64) -> Self {
        self.timeout(Duration::from_millis(millis))
    }

    pub fn reject_unauthorized(mut self, reject: bool) -> Self {
        self.reject_unauthorized = reject;
        self
    }

    pub fn family(mut self, family: AddressFamily) -> Self {
        self.family = Some(family);
        self
    }

    pub fn ignore_status_code(mut self, ignore: bool) -> Self {
        self.ignore_status_code = ignore;
        self
    }

    /// Decode the response body with `response_type` instead.
    pub fn response_type<R2: ResponseType>(self, response_type: R2) -> FetchOptions<R2> {
        FetchOptions {
            url: self.url,
            method: self.method,
            headers: self.headers,
            body: self.body,
            timeout: self.timeout,
            reject_unauthorized: self.reject_unauthorized,
            family: self.family,
            ignore_status_code: self.ignore_status_code,
            response_type,
        }
    }

    pub fn buffer(self) -> FetchOptions<Buffer> {
        self.response_type(Buffer)
    }

    pub fn text(self) -> FetchOptions<Text> {
        self.response_type(Text)
    }

    pub fn json(self) -> FetchOptions<Json> {
        self.response_type(Json::new())
    }

    /// Decode a JSON body straight into `T`.
    pub fn json_as<T>(self) -> FetchOptions<Json<T>>
    where
        T: serde::de::DeserializeOwned + Send + 'static,
    {
        self.response_type(Json::new())
    }

    pub fn readable(self) -> FetchOptions<Readable> {
        self.response_type(Readable)
    }

    /// Pick the body representation at runtime; the body becomes a
    /// [`ResponseBody`](crate::ResponseBody).
    pub fn dynamic(self, tag: ResponseTypeTag) -> FetchOptions<ResponseTypeTag> {
        self.response_type(tag)
    }

    /// Method that will be sent on the first hop.
    pub fn effective_method(&self) -> Method {
        match (&self.method, &self.body) {
            (Some(method), _) => method.clone(),
            (None, Some(_)) => Method::POST,
            (None, None) => Method::GET,
        }
    }
}

impl<R: ResponseType> FetchOptions<R> {
    pub fn response_type_tag(&self) -> ResponseTypeTag {
        self.response_type.tag()
    }
}

/// The envelope returned by a successful fetch.
///
/// `T` follows the options' response type: `Bytes`, `String`, the JSON target,
/// a [`ByteStream`](crate::ByteStream), or a [`ResponseBody`](crate::ResponseBody).
#[derive(Debug)]
pub struct HttpFetchResponse<T> {
    pub status_code: u16,
    pub headers: HeaderMultimap,
    pub body: T,
}

impl<T> HttpFetchResponse<T> {
    pub fn is_success(&self) -> bool {
        crate::status::is_success(self.status_code)
    }

    /// Transform the body, keeping status and headers.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> HttpFetchResponse<U> {
        HttpFetchResponse {
            status_code: self.status_code,
            headers: self.headers,
            body: f(self.body),
        }
    }
}
