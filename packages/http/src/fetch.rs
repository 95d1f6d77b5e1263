//! The fetch facade.

use std::sync::Arc;

use http::header::{ACCEPT, CONTENT_TYPE};

use crate::codec::{normalize_body, ByteStream, ResponseBody, ResponseType};
use crate::config::FetcherConfig;
use crate::error::Result;
use crate::headers::HeaderMultimap;
use crate::status;
use crate::transport::{OutboundRequest, Transport, TransportProfile};
use crate::types::{FetchOptions, HttpFetchResponse, ResponseTypeTag};

/// Issues requests and decodes their responses.
///
/// Construct one per process (or per configuration) and share it; clones are
/// cheap and reuse the same underlying clients.
///
/// # Example
///
/// ```ignore
/// use http_fetch::{FetchOptions, HttpFetcher};
///
/// let fetcher = HttpFetcher::with_defaults();
///
/// // Body type follows the options: `String` here.
/// let page = fetcher.fetch(FetchOptions::parse("http://nvr.local/")?.text()).await?;
///
/// // JSON body straight into a struct.
/// let info: DeviceInfo = fetcher
///     .fetch(FetchOptions::parse("http://nvr.local/api/info")?.json_as::<DeviceInfo>())
///     .await?
///     .body;
/// ```
#[derive(Clone)]
pub struct HttpFetcher {
    transport: Arc<Transport>,
    config: Arc<FetcherConfig>,
}

impl HttpFetcher {
    pub fn new(config: FetcherConfig) -> Self {
        Self {
            transport: Arc::new(Transport::new(&config)),
            config: Arc::new(config),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(FetcherConfig::default())
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    /// Issue the request described by `options`.
    ///
    /// Returns once the final response head is in and, for every response
    /// type except [`Readable`](crate::Readable), the body has been read and
    /// decoded. Fails without a partial response on network errors, timeouts,
    /// redirect loops, rejected status codes and undecodable bodies.
    pub async fn fetch<R: ResponseType>(
        &self,
        options: FetchOptions<R>,
    ) -> Result<HttpFetchResponse<R::Output>> {
        let tag = options.response_type.tag();
        let method = options.effective_method();
        let timeout = options.timeout.or_else(|| self.config.default_timeout());

        let FetchOptions {
            url,
            mut headers,
            body,
            reject_unauthorized,
            family,
            ignore_status_code,
            response_type,
            ..
        } = options;

        set_default_accept(&mut headers, tag);
        let body = body.map(|body| {
            let (wire, content_type) = normalize_body(body);
            if let Some(content_type) = content_type {
                if !headers.contains(CONTENT_TYPE.as_str()) {
                    headers.set(CONTENT_TYPE.as_str(), content_type);
                }
            }
            wire
        });

        let request = OutboundRequest {
            url,
            method,
            headers,
            body,
            timeout,
            profile: TransportProfile {
                reject_unauthorized,
                family,
            },
        };
        let response = self.transport.execute(request).await?;

        let status_code = response.status().as_u16();
        let headers = HeaderMultimap::from(response.headers());
        tracing::debug!(status_code, response_type = %tag, "received response");

        let mut stream = ByteStream::from_response(response, timeout);
        if !ignore_status_code {
            stream = status::enforce(status_code, stream).await?;
        }
        let body = response_type.parse(stream).await?;

        Ok(HttpFetchResponse {
            status_code,
            headers,
            body,
        })
    }

    /// Like [`fetch`](Self::fetch), with the body representation picked at runtime.
    pub async fn fetch_dynamic<R>(
        &self,
        options: FetchOptions<R>,
        tag: ResponseTypeTag,
    ) -> Result<HttpFetchResponse<ResponseBody>> {
        self.fetch(options.dynamic(tag)).await
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Add the response type's `Accept` unless the caller already chose one.
pub fn set_default_accept(headers: &mut HeaderMultimap, tag: ResponseTypeTag) {
    if !headers.contains(ACCEPT.as_str()) {
        headers.set(ACCEPT.as_str(), tag.default_accept());
    }
}
