//! Transport invoker.
//!
//! Sends a prepared request and returns the head of the *final* response.
//! reqwest's own redirect policy is switched off; redirects are followed here
//! so that method rewriting, body replay and the hop limit are under our
//! control:
//!
//! ```text
//! Building -> AwaitingResponseHead --(3xx + Location)--> Building
//!                                  \--(anything else)--> final response
//! ```

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use http::header::{HeaderValue, LOCATION};
use http::{Method, StatusCode};
use reqwest::{redirect, Client};
use url::Url;

use crate::codec::WireBody;
use crate::config::FetcherConfig;
use crate::error::{Error, Result};
use crate::headers::HeaderMultimap;
use crate::types::AddressFamily;

/// Client-level settings a request may ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TransportProfile {
    pub reject_unauthorized: bool,
    pub family: Option<AddressFamily>,
}

impl TransportProfile {
    const COUNT: usize = 6;

    fn slot(self) -> usize {
        let family = match self.family {
            None => 0,
            Some(AddressFamily::V4) => 1,
            Some(AddressFamily::V6) => 2,
        };
        if self.reject_unauthorized {
            family
        } else {
            family + 3
        }
    }
}

/// One hop's worth of request, plus what is needed to follow redirects.
pub(crate) struct OutboundRequest {
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMultimap,
    pub body: Option<WireBody>,
    pub timeout: Option<Duration>,
    pub profile: TransportProfile,
}

/// How a followed redirect changes the next request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RedirectAction {
    /// Same method, same body.
    Preserve,
    /// Reissue as `GET` without a body.
    SwitchToGet,
}

pub(crate) fn redirect_action(status: StatusCode, method: &Method) -> Option<RedirectAction> {
    match status.as_u16() {
        301 | 302 if *method == Method::POST => Some(RedirectAction::SwitchToGet),
        301 | 302 | 307 | 308 => Some(RedirectAction::Preserve),
        303 if *method == Method::GET || *method == Method::HEAD => Some(RedirectAction::Preserve),
        303 => Some(RedirectAction::SwitchToGet),
        _ => None,
    }
}

pub(crate) fn ensure_http_scheme(url: &Url) -> Result<()> {
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(Error::UnsupportedScheme {
            scheme: other.to_string(),
        }),
    }
}

fn resolve_location(current: &Url, location: &HeaderValue) -> Result<Url> {
    let location = location.to_str().map_err(|e| Error::InvalidUrl {
        message: format!("invalid Location header: {}", e),
    })?;
    let next = current.join(location)?;
    ensure_http_scheme(&next)?;
    Ok(next)
}

/// Whether credentials must be withheld from `to`.
///
/// True when the host changes (subdomains of the current host excepted), an
/// explicit port changes, or the scheme drops from https to http.
fn leaves_origin(from: &Url, to: &Url) -> bool {
    if from.scheme() == "https" && to.scheme() == "http" {
        return true;
    }
    if from.port() != to.port() {
        return true;
    }
    match (from.host_str(), to.host_str()) {
        (Some(from_host), Some(to_host)) => {
            !(from_host.eq_ignore_ascii_case(to_host)
                || to_host
                    .to_ascii_lowercase()
                    .ends_with(&format!(".{}", from_host.to_ascii_lowercase())))
        }
        _ => true,
    }
}

fn is_credential_header(name: &str) -> bool {
    ["authorization", "proxy-authorization", "cookie"]
        .iter()
        .any(|credential| name.eq_ignore_ascii_case(credential))
}

fn is_content_header(name: &str) -> bool {
    name.get(..8)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("content-"))
}

pub(crate) struct Transport {
    clients: [OnceLock<Client>; TransportProfile::COUNT],
    max_redirects: usize,
    user_agent: Option<String>,
}

impl Transport {
    pub fn new(config: &FetcherConfig) -> Self {
        Self {
            clients: std::array::from_fn(|_| OnceLock::new()),
            max_redirects: config.max_redirects,
            user_agent: config.user_agent.clone(),
        }
    }

    /// The client for `profile`, built on first use.
    fn client(&self, profile: TransportProfile) -> Result<&Client> {
        let slot = &self.clients[profile.slot()];
        if let Some(client) = slot.get() {
            return Ok(client);
        }
        let client = self.build_client(profile)?;
        Ok(slot.get_or_init(|| client))
    }

    fn build_client(&self, profile: TransportProfile) -> Result<Client> {
        let mut builder = Client::builder().redirect(redirect::Policy::none());
        if !profile.reject_unauthorized {
            builder = builder.danger_accept_invalid_certs(true);
        }
        // A local bind address of one family restricts connection attempts to it.
        builder = match profile.family {
            Some(AddressFamily::V4) => builder.local_address(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
            Some(AddressFamily::V6) => builder.local_address(IpAddr::V6(Ipv6Addr::UNSPECIFIED)),
            None => builder,
        };
        if let Some(user_agent) = &self.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        builder.build().map_err(Error::Network)
    }

    /// Send `request`, following redirects, and return the final response.
    ///
    /// The response body is untouched. When a timeout is set, the same
    /// deadline keeps applying to reads of that body.
    pub async fn execute(&self, request: OutboundRequest) -> Result<reqwest::Response> {
        let OutboundRequest {
            mut url,
            mut method,
            mut headers,
            mut body,
            timeout,
            profile,
        } = request;

        let client = self.client(profile)?;
        let deadline = timeout.map(|limit| (Instant::now() + limit, limit));
        let mut hops = 0;

        loop {
            ensure_http_scheme(&url)?;

            let mut builder = client
                .request(method.clone(), url.clone())
                .headers(headers.to_header_map()?);
            if let Some((deadline, limit)) = deadline {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(Error::Timeout(limit));
                }
                builder = builder.timeout(remaining);
            }
            if let Some(wire) = body.as_mut().and_then(WireBody::take) {
                builder = builder.body(wire);
            }

            tracing::debug!(%method, %url, hops, "sending request");
            let response = builder
                .send()
                .await
                .map_err(|e| Error::from_transport(e, timeout))?;

            let status = response.status();
            let Some(action) = redirect_action(status, &method) else {
                return Ok(response);
            };
            let Some(location) = response.headers().get(LOCATION) else {
                return Ok(response);
            };
            if hops >= self.max_redirects {
                return Err(Error::RedirectLoop {
                    limit: self.max_redirects,
                });
            }
            let next = resolve_location(&url, location)?;
            drop(response);

            match action {
                RedirectAction::SwitchToGet => {
                    method = Method::GET;
                    body = None;
                    headers.remove_where(is_content_header);
                }
                RedirectAction::Preserve => {
                    if body.as_ref().is_some_and(|wire| !wire.is_replayable()) {
                        return Err(Error::RedirectBodyNotReplayable {
                            status: status.as_u16(),
                        });
                    }
                }
            }
            headers.remove("host");
            if leaves_origin(&url, &next) {
                headers.remove_where(is_credential_header);
            }

            tracing::debug!(status = status.as_u16(), from = %url, to = %next, "following redirect");
            hops += 1;
            url = next;
        }
    }
}
