//! # http-fetch
//!
//! A small HTTP client core: issue a request, follow redirects, check the
//! status code and decode the body the way the caller asked for.
//!
//! ## Response types
//!
//! The options' type parameter decides the body type of the response, so a
//! mismatch is a compile error rather than a runtime surprise:
//!
//! | Options          | Body                    |
//! |------------------|-------------------------|
//! | default / `.buffer()` | `bytes::Bytes`     |
//! | `.text()`        | `String`                |
//! | `.json()`        | `serde_json::Value`     |
//! | `.json_as::<T>()`| `T`                     |
//! | `.readable()`    | [`ByteStream`] (live)   |
//! | `.dynamic(tag)`  | [`ResponseBody`]        |
//!
//! ```ignore
//! use http_fetch::{FetchOptions, HttpFetcher};
//!
//! let fetcher = HttpFetcher::with_defaults();
//!
//! let response = fetcher
//!     .fetch(
//!         FetchOptions::parse("http://nvr.local/api/ptz")?
//!             .header("Authorization", "Bearer token")
//!             .json_body(&serde_json::json!({"pan": 10}))?
//!             .timeout_ms(5_000)
//!             .json(),
//!     )
//!     .await?;
//!
//! assert_eq!(response.status_code, 200);
//! println!("{}", response.body["position"]);
//! ```
//!
//! ## Failure
//!
//! A fetch either returns a complete [`HttpFetchResponse`] or an [`Error`].
//! Non-2xx responses fail with [`Error::HttpStatus`] unless
//! `ignore_status_code` is set; their body is drained before the error is
//! returned. Nothing is retried.

pub mod codec;
pub mod config;
pub mod error;
pub mod fetch;
pub mod headers;
pub mod status;
pub mod types;

#[cfg(feature = "blocking")]
pub mod blocking;

mod transport;

pub use codec::{
    Buffer, ByteStream, FetchParser, Json, Readable, RequestBody, ResponseBody, ResponseType, Text,
};
pub use config::FetcherConfig;
pub use error::{Error, Result};
pub use fetch::HttpFetcher;
pub use headers::HeaderMultimap;
pub use types::{AddressFamily, FetchOptions, HttpFetchResponse, ResponseTypeTag};

pub use http::Method;
pub use url::Url;
