//! Status code policy.

use crate::codec::ByteStream;
use crate::error::{Error, Result};

/// True for the conventional success range, `200..=299`.
pub fn is_success(status_code: u16) -> bool {
    (200..300).contains(&status_code)
}

/// Fail with [`Error::HttpStatus`] unless `status_code` is a success.
pub fn check_status(status_code: u16) -> Result<()> {
    if is_success(status_code) {
        Ok(())
    } else {
        Err(Error::HttpStatus { code: status_code })
    }
}

/// Apply the policy to a received response.
///
/// A rejected body is read to the end and discarded before the error is
/// returned, so the connection is not left half-read. Failures while draining
/// are logged and otherwise ignored; the status error always wins.
pub(crate) async fn enforce(status_code: u16, body: ByteStream) -> Result<ByteStream> {
    match check_status(status_code) {
        Ok(()) => Ok(body),
        Err(rejection) => {
            tracing::debug!(status_code, "rejecting response status");
            match body.drain().await {
                Ok(discarded) => tracing::debug!(discarded, "drained rejected response body"),
                Err(e) => tracing::debug!(error = %e, "failed to drain rejected response body"),
            }
            Err(rejection)
        }
    }
}
