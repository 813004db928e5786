//! Storage node requests and the sender contract.
//!
//! Only the semantic shape of each request is modelled; encoding and
//! transport belong to the [`RequestSender`] implementation.

use std::time::Duration;

use async_trait::async_trait;
use meridian_core::{Error, Key, Lock, Region, RegionVerId, Result, Timestamp};
use meridian_flow::Backoffer;

/// A request addressed to one region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Scan for locks at or below a timestamp.
    ScanLock(ScanLockRequest),
    /// Split a region at the given keys.
    SplitRegion(SplitRegionRequest),
}

impl Request {
    /// Returns the request kind, for logs and errors.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ScanLock(_) => "scan_lock",
            Self::SplitRegion(_) => "split_region",
        }
    }
}

/// Scan-lock request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanLockRequest {
    /// Only locks with `txn_start_ts <= max_version` are returned.
    pub max_version: Timestamp,
    /// Maximum locks returned.
    pub limit: u32,
    /// Scan start (inclusive).
    pub start_key: Key,
    /// Scan end (exclusive). Empty means keyspace end.
    pub end_key: Key,
}

/// Split-region request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitRegionRequest {
    /// Keys to split at, in ascending order.
    pub split_keys: Vec<Key>,
}

/// Scan-lock response body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanLockResponse {
    /// Locks found, in key order.
    pub locks: Vec<Lock>,
    /// Key-level error reported by the storage node.
    pub error: Option<String>,
}

/// Split-region response body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitRegionResponse {
    /// Regions produced by the split, in key order.
    pub regions: Vec<Region>,
}

/// Typed response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    /// Answer to [`Request::ScanLock`].
    ScanLock(ScanLockResponse),
    /// Answer to [`Request::SplitRegion`].
    SplitRegion(SplitRegionResponse),
}

/// A storage node response.
///
/// A region error means the request reached a node whose view of the region
/// differs from the caller's; it is distinct from a transport failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Response {
    /// Region-level error, if the region rejected the request.
    pub region_error: Option<String>,
    /// Response body, absent on a region error.
    pub body: Option<ResponseBody>,
}

impl Response {
    /// Creates a successful response.
    #[must_use]
    pub const fn ok(body: ResponseBody) -> Self {
        Self {
            region_error: None,
            body: Some(body),
        }
    }

    /// Creates a response carrying a region error.
    #[must_use]
    pub fn region_error(message: impl Into<String>) -> Self {
        Self {
            region_error: Some(message.into()),
            body: None,
        }
    }

    /// Takes the scan-lock body.
    ///
    /// # Errors
    ///
    /// Returns `Error::BodyMissing` if there is no body, `Error::KeyError` if
    /// the body reports a key error and `Error::UnexpectedResponse` for any
    /// other body kind.
    pub fn into_scan_lock(self) -> Result<ScanLockResponse> {
        match self.body {
            None => Err(Error::BodyMissing {
                request: "scan_lock",
            }),
            Some(ResponseBody::ScanLock(ScanLockResponse {
                error: Some(message),
                ..
            })) => Err(Error::KeyError {
                request: "scan_lock",
                message,
            }),
            Some(ResponseBody::ScanLock(body)) => Ok(body),
            Some(_) => Err(Error::UnexpectedResponse {
                expected: "scan_lock",
            }),
        }
    }

    /// Takes the split-region body.
    ///
    /// # Errors
    ///
    /// Returns `Error::BodyMissing` if there is no body and
    /// `Error::UnexpectedResponse` for any other body kind.
    pub fn into_split_region(self) -> Result<SplitRegionResponse> {
        match self.body {
            None => Err(Error::BodyMissing {
                request: "split_region",
            }),
            Some(ResponseBody::SplitRegion(body)) => Ok(body),
            Some(_) => Err(Error::UnexpectedResponse {
                expected: "split_region",
            }),
        }
    }
}

/// Sends requests to the storage node currently serving a region.
///
/// Implementations retry transport failures under `bo` themselves; an `Err`
/// means the budget ran out or the chain was cancelled. Region errors are
/// returned inside the [`Response`] for the caller to handle.
#[async_trait]
pub trait RequestSender: Send + Sync {
    /// Sends `request` to `region`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request could not be delivered.
    async fn send(
        &self,
        bo: &mut Backoffer,
        request: Request,
        region: RegionVerId,
        timeout: Duration,
    ) -> Result<Response>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_body_is_protocol_error() {
        let err = Response::default().into_scan_lock().unwrap_err();
        assert!(matches!(err, Error::BodyMissing { request: "scan_lock" }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_scan_lock_key_error_surfaces() {
        let resp = Response::ok(ResponseBody::ScanLock(ScanLockResponse {
            locks: Vec::new(),
            error: Some("txn aborted".into()),
        }));

        let err = resp.into_scan_lock().unwrap_err();
        assert!(err.to_string().contains("txn aborted"));
    }

    #[test]
    fn test_wrong_body_kind_rejected() {
        let resp = Response::ok(ResponseBody::SplitRegion(SplitRegionResponse::default()));
        assert!(matches!(
            resp.into_scan_lock(),
            Err(Error::UnexpectedResponse { .. })
        ));
    }
}
