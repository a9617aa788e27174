//! REST request handlers.

pub mod heal;
pub mod internal;
pub mod peers;
pub mod volumes;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use volgrid_core::ErrorCode;

use crate::error::ApiError;

/// Decodes a JSON request body.
///
/// A parse failure is `MalformedRequest` (422); semantic checks on the
/// decoded value are the handler's job.
pub(crate) fn decode<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body)
        .map_err(|e| ApiError::new(ErrorCode::MalformedRequest, format!("invalid JSON body: {e}")))
}
