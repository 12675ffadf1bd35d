//! Uniform result type returned by every collaborator call
//!
//! Internally collaborators return a plain [`BackendResult`]. The
//! `{ error?, result? }` wire shape survives as [`BackendResponse`] for output
//! that crosses a process boundary.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error reported by a collaborator (device probe, fetcher, extractor, updater)
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Wire shape of a backend result: either `error` or `result` is populated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendResponse<T> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
}

impl<T> BackendResponse<T> {
    pub fn ok(result: T) -> Self {
        Self {
            error: None,
            result: Some(result),
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            result: None,
        }
    }

    /// Convert back into a result, inspecting `error` before touching `result`.
    ///
    /// An empty error string counts as "no error".
    pub fn into_result(self) -> BackendResult<T> {
        match (self.error, self.result) {
            (Some(error), _) if !error.is_empty() => Err(BackendError::InvalidData(error)),
            (_, Some(result)) => Ok(result),
            (_, None) => Err(BackendError::InvalidData(
                "response carries neither error nor result".to_string(),
            )),
        }
    }
}

impl<T> From<BackendResult<T>> for BackendResponse<T> {
    fn from(result: BackendResult<T>) -> Self {
        match result {
            Ok(value) => Self::ok(value),
            Err(e) => Self::err(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_from_ok() {
        let response: BackendResponse<u32> = BackendResponse::from(Ok(7));
        assert_eq!(response, BackendResponse::ok(7));
        assert_eq!(serde_json::to_string(&response).unwrap(), r#"{"result":7}"#);
    }

    #[test]
    fn test_response_from_err() {
        let result: BackendResult<u32> = Err(BackendError::Http("status 404".to_string()));
        let response = BackendResponse::from(result);
        assert_eq!(response.error.as_deref(), Some("HTTP error: status 404"));
        assert!(response.result.is_none());
    }

    #[test]
    fn test_into_result_error_wins() {
        let response = BackendResponse {
            error: Some("boom".to_string()),
            result: Some(1u32),
        };
        assert!(matches!(response.into_result(), Err(BackendError::InvalidData(m)) if m == "boom"));
    }

    #[test]
    fn test_into_result_empty_error_is_success() {
        let response: BackendResponse<String> =
            serde_json::from_str(r#"{"error":"","result":"Tar removed successfully"}"#).unwrap();
        assert_eq!(response.into_result().unwrap(), "Tar removed successfully");
    }

    #[test]
    fn test_device_info_survives_json() {
        let device = crate::DeviceInfo::from_raw("5mini", "build-202401150930");
        let json = serde_json::to_string(&BackendResponse::from(Ok(device.clone()))).unwrap();
        let response: BackendResponse<crate::DeviceInfo> = serde_json::from_str(&json).unwrap();
        assert_eq!(response.into_result().unwrap(), device);

        let failed: BackendResult<crate::DeviceInfo> =
            Err(BackendError::DeviceUnavailable("no SKYTRAXX volume".to_string()));
        let json = serde_json::to_string(&BackendResponse::from(failed)).unwrap();
        let response: BackendResponse<crate::DeviceInfo> = serde_json::from_str(&json).unwrap();
        assert!(matches!(
            response.into_result(),
            Err(BackendError::InvalidData(m)) if m == "Device unavailable: no SKYTRAXX volume"
        ));
    }

    #[test]
    fn test_into_result_empty_response() {
        let response: BackendResponse<u32> = serde_json::from_str("{}").unwrap();
        assert!(response.into_result().is_err());
    }
}
