use crate::http_client::body_excerpt;
use http::Response;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt;
use thiserror::Error;

/// Errors found while interpreting an API response.
#[derive(Error, Debug)]
pub enum ResponseError {
    /// Unsuccessful HTTP response.
    #[error("status code: `{0}`, body: `{1}`")]
    UnsuccessfulResponse(u16, String),
    /// Error while deserializing the response body
    #[error("malformed response body: `{0}`")]
    JsonError(#[from] serde_json::Error),
    /// The envelope carries errors
    #[error("{0}")]
    ApiErrors(ApiErrors),
}

/// Metadata attached to every API response.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
pub struct Meta {
    #[serde(default)]
    pub query_time: f64,
    #[serde(default)]
    pub powered_by: String,
    #[serde(default)]
    pub trace_id: String,
}

/// An error reported by the API inside the response envelope.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Non-empty list of [ApiError] together with the trace id of the failed request.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiErrors {
    pub trace_id: String,
    pub errors: Vec<ApiError>,
}

impl fmt::Display for ApiErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let errors = self
            .errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        write!(f, "api errors (trace id `{}`): {}", self.trace_id, errors)
    }
}

/// The uniform wrapper of every API response.
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    #[serde(default)]
    pub meta: Meta,
    pub errors: Option<Vec<ApiError>>,
    pub resources: Option<Vec<T>>,
}

impl<T> Envelope<T> {
    /// Returns the resources only if the envelope carries no errors.
    pub fn into_resources(self) -> Result<Vec<T>, ApiErrors> {
        check_api_errors(&self.meta, self.errors)?;
        Ok(self.resources.unwrap_or_default())
    }
}

/// Fails with [ApiErrors] when the list of errors is present and not empty.
pub(crate) fn check_api_errors(meta: &Meta, errors: Option<Vec<ApiError>>) -> Result<(), ApiErrors> {
    match errors {
        Some(errors) if !errors.is_empty() => Err(ApiErrors {
            trace_id: meta.trace_id.clone(),
            errors,
        }),
        _ => Ok(()),
    }
}

/// Checks the response status and deserializes its body.
pub(crate) fn decode<T: DeserializeOwned>(response: &Response<Vec<u8>>) -> Result<T, ResponseError> {
    // return error if status code is not within 200-299.
    if !response.status().is_success() {
        return Err(ResponseError::UnsuccessfulResponse(
            response.status().as_u16(),
            body_excerpt(response.body()),
        ));
    }
    Ok(serde_json::from_slice(response.body())?)
}

/// Checks the response status, deserializes the envelope and returns its resources.
pub(crate) fn decode_resources<T: DeserializeOwned>(
    response: &Response<Vec<u8>>,
) -> Result<Vec<T>, ResponseError> {
    decode::<Envelope<T>>(response)?
        .into_resources()
        .map_err(ResponseError::ApiErrors)
}

/// Body of the token endpoint. On failure the endpoint answers with an error envelope instead.
#[derive(Deserialize)]
pub(crate) struct TokenResponse {
    #[serde(default)]
    pub(crate) access_token: String,
    #[serde(default)]
    pub(crate) token_type: String,
    #[serde(default)]
    pub(crate) expires_in: u64,
    #[serde(default)]
    pub(crate) meta: Meta,
    #[serde(default)]
    pub(crate) errors: Option<Vec<ApiError>>,
}

/// A sensor installer listed in the installers catalog.
///
/// ```json
/// {
///   "name": "falcon-sensor-7.16.0-16903.el7.x86_64.rpm",
///   "description": "Falcon Kernel Sensor for RHEL/CentOS/Oracle 7",
///   "platform": "linux",
///   "os": "RHEL/CentOS/Oracle",
///   "os_version": "7",
///   "sha256": "67702a5edff9ca5cf01e503becfd4f1781a9f2c2658583a83eb63cc277f50a5e",
///   "release_date": "2024-06-11T23:09:05.178Z",
///   "version": "7.16.16903",
///   "file_size": 67278396,
///   "file_type": "rpm"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SensorBuild {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub os: String,
    #[serde(default)]
    pub os_version: String,
    pub sha256: String,
    #[serde(default)]
    pub release_date: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub file_type: String,
}
