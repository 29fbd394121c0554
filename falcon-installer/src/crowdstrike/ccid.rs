use crate::crowdstrike::auth::AccessToken;
use crate::crowdstrike::response::{decode_resources, ResponseError};
use crate::http_client::{HttpClient, HttpClientError};
use http::header::ACCEPT;
use http::HeaderValue;
use std::fmt;
use thiserror::Error;
use tracing::{info, instrument, warn};
use url::Url;

/// An enumeration of the errors while looking up the customer CCID.
#[derive(Error, Debug)]
pub enum TenantLookupError {
    /// Internal HTTP error
    #[error("`{0}`")]
    HttpError(#[from] HttpClientError),
    #[error("{0}")]
    ResponseError(#[from] ResponseError),
    #[error("the API returned no CCID")]
    NoIdentifier,
}

/// Customer identifier (CCID) scoping the sensor installation to a customer account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantIdentifier(String);

impl TenantIdentifier {
    pub fn new(ccid: impl Into<String>) -> Self {
        Self(ccid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Queries the CCID endpoint.
pub struct TenantResolver<C: HttpClient> {
    http_client: C,
    ccid_url: Url,
}

impl<C: HttpClient> TenantResolver<C> {
    pub fn new(http_client: C, ccid_url: Url) -> Self {
        Self {
            http_client,
            ccid_url,
        }
    }

    /// Returns the first CCID listed by the API.
    #[instrument(skip_all)]
    pub fn resolve(&self, token: &AccessToken) -> Result<TenantIdentifier, TenantLookupError> {
        let mut headers = token.authorization_headers()?;
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let response = self.http_client.get(self.ccid_url.as_str(), headers)?;

        let identifiers: Vec<String> = decode_resources(&response)?;
        if identifiers.len() > 1 {
            warn!(
                count = identifiers.len(),
                "Several CCIDs returned, using the first one"
            );
        }

        let ccid = identifiers
            .into_iter()
            .next()
            .filter(|ccid| !ccid.trim().is_empty())
            .ok_or(TenantLookupError::NoIdentifier)?;
        info!(%ccid, "CCID obtained");
        Ok(TenantIdentifier(ccid))
    }
}
