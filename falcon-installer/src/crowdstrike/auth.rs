use crate::crowdstrike::response::{check_api_errors, decode, ResponseError, TokenResponse};
use crate::http_client::{HttpClient, HttpClientError};
use http::header::{ACCEPT, AUTHORIZATION};
use http::{HeaderMap, HeaderValue};
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, instrument};
use url::Url;

/// An enumeration of the errors while obtaining an access token.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Internal HTTP error
    #[error("`{0}`")]
    HttpError(#[from] HttpClientError),
    #[error("{0}")]
    ResponseError(#[from] ResponseError),
    #[error("the token endpoint returned an empty access token")]
    EmptyToken,
    #[error("the access token expired {0:?} after being issued")]
    Expired(Duration),
}

/// API client credentials. Never persisted.
#[derive(Clone, PartialEq)]
pub struct Credentials {
    client_id: String,
    client_secret: String,
}

impl Credentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Short-lived bearer token presented on every API call after the authentication.
#[derive(Clone)]
pub struct AccessToken {
    token: String,
    token_type: String,
    expires_in: Duration,
    issued_at: Instant,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, token_type: impl Into<String>, expires_in: Duration) -> Self {
        Self {
            token: token.into(),
            token_type: token_type.into(),
            expires_in,
            issued_at: Instant::now(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    pub fn expires_in(&self) -> Duration {
        self.expires_in
    }

    /// A zero validity window means the endpoint did not report one and no expiry is enforced.
    pub fn is_expired(&self) -> bool {
        !self.expires_in.is_zero() && self.issued_at.elapsed() >= self.expires_in
    }

    /// Fails with [AuthError::Expired] once the validity window is over.
    pub fn ensure_valid(&self) -> Result<(), AuthError> {
        if self.is_expired() {
            return Err(AuthError::Expired(self.expires_in));
        }
        Ok(())
    }

    /// Returns the headers authorizing a request with this token.
    pub fn authorization_headers(&self) -> Result<HeaderMap, HttpClientError> {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", self.token))
            .map_err(|err| HttpClientError::BuildingError(format!("invalid access token: {err}")))?;
        value.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, value);
        Ok(headers)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Exchanges client credentials for an [AccessToken].
pub struct Authenticator<C: HttpClient> {
    http_client: C,
    token_url: Url,
}

impl<C: HttpClient> Authenticator<C> {
    pub fn new(http_client: C, token_url: Url) -> Self {
        Self {
            http_client,
            token_url,
        }
    }

    #[instrument(skip_all, fields(client_id = %credentials.client_id()))]
    pub fn authenticate(&self, credentials: &Credentials) -> Result<AccessToken, AuthError> {
        debug!(url = %self.token_url, "Requesting access token");

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let response = self.http_client.post_form(
            self.token_url.as_str(),
            headers,
            &[
                ("client_id", credentials.client_id.as_str()),
                ("client_secret", credentials.client_secret.as_str()),
            ],
        )?;

        let token_response: TokenResponse = decode(&response)?;
        check_api_errors(&token_response.meta, token_response.errors)
            .map_err(ResponseError::ApiErrors)?;

        if token_response.access_token.trim().is_empty() {
            return Err(AuthError::EmptyToken);
        }

        let token = AccessToken::new(
            token_response.access_token,
            token_response.token_type,
            Duration::from_secs(token_response.expires_in),
        );
        info!(expires_in = ?token.expires_in(), "Access token obtained");
        Ok(token)
    }
}
