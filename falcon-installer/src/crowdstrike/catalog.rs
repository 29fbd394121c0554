use crate::crowdstrike::auth::AccessToken;
use crate::crowdstrike::response::{decode_resources, ResponseError, SensorBuild};
use crate::crowdstrike::selector::{SelectionError, SelectionPolicy};
use crate::http_client::{HttpClient, HttpClientError};
use http::header::ACCEPT;
use http::HeaderValue;
use thiserror::Error;
use tracing::{debug, info, instrument};
use url::Url;

/// An enumeration of the errors while resolving the sensor build to install.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// Internal HTTP error
    #[error("`{0}`")]
    HttpError(#[from] HttpClientError),
    #[error("{0}")]
    ResponseError(#[from] ResponseError),
    #[error("no sensor builds available for platform `{0}`")]
    NoBuilds(String),
    #[error("{0}")]
    SelectionError(#[from] SelectionError),
}

/// Queries the installers catalog for a platform and selects one build with a [SelectionPolicy].
pub struct CatalogResolver<C: HttpClient> {
    http_client: C,
    installers_url: Url,
    platform: String,
    policy: SelectionPolicy,
}

impl<C: HttpClient> CatalogResolver<C> {
    pub fn new(
        http_client: C,
        installers_url: Url,
        platform: String,
        policy: SelectionPolicy,
    ) -> Self {
        Self {
            http_client,
            installers_url,
            platform,
            policy,
        }
    }

    #[instrument(skip_all, fields(platform = %self.platform))]
    pub fn resolve(&self, token: &AccessToken) -> Result<SensorBuild, CatalogError> {
        let mut url = self.installers_url.clone();
        url.query_pairs_mut()
            .append_pair("filter", &format!("platform:'{}'", self.platform));
        debug!(%url, "Querying the installers catalog");

        let mut headers = token.authorization_headers()?;
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let response = self.http_client.get(url.as_str(), headers)?;

        let builds: Vec<SensorBuild> = decode_resources(&response)?;
        if builds.is_empty() {
            return Err(CatalogError::NoBuilds(self.platform.clone()));
        }
        debug!(builds = builds.len(), "Installers catalog retrieved");

        let build = self.policy.select(&builds)?.clone();
        info!(
            name = %build.name,
            version = %build.version,
            sha256 = %build.sha256,
            "Sensor build selected"
        );
        Ok(build)
    }
}
