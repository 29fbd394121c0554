//! The provisioning run: every stage in order, failing fast.
use crate::artifact::{Artifact, ArtifactFetcher, DownloadError, ExpectedArtifact};
use crate::config::{ConfigError, InstallerConfig};
use crate::context::Context;
use crate::crowdstrike::auth::{AccessToken, AuthError, Authenticator, Credentials};
use crate::crowdstrike::catalog::{CatalogError, CatalogResolver};
use crate::crowdstrike::ccid::{TenantIdentifier, TenantLookupError, TenantResolver};
use crate::crowdstrike::download_link::{ConfigurationError, DownloadLink};
use crate::crowdstrike::response::SensorBuild;
use crate::crowdstrike::selector::SelectionPolicy;
use crate::http_client::{HttpClient, HttpClientUreq};
use crate::installer::{InstallError, InstallInvoker, InstallOutcome};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument};
use url::Url;

/// Failure of a run, named after the stage that failed.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),
    #[error("sensor catalog lookup failed: {0}")]
    Catalog(#[from] CatalogError),
    #[error("download link construction failed: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("installer download failed: {0}")]
    Download(#[from] DownloadError),
    #[error("CCID lookup failed: {0}")]
    TenantLookup(#[from] TenantLookupError),
    #[error("installation failed: {0}")]
    Install(#[from] InstallError),
    #[error("run cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Every failure kind has its own exit code. Cancellation uses the conventional `128 + SIGINT`.
    pub fn exit_code(&self) -> u8 {
        match self {
            PipelineError::Cancelled
            | PipelineError::Download(DownloadError::Cancelled)
            | PipelineError::Install(InstallError::Cancelled) => 130,
            PipelineError::Auth(_) => 10,
            PipelineError::Catalog(_) => 11,
            PipelineError::Configuration(_) => 12,
            PipelineError::Download(_) => 13,
            PipelineError::TenantLookup(_) => 14,
            PipelineError::Install(_) => 15,
        }
    }
}

impl From<PipelineError> for ExitCode {
    fn from(value: PipelineError) -> Self {
        Self::from(value.exit_code())
    }
}

/// What a successful run did.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReport {
    pub build: SensorBuild,
    pub artifact: Artifact,
    pub tenant: TenantIdentifier,
    /// `None` when the installation was skipped.
    pub install: Option<InstallOutcome>,
}

pub struct Pipeline<C: HttpClient> {
    authenticator: Authenticator<C>,
    catalog: CatalogResolver<C>,
    download_url: Url,
    fetcher: ArtifactFetcher<C>,
    tenant: TenantResolver<C>,
    installer: Option<InstallInvoker>,
    destination: PathBuf,
    verify_artifact: bool,
    context: Context,
}

impl Pipeline<Arc<HttpClientUreq>> {
    /// Builds a pipeline using ureq clients: one for the API calls and one, with the download
    /// deadline, for the installer.
    pub fn try_from_config(config: InstallerConfig, context: Context) -> Result<Self, ConfigError> {
        let api_client = Arc::new(HttpClientUreq::new(&config.http.api()));
        let download_client = Arc::new(HttpClientUreq::new(&config.http.download()));
        Self::new(api_client, download_client, config, context)
    }
}

impl<C: HttpClient + Clone> Pipeline<C> {
    pub fn new(
        api_client: C,
        download_client: C,
        config: InstallerConfig,
        context: Context,
    ) -> Result<Self, ConfigError> {
        let endpoints = config.endpoints()?;
        let policy = SelectionPolicy::try_from(&config.selection)?;

        let installer = (!config.skip_install)
            .then(|| InstallInvoker::new(config.install.clone(), context.clone()));

        Ok(Self {
            authenticator: Authenticator::new(api_client.clone(), endpoints.token),
            catalog: CatalogResolver::new(
                api_client.clone(),
                endpoints.installers,
                config.platform,
                policy,
            ),
            download_url: endpoints.download_installer,
            fetcher: ArtifactFetcher::new(download_client, context.clone()),
            tenant: TenantResolver::new(api_client, endpoints.ccid),
            installer,
            destination: config.destination,
            verify_artifact: config.verify_artifact,
            context,
        })
    }

    #[instrument(skip_all, fields(client_id = %credentials.client_id()))]
    pub fn run(&self, credentials: &Credentials) -> Result<PipelineReport, PipelineError> {
        self.ensure_not_cancelled()?;
        info!("Authenticating against the Falcon API");
        let token = self.authenticator.authenticate(credentials)?;

        self.checkpoint(&token)?;
        info!("Resolving the sensor build");
        let build = self.catalog.resolve(&token)?;

        let link = DownloadLink::build(&self.download_url, &build.sha256)?;

        self.checkpoint(&token)?;
        info!("Downloading the sensor installer");
        let expected = self.verify_artifact.then(|| ExpectedArtifact::from(&build));
        let artifact = self
            .fetcher
            .fetch(&link, &token, &self.destination, expected.as_ref())?;

        self.checkpoint(&token)?;
        info!("Looking up the CCID");
        let tenant = self.tenant.resolve(&token)?;

        let install = match &self.installer {
            Some(installer) => {
                self.ensure_not_cancelled()?;
                Some(installer.install(&artifact, &tenant)?)
            }
            None => {
                info!(path = %artifact.path().display(), "Installation skipped");
                None
            }
        };

        Ok(PipelineReport {
            build,
            artifact,
            tenant,
            install,
        })
    }

    /// Runs between stages that use the token.
    fn checkpoint(&self, token: &AccessToken) -> Result<(), PipelineError> {
        self.ensure_not_cancelled()?;
        token.ensure_valid()?;
        Ok(())
    }

    fn ensure_not_cancelled(&self) -> Result<(), PipelineError> {
        if self.context.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::hex_encode;
    use crate::crowdstrike::selector::{SelectionError, SelectionOrder};
    use crate::http_client::tests::MockHttpClientMock;
    use crate::http_client::{HttpClientError, HttpConfig};
    use assert_matches::assert_matches;
    use httpmock::prelude::*;
    use httpmock::Mock;
    use rstest::rstest;
    use std::path::Path;

    const CONTENT: &[u8] = b"MZ falcon sensor installer";

    fn content_sha256() -> String {
        hex_encode(ring::digest::digest(&ring::digest::SHA256, CONTENT).as_ref())
    }

    fn catalog_body(h2_sha256: &str) -> String {
        format!(
            r#"{{
                "meta": {{"query_time": 0.1, "powered_by": "binserv", "trace_id": "t-2"}},
                "errors": [],
                "resources": [
                    {{"name": "WindowsSensor.exe", "sha256": "h1", "version": "7.17.18899", "file_size": 1}},
                    {{"name": "WindowsSensor.exe", "sha256": "{h2_sha256}", "version": "7.16.18613", "file_size": {}}}
                ]
            }}"#,
            CONTENT.len()
        )
    }

    struct Api<'a> {
        token: Mock<'a>,
        catalog: Mock<'a>,
        download: Mock<'a>,
        ccid: Mock<'a>,
    }

    fn mock_api<'a>(server: &'a MockServer, token_body: &str, h2_sha256: &str) -> Api<'a> {
        let token_body = token_body.to_string();
        let catalog_body = catalog_body(h2_sha256);
        let h2_sha256 = h2_sha256.to_string();
        Api {
            token: server.mock(|when, then| {
                when.method(POST)
                    .path("/oauth2/token")
                    .body("client_id=abc&client_secret=xyz");
                then.status(201)
                    .header("content-type", "application/json")
                    .body(token_body);
            }),
            catalog: server.mock(|when, then| {
                when.method(GET)
                    .path("/sensors/combined/installers/v1")
                    .query_param("filter", "platform:'windows'")
                    .header("authorization", "Bearer tok1");
                then.status(200)
                    .header("content-type", "application/json")
                    .body(catalog_body);
            }),
            download: server.mock(|when, then| {
                when.method(GET)
                    .path("/sensors/entities/download-installer/v1")
                    .query_param("id", h2_sha256)
                    .header("authorization", "Bearer tok1");
                then.status(200).body(CONTENT);
            }),
            ccid: server.mock(|when, then| {
                when.method(GET)
                    .path("/sensors/queries/installers/ccid/v1")
                    .header("authorization", "Bearer tok1");
                then.status(200)
                    .header("content-type", "application/json")
                    .body(r#"{"meta": {"query_time": 0.01}, "errors": [], "resources": ["CID123"]}"#);
            }),
        }
    }

    const TOKEN_BODY: &str =
        r#"{"access_token": "tok1", "token_type": "bearer", "expires_in": 1799}"#;

    fn config(server: &MockServer, destination: &Path) -> InstallerConfig {
        let mut config = InstallerConfig {
            api_url: Some(server.base_url()),
            destination: destination.to_path_buf(),
            skip_install: true,
            ..Default::default()
        };
        config.selection.order = SelectionOrder::Listing;
        config
    }

    fn credentials() -> Credentials {
        Credentials::new("abc", "xyz")
    }

    #[test]
    fn test_run_acquires_the_selected_installer() {
        let server = MockServer::start();
        let api = mock_api(&server, TOKEN_BODY, &content_sha256());
        let tempdir = tempfile::tempdir().unwrap();
        let destination = tempdir.path().join("falcon.exe");

        let pipeline =
            Pipeline::try_from_config(config(&server, &destination), Context::new()).unwrap();
        let report = pipeline.run(&credentials()).unwrap();

        api.token.assert();
        api.catalog.assert();
        api.download.assert();
        api.ccid.assert();
        assert_eq!(report.build.sha256, content_sha256());
        assert_eq!(report.artifact.path(), destination);
        assert_eq!(report.tenant.as_str(), "CID123");
        assert_eq!(report.install, None);
        assert_eq!(std::fs::read(&destination).unwrap(), CONTENT);
    }

    #[test]
    fn test_auth_error_stops_the_run() {
        let server = MockServer::start();
        let api = mock_api(
            &server,
            r#"{"meta": {"query_time": 0.01, "trace_id": "t-1"}, "errors": [{"code": 401, "message": "access denied, invalid bearer token"}]}"#,
            &content_sha256(),
        );
        let tempdir = tempfile::tempdir().unwrap();
        let destination = tempdir.path().join("falcon.exe");

        let pipeline =
            Pipeline::try_from_config(config(&server, &destination), Context::new()).unwrap();
        let err = pipeline.run(&credentials()).unwrap_err();

        assert_matches!(err, PipelineError::Auth(_));
        assert_eq!(err.exit_code(), 10);
        assert!(err.to_string().starts_with("authentication failed:"));
        api.token.assert();
        api.catalog.assert_hits(0);
        api.download.assert_hits(0);
        api.ccid.assert_hits(0);
        assert!(!destination.exists());
    }

    #[test]
    fn test_verification_failure_leaves_no_installer() {
        let server = MockServer::start();
        let declared = "0".repeat(64);
        let api = mock_api(&server, TOKEN_BODY, &declared);
        let tempdir = tempfile::tempdir().unwrap();
        let destination = tempdir.path().join("falcon.exe");

        let pipeline =
            Pipeline::try_from_config(config(&server, &destination), Context::new()).unwrap();
        let err = pipeline.run(&credentials()).unwrap_err();

        assert_matches!(err, PipelineError::Download(DownloadError::HashMismatch { .. }));
        assert_eq!(err.exit_code(), 13);
        api.download.assert();
        api.ccid.assert_hits(0);
        assert!(!destination.exists());
    }

    #[test]
    fn test_unverified_download_is_kept() {
        let server = MockServer::start();
        let declared = "0".repeat(64);
        let api = mock_api(&server, TOKEN_BODY, &declared);
        let tempdir = tempfile::tempdir().unwrap();
        let destination = tempdir.path().join("falcon.exe");
        let config = InstallerConfig {
            verify_artifact: false,
            ..config(&server, &destination)
        };

        let report = Pipeline::try_from_config(config, Context::new())
            .unwrap()
            .run(&credentials())
            .unwrap();

        api.ccid.assert();
        assert_eq!(report.artifact.sha256(), content_sha256());
        assert!(destination.exists());
    }

    #[test]
    fn test_token_without_expiry_is_used() {
        let server = MockServer::start();
        let api = mock_api(
            &server,
            r#"{"access_token": "tok1", "token_type": "bearer", "expires_in": 0}"#,
            &content_sha256(),
        );
        let tempdir = tempfile::tempdir().unwrap();
        let destination = tempdir.path().join("falcon.exe");

        // A zero validity means the API did not state one.
        let report = Pipeline::try_from_config(config(&server, &destination), Context::new())
            .unwrap()
            .run(&credentials())
            .unwrap();

        api.ccid.assert();
        assert_eq!(report.tenant.as_str(), "CID123");
    }

    #[test]
    fn test_cancelled_run_makes_no_calls() {
        let server = MockServer::start();
        let api = mock_api(&server, TOKEN_BODY, &content_sha256());
        let tempdir = tempfile::tempdir().unwrap();
        let destination = tempdir.path().join("falcon.exe");
        let context = Context::new();
        context.cancel();

        let pipeline = Pipeline::try_from_config(config(&server, &destination), context).unwrap();
        let err = pipeline.run(&credentials()).unwrap_err();

        assert_matches!(err, PipelineError::Cancelled);
        assert_eq!(err.exit_code(), 130);
        api.token.assert_hits(0);
    }

    #[test]
    fn test_catalog_failure_stops_the_run() {
        let server = MockServer::start();
        let token = server.mock(|when, then| {
            when.method(POST).path("/oauth2/token");
            then.status(201).body(TOKEN_BODY);
        });
        let catalog = server.mock(|when, then| {
            when.method(GET).path("/sensors/combined/installers/v1");
            then.status(200)
                .body(r#"{"meta": {"query_time": 0.1}, "errors": [], "resources": []}"#);
        });
        let ccid = server.mock(|when, then| {
            when.method(GET).path("/sensors/queries/installers/ccid/v1");
            then.status(200).body(r#"{"meta": {}, "resources": ["CID123"]}"#);
        });
        let tempdir = tempfile::tempdir().unwrap();
        let destination = tempdir.path().join("falcon.exe");

        let err = Pipeline::try_from_config(config(&server, &destination), Context::new())
            .unwrap()
            .run(&credentials())
            .unwrap_err();

        token.assert();
        catalog.assert();
        ccid.assert_hits(0);
        assert_matches!(err, PipelineError::Catalog(CatalogError::NoBuilds(_)));
        assert_eq!(err.exit_code(), 11);
    }

    #[test]
    fn test_offset_beyond_the_catalog_stops_the_run() {
        let server = MockServer::start();
        let api = mock_api(&server, TOKEN_BODY, &content_sha256());
        let tempdir = tempfile::tempdir().unwrap();
        let destination = tempdir.path().join("falcon.exe");
        let mut config = config(&server, &destination);
        config.selection.offset = 2;

        let err = Pipeline::try_from_config(config, Context::new())
            .unwrap()
            .run(&credentials())
            .unwrap_err();

        assert_matches!(
            err,
            PipelineError::Catalog(CatalogError::SelectionError(SelectionError::NotEnoughBuilds {
                available: 2,
                offset: 2
            }))
        );
        assert_eq!(err.exit_code(), 11);
        api.token.assert();
        api.catalog.assert();
        api.download.assert_hits(0);
        api.ccid.assert_hits(0);
        assert!(!destination.exists());
    }

    #[test]
    fn test_invalid_selection_pattern_is_a_config_error() {
        let mut config = InstallerConfig::default();
        config.selection.name_pattern = Some("[".to_string());

        let result = Pipeline::try_from_config(config, Context::new());

        assert_matches!(
            result.err(),
            Some(ConfigError::Selection(SelectionError::InvalidPattern(_, _)))
        );
    }

    #[test]
    fn test_transport_error_is_an_auth_error() {
        let mut client_mock = MockHttpClientMock::new();
        client_mock.should_not_send(HttpClientError::TransportError("connection refused".into()));
        let client = Arc::new(client_mock);
        let config = InstallerConfig {
            skip_install: true,
            ..Default::default()
        };

        let pipeline = Pipeline::new(client.clone(), client, config, Context::new()).unwrap();
        let err = pipeline.run(&credentials()).unwrap_err();

        assert_matches!(err, PipelineError::Auth(AuthError::HttpError(_)));
    }

    #[rstest]
    #[case::auth(PipelineError::Auth(AuthError::EmptyToken), 10)]
    #[case::catalog(PipelineError::Catalog(CatalogError::NoBuilds("windows".into())), 11)]
    #[case::configuration(PipelineError::Configuration(ConfigurationError::EmptyIdentifier), 12)]
    #[case::download(PipelineError::Download(DownloadError::SizeMismatch { expected: 2, actual: 1 }), 13)]
    #[case::tenant(PipelineError::TenantLookup(TenantLookupError::NoIdentifier), 14)]
    #[case::install(PipelineError::Install(InstallError::Failed { code: 1603, output: String::new() }), 15)]
    #[case::cancelled(PipelineError::Cancelled, 130)]
    #[case::cancelled_download(PipelineError::Download(DownloadError::Cancelled), 130)]
    #[case::cancelled_install(PipelineError::Install(InstallError::Cancelled), 130)]
    fn test_exit_codes(#[case] err: PipelineError, #[case] code: u8) {
        assert_eq!(err.exit_code(), code);
    }

    #[test]
    fn test_http_config_is_split() {
        let config = InstallerConfig::default();
        assert_eq!(config.http.api(), HttpConfig::default());
        assert!(config.http.download().timeout > config.http.api().timeout);
    }
}
