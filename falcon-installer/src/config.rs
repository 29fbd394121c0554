use crate::crowdstrike::defaults::{
    CCID_PATH, CROWDSTRIKE_EU1_API_URL, CROWDSTRIKE_US1_API_URL, CROWDSTRIKE_US2_API_URL,
    CROWDSTRIKE_USGOV1_API_URL, DEFAULT_DESTINATION, DEFAULT_DOWNLOAD_TIMEOUT, DEFAULT_PLATFORM,
    DEFAULT_SELECTION_OFFSET, DOWNLOAD_INSTALLER_PATH, INSTALLERS_PATH, TOKEN_PATH,
};
use crate::crowdstrike::selector::{SelectionError, SelectionOrder, SelectionPolicy};
use crate::http_client::{HttpConfig, DEFAULT_CLIENT_TIMEOUT, DEFAULT_CONNECT_TIMEOUT};
use crate::installer::InstallConfig;
use duration_str::deserialize_duration;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read `{0}`: {1}")]
    ReadError(String, std::io::Error),
    #[error("error parsing yaml: `{0}`")]
    SerdeYaml(#[from] serde_yaml::Error),
    #[error("invalid api url `{0}`: {1}")]
    InvalidUrl(String, url::ParseError),
    #[error("{0}")]
    Selection(#[from] SelectionError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Falcon cloud hosting the customer account.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
pub enum Cloud {
    #[default]
    #[serde(rename = "us-1")]
    #[value(name = "us-1")]
    Us1,
    #[serde(rename = "us-2")]
    #[value(name = "us-2")]
    Us2,
    #[serde(rename = "eu-1")]
    #[value(name = "eu-1")]
    Eu1,
    #[serde(rename = "us-gov-1")]
    #[value(name = "us-gov-1")]
    UsGov1,
}

impl Cloud {
    pub fn api_url(&self) -> &'static str {
        match self {
            Cloud::Us1 => CROWDSTRIKE_US1_API_URL,
            Cloud::Us2 => CROWDSTRIKE_US2_API_URL,
            Cloud::Eu1 => CROWDSTRIKE_EU1_API_URL,
            Cloud::UsGov1 => CROWDSTRIKE_USGOV1_API_URL,
        }
    }
}

/// Which build of the catalog gets installed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SelectionConfig {
    pub order: SelectionOrder,
    pub offset: usize,
    pub name_pattern: Option<String>,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            order: SelectionOrder::default(),
            offset: DEFAULT_SELECTION_OFFSET,
            name_pattern: None,
        }
    }
}

impl TryFrom<&SelectionConfig> for SelectionPolicy {
    type Error = SelectionError;

    fn try_from(config: &SelectionConfig) -> Result<Self, Self::Error> {
        let policy = SelectionPolicy::new(config.order, config.offset);
        match &config.name_pattern {
            Some(pattern) => policy.with_name_pattern(pattern),
            None => Ok(policy),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct HttpSettings {
    /// Deadline of every API request.
    #[serde(deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub connect_timeout: Duration,
    /// Deadline of the installer download, body included.
    #[serde(deserialize_with = "deserialize_duration")]
    pub download_timeout: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_CLIENT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            download_timeout: DEFAULT_DOWNLOAD_TIMEOUT,
        }
    }
}

impl HttpSettings {
    pub fn api(&self) -> HttpConfig {
        HttpConfig {
            timeout: self.timeout,
            connect_timeout: self.connect_timeout,
        }
    }

    pub fn download(&self) -> HttpConfig {
        HttpConfig {
            timeout: self.download_timeout,
            connect_timeout: self.connect_timeout,
        }
    }
}

/// Configuration of a provisioning run. Every field has a default so the file is optional.
///
/// ```yaml
/// cloud: eu-1
/// platform: windows
/// selection:
///   order: version
///   offset: 1
///   name_pattern: '.*\.exe$'
/// destination: C:\Temp\falcon.exe
/// verify_artifact: true
/// http:
///   timeout: 30s
///   connect_timeout: 10s
///   download_timeout: 10m
/// install:
///   args: ["/install", "/quiet", "/norestart"]
///   tenant_param: CID
///   timeout: 15m
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct InstallerConfig {
    pub cloud: Cloud,
    /// Overrides the url derived from `cloud`.
    pub api_url: Option<String>,
    pub platform: String,
    pub selection: SelectionConfig,
    pub destination: PathBuf,
    pub verify_artifact: bool,
    /// Stop once the installer is downloaded.
    pub skip_install: bool,
    pub http: HttpSettings,
    pub install: InstallConfig,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            cloud: Cloud::default(),
            api_url: None,
            platform: DEFAULT_PLATFORM.to_string(),
            selection: SelectionConfig::default(),
            destination: PathBuf::from(DEFAULT_DESTINATION),
            verify_artifact: true,
            skip_install: false,
            http: HttpSettings::default(),
            install: InstallConfig::default(),
        }
    }
}

impl InstallerConfig {
    pub fn parse(config_content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(config_content)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|err| ConfigError::ReadError(path.display().to_string(), err))?;
        Self::parse(&content)
    }

    /// Checks the values that cannot be expressed with types.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.platform.trim().is_empty() {
            return Err(ConfigError::Invalid("platform cannot be empty".to_string()));
        }
        if self.install.tenant_param.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "install.tenant_param cannot be empty".to_string(),
            ));
        }
        fs::utils::validate_path(&self.destination)
            .map_err(|err| ConfigError::Invalid(format!("destination: {err}")))?;
        SelectionPolicy::try_from(&self.selection)?;
        self.endpoints()?;
        Ok(())
    }

    pub fn endpoints(&self) -> Result<Endpoints, ConfigError> {
        let api_url = self
            .api_url
            .as_deref()
            .unwrap_or_else(|| self.cloud.api_url());
        Endpoints::new(api_url)
    }
}

/// Urls of every API endpoint the pipeline calls.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoints {
    pub token: Url,
    pub installers: Url,
    pub download_installer: Url,
    pub ccid: Url,
}

impl Endpoints {
    /// Paths are joined to `api_url`, keeping any path prefix it has.
    pub fn new(api_url: &str) -> Result<Self, ConfigError> {
        let invalid = |err| ConfigError::InvalidUrl(api_url.to_string(), err);

        let mut base = Url::parse(api_url).map_err(invalid)?;
        if base.cannot_be_a_base() {
            return Err(ConfigError::Invalid(format!(
                "api url `{api_url}` cannot be a base url"
            )));
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            token: base.join(TOKEN_PATH).map_err(invalid)?,
            installers: base.join(INSTALLERS_PATH).map_err(invalid)?,
            download_installer: base.join(DOWNLOAD_INSTALLER_PATH).map_err(invalid)?,
            ccid: base.join(CCID_PATH).map_err(invalid)?,
        })
    }
}
