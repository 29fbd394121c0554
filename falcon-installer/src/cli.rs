use crate::config::{Cloud, ConfigError, InstallerConfig};
use crate::crowdstrike::auth::Credentials;
use crate::crowdstrike::selector::SelectionOrder;
use crate::logs::LoggingError;
use clap::builder::NonEmptyStringValueParser;
use std::path::PathBuf;
use std::process::ExitCode;
use thiserror::Error;
use tracing::Level;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to initialize logs: {0}")]
    Logging(#[from] LoggingError),

    #[error("could not set the signal handler: {0}")]
    SignalHandler(#[from] ctrlc::Error),
}

impl CliError {
    /// Exit codes follow the [BSD guidelines].
    ///
    /// [BSD guidelines]: https://man.freebsd.org/cgi/man.cgi?query=sysexits&manpath=FreeBSD+4.3-RELEASE
    pub fn to_exit_code(&self) -> u8 {
        match self {
            CliError::Config(_) => 78,
            CliError::Logging(_) => 70,
            CliError::SignalHandler(_) => 71,
        }
    }
}

impl From<CliError> for ExitCode {
    fn from(value: CliError) -> Self {
        Self::from(value.to_exit_code())
    }
}

/// Installs the CrowdStrike Falcon sensor selected from the cloud catalog.
#[derive(Debug, clap::Parser)]
#[command(version, about)]
pub struct Cli {
    /// API client identifier
    #[arg(long, env = "FALCON_CLIENT_ID", value_parser = NonEmptyStringValueParser::new())]
    pub client_id: String,

    /// API client secret
    #[arg(
        long,
        env = "FALCON_CLIENT_SECRET",
        hide_env_values = true,
        value_parser = NonEmptyStringValueParser::new()
    )]
    pub client_secret: String,

    /// YAML configuration file, flags take precedence over its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Falcon cloud of the account
    #[arg(long, value_enum)]
    pub cloud: Option<Cloud>,

    /// API base url, overrides the cloud one
    #[arg(long, value_parser = NonEmptyStringValueParser::new())]
    pub api_url: Option<String>,

    /// Platform of the sensor builds to consider
    #[arg(long, value_parser = NonEmptyStringValueParser::new())]
    pub platform: Option<String>,

    /// Where the installer is stored
    #[arg(long)]
    pub destination: Option<PathBuf>,

    /// How the catalog builds are ordered before applying the offset
    #[arg(long, value_enum)]
    pub selection_order: Option<SelectionOrder>,

    /// Position of the selected build, 0 being the newest one
    #[arg(long)]
    pub selection_offset: Option<usize>,

    /// Do not check the installer size and sha256 against the catalog
    #[arg(long)]
    pub skip_verify: bool,

    /// Download the installer without running it
    #[arg(long)]
    pub skip_install: bool,

    /// Default log level, `RUST_LOG` directives take precedence
    #[arg(long, default_value = "info")]
    pub log_level: Level,
}

impl Cli {
    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.client_id.clone(), self.client_secret.clone())
    }

    /// Loads the configuration file, if any, and applies the flags on top of it.
    pub fn installer_config(&self) -> Result<InstallerConfig, CliError> {
        let mut config = match &self.config {
            Some(path) => InstallerConfig::load(path)?,
            None => InstallerConfig::default(),
        };

        if let Some(cloud) = self.cloud {
            config.cloud = cloud;
            // The file url belongs to the cloud it was written for.
            config.api_url = None;
        }
        if let Some(api_url) = &self.api_url {
            config.api_url = Some(api_url.clone());
        }
        if let Some(platform) = &self.platform {
            config.platform = platform.clone();
        }
        if let Some(destination) = &self.destination {
            config.destination = destination.clone();
        }
        if let Some(order) = self.selection_order {
            config.selection.order = order;
        }
        if let Some(offset) = self.selection_offset {
            config.selection.offset = offset;
        }
        if self.skip_verify {
            config.verify_artifact = false;
        }
        if self.skip_install {
            config.skip_install = true;
        }

        config.validate()?;
        Ok(config)
    }
}
