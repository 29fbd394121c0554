use std::time::Duration;

/// The api base url of the US-1 cloud.
pub const CROWDSTRIKE_US1_API_URL: &str = "https://api.crowdstrike.com";
/// The api base url of the US-2 cloud.
pub const CROWDSTRIKE_US2_API_URL: &str = "https://api.us-2.crowdstrike.com";
/// The api base url of the EU-1 cloud.
pub const CROWDSTRIKE_EU1_API_URL: &str = "https://api.eu-1.crowdstrike.com";
/// The api base url of the US-GOV-1 cloud.
pub const CROWDSTRIKE_USGOV1_API_URL: &str = "https://api.laggar.gcw.crowdstrike.com";

/// The api path to retrieve the token.
pub const TOKEN_PATH: &str = "oauth2/token";
/// The api path to retrieve the sensor installers.
pub const INSTALLERS_PATH: &str = "sensors/combined/installers/v1";
/// The api path to download a sensor installer.
pub const DOWNLOAD_INSTALLER_PATH: &str = "sensors/entities/download-installer/v1";
/// The api path to retrieve the customer CCID.
pub const CCID_PATH: &str = "sensors/queries/installers/ccid/v1";

pub const DEFAULT_PLATFORM: &str = "windows";
pub const DEFAULT_DESTINATION: &str = "falcon.exe";
/// Builds back from the newest one, `1` selects the N-1 build.
pub const DEFAULT_SELECTION_OFFSET: usize = 1;

pub const DEFAULT_INSTALL_ARGS: [&str; 3] = ["/install", "/quiet", "/norestart"];
pub const DEFAULT_TENANT_PARAM: &str = "CID";

pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);
