//! Provisioning of the CrowdStrike Falcon sensor on a host.
//!
//! The [pipeline::Pipeline] authenticates against the Falcon cloud API, selects a sensor build from the
//! installers catalog, downloads it, looks up the customer CCID and runs the installer silently.
pub mod artifact;
pub mod cli;
pub mod config;
pub mod context;
pub mod crowdstrike;
pub mod http_client;
pub mod installer;
pub mod logs;
pub mod pipeline;
