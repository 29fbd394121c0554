//! Clients for the Falcon cloud API endpoints involved in the sensor provisioning.
pub mod auth;
pub mod catalog;
pub mod ccid;
pub mod defaults;
pub mod download_link;
pub mod response;
pub mod selector;
