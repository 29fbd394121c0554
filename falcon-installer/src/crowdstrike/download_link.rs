use std::fmt;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigurationError {
    #[error("the sensor build identifier is empty")]
    EmptyIdentifier,
}

/// Url downloading exactly one sensor build, identified by its sha256.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadLink(Url);

impl DownloadLink {
    /// Attaches the build identifier as the `id` query parameter of `base`.
    pub fn build(base: &Url, sensor_id: &str) -> Result<Self, ConfigurationError> {
        if sensor_id.trim().is_empty() {
            return Err(ConfigurationError::EmptyIdentifier);
        }
        let mut url = base.clone();
        url.query_pairs_mut().append_pair("id", sensor_id);
        Ok(Self(url))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for DownloadLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn base() -> Url {
        Url::parse("https://api.crowdstrike.com/sensors/entities/download-installer/v1").unwrap()
    }

    #[test]
    fn test_build_link() {
        let link = DownloadLink::build(&base(), "h2").unwrap();
        assert_eq!(
            link.as_str(),
            "https://api.crowdstrike.com/sensors/entities/download-installer/v1?id=h2"
        );
        assert_eq!(link.to_string(), link.as_str());
    }

    #[test]
    fn test_build_is_deterministic() {
        let id = "67702a5edff9ca5cf01e503becfd4f1781a9f2c2658583a83eb63cc277f50a5e";
        assert_eq!(
            DownloadLink::build(&base(), id).unwrap(),
            DownloadLink::build(&base(), id).unwrap()
        );
    }

    #[test]
    fn test_existing_query_is_kept() {
        let base = Url::parse("https://proxy.local/download?tenant=a").unwrap();
        let link = DownloadLink::build(&base, "h1").unwrap();
        assert_eq!(link.as_str(), "https://proxy.local/download?tenant=a&id=h1");
    }

    #[test]
    fn test_identifier_is_encoded() {
        let link = DownloadLink::build(&base(), "a b&c").unwrap();
        assert!(link.as_str().ends_with("?id=a+b%26c"));
    }

    #[rstest]
    #[case::empty("")]
    #[case::blank("   ")]
    fn test_empty_identifier(#[case] id: &str) {
        assert_eq!(
            DownloadLink::build(&base(), id),
            Err(ConfigurationError::EmptyIdentifier)
        );
    }
}
