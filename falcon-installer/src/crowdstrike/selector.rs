use crate::crowdstrike::response::SensorBuild;
use regex::Regex;
use semver::Version;
use serde::Deserialize;
use std::cmp::Ordering;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum SelectionError {
    #[error("{available} candidate builds found, offset {offset} requires at least {}", .offset + 1)]
    NotEnoughBuilds { available: usize, offset: usize },
    #[error("invalid name pattern `{0}`: {1}")]
    InvalidPattern(String, String),
}

/// How the catalog builds are ordered before applying the offset.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SelectionOrder {
    /// Newest version first, regardless of the order the API lists them.
    #[default]
    Version,
    /// The order in which the API lists the builds.
    Listing,
}

/// Picks one build out of the catalog: the one at `offset` positions from the newest candidate.
#[derive(Debug, Clone)]
pub struct SelectionPolicy {
    order: SelectionOrder,
    offset: usize,
    name_pattern: Option<Regex>,
}

impl SelectionPolicy {
    pub fn new(order: SelectionOrder, offset: usize) -> Self {
        Self {
            order,
            offset,
            name_pattern: None,
        }
    }

    /// Only builds whose file name matches the pattern are candidates.
    pub fn with_name_pattern(self, pattern: &str) -> Result<Self, SelectionError> {
        let regex = Regex::new(pattern)
            .map_err(|err| SelectionError::InvalidPattern(pattern.to_string(), err.to_string()))?;
        Ok(Self {
            name_pattern: Some(regex),
            ..self
        })
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn select<'a>(&self, builds: &'a [SensorBuild]) -> Result<&'a SensorBuild, SelectionError> {
        let mut candidates: Vec<&SensorBuild> = builds
            .iter()
            .filter(|build| {
                self.name_pattern
                    .as_ref()
                    .map_or(true, |re| re.is_match(&build.name))
            })
            .collect();

        if self.order == SelectionOrder::Version {
            candidates.sort_by(|a, b| newest_first(a, b));
        }

        let available = candidates.len();
        candidates
            .into_iter()
            .nth(self.offset)
            .ok_or(SelectionError::NotEnoughBuilds {
                available,
                offset: self.offset,
            })
    }
}

/// Orders by version descending, then release date descending. Unparsable versions go last.
fn newest_first(a: &SensorBuild, b: &SensorBuild) -> Ordering {
    let by_version = match (parse_version(&a.version), parse_version(&b.version)) {
        (Some(va), Some(vb)) => vb.cmp(&va),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    // RFC 3339 timestamps in UTC sort lexicographically.
    by_version.then_with(|| b.release_date.cmp(&a.release_date))
}

/// Sensor versions are usually `major.minor.build`, shorter numeric versions are padded.
fn parse_version(version: &str) -> Option<Version> {
    if let Ok(version) = Version::parse(version) {
        return Some(version);
    }
    let parts = version
        .split('.')
        .map(|part| part.parse::<u64>().ok())
        .collect::<Option<Vec<_>>>()?;
    match parts.as_slice() {
        [major] => Some(Version::new(*major, 0, 0)),
        [major, minor] => Some(Version::new(*major, *minor, 0)),
        [major, minor, patch, ..] => Some(Version::new(*major, *minor, *patch)),
        [] => None,
    }
}
