//! Download of the sensor installer.
use crate::context::Context;
use crate::crowdstrike::auth::AccessToken;
use crate::crowdstrike::download_link::DownloadLink;
use crate::crowdstrike::response::SensorBuild;
use crate::http_client::{body_excerpt, build_request, HttpClient, HttpClientError};
use fs::staged_file::{StageError, StagedFile};
use http::header::ACCEPT;
use http::{HeaderValue, Method};
use ring::digest::{Context as DigestContext, SHA256};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, instrument};

const CHUNK_SIZE: usize = 64 * 1024;
const MAX_ERROR_BODY_LEN: u64 = 4096;

/// An enumeration of the errors while downloading the installer.
#[derive(Error, Debug)]
pub enum DownloadError {
    /// Internal HTTP error
    #[error("`{0}`")]
    HttpError(#[from] HttpClientError),
    /// Unsuccessful HTTP response.
    #[error("status code: `{0}`, body: `{1}`")]
    UnsuccessfulResponse(u16, String),
    #[error("{0}")]
    StageError(#[from] StageError),
    #[error("reading the response body: {0}")]
    ReadError(io::Error),
    #[error("writing the installer: {0}")]
    WriteError(io::Error),
    #[error("downloaded {actual} bytes, expected {expected}")]
    SizeMismatch { expected: u64, actual: u64 },
    #[error("downloaded sha256 `{actual}`, expected `{expected}`")]
    HashMismatch { expected: String, actual: String },
    #[error("download cancelled")]
    Cancelled,
}

/// Size and digest the downloaded installer must have.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpectedArtifact {
    pub sha256: String,
    pub size: u64,
}

impl From<&SensorBuild> for ExpectedArtifact {
    fn from(build: &SensorBuild) -> Self {
        Self {
            sha256: build.sha256.clone(),
            size: build.file_size,
        }
    }
}

/// The installer written to local storage.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    path: PathBuf,
    sha256: String,
    size: u64,
}

impl Artifact {
    pub fn new(path: PathBuf, sha256: String, size: u64) -> Self {
        Self { path, sha256, size }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sha256(&self) -> &str {
        &self.sha256
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

/// Streams the installer into a staged file and moves it onto the destination once complete.
///
/// The destination only ever holds a complete (and, if requested, verified) installer: any failure
/// drops the staged file and leaves the destination as it was.
pub struct ArtifactFetcher<C: HttpClient> {
    http_client: C,
    context: Context,
}

impl<C: HttpClient> ArtifactFetcher<C> {
    pub fn new(http_client: C, context: Context) -> Self {
        Self {
            http_client,
            context,
        }
    }

    #[instrument(skip_all, fields(destination = %destination.display()))]
    pub fn fetch(
        &self,
        link: &DownloadLink,
        token: &AccessToken,
        destination: &Path,
        expected: Option<&ExpectedArtifact>,
    ) -> Result<Artifact, DownloadError> {
        // Staged before the request so an unwritable destination fails without downloading.
        let mut staged = StagedFile::create(destination)?;

        let mut headers = token.authorization_headers()?;
        headers.insert(ACCEPT, HeaderValue::from_static("application/octet-stream"));
        let request = build_request(Method::GET, link.as_str(), headers, Vec::new())?;
        debug!(%link, "Downloading the installer");
        let response = self.http_client.stream(request)?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::UnsuccessfulResponse(
                status.as_u16(),
                read_error_body(response.into_body()),
            ));
        }

        let (size, sha256) = self.copy(response.into_body(), &mut staged)?;
        debug!(size, %sha256, "Installer downloaded");

        if let Some(expected) = expected {
            verify(expected, size, &sha256)?;
            debug!("Installer size and sha256 verified");
        }

        let path = staged.commit()?;
        info!(path = %path.display(), size, "Installer stored");
        Ok(Artifact { path, sha256, size })
    }

    /// Copies the body in chunks, returning the amount of bytes and their hex encoded sha256.
    fn copy(&self, mut body: impl Read, sink: &mut impl Write) -> Result<(u64, String), DownloadError> {
        let mut digest = DigestContext::new(&SHA256);
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut size = 0u64;
        loop {
            if self.context.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }
            let read = match body.read(&mut buf) {
                Ok(0) => break,
                Ok(read) => read,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(DownloadError::ReadError(err)),
            };
            sink.write_all(&buf[..read])
                .map_err(DownloadError::WriteError)?;
            digest.update(&buf[..read]);
            size += read as u64;
        }
        Ok((size, hex_encode(digest.finish().as_ref())))
    }
}

fn verify(expected: &ExpectedArtifact, size: u64, sha256: &str) -> Result<(), DownloadError> {
    if expected.size != size {
        return Err(DownloadError::SizeMismatch {
            expected: expected.size,
            actual: size,
        });
    }
    if !expected.sha256.eq_ignore_ascii_case(sha256) {
        return Err(DownloadError::HashMismatch {
            expected: expected.sha256.clone(),
            actual: sha256.to_string(),
        });
    }
    Ok(())
}

/// Reads the beginning of an error body, the read error is reported in its place.
fn read_error_body(body: impl Read) -> String {
    let mut buf = Vec::new();
    match body.take(MAX_ERROR_BODY_LEN).read_to_end(&mut buf) {
        Ok(_) => body_excerpt(&buf),
        Err(err) => format!("<unreadable body: {err}>"),
    }
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}
