use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, Method, Request, Response};
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// The default timeout for the API requests.
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(30);
/// The default timeout to establish a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Body of a streamed response.
pub type BodyReader = Box<dyn Read + Send + Sync>;

/// An enumeration of potential errors related to the HTTP client.
#[derive(Error, Debug)]
pub enum HttpClientError {
    /// Represents an error building the request
    #[error("could not build the HTTP request: `{0}`")]
    BuildingError(String),
    /// Represents HTTP Transport error, timeouts included.
    #[error("transport HTTP client error: `{0}`")]
    TransportError(String),
    /// Represents an internal HTTP client error.
    #[error("internal HTTP client error: `{0}`")]
    InternalError(String),
}

/// The `HttpClient` trait defines the HTTP interface to be implemented by HTTP clients.
///
/// Responses with a non-success status are returned as responses, the caller decides
/// how to report them.
pub trait HttpClient {
    /// Performs the request and returns the whole body in memory.
    fn send(&self, request: Request<Vec<u8>>) -> Result<Response<Vec<u8>>, HttpClientError>;

    /// Performs the request and returns the body as a reader.
    fn stream(&self, request: Request<Vec<u8>>) -> Result<Response<BodyReader>, HttpClientError>;

    /// Performs a get request with the provided url and headers.
    fn get(&self, url: &str, headers: HeaderMap) -> Result<Response<Vec<u8>>, HttpClientError> {
        self.send(build_request(Method::GET, url, headers, Vec::new())?)
    }

    /// Performs a post request with a `application/x-www-form-urlencoded` body.
    fn post_form(
        &self,
        url: &str,
        mut headers: HeaderMap,
        form: &[(&str, &str)],
    ) -> Result<Response<Vec<u8>>, HttpClientError> {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(form)
            .finish();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );
        self.send(build_request(Method::POST, url, headers, body.into_bytes())?)
    }
}

impl<C: HttpClient> HttpClient for Arc<C> {
    fn send(&self, request: Request<Vec<u8>>) -> Result<Response<Vec<u8>>, HttpClientError> {
        self.as_ref().send(request)
    }

    fn stream(&self, request: Request<Vec<u8>>) -> Result<Response<BodyReader>, HttpClientError> {
        self.as_ref().stream(request)
    }
}

/// Builds a request with the provided method, url, headers and body.
pub fn build_request(
    method: Method,
    url: &str,
    headers: HeaderMap,
    body: Vec<u8>,
) -> Result<Request<Vec<u8>>, HttpClientError> {
    let mut request = Request::builder()
        .method(method)
        .uri(url)
        .body(body)
        .map_err(|e| HttpClientError::BuildingError(e.to_string()))?;
    request.headers_mut().extend(headers);
    Ok(request)
}

/// Timeouts applied to every request of a client.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpConfig {
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_CLIENT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// An implementation of the `HttpClient` trait using the ureq library.
///
/// The configured timeout covers the whole request, reading the body included.
pub struct HttpClientUreq {
    agent: ureq::Agent,
}

impl HttpClientUreq {
    pub fn new(config: &HttpConfig) -> Self {
        Self {
            agent: ureq::AgentBuilder::new()
                .timeout_connect(config.connect_timeout)
                .timeout(config.timeout)
                .build(),
        }
    }

    fn call(&self, request: Request<Vec<u8>>) -> Result<ureq::Response, HttpClientError> {
        let (parts, body) = request.into_parts();
        debug!(method = %parts.method, uri = %parts.uri, "Sending request");

        let mut req = self
            .agent
            .request(parts.method.as_str(), &parts.uri.to_string());
        for (name, value) in parts.headers.iter() {
            let value = value.to_str().map_err(|err| {
                HttpClientError::BuildingError(format!("invalid value for header `{name}`: {err}"))
            })?;
            req = req.set(name.as_str(), value);
        }

        let result = if body.is_empty() {
            req.call()
        } else {
            req.send_bytes(&body)
        };

        match result {
            Ok(response) => Ok(response),
            // ureq reports 4xx and 5xx as errors, they are plain responses for us.
            Err(ureq::Error::Status(_, response)) => Ok(response),
            Err(ureq::Error::Transport(err)) => {
                Err(HttpClientError::TransportError(err.to_string()))
            }
        }
    }
}

impl HttpClient for HttpClientUreq {
    fn send(&self, request: Request<Vec<u8>>) -> Result<Response<Vec<u8>>, HttpClientError> {
        let response = self.call(request)?;
        let builder = response_builder(&response);

        let mut body = Vec::new();
        response
            .into_reader()
            .read_to_end(&mut body)
            .map_err(|err| HttpClientError::TransportError(err.to_string()))?;

        builder
            .body(body)
            .map_err(|err| HttpClientError::InternalError(err.to_string()))
    }

    fn stream(&self, request: Request<Vec<u8>>) -> Result<Response<BodyReader>, HttpClientError> {
        let response = self.call(request)?;
        let builder = response_builder(&response);
        builder
            .body(response.into_reader())
            .map_err(|err| HttpClientError::InternalError(err.to_string()))
    }
}

/// Returns a [http::response::Builder] carrying the status and headers of the ureq response.
fn response_builder(response: &ureq::Response) -> http::response::Builder {
    let mut builder = Response::builder().status(response.status());
    for name in response.headers_names() {
        if let Some(value) = response.header(&name) {
            builder = builder.header(name.as_str(), value);
        }
    }
    builder
}

/// Returns a printable excerpt of a response body.
pub(crate) fn body_excerpt(body: &[u8]) -> String {
    const MAX_EXCERPT_LEN: usize = 512;
    let text = String::from_utf8_lossy(body);
    match text.char_indices().nth(MAX_EXCERPT_LEN) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
