//! Management API transports.
//!
//! [`RestV1Connector`] issues one synchronous call per operation under
//! `scalemgmt/v1`. [`RestV2Connector`] talks to `scalemgmt/v2`, where
//! mutating calls may hand back a job that [`JobPoller`] waits on. Both send
//! requests through [`HttpTransport`] so tests can script responses.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::{ConnectorError, ConnectorFuture};

mod jobs;
mod v1;
mod v2;

pub use jobs::JobPoller;
pub use v1::RestV1Connector;
pub use v2::RestV2Connector;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// HTTP methods used by the management API.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HttpMethod {
    /// Read.
    Get,
    /// Create.
    Post,
    /// Update in place.
    Put,
    /// Remove.
    Delete,
}

impl HttpMethod {
    /// Upper-case method name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

/// A request relative to the management endpoint.
#[derive(Clone, Debug, PartialEq)]
pub struct HttpRequest {
    /// Request method.
    pub method: HttpMethod,
    /// Path and query relative to the endpoint, without a leading slash.
    pub path: String,
    /// Optional JSON body.
    pub body: Option<Value>,
}

impl HttpRequest {
    /// Builds a `GET` request.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            path: path.into(),
            body: None,
        }
    }

    /// Builds a `POST` request with a JSON body.
    #[must_use]
    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            path: path.into(),
            body: Some(body),
        }
    }

    /// Builds a `PUT` request with an optional JSON body.
    #[must_use]
    pub fn put(path: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            method: HttpMethod::Put,
            path: path.into(),
            body,
        }
    }

    /// Builds a `DELETE` request.
    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Delete,
            path: path.into(),
            body: None,
        }
    }
}

/// Status and raw body of a management API response.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body as text.
    pub body: String,
}

impl HttpResponse {
    /// Returns `true` for any 2xx status.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Fails with [`ConnectorError::HttpStatus`] unless the status is 2xx.
    ///
    /// # Errors
    ///
    /// Returns the status error for non-2xx responses.
    pub fn require_success(self, operation: &str) -> Result<Self, ConnectorError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(ConnectorError::HttpStatus {
                operation: operation.to_owned(),
                status: self.status,
                body: self.body,
            })
        }
    }

    /// Decodes the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Parse`] when the body does not match `T`.
    pub fn json<T: DeserializeOwned>(&self, what: &str) -> Result<T, ConnectorError> {
        serde_json::from_str(&self.body).map_err(|err| ConnectorError::parse(what, err.to_string()))
    }
}

/// Sends requests to the management endpoint.
pub trait HttpTransport: Send + Sync {
    /// Sends `request` and returns the response whatever its status.
    fn send<'a>(&'a self, request: &'a HttpRequest) -> ConnectorFuture<'a, HttpResponse>;
}

/// [`HttpTransport`] backed by `reqwest` with optional basic auth.
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    endpoint: String,
    credentials: Option<(String, String)>,
}

impl ReqwestTransport {
    /// Creates a transport for `endpoint` (for example
    /// `https://gui.example.com:443/`).
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Config`] when the endpoint is empty or the
    /// client cannot be built.
    pub fn new(
        endpoint: &str,
        credentials: Option<(String, String)>,
        skip_tls_verify: bool,
    ) -> Result<Self, ConnectorError> {
        let trimmed = endpoint.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(ConnectorError::Config(String::from(
                "management endpoint is empty",
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(skip_tls_verify)
            .build()
            .map_err(|err| ConnectorError::Config(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: trimmed.to_owned(),
            credentials,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint, path.trim_start_matches('/'))
    }

    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, ConnectorError> {
        let url = self.url(&request.path);
        debug!(method = request.method.as_str(), %url, "sending management request");
        let transport_error = |err: reqwest::Error| ConnectorError::Http {
            method: request.method.as_str().to_owned(),
            path: request.path.clone(),
            message: err.to_string(),
        };

        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&url),
            HttpMethod::Post => self.client.post(&url),
            HttpMethod::Put => self.client.put(&url),
            HttpMethod::Delete => self.client.delete(&url),
        };
        if let Some((user, password)) = &self.credentials {
            builder = builder.basic_auth(user, Some(password));
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(transport_error)?;
        Ok(HttpResponse { status, body })
    }
}

impl HttpTransport for ReqwestTransport {
    fn send<'a>(&'a self, request: &'a HttpRequest) -> ConnectorFuture<'a, HttpResponse> {
        Box::pin(self.execute(request))
    }
}

/// Percent-encodes a single path segment.
pub(crate) fn segment(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(200, true)]
    #[case(202, true)]
    #[case(299, true)]
    #[case(199, false)]
    #[case(404, false)]
    #[case(500, false)]
    fn success_is_any_2xx(#[case] status: u16, #[case] expected: bool) {
        let response = HttpResponse {
            status,
            body: String::new(),
        };
        assert_eq!(response.is_success(), expected);
    }

    #[test]
    fn non_success_keeps_cluster_payload() {
        let response = HttpResponse {
            status: 400,
            body: String::from(r#"{"status":{"code":400,"message":"Invalid fileset"}}"#),
        };
        let err = response.require_success("create fileset").expect_err("400");
        assert!(matches!(
            err,
            ConnectorError::HttpStatus { status: 400, ref body, .. } if body.contains("Invalid fileset")
        ));
    }

    #[test]
    fn transport_joins_endpoint_and_path() {
        let transport =
            ReqwestTransport::new("https://gui.example.com:443/", None, false).expect("transport");
        assert_eq!(
            transport.url("scalemgmt/v2/cluster"),
            "https://gui.example.com:443/scalemgmt/v2/cluster"
        );
    }

    #[test]
    fn transport_rejects_empty_endpoint() {
        let err = ReqwestTransport::new(" / ", None, false).expect_err("empty endpoint");
        assert!(matches!(err, ConnectorError::Config(_)));
    }

    #[test]
    fn segments_are_percent_encoded() {
        assert_eq!(segment("my fileset/1"), "my%20fileset%2F1");
    }
}
