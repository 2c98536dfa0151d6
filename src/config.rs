//! Connection settings for an Aggregate server.

use std::time::Duration;

use url::Url;

use crate::error::{OdkError, Result};

/// Where and how to reach the server's OpenRosa endpoints.
///
/// Credentials are optional; servers that grant anonymous data-collector
/// rights accept submissions without them.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// `http` or `https`.
    pub scheme: String,
    /// Server host name or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Path the Aggregate application is rooted at, leading slash included.
    pub path: String,
    /// Account for digest authentication.
    pub username: Option<String>,
    /// Password for digest authentication.
    pub password: Option<String>,
    /// Optional device identifier appended to the submission path.
    pub device_id: Option<String>,
    /// Per-request timeout. The protocol itself defines none; leave unset to
    /// let the caller own the envelope.
    pub timeout: Option<Duration>,
}

impl ServerConfig {
    /// Create a config from its parts. The scheme must be `http` or `https`;
    /// a missing leading slash on the path is supplied.
    pub fn new(
        scheme: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        path: impl Into<String>,
    ) -> Result<Self> {
        let scheme = scheme.into();
        if scheme != "http" && scheme != "https" {
            return Err(OdkError::invalid_server_url(
                format!("{scheme}://..."),
                format!("unsupported scheme \"{scheme}\""),
            ));
        }
        let mut path = path.into();
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
        Ok(Self {
            scheme,
            host: host.into(),
            port,
            path,
            username: None,
            password: None,
            device_id: None,
            timeout: None,
        })
    }

    /// Parse a complete server URL, `http[s]://host[:port]/path`, with the
    /// port defaulted by scheme (80/443) when absent.
    pub fn from_url(url: &str) -> Result<Self> {
        let parsed =
            Url::parse(url).map_err(|e| OdkError::invalid_server_url(url, e.to_string()))?;
        let scheme = parsed.scheme();
        if scheme != "http" && scheme != "https" {
            return Err(OdkError::invalid_server_url(
                url,
                format!("unsupported scheme \"{scheme}\""),
            ));
        }
        let host = parsed
            .host_str()
            .ok_or_else(|| OdkError::invalid_server_url(url, "missing host"))?;
        let port = parsed
            .port_or_known_default()
            .ok_or_else(|| OdkError::invalid_server_url(url, "missing port"))?;
        Self::new(scheme, host, port, parsed.path())
    }

    /// Attach credentials.
    #[must_use]
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Attach a device identifier.
    #[must_use]
    pub fn with_device_id(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    /// Attach a per-request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Origin part of every request URL, no trailing slash.
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }

    /// Path the Aggregate application is rooted at.
    pub fn root_path(&self) -> &str {
        &self.path
    }

    /// Path-and-query of the submission endpoint. This exact string is also
    /// what the digest `uri` parameter covers.
    pub fn submission_path(&self) -> String {
        let mut path = format!("{}/submission", self.path.trim_end_matches('/'));
        if let Some(id) = &self.device_id {
            path.push_str("?deviceID=");
            path.push_str(id);
        }
        path
    }
}
