//! Blocking client for the Aggregate submission API.
//!
//! One client talks to one server, sequentially. `connect` probes the
//! submission endpoint with a HEAD request and negotiates digest
//! authentication when challenged; `post_submission` then sends one
//! multipart submission per call, each with a freshly computed
//! `Authorization` header. This layer never retries; callers own the
//! retry and timeout envelope.

use chrono::Local;
use reqwest::blocking::{Client, Response};
use reqwest::header;
use reqwest::redirect::Policy;
use reqwest::Method;
use tracing::{debug, error, info};

use crate::config::ServerConfig;
use crate::digest::DigestAuth;
use crate::error::{OdkError, Result};
use crate::multipart::{encode_multipart, MultipartBody, SubmissionPart};

const OPENROSA_VERSION: &str = "1.0";

/// Client for posting form submissions to one Aggregate server.
pub struct AggregateClient {
    config: ServerConfig,
    http: Client,
    auth: Option<DigestAuth>,
    connected: bool,
}

impl AggregateClient {
    /// Build a client from connection settings. Does not touch the network;
    /// call [`AggregateClient::connect`] next.
    pub fn new(config: ServerConfig) -> Result<Self> {
        // Redirects are disabled: the digest uri parameter binds the exact
        // path-and-query each request targets.
        let http = Client::builder()
            .user_agent(format!("odk-pusher/{}", env!("CARGO_PKG_VERSION")))
            .redirect(Policy::none())
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            config,
            http,
            auth: None,
            connected: false,
        })
    }

    /// Probe the submission endpoint and negotiate access.
    ///
    /// A 204 means the server grants anonymous data-collector rights. A 401
    /// starts digest authentication: without configured credentials this is
    /// [`OdkError::CredentialsRequired`]; with them, the challenge is
    /// answered exactly once. A second 401 is
    /// [`OdkError::AuthenticationFailed`], a 403 means the account exists
    /// but may not post forms, and a 404 means the configured path does not
    /// exist on the server.
    pub fn connect(&mut self) -> Result<()> {
        self.auth = None;
        self.connected = false;

        let path = self.config.submission_path();
        let response = self.send(Method::HEAD, &path, None)?;
        let status = response.status().as_u16();
        debug!("HEAD {}{path}: status={status}", self.config.base_url());

        match status {
            204 => {
                info!(
                    "connected to {}{} (no authentication)",
                    self.config.base_url(),
                    self.config.root_path()
                );
                self.connected = true;
                Ok(())
            }
            401 => {
                info!("server replied status=401, starting digest access authentication");

                let (username, password) = match (&self.config.username, &self.config.password) {
                    (Some(u), Some(p)) => (u.clone(), p.clone()),
                    _ => return Err(OdkError::CredentialsRequired),
                };
                let challenge = response
                    .headers()
                    .get(header::WWW_AUTHENTICATE)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_string)
                    .ok_or_else(|| {
                        OdkError::challenge("response carries no usable www-authenticate header")
                    })?;
                self.auth = Some(DigestAuth::from_challenge(&challenge, &username, &password)?);

                let response = self.send(Method::HEAD, &path, None)?;
                let status = response.status().as_u16();
                debug!("authenticated HEAD: status={status}");

                match status {
                    204 => {
                        info!(
                            "connected to {}{} (authenticated as \"{username}\")",
                            self.config.base_url(),
                            self.config.root_path()
                        );
                        self.connected = true;
                        Ok(())
                    }
                    401 => {
                        // The server gets exactly one answer to its
                        // challenge; a second 401 ends the negotiation.
                        error!("cannot authenticate: received second 401 response");
                        self.auth = None;
                        Err(OdkError::AuthenticationFailed)
                    }
                    403 => {
                        self.auth = None;
                        Err(OdkError::Forbidden { username })
                    }
                    other => {
                        error!("expected status=204 after authentication, got {other}");
                        self.auth = None;
                        Err(OdkError::UnknownConnection { status: other })
                    }
                }
            }
            404 => Err(OdkError::EndpointNotFound {
                path: self.config.root_path().to_string(),
            }),
            other => Err(OdkError::UnknownConnection { status: other }),
        }
    }

    /// Whether the server still answers.
    ///
    /// False before [`AggregateClient::connect`] or after
    /// [`AggregateClient::close`]; otherwise sends a HEAD to the root path
    /// and reports whether any HTTP response came back, whatever its status.
    pub fn is_connected(&mut self) -> bool {
        if !self.connected {
            return false;
        }
        let path = self.config.root_path().to_string();
        self.send(Method::HEAD, &path, None).is_ok()
    }

    /// Drop the negotiated state. A new [`AggregateClient::connect`] is
    /// required before posting again.
    pub fn close(&mut self) {
        self.auth = None;
        self.connected = false;
    }

    /// POST one submission, the instance document first and attachments
    /// after, as `multipart/form-data`.
    ///
    /// 201 is success. 404 means the server does not know the form id:
    /// recoverable, upload the form definition and post again. Every other
    /// status is [`OdkError::SubmissionRejected`] with the response body.
    pub fn post_submission(&mut self, parts: &[SubmissionPart]) -> Result<()> {
        let path = self.config.submission_path();
        let encoded = encode_multipart(parts);
        let response = self.send(Method::POST, &path, Some(encoded))?;
        let status = response.status().as_u16();
        let body = response.text().unwrap_or_default();
        debug!("POST {path}: status={status} body={body:?}");

        match status {
            201 => Ok(()),
            404 => {
                error!("could not find form with specified id on server");
                Err(OdkError::FormNotFound)
            }
            other => {
                error!("expected status=201 after posting, got {other}");
                Err(OdkError::SubmissionRejected {
                    status: other,
                    body,
                })
            }
        }
    }

    fn send(
        &mut self,
        method: Method,
        path_and_query: &str,
        body: Option<MultipartBody>,
    ) -> Result<Response> {
        let url = format!("{}{path_and_query}", self.config.base_url());
        let mut request = self
            .http
            .request(method.clone(), &url)
            .header("X-OpenRosa-Version", OPENROSA_VERSION)
            .header(header::DATE, http_date())
            .header(header::CONNECTION, "Keep-Alive");
        if let Some(auth) = &mut self.auth {
            request = request.header(
                header::AUTHORIZATION,
                auth.authorization(method.as_str(), path_and_query),
            );
        }
        if let Some(encoded) = body {
            request = request
                .header(header::CONTENT_TYPE, encoded.content_type)
                .body(encoded.body);
        }
        Ok(request.send()?)
    }
}

/// RFC-1123-like local date with an explicit timezone offset, the shape
/// OpenRosa clients traditionally send.
fn http_date() -> String {
    let now = Local::now();
    format!("{} GMT{}", now.format("%a, %d %b %Y %H:%M:%S"), now.format("%:z"))
}
