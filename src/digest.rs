//! Digest Access Authentication against the Aggregate submission endpoint.
//!
//! Aggregate challenges with MD5 digest auth including `qop`; the response
//! chain is `md5(HA1:nonce:nc:cnonce:qop:HA2)` with `HA1 =
//! md5(username:realm:password)` and `HA2 = md5(method:uri)`. The nonce
//! counter is rendered as an 8-digit zero-padded decimal and consumed on
//! every rendered header; reusing a counter value is a protocol violation,
//! so each request gets a freshly computed `Authorization`.

use tracing::debug;
use uuid::Uuid;

use crate::error::{OdkError, Result};

/// One authentication session derived from a server challenge.
///
/// The session holds the challenge parameters and the request counter; it is
/// valid for the connection that received the challenge and must be rebuilt
/// from a fresh challenge after a reconnect.
#[derive(Debug)]
pub struct DigestAuth {
    username: String,
    password: String,
    realm: String,
    nonce: String,
    qop: String,
    cnonce: String,
    nc: u32,
}

impl DigestAuth {
    /// Build a session from a `www-authenticate` header value.
    ///
    /// The header must carry the `Digest` scheme and the `realm`, `nonce`,
    /// and `qop` parameters; anything else is [`OdkError::MalformedChallenge`].
    pub fn from_challenge(header: &str, username: &str, password: &str) -> Result<Self> {
        let rest = header.strip_prefix("Digest ").ok_or_else(|| {
            OdkError::challenge("expected www-authenticate value to start with \"Digest \"")
        })?;

        let mut realm = None;
        let mut nonce = None;
        let mut qop = None;
        for piece in split_params(rest) {
            let piece = piece.trim();
            if piece.is_empty() {
                continue;
            }
            let (key, value) = piece.split_once('=').ok_or_else(|| {
                OdkError::challenge(format!("parameter without '=': \"{piece}\""))
            })?;
            let value = value.trim().trim_matches('"');
            match key.trim() {
                "realm" => realm = Some(value.to_string()),
                "nonce" => nonce = Some(value.to_string()),
                "qop" => qop = Some(value.to_string()),
                _ => {}
            }
        }

        let missing = |name: &str| OdkError::challenge(format!("challenge is missing \"{name}\""));
        Ok(Self {
            username: username.to_string(),
            password: password.to_string(),
            realm: realm.ok_or_else(|| missing("realm"))?,
            nonce: nonce.ok_or_else(|| missing("nonce"))?,
            qop: qop.ok_or_else(|| missing("qop"))?,
            cnonce: Uuid::new_v4().simple().to_string(),
            nc: 1,
        })
    }

    /// Replace the random client nonce, for reproducible handshakes.
    #[must_use]
    pub fn with_cnonce(mut self, cnonce: impl Into<String>) -> Self {
        self.cnonce = cnonce.into();
        self
    }

    /// Render an `Authorization` header value for one request.
    ///
    /// `uri` is the path-and-query the request targets, not the full URL.
    /// The counter advances on every call.
    pub fn authorization(&mut self, method: &str, uri: &str) -> String {
        let nc = format!("{:08}", self.nc);
        self.nc += 1;

        let ha1 = md5_hex(&format!("{}:{}:{}", self.username, self.realm, self.password));
        let ha2 = md5_hex(&format!("{method}:{uri}"));
        let response = md5_hex(&format!(
            "{ha1}:{}:{nc}:{}:{}:{ha2}",
            self.nonce, self.cnonce, self.qop
        ));

        debug!("digest: username={} realm={} => HA1={ha1}", self.username, self.realm);
        debug!("digest: method={method} uri={uri} => HA2={ha2}");
        debug!(
            "digest: nonce={} nc={nc} cnonce={} qop={} => response={response}",
            self.nonce, self.cnonce, self.qop
        );

        format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{uri}\", \
             response=\"{response}\", cnonce=\"{}\", algorithm=\"MD5\", nc=\"{nc}\", \
             qop=\"{}\"",
            self.username, self.realm, self.nonce, self.cnonce, self.qop
        )
    }
}

/// Split challenge parameters on commas that sit outside quoted values, so
/// lists like `qop="auth,auth-int"` stay intact.
fn split_params(input: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    for (i, c) in input.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                pieces.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    pieces.push(&input[start..]);
    pieces
}

fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}
