//! HTTP Basic challenge parsing and `Authorization` header construction.

use crate::credentials::Credentials;
use crate::error::{Error, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use regex::Regex;
use std::sync::LazyLock;

static CHALLENGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)^(?:\s*www-authenticate\s*:)?\s*(\w*)\s+realm=['"]([^'"]+)['"]"#)
        .expect("challenge regex is valid")
});

/// A parsed `WWW-Authenticate` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    pub scheme: String,
    pub realm: String,
}

/// Parse `scheme realm="value"`; anything else is a protocol error.
pub fn parse_challenge(header: &str) -> Result<AuthChallenge> {
    let caps = CHALLENGE_RE.captures(header).ok_or_else(|| Error::Challenge {
        header: header.to_string(),
    })?;
    Ok(AuthChallenge {
        scheme: caps[1].to_string(),
        realm: caps[2].to_string(),
    })
}

/// `Authorization` header value for HTTP Basic.
pub fn basic_authorization(credentials: &Credentials) -> String {
    let token = STANDARD.encode(format!(
        "{}:{}",
        credentials.username,
        credentials.password()
    ));
    format!("Basic {token}")
}
