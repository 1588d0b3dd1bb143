//! Error taxonomy for the handshake client.
//!
//! Every anomaly in the chain is surfaced as one of these variants; nothing
//! in the crate retries silently.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the cookie store, HTTP session, and Shibboleth engine.
#[derive(Debug, Error)]
pub enum Error {
    /// An authenticated read returned something other than 200.
    #[error("request to {url} returned status {status}")]
    Transport { url: String, status: u16 },

    /// Network, TLS, or timeout failure from the underlying client.
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    /// A page appeared mid-handshake that no adapter recognizes.
    #[error("shibboleth auth chain led to nowhere: unrecognized page {title:?} at {url}")]
    UnrecognizedPage { url: String, title: String },

    /// The handshake took more adapter steps than allowed.
    #[error("shibboleth auth chain exceeded {limit} steps")]
    ChainTooLong { limit: usize },

    /// A single exchange bounced through more redirects than allowed.
    #[error("more than {limit} redirects starting at {url}")]
    TooManyRedirects { url: String, limit: usize },

    /// A redirect status arrived with neither `Location` nor `URI`.
    #[error("redirect {status} from {url} carries no Location header")]
    MissingLocation { url: String, status: u16 },

    /// `WWW-Authenticate` did not match `scheme realm="value"`.
    #[error("unparseable WWW-Authenticate header: {header:?}")]
    Challenge { header: String },

    /// The server issued another 401 after credentials were sent for the realm.
    #[error("credentials rejected for realm {realm:?}")]
    CredentialsRejected { realm: String },

    /// A prompt was requested while another one is still outstanding.
    #[error("a credential prompt is already pending")]
    PromptPending,

    /// `resume` was called while nothing was suspended.
    #[error("no credential prompt is pending")]
    NoPendingPrompt,

    /// A supplier deferred a prompt while claiming to answer immediately, or
    /// answered immediately while claiming to defer.
    #[error("credential supplier answered against its interactive flag (interactive = {interactive})")]
    SupplierMismatch { interactive: bool },

    /// The provider-selection page does not offer the configured identity provider.
    #[error("identity provider {idp:?} is not offered on the selection page")]
    IdpNotOffered { idp: String },

    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// A cookie file line could not be parsed.
    #[error("cookie file line {line}: {reason}")]
    CookieFile { line: usize, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for failures that mean the upstream page sequence broke down.
    pub fn is_protocol_breakdown(&self) -> bool {
        matches!(
            self,
            Error::UnrecognizedPage { .. }
                | Error::ChainTooLong { .. }
                | Error::TooManyRedirects { .. }
                | Error::MissingLocation { .. }
                | Error::IdpNotOffered { .. }
        )
    }
}
