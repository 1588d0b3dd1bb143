//! Shibboleth SSO client.
//!
//! Walks the browser handshake of a Shibboleth-protected service provider
//! (provider selection, identity-provider login, attribute release and the
//! SAML assertion relay) with a cookie-tracking HTTP session. Once the
//! session cookie is stored, authenticated pages can be read through the
//! same session.
//!
//! ```no_run
//! use shibauth::{ClientConfig, Credentials, IdpSelection, Outcome, Shibboleth, StaticCredentials};
//!
//! # async fn run() -> shibauth::Result<()> {
//! let supplier = StaticCredentials::new(Credentials::new("alice", "s3cret"));
//! let mut shib = Shibboleth::new(
//!     IdpSelection::new("https://idp.example.edu/idp/shibboleth"),
//!     Box::new(supplier),
//!     ClientConfig::from_env(),
//! )?;
//! let start = url::Url::parse("https://sp.example.org/Shibboleth.sso/Login")?;
//! if let Outcome::Complete(page) = shib.initiate(start).await? {
//!     println!("landed on {}", page.url);
//! }
//! # Ok(())
//! # }
//! ```

pub mod acquisition;
pub mod config;
pub mod credentials;
pub mod error;
pub mod forms;
pub mod shibboleth;

pub use acquisition::cookie_jar::{Cookie, CookieJar};
pub use acquisition::http_session::{HttpSession, PageResponse};
pub use config::{ClientConfig, RedirectRewrite};
pub use credentials::{
    CredentialSupplier, Credentials, InteractiveCredentials, Prompt, PromptKind, PromptRequest,
    StaticCredentials,
};
pub use error::{Error, Result};
pub use forms::IdpSelection;
pub use shibboleth::{ChainState, CompletionListener, Outcome, Shibboleth};
