//! Credential suppliers: automated and human-in-the-loop.
//!
//! A supplier answers prompts raised by the login-form adapter and by HTTP
//! Basic challenges. The automated variant answers immediately; the
//! interactive variant records the prompt and defers, and the chain is later
//! continued through [`crate::Shibboleth::resume`].

use crate::error::{Error, Result};
use std::fmt;

/// A username/password pair.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// What is asking for credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    /// An identity-provider login form.
    LoginForm,
    /// An HTTP 401 Basic challenge.
    BasicAuth,
}

/// A request for credentials, titled with the page title or the auth realm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptRequest {
    pub kind: PromptKind,
    pub title: String,
}

impl PromptRequest {
    pub fn login_form(title: &str) -> Self {
        Self {
            kind: PromptKind::LoginForm,
            title: title.to_string(),
        }
    }

    pub fn basic_auth(realm: &str) -> Self {
        Self {
            kind: PromptKind::BasicAuth,
            title: realm.to_string(),
        }
    }
}

/// Answer to a prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt {
    /// Credentials are available now.
    Ready(Credentials),
    /// The prompt was handed to a human; the chain must suspend.
    Deferred,
}

/// Source of credentials for one Shibboleth engine.
///
/// At most one prompt may be outstanding per supplier. Prompting again
/// before `resume` is an error, never a silent overwrite.
pub trait CredentialSupplier: Send {
    /// Whether prompts are answered by a human and therefore deferred.
    fn is_interactive(&self) -> bool;

    fn prompt(&mut self, request: PromptRequest) -> Result<Prompt>;

    /// Deliver externally captured credentials for the outstanding prompt.
    ///
    /// Returns the prompt being answered.
    fn resume(&mut self, credentials: Credentials) -> Result<PromptRequest>;

    /// The outstanding prompt, if any.
    fn pending(&self) -> Option<&PromptRequest>;
}

/// Answers every prompt with fixed credentials.
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    credentials: Credentials,
}

impl StaticCredentials {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }
}

impl CredentialSupplier for StaticCredentials {
    fn is_interactive(&self) -> bool {
        false
    }

    fn prompt(&mut self, _request: PromptRequest) -> Result<Prompt> {
        Ok(Prompt::Ready(self.credentials.clone()))
    }

    fn resume(&mut self, _credentials: Credentials) -> Result<PromptRequest> {
        Err(Error::NoPendingPrompt)
    }

    fn pending(&self) -> Option<&PromptRequest> {
        None
    }
}

/// Defers every prompt until a human supplies credentials.
#[derive(Debug, Default)]
pub struct InteractiveCredentials {
    pending: Option<PromptRequest>,
}

impl InteractiveCredentials {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialSupplier for InteractiveCredentials {
    fn is_interactive(&self) -> bool {
        true
    }

    fn prompt(&mut self, request: PromptRequest) -> Result<Prompt> {
        if self.pending.is_some() {
            return Err(Error::PromptPending);
        }
        self.pending = Some(request);
        Ok(Prompt::Deferred)
    }

    fn resume(&mut self, _credentials: Credentials) -> Result<PromptRequest> {
        self.pending.take().ok_or(Error::NoPendingPrompt)
    }

    fn pending(&self) -> Option<&PromptRequest> {
        self.pending.as_ref()
    }
}
