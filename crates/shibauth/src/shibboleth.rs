//! The Shibboleth engine: drives the handshake until the service provider
//! hands out its session cookie.
//!
//! The chain is an explicit loop rather than recursion: fetch, check the jar
//! for a session cookie scoped to the target host, otherwise scrape the page,
//! resolve an adapter and submit. The loop is capped at
//! `ClientConfig::max_chain_steps` submissions. An interactive login or
//! Basic challenge suspends the loop and returns to the caller; `resume`
//! picks it up from the stored adapter or request.
//!
//! Credentials are posted to a login form at most once per chain. A login
//! page that comes back after that is a rejection and fails with
//! `Error::CredentialsRejected`, for automated and interactive suppliers
//! alike; a fresh `initiate` starts a new attempt.

use crate::acquisition::cookie_jar::{unix_now, CookieJar};
use crate::acquisition::http_session::{
    content_type, Exchange, Fetched, HttpSession, PageResponse, PendingChallenge,
};
use crate::config::ClientConfig;
use crate::credentials::{CredentialSupplier, Credentials, Prompt, PromptRequest};
use crate::error::{Error, Result};
use crate::forms::{resolve, AdapterKind, FormParser, IdpSelection, PageAdapter, ParsedPage};
use tracing::{debug, info, warn};
use url::Url;

/// Called once, with the response that completed the handshake.
///
/// An `Err` is logged and swallowed; the remaining listeners still run.
pub type CompletionListener = Box<dyn FnMut(&PageResponse) -> anyhow::Result<()> + Send>;

/// Observable state of the authentication chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    /// No chain in progress.
    Following,
    /// Waiting for `resume` with human-supplied credentials.
    Suspended,
    /// The session cookie for the target host is present.
    Complete,
}

/// Result of `initiate` or `resume`.
#[derive(Debug)]
pub enum Outcome {
    Complete(PageResponse),
    /// The chain stopped at a prompt; call `resume` to continue.
    Suspended(PromptRequest),
}

#[derive(Debug)]
enum Pending {
    Adapter(PageAdapter),
    Challenge(PendingChallenge),
}

enum Stage {
    Following,
    Suspended(Pending),
    Complete,
}

/// Shibboleth SSO client for one account.
pub struct Shibboleth {
    session: HttpSession,
    idp: IdpSelection,
    supplier: Box<dyn CredentialSupplier>,
    target: Option<Url>,
    stage: Stage,
    listeners: Vec<CompletionListener>,
    listeners_fired: bool,
}

impl Shibboleth {
    pub fn new(
        idp: IdpSelection,
        supplier: Box<dyn CredentialSupplier>,
        config: ClientConfig,
    ) -> Result<Self> {
        Self::with_cookie_jar(idp, supplier, config, CookieJar::new())
    }

    /// Start from an existing jar, e.g. one loaded from a cookie file.
    pub fn with_cookie_jar(
        idp: IdpSelection,
        supplier: Box<dyn CredentialSupplier>,
        config: ClientConfig,
        jar: CookieJar,
    ) -> Result<Self> {
        Ok(Self {
            session: HttpSession::with_jar(config, jar)?,
            idp,
            supplier,
            target: None,
            stage: Stage::Following,
            listeners: Vec::new(),
            listeners_fired: false,
        })
    }

    /// Register a completion listener. Listeners run in registration order.
    pub fn add_listener<F>(&mut self, listener: F)
    where
        F: FnMut(&PageResponse) -> anyhow::Result<()> + Send + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    pub fn state(&self) -> ChainState {
        match self.stage {
            Stage::Following => ChainState::Following,
            Stage::Suspended(_) => ChainState::Suspended,
            Stage::Complete => ChainState::Complete,
        }
    }

    /// The URL the current chain was started with.
    pub fn target(&self) -> Option<&Url> {
        self.target.as_ref()
    }

    pub fn pending_prompt(&self) -> Option<&PromptRequest> {
        self.supplier.pending()
    }

    pub fn cookie_jar(&self) -> &CookieJar {
        self.session.jar()
    }

    pub fn cookie_jar_mut(&mut self) -> &mut CookieJar {
        self.session.jar_mut()
    }

    /// Whether a session cookie scoped to the target host is stored.
    ///
    /// Looks at the jar only; never touches the network.
    pub fn check_completion(&self) -> bool {
        self.target
            .as_ref()
            .and_then(|t| t.host_str())
            .is_some_and(|host| self.session.jar().session_cookie_for(host, unix_now()).is_some())
    }

    /// Start the handshake at `url`.
    pub async fn initiate(&mut self, url: Url) -> Result<Outcome> {
        if matches!(self.stage, Stage::Suspended(_)) {
            return Err(Error::PromptPending);
        }
        debug!(url = %url, "GET");
        self.target = Some(url.clone());
        self.stage = Stage::Following;
        let exchange = self
            .session
            .fetch(&url, Some(self.supplier.as_mut()))
            .await?;
        self.follow_chain(exchange, false).await
    }

    /// Continue a suspended chain with credentials captured out of band.
    pub async fn resume(&mut self, credentials: Credentials) -> Result<Outcome> {
        if !matches!(self.stage, Stage::Suspended(_)) {
            return Err(Error::NoPendingPrompt);
        }
        let answered = self.supplier.resume(credentials.clone())?;
        let Stage::Suspended(pending) = std::mem::replace(&mut self.stage, Stage::Following)
        else {
            return Err(Error::NoPendingPrompt);
        };
        debug!(kind = ?answered.kind, title = %answered.title, "resuming chain");

        let login_submitted =
            matches!(&pending, Pending::Adapter(a) if a.kind() == AdapterKind::CredentialLogin);
        let exchange = match pending {
            Pending::Adapter(adapter) => {
                adapter
                    .submit(&mut self.session, Some(&credentials), self.supplier.as_mut())
                    .await?
            }
            Pending::Challenge(challenge) => {
                self.session
                    .answer_challenge(challenge, &credentials, Some(self.supplier.as_mut()))
                    .await?
            }
        };
        self.follow_chain(exchange, login_submitted).await
    }

    /// Authenticated read outside the handshake. Fails on anything but 200.
    pub async fn read(&mut self, url: &Url) -> Result<String> {
        self.session.read(url).await
    }

    async fn follow_chain(
        &mut self,
        mut exchange: Exchange,
        mut login_submitted: bool,
    ) -> Result<Outcome> {
        let limit = self.session.config().max_chain_steps;
        let mut steps = 0;

        loop {
            let fetched = match exchange {
                Exchange::Response(fetched) => fetched,
                Exchange::Challenged(challenge) => {
                    let request = PromptRequest::basic_auth(&challenge.realm);
                    return Ok(self.suspend(Pending::Challenge(challenge), request));
                }
            };

            if self.check_completion() {
                return self.complete(fetched).await;
            }

            if steps >= limit {
                return Err(Error::ChainTooLong { limit });
            }
            steps += 1;

            let page = scrape(fetched).await?;
            let adapter = resolve(&page, &self.idp, self.supplier.as_ref()).ok_or_else(|| {
                Error::UnrecognizedPage {
                    url: page.url.to_string(),
                    title: page.title.clone(),
                }
            })?;
            debug!(adapter = ?adapter.kind(), title = %page.title, url = %page.url, "resolved page");

            if adapter.kind() == AdapterKind::CredentialLogin {
                if login_submitted {
                    return Err(Error::CredentialsRejected { realm: page.title });
                }
                login_submitted = true;
            }

            let credentials = match adapter.prompt_request() {
                None => None,
                Some(request) => {
                    let answer = self.supplier.prompt(request.clone())?;
                    match (adapter.interactive(), answer) {
                        (true, Prompt::Deferred) => {
                            return Ok(self.suspend(Pending::Adapter(adapter), request));
                        }
                        (false, Prompt::Ready(credentials)) => Some(credentials),
                        (interactive, _) => {
                            return Err(Error::SupplierMismatch { interactive });
                        }
                    }
                }
            };

            exchange = adapter
                .submit(&mut self.session, credentials.as_ref(), self.supplier.as_mut())
                .await?;
        }
    }

    fn suspend(&mut self, pending: Pending, request: PromptRequest) -> Outcome {
        info!(kind = ?request.kind, title = %request.title, "awaiting credentials");
        self.stage = Stage::Suspended(pending);
        Outcome::Suspended(request)
    }

    async fn complete(&mut self, fetched: Fetched) -> Result<Outcome> {
        let extended = self.session.jar_mut().extend_session_cookies(unix_now());
        let response = PageResponse::read(fetched).await?;
        info!(url = %response.url, extended, "shibboleth session established");
        self.stage = Stage::Complete;

        if !self.listeners_fired {
            self.listeners_fired = true;
            for listener in self.listeners.iter_mut() {
                if let Err(e) = listener(&response) {
                    warn!("completion listener failed: {e:#}");
                }
            }
        }
        Ok(Outcome::Complete(response))
    }
}

/// Stream the body into the form parser.
async fn scrape(fetched: Fetched) -> Result<ParsedPage> {
    let Fetched {
        request,
        mut response,
    } = fetched;
    let mut parser =
        FormParser::new(request.url).with_content_type(content_type(response.headers()));
    while let Some(chunk) = response.chunk().await? {
        parser.feed(&chunk);
    }
    Ok(parser.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::cookie_jar::Cookie;
    use crate::credentials::{InteractiveCredentials, StaticCredentials};

    fn engine(supplier: Box<dyn CredentialSupplier>) -> Shibboleth {
        Shibboleth::new(IdpSelection::new("idp"), supplier, ClientConfig::default()).unwrap()
    }

    #[test]
    fn test_fresh_engine_is_following_and_incomplete() {
        let shib = engine(Box::new(StaticCredentials::new(Credentials::new("a", "b"))));
        assert_eq!(shib.state(), ChainState::Following);
        assert!(!shib.check_completion());
        assert!(shib.pending_prompt().is_none());
    }

    #[test]
    fn test_check_completion_reads_jar_for_target_host() {
        let mut shib = engine(Box::new(StaticCredentials::new(Credentials::new("a", "b"))));
        shib.target = Some(Url::parse("https://sp.example.org/Shibboleth.sso/Login").unwrap());
        assert!(!shib.check_completion());

        shib.cookie_jar_mut()
            .insert(Cookie::new("_shibsession_1", "x", "idp.example.org", "/"), unix_now());
        assert!(!shib.check_completion());

        shib.cookie_jar_mut()
            .insert(Cookie::new("_shibsession_2", "y", "sp.example.org", "/"), unix_now());
        assert!(shib.check_completion());
        assert!(shib.check_completion());
    }

    #[tokio::test]
    async fn test_resume_without_suspension_is_rejected() {
        let mut shib = engine(Box::new(InteractiveCredentials::new()));
        let err = shib.resume(Credentials::new("a", "b")).await.unwrap_err();
        assert!(matches!(err, Error::NoPendingPrompt));
    }
}
