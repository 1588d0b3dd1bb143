//! Cookie-tracking HTTP session.
//!
//! Wraps a `reqwest::Client` with automatic redirects disabled. Every hop
//! is sent by hand so the `Cookie` header can be rebuilt from the jar after
//! the previous hop's `Set-Cookie` headers were merged. This matters mid
//! handshake, where each redirect usually plants a cookie the next hop needs.

use crate::acquisition::challenge::{basic_authorization, parse_challenge};
use crate::acquisition::cookie_jar::{unix_now, CookieJar};
use crate::config::{ClientConfig, RedirectRewrite};
use crate::credentials::{CredentialSupplier, Credentials, Prompt, PromptRequest};
use crate::error::{Error, Result};
use crate::forms::{decode_html, Form, FormMethod};
use reqwest::header::{
    HeaderMap, AUTHORIZATION, CONTENT_TYPE, COOKIE, LOCATION, WWW_AUTHENTICATE,
};
use reqwest::{Method, Response, StatusCode};
use tracing::debug;
use url::Url;

/// One request the session can send, replay after a redirect, or resend
/// with credentials after a 401.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingRequest {
    pub method: Method,
    pub url: Url,
    /// `application/x-www-form-urlencoded` body.
    pub form: Option<Vec<(String, String)>>,
    authorization: Option<String>,
}

impl OutgoingRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            form: None,
            authorization: None,
        }
    }

    /// Serialize `pairs` the way a browser submits `form`: a GET replaces
    /// the action's query string, a POST sends an urlencoded body.
    pub fn submit(form: &Form, pairs: Vec<(String, String)>) -> Self {
        match form.method {
            FormMethod::Get => {
                let mut url = form.action.clone();
                url.set_query(None);
                if !pairs.is_empty() {
                    url.query_pairs_mut().extend_pairs(&pairs);
                }
                Self::get(url)
            }
            FormMethod::Post => Self {
                method: Method::POST,
                url: form.action.clone(),
                form: Some(pairs),
                authorization: None,
            },
        }
    }

    pub fn is_authorized(&self) -> bool {
        self.authorization.is_some()
    }

    fn with_authorization(mut self, value: String) -> Self {
        self.authorization = Some(value);
        self
    }

    /// The request a browser sends after `status` pointing at `target`.
    ///
    /// 307/308 replay method and body; the rest degrade to a bodiless GET.
    /// Credentials only follow same-host redirects.
    fn redirected(&self, status: StatusCode, target: Url) -> Self {
        let same_host = self.url.host_str() == target.host_str();
        let authorization = self.authorization.clone().filter(|_| same_host);
        if matches!(
            status,
            StatusCode::TEMPORARY_REDIRECT | StatusCode::PERMANENT_REDIRECT
        ) {
            Self {
                method: self.method.clone(),
                url: target,
                form: self.form.clone(),
                authorization,
            }
        } else {
            Self {
                authorization,
                ..Self::get(target)
            }
        }
    }
}

/// A final, non-redirect response and the hop that produced it.
#[derive(Debug)]
pub struct Fetched {
    pub request: OutgoingRequest,
    pub response: Response,
}

/// A Basic challenge waiting for credentials from an interactive supplier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChallenge {
    pub request: OutgoingRequest,
    pub realm: String,
}

/// Result of sending a request through the session.
#[derive(Debug)]
pub enum Exchange {
    Response(Fetched),
    /// A 401 was handed to an interactive supplier; nothing more was sent.
    Challenged(PendingChallenge),
}

/// A fully read response body.
#[derive(Debug, Clone)]
pub struct PageResponse {
    pub url: Url,
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

impl PageResponse {
    pub async fn read(fetched: Fetched) -> Result<Self> {
        let status = fetched.response.status().as_u16();
        let headers = fetched.response.headers().clone();
        let body = body_text(fetched.response).await?;
        Ok(Self {
            url: fetched.request.url,
            status,
            headers,
            body,
        })
    }
}

#[derive(Debug, Clone)]
struct RealmAuthorization {
    host: String,
    realm: String,
    header: String,
}

/// HTTP client bound to one cookie jar.
pub struct HttpSession {
    client: reqwest::Client,
    jar: CookieJar,
    config: ClientConfig,
    realms: Vec<RealmAuthorization>,
}

impl HttpSession {
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::with_jar(config, CookieJar::new())
    }

    /// Start from an existing jar, e.g. one loaded from a cookie file.
    pub fn with_jar(config: ClientConfig, jar: CookieJar) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            client,
            jar,
            config,
            realms: Vec::new(),
        })
    }

    pub fn jar(&self) -> &CookieJar {
        &self.jar
    }

    pub fn jar_mut(&mut self) -> &mut CookieJar {
        &mut self.jar
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub async fn fetch(
        &mut self,
        url: &Url,
        supplier: Option<&mut dyn CredentialSupplier>,
    ) -> Result<Exchange> {
        self.send(OutgoingRequest::get(url.clone()), supplier).await
    }

    /// Send `request`, following redirects and answering Basic challenges.
    ///
    /// Without a supplier a 401 is returned like any other response.
    pub async fn send(
        &mut self,
        request: OutgoingRequest,
        mut supplier: Option<&mut dyn CredentialSupplier>,
    ) -> Result<Exchange> {
        let origin = request.url.clone();
        let mut request = request;
        let mut redirects = 0;

        loop {
            let response = self.exchange(&request).await?;
            let status = response.status();

            if is_redirect(status) {
                if redirects >= self.config.max_redirects {
                    return Err(Error::TooManyRedirects {
                        url: origin.to_string(),
                        limit: self.config.max_redirects,
                    });
                }
                redirects += 1;
                let location = location_header(response.headers()).ok_or_else(|| {
                    Error::MissingLocation {
                        url: request.url.to_string(),
                        status: status.as_u16(),
                    }
                })?;
                let target = resolve_redirect(
                    &request.url,
                    &location,
                    self.config.redirect_rewrite.as_ref(),
                )?;
                debug!(status = status.as_u16(), from = %request.url, to = %target, "redirect");
                request = request.redirected(status, target);
                continue;
            }

            if status == StatusCode::UNAUTHORIZED {
                if let Some(supplier) = supplier.as_deref_mut() {
                    let header = response
                        .headers()
                        .get(WWW_AUTHENTICATE)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default();
                    let challenge = parse_challenge(header)?;
                    if request.is_authorized() {
                        return Err(Error::CredentialsRejected {
                            realm: challenge.realm,
                        });
                    }
                    debug!(realm = %challenge.realm, url = %request.url, "basic auth challenge");

                    let authorization = match self.realm_authorization(&request.url, &challenge.realm) {
                        Some(known) => known,
                        None => match supplier.prompt(PromptRequest::basic_auth(&challenge.realm))? {
                            Prompt::Ready(credentials) => {
                                self.remember_realm(&request.url, &challenge.realm, &credentials)
                            }
                            Prompt::Deferred => {
                                return Ok(Exchange::Challenged(PendingChallenge {
                                    request,
                                    realm: challenge.realm,
                                }));
                            }
                        },
                    };
                    request = request.with_authorization(authorization);
                    continue;
                }
            }

            return Ok(Exchange::Response(Fetched { request, response }));
        }
    }

    /// Resend a challenged request with credentials captured later.
    pub async fn answer_challenge(
        &mut self,
        pending: PendingChallenge,
        credentials: &Credentials,
        supplier: Option<&mut dyn CredentialSupplier>,
    ) -> Result<Exchange> {
        let authorization = self.remember_realm(&pending.request.url, &pending.realm, credentials);
        self.send(pending.request.with_authorization(authorization), supplier)
            .await
    }

    /// Plain authenticated GET returning the body; anything but 200 fails.
    pub async fn read(&mut self, url: &Url) -> Result<String> {
        let transport = |status: u16| Error::Transport {
            url: url.to_string(),
            status,
        };
        match self.fetch(url, None).await? {
            Exchange::Response(fetched) if fetched.response.status() == StatusCode::OK => {
                body_text(fetched.response).await
            }
            Exchange::Response(fetched) => Err(transport(fetched.response.status().as_u16())),
            Exchange::Challenged(_) => Err(transport(StatusCode::UNAUTHORIZED.as_u16())),
        }
    }

    async fn exchange(&mut self, request: &OutgoingRequest) -> Result<Response> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone());
        if let Some(cookies) = self.jar.cookie_header(&request.url, unix_now()) {
            builder = builder.header(COOKIE, cookies);
        }
        if let Some(authorization) = &request.authorization {
            builder = builder.header(AUTHORIZATION, authorization);
        }
        if let Some(form) = &request.form {
            builder = builder.form(form);
        }

        let response = builder.send().await?;
        let stored = self
            .jar
            .extract(&request.url, response.headers(), unix_now());
        debug!(
            method = %request.method,
            url = %request.url,
            status = response.status().as_u16(),
            cookies_set = stored,
            "http exchange"
        );
        Ok(response)
    }

    fn realm_authorization(&self, url: &Url, realm: &str) -> Option<String> {
        let host = url.host_str()?;
        self.realms
            .iter()
            .find(|r| r.host == host && r.realm == realm)
            .map(|r| r.header.clone())
    }

    fn remember_realm(&mut self, url: &Url, realm: &str, credentials: &Credentials) -> String {
        let host = url.host_str().unwrap_or_default().to_string();
        let header = basic_authorization(credentials);
        self.realms.retain(|r| !(r.host == host && r.realm == realm));
        self.realms.push(RealmAuthorization {
            host,
            realm: realm.to_string(),
            header: header.clone(),
        });
        header
    }
}

/// The response `Content-Type` header, if it is valid text.
pub fn content_type(headers: &HeaderMap) -> Option<&str> {
    headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
}

/// Read the body, decoded with the charset the response declares.
async fn body_text(response: Response) -> Result<String> {
    let content_type = content_type(response.headers()).map(str::to_string);
    let bytes = response.bytes().await?;
    Ok(decode_html(&bytes, content_type.as_deref()))
}

fn is_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

/// `Location`, falling back to the legacy `URI` header.
fn location_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(LOCATION)
        .or_else(|| headers.get("uri"))
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Resolve a redirect target against the current URL, then swap a bare
/// service-root target for the authentication callback.
pub fn resolve_redirect(
    current: &Url,
    location: &str,
    rewrite: Option<&RedirectRewrite>,
) -> Result<Url> {
    let target = current.join(location)?;
    match rewrite.and_then(|r| r.apply(&target)) {
        Some(callback) => {
            debug!(from = %target, to = %callback, "rewrote redirect to service root");
            Ok(callback)
        }
        None => Ok(target),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forms::parse_page;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn rewrite() -> RedirectRewrite {
        RedirectRewrite::new(
            url("https://www.moodle.example.edu/"),
            url("https://www.moodle.example.edu/auth/shibboleth/index.php"),
        )
    }

    #[test]
    fn test_redirect_to_root_is_rewritten() {
        let current = url("https://www.moodle.example.edu/Shibboleth.sso/SAML2/POST");
        let target =
            resolve_redirect(&current, "https://www.moodle.example.edu/", Some(&rewrite())).unwrap();
        assert_eq!(
            target.as_str(),
            "https://www.moodle.example.edu/auth/shibboleth/index.php"
        );
    }

    #[test]
    fn test_other_redirects_resolve_relative() {
        let current = url("https://idp.example.edu/idp/profile/SAML2/Redirect/SSO?x=1");
        let target =
            resolve_redirect(&current, "SSO?execution=e1s1", Some(&rewrite())).unwrap();
        assert_eq!(
            target.as_str(),
            "https://idp.example.edu/idp/profile/SAML2/Redirect/SSO?execution=e1s1"
        );

        let absolute = resolve_redirect(&current, "https://other.example.org/a", None).unwrap();
        assert_eq!(absolute.as_str(), "https://other.example.org/a");
    }

    #[test]
    fn test_location_header_falls_back_to_uri() {
        let mut headers = HeaderMap::new();
        assert_eq!(location_header(&headers), None);
        headers.insert("uri", "/next".parse().unwrap());
        assert_eq!(location_header(&headers).as_deref(), Some("/next"));
        headers.insert(LOCATION, "/preferred".parse().unwrap());
        assert_eq!(location_header(&headers).as_deref(), Some("/preferred"));
    }

    #[test]
    fn test_redirected_request_semantics() {
        let post = OutgoingRequest {
            method: Method::POST,
            url: url("https://idp.example.edu/login"),
            form: Some(vec![("a".to_string(), "1".to_string())]),
            authorization: Some("Basic eA==".to_string()),
        };

        let see_other = post.redirected(StatusCode::SEE_OTHER, url("https://idp.example.edu/next"));
        assert_eq!(see_other.method, Method::GET);
        assert!(see_other.form.is_none());
        assert!(see_other.is_authorized());

        let temporary = post.redirected(
            StatusCode::TEMPORARY_REDIRECT,
            url("https://sp.example.org/acs"),
        );
        assert_eq!(temporary.method, Method::POST);
        assert_eq!(temporary.form, post.form);
        assert!(!temporary.is_authorized());
    }

    #[test]
    fn test_submit_honors_form_method() {
        let page = parse_page(
            r#"<form action="/wayf?old=1"><input name="user_idp" value="idp"></form>
               <form action="/login" method="post"><input name="u" value="x"></form>"#,
            url("https://sp.example.org/start"),
        );

        let get = OutgoingRequest::submit(&page.forms[0], page.forms[0].fields.to_pairs());
        assert_eq!(get.method, Method::GET);
        assert_eq!(get.url.as_str(), "https://sp.example.org/wayf?user_idp=idp");
        assert!(get.form.is_none());

        let post = OutgoingRequest::submit(&page.forms[1], page.forms[1].fields.to_pairs());
        assert_eq!(post.method, Method::POST);
        assert_eq!(post.url.as_str(), "https://sp.example.org/login");
        assert_eq!(post.form, Some(vec![("u".to_string(), "x".to_string())]));
    }
}
