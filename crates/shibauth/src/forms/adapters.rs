//! Page adapters for the pages a Shibboleth handshake walks through.
//!
//! Resolution is a closed match over known page signatures. A page that
//! matches none of them yields `None`; there is no fallback guess.

use crate::acquisition::http_session::{Exchange, HttpSession, OutgoingRequest};
use crate::credentials::{CredentialSupplier, Credentials, PromptRequest};
use crate::error::{Error, Result};
use crate::forms::parser::{FieldKind, Form, ParsedPage};
use tracing::debug;

const WAYF_TITLES: &[&str] = &[
    "wayf",
    "where are you from",
    "discovery service",
    "select your home organisation",
    "select your home organization",
];
const LOGIN_TITLES: &[&str] = &["login", "log in", "sign in", "anmeldung"];
const RELEASE_TITLES: &[&str] = &["information release", "attribute release", "consent"];

/// Field names WAYF pages use for a free-form provider id.
const IDP_FIELDS: &[&str] = &["user_idp", "providerId", "entityID", "origin", "idp_selection"];
const USERNAME_HINTS: &[&str] = &["user", "login", "email", "uid", "name"];
const PROCEED: &str = "_eventId_proceed";

/// Which identity provider to pick on a provider-selection page.
///
/// Matched against option values (entity ids) first, then option labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdpSelection {
    pub id: String,
}

impl IdpSelection {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// The closed set of recognized page shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterKind {
    /// WAYF / discovery-service provider selection.
    IdpSelection,
    /// Identity-provider username/password form.
    CredentialLogin,
    /// Attribute-release confirmation.
    AttributeRelease,
    /// No-script SAML assertion POST back to the service provider.
    AssertionRelay,
}

/// Classify a page by title, or by form shape for the assertion relay.
pub fn classify(page: &ParsedPage) -> Option<AdapterKind> {
    if page.forms.iter().any(|f| f.fields.contains("SAMLResponse")) {
        return Some(AdapterKind::AssertionRelay);
    }
    let title = page.title.to_lowercase();
    let matches = |titles: &[&str]| titles.iter().any(|t| title.contains(t));
    if matches(RELEASE_TITLES) {
        Some(AdapterKind::AttributeRelease)
    } else if matches(WAYF_TITLES) {
        Some(AdapterKind::IdpSelection)
    } else if matches(LOGIN_TITLES) {
        Some(AdapterKind::CredentialLogin)
    } else {
        None
    }
}

/// Pick the adapter for `page`, or `None` when the page is not recognized
/// or lacks the form its signature requires.
pub fn resolve(
    page: &ParsedPage,
    idp: &IdpSelection,
    supplier: &dyn CredentialSupplier,
) -> Option<PageAdapter> {
    let adapter = match classify(page)? {
        AdapterKind::AssertionRelay => PageAdapter::AssertionRelay(RelayAdapter {
            form: page
                .forms
                .iter()
                .find(|f| f.fields.contains("SAMLResponse"))?
                .clone(),
        }),
        AdapterKind::AttributeRelease => PageAdapter::AttributeRelease(ReleaseAdapter {
            form: page
                .forms
                .iter()
                .find(|f| f.submitter(PROCEED).is_some())
                .or_else(|| page.forms.first())?
                .clone(),
        }),
        AdapterKind::IdpSelection => PageAdapter::IdpSelection(WayfAdapter {
            form: wayf_form(page, idp)?.clone(),
            idp: idp.clone(),
        }),
        AdapterKind::CredentialLogin => {
            let form = page.forms.iter().find(|f| f.has_password())?;
            let password_field = form.first_of_kind(FieldKind::Password)?.name.clone();
            let username_field = username_field(form)?;
            PageAdapter::CredentialLogin(LoginAdapter {
                form: form.clone(),
                title: page.title.clone(),
                username_field,
                password_field,
                interactive: supplier.is_interactive(),
            })
        }
    };
    Some(adapter)
}

/// The provider-selection form: one whose select offers `idp`, else one with
/// a free-form provider field, else the first form with any select so the
/// submission reports `IdpNotOffered`.
fn wayf_form<'a>(page: &'a ParsedPage, idp: &IdpSelection) -> Option<&'a Form> {
    let forms = &page.forms;
    forms
        .iter()
        .find(|f| offered_option(f, idp).is_some())
        .or_else(|| {
            forms.iter().find(|f| free_form_field(f).is_some())
        })
        .or_else(|| forms.iter().find(|f| !f.selects.is_empty()))
}

/// `(select name, option value)` for the option matching `idp`: by value
/// first, then by label ignoring case.
fn offered_option<'a>(form: &'a Form, idp: &IdpSelection) -> Option<(&'a str, &'a str)> {
    let wanted = idp.id.as_str();
    form.selects.iter().find_map(|select| {
        select
            .options
            .iter()
            .find(|o| o.value == wanted)
            .or_else(|| {
                select
                    .options
                    .iter()
                    .find(|o| o.label.eq_ignore_ascii_case(wanted))
            })
            .map(|o| (select.name.as_str(), o.value.as_str()))
    })
}

/// A typed or hidden provider-id field. Select values do not count.
fn free_form_field(form: &Form) -> Option<&str> {
    form.fields
        .iter()
        .find(|f| f.kind != FieldKind::Select && IDP_FIELDS.contains(&f.name.as_str()))
        .map(|f| f.name.as_str())
}

fn username_field(form: &Form) -> Option<String> {
    let texts: Vec<_> = form
        .fields
        .iter()
        .filter(|f| f.kind == FieldKind::Text)
        .collect();
    texts
        .iter()
        .find(|f| {
            let lower = f.name.to_lowercase();
            USERNAME_HINTS.iter().any(|h| lower.contains(h))
        })
        .or_else(|| texts.first())
        .map(|f| f.name.clone())
}

/// Provider-selection page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WayfAdapter {
    form: Form,
    idp: IdpSelection,
}

impl WayfAdapter {
    fn pairs(&self) -> Result<Vec<(String, String)>> {
        let mut fields = self.form.fields.clone();
        let wanted = &self.idp.id;

        if let Some((name, value)) = offered_option(&self.form, &self.idp) {
            fields.set(name, value);
        } else {
            let name = free_form_field(&self.form)
                .ok_or_else(|| Error::IdpNotOffered { idp: wanted.clone() })?;
            fields.set(name, wanted);
        }

        let mut pairs = fields.to_pairs();
        if let Some(button) = self.form.submitters.first() {
            pairs.push((button.name.clone(), button.value.clone()));
        }
        Ok(pairs)
    }
}

/// Identity-provider login form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginAdapter {
    form: Form,
    title: String,
    username_field: String,
    password_field: String,
    interactive: bool,
}

impl LoginAdapter {
    fn pairs(&self, credentials: Option<&Credentials>) -> Vec<(String, String)> {
        let mut fields = self.form.fields.clone();
        if let Some(credentials) = credentials {
            fields.set(&self.username_field, &credentials.username);
            fields.set(&self.password_field, credentials.password());
        }
        let mut pairs = fields.to_pairs();
        let button = self
            .form
            .submitter(PROCEED)
            .or_else(|| self.form.submitters.first());
        if let Some(button) = button {
            pairs.push((button.name.clone(), button.value.clone()));
        }
        pairs
    }
}

/// Attribute-release confirmation; accepts the release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseAdapter {
    form: Form,
}

/// Auto-submitting SAML assertion form, resubmitted verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayAdapter {
    form: Form,
}

/// One recognized page, ready to be filled and resubmitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageAdapter {
    IdpSelection(WayfAdapter),
    CredentialLogin(LoginAdapter),
    AttributeRelease(ReleaseAdapter),
    AssertionRelay(RelayAdapter),
}

impl PageAdapter {
    pub fn kind(&self) -> AdapterKind {
        match self {
            PageAdapter::IdpSelection(_) => AdapterKind::IdpSelection,
            PageAdapter::CredentialLogin(_) => AdapterKind::CredentialLogin,
            PageAdapter::AttributeRelease(_) => AdapterKind::AttributeRelease,
            PageAdapter::AssertionRelay(_) => AdapterKind::AssertionRelay,
        }
    }

    /// The form this adapter submits.
    pub fn form(&self) -> &Form {
        match self {
            PageAdapter::IdpSelection(a) => &a.form,
            PageAdapter::CredentialLogin(a) => &a.form,
            PageAdapter::AttributeRelease(a) => &a.form,
            PageAdapter::AssertionRelay(a) => &a.form,
        }
    }

    /// Whether submission waits on a human supplying credentials.
    pub fn interactive(&self) -> bool {
        matches!(self, PageAdapter::CredentialLogin(a) if a.interactive)
    }

    /// The credential prompt this page needs answered before submission.
    pub fn prompt_request(&self) -> Option<PromptRequest> {
        match self {
            PageAdapter::CredentialLogin(a) => Some(PromptRequest::login_form(&a.title)),
            _ => None,
        }
    }

    /// Build the browser-equivalent submission of the page's form.
    pub fn submission(&self, credentials: Option<&Credentials>) -> Result<OutgoingRequest> {
        let pairs = match self {
            PageAdapter::IdpSelection(a) => a.pairs()?,
            PageAdapter::CredentialLogin(a) => a.pairs(credentials),
            PageAdapter::AttributeRelease(a) => {
                let mut pairs = a.form.fields.to_pairs();
                if let Some(button) = a.form.submitter(PROCEED) {
                    pairs.push((button.name.clone(), button.value.clone()));
                }
                pairs
            }
            PageAdapter::AssertionRelay(a) => a.form.fields.to_pairs(),
        };
        Ok(OutgoingRequest::submit(self.form(), pairs))
    }

    /// Fill and submit the form through `session`.
    pub async fn submit(
        &self,
        session: &mut HttpSession,
        credentials: Option<&Credentials>,
        supplier: &mut dyn CredentialSupplier,
    ) -> Result<Exchange> {
        let request = self.submission(credentials)?;
        debug!(
            adapter = ?self.kind(),
            method = %request.method,
            action = %request.url,
            "submitting form"
        );
        session.send(request, Some(supplier)).await
    }
}
