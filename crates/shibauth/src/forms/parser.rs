//! Streaming HTML form scraper.
//!
//! Response bodies are fed in chunks as they arrive and parsed once on
//! [`FormParser::finish`]. Parsing goes through html5ever (via scraper), so
//! malformed or truncated markup never fails: unmatched tags are dropped and
//! whatever forms survive are reported in document order.
//!
//! Bytes are decoded with the `Content-Type` charset, else a `<meta>`
//! charset in the first KiB, else UTF-8.

use encoding_rs::{Encoding, UTF_8};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;
use url::Url;

static META_CHARSET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<meta[^>]+charset\s*=\s*["']?([\w.:-]+)"#).expect("meta charset regex is valid")
});

const SNIFF_LEN: usize = 1024;

struct Selectors {
    title: Selector,
    form: Selector,
    control: Selector,
    option: Selector,
}

impl Selectors {
    fn new() -> Self {
        let sel = |css: &str| Selector::parse(css).expect("static selector is valid");
        Self {
            title: sel("title"),
            form: sel("form"),
            control: sel("input, select, textarea, button"),
            option: sel("option"),
        }
    }
}

/// HTTP method a form submits with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormMethod {
    Get,
    Post,
}

impl FormMethod {
    fn from_attr(value: Option<&str>) -> Self {
        match value.map(|m| m.trim().to_ascii_lowercase()) {
            Some(m) if m == "post" => FormMethod::Post,
            _ => FormMethod::Get,
        }
    }
}

/// Shape of a form control that contributes a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Password,
    Hidden,
    Checkable,
    Select,
    TextArea,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormField {
    pub name: String,
    pub value: String,
    pub kind: FieldKind,
}

/// Ordered field mapping with browser serialization semantics: a repeated
/// name keeps its first position and takes the later value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormFields {
    entries: Vec<FormField>,
}

impl FormFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: &str, kind: FieldKind) {
        match self.entries.iter_mut().find(|f| f.name == name) {
            Some(existing) => {
                existing.value = value.to_string();
                existing.kind = kind;
            }
            None => self.entries.push(FormField {
                name: name.to_string(),
                value: value.to_string(),
                kind,
            }),
        }
    }

    /// Overwrite a value, adding the field as text if it is missing.
    pub fn set(&mut self, name: &str, value: &str) {
        match self.entries.iter_mut().find(|f| f.name == name) {
            Some(existing) => existing.value = value.to_string(),
            None => self.insert(name, value, FieldKind::Text),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|f| f.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FormField> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_pairs(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|f| (f.name.clone(), f.value.clone()))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectOption {
    pub value: String,
    pub label: String,
}

/// A `<select>` with every option it offers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectField {
    pub name: String,
    pub options: Vec<SelectOption>,
}

/// A named submit button. Only the activated one is serialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitter {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Form {
    pub id: Option<String>,
    /// Absolute target, resolved against the page URL.
    pub action: Url,
    pub method: FormMethod,
    pub fields: FormFields,
    pub selects: Vec<SelectField>,
    pub submitters: Vec<Submitter>,
}

impl Form {
    pub fn first_of_kind(&self, kind: FieldKind) -> Option<&FormField> {
        self.fields.iter().find(|f| f.kind == kind)
    }

    pub fn has_password(&self) -> bool {
        self.first_of_kind(FieldKind::Password).is_some()
    }

    pub fn submitter(&self, name: &str) -> Option<&Submitter> {
        self.submitters.iter().find(|s| s.name == name)
    }
}

/// Title and forms scraped from one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPage {
    pub url: Url,
    pub title: String,
    pub forms: Vec<Form>,
}

/// Incremental HTML consumer.
#[derive(Debug)]
pub struct FormParser {
    base: Url,
    content_type: Option<String>,
    buf: Vec<u8>,
}

impl FormParser {
    /// `base` is the URL the body was fetched from.
    pub fn new(base: Url) -> Self {
        Self {
            base,
            content_type: None,
            buf: Vec::new(),
        }
    }

    /// The response `Content-Type`, consulted for the charset.
    pub fn with_content_type(mut self, content_type: Option<&str>) -> Self {
        self.content_type = content_type.map(str::to_string);
        self
    }

    /// Append a body chunk. Chunks may split multi-byte characters.
    pub fn feed(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    pub fn finish(self) -> ParsedPage {
        let html = decode_html(&self.buf, self.content_type.as_deref());
        parse_page(&html, self.base)
    }
}

/// Decode an HTML body using its declared charset.
///
/// Unknown labels and undeclared charsets fall back to UTF-8; malformed
/// sequences become U+FFFD. A byte-order mark overrides the declaration.
pub fn decode_html(bytes: &[u8], content_type: Option<&str>) -> String {
    let encoding = content_type
        .and_then(charset_param)
        .or_else(|| sniff_meta_charset(bytes))
        .and_then(|label| Encoding::for_label(label.trim().as_bytes()))
        .unwrap_or(UTF_8);
    let (text, _, _) = encoding.decode(bytes);
    text.into_owned()
}

fn charset_param(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches(|c: char| c == '"' || c == '\'').to_string())
    })
}

fn sniff_meta_charset(bytes: &[u8]) -> Option<String> {
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(SNIFF_LEN)]);
    META_CHARSET_RE.captures(&head).map(|caps| caps[1].to_string())
}

/// Parse a complete document.
pub fn parse_page(html: &str, base: Url) -> ParsedPage {
    let document = Html::parse_document(html);
    let selectors = Selectors::new();

    let title = document
        .select(&selectors.title)
        .next()
        .map(|t| collapse_whitespace(&t.text().collect::<String>()))
        .unwrap_or_default();

    let forms = document
        .select(&selectors.form)
        .map(|form| parse_form(form, &base, &selectors))
        .collect();

    ParsedPage {
        url: base,
        title,
        forms,
    }
}

fn parse_form(form: ElementRef<'_>, base: &Url, selectors: &Selectors) -> Form {
    let attrs = form.value();
    let action = attrs
        .attr("action")
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .and_then(|a| base.join(a).ok())
        .unwrap_or_else(|| base.clone());

    let mut fields = FormFields::new();
    let mut selects = Vec::new();
    let mut submitters = Vec::new();

    for control in form.select(&selectors.control) {
        let el = control.value();
        let Some(name) = el.attr("name").filter(|n| !n.is_empty()) else {
            continue;
        };
        let value = el.attr("value").unwrap_or("");

        match el.name() {
            "input" => {
                let kind = el
                    .attr("type")
                    .map(|t| t.trim().to_ascii_lowercase())
                    .unwrap_or_else(|| "text".to_string());
                match kind.as_str() {
                    "submit" => submitters.push(Submitter {
                        name: name.to_string(),
                        value: value.to_string(),
                    }),
                    "image" | "button" | "reset" | "file" => {}
                    "checkbox" | "radio" => {
                        if el.attr("checked").is_some() {
                            let v = el.attr("value").unwrap_or("on");
                            fields.insert(name, v, FieldKind::Checkable);
                        }
                    }
                    "password" => fields.insert(name, value, FieldKind::Password),
                    "hidden" => fields.insert(name, value, FieldKind::Hidden),
                    _ => fields.insert(name, value, FieldKind::Text),
                }
            }
            "select" => {
                let mut options = Vec::new();
                let mut selected = None;
                for opt in control.select(&selectors.option) {
                    let label = collapse_whitespace(&opt.text().collect::<String>());
                    let value = opt
                        .value()
                        .attr("value")
                        .map(str::to_string)
                        .unwrap_or_else(|| label.clone());
                    if selected.is_none() && opt.value().attr("selected").is_some() {
                        selected = Some(value.clone());
                    }
                    options.push(SelectOption { value, label });
                }
                if let Some(value) = selected.or_else(|| options.first().map(|o| o.value.clone())) {
                    fields.insert(name, &value, FieldKind::Select);
                }
                selects.push(SelectField {
                    name: name.to_string(),
                    options,
                });
            }
            "textarea" => {
                let text: String = control.text().collect();
                fields.insert(name, &text, FieldKind::TextArea);
            }
            "button" => {
                let kind = el.attr("type").map(|t| t.trim().to_ascii_lowercase());
                if matches!(kind.as_deref(), None | Some("submit")) {
                    submitters.push(Submitter {
                        name: name.to_string(),
                        value: value.to_string(),
                    });
                }
            }
            _ => {}
        }
    }

    Form {
        id: attrs.attr("id").map(str::to_string),
        action,
        method: FormMethod::from_attr(attrs.attr("method")),
        fields,
        selects,
        submitters,
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://idp.example.edu/idp/profile/SAML2/Redirect/SSO?execution=e1s1").unwrap()
    }

    #[test]
    fn test_two_forms_in_document_order_with_duplicate_override() {
        let html = r#"
        <html><head><title>
            Login
        </title></head><body>
            <form id="search" action="/search">
                <input type="text" name="q" value="">
            </form>
            <form id="login" action="/idp/profile/SAML2/Redirect/SSO?execution=e1s1" method="POST">
                <input type="hidden" name="csrf_token" value="first">
                <input type="text" name="j_username">
                <input type="password" name="j_password">
                <input type="hidden" name="csrf_token" value="second">
                <button type="submit" name="_eventId_proceed">Login</button>
            </form>
        </body></html>
        "#;

        let page = parse_page(html, base());
        assert_eq!(page.title, "Login");
        assert_eq!(page.forms.len(), 2);

        let search = &page.forms[0];
        assert_eq!(search.id.as_deref(), Some("search"));
        assert_eq!(search.method, FormMethod::Get);
        assert_eq!(search.action.as_str(), "https://idp.example.edu/search");

        let login = &page.forms[1];
        assert_eq!(login.method, FormMethod::Post);
        let names: Vec<_> = login.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["csrf_token", "j_username", "j_password"]);
        assert_eq!(login.fields.get("csrf_token"), Some("second"));
        assert!(login.has_password());
        assert_eq!(login.submitters.len(), 1);
        assert_eq!(login.submitters[0].name, "_eventId_proceed");
    }

    #[test]
    fn test_empty_form_is_kept() {
        let page = parse_page("<title>Empty</title><form action=''></form>", base());
        assert_eq!(page.forms.len(), 1);
        assert!(page.forms[0].fields.is_empty());
        // Empty action targets the page itself.
        assert_eq!(page.forms[0].action, base());
    }

    #[test]
    fn test_malformed_markup_is_tolerated() {
        let html = r#"<title>WAYF</title></div></span><form method=post action="/wayf"
            <input name=broken <input type="hidden" name="entityID" value="x">
            <p><b>unclosed"#;
        let page = parse_page(html, base());
        assert_eq!(page.title, "WAYF");
        assert_eq!(page.forms.len(), 1);
    }

    #[test]
    fn test_select_checkbox_and_textarea() {
        let html = r#"
        <form action="https://wayf.example.org/select" method="post">
            <select name="user_idp">
                <option value="https://idp.a.edu/idp/shibboleth">University A</option>
                <option value="https://idp.b.edu/idp/shibboleth" selected>University B</option>
            </select>
            <input type="checkbox" name="remember" checked>
            <input type="checkbox" name="permanent" value="yes">
            <input type="radio" name="scope" value="session">
            <input type="radio" name="scope" value="always" checked>
            <textarea name="note">hello</textarea>
            <input type="submit" name="Select" value="Select">
            <input type="reset" name="clear">
        </form>"#;
        let page = parse_page(html, base());
        let form = &page.forms[0];

        assert_eq!(form.fields.get("user_idp"), Some("https://idp.b.edu/idp/shibboleth"));
        assert_eq!(form.fields.get("remember"), Some("on"));
        assert!(!form.fields.contains("permanent"));
        assert_eq!(form.fields.get("scope"), Some("always"));
        assert_eq!(form.fields.get("note"), Some("hello"));
        assert!(!form.fields.contains("Select"));
        assert_eq!(form.submitter("Select").unwrap().value, "Select");
        assert!(form.submitter("clear").is_none());

        assert_eq!(form.selects.len(), 1);
        assert_eq!(form.selects[0].options[0].label, "University A");
    }

    #[test]
    fn test_feed_handles_split_multibyte_chunks() {
        let html = "<html><title>Anmeldung für Dienste</title><form></form></html>";
        let bytes = html.as_bytes();
        let split = html.find('ü').unwrap() + 1; // inside the two-byte sequence

        let mut parser = FormParser::new(base());
        parser.feed(&bytes[..split]);
        parser.feed(&bytes[split..]);
        let page = parser.finish();

        assert_eq!(page.title, "Anmeldung für Dienste");
        assert_eq!(page.forms.len(), 1);
    }

    #[test]
    fn test_latin1_body_decoded_from_content_type() {
        let mut body = b"<title>Anmeldung f".to_vec();
        body.push(0xFC);
        body.extend_from_slice(b"r Dienste</title>");

        let mut parser =
            FormParser::new(base()).with_content_type(Some("text/html; charset=ISO-8859-1"));
        parser.feed(&body);
        let page = parser.finish();
        assert_eq!(page.title, "Anmeldung für Dienste");
    }

    #[test]
    fn test_meta_charset_used_without_header() {
        let mut body =
            br#"<html><head><meta http-equiv="Content-Type" content="text/html; charset=iso-8859-1"><title>Universit"#
                .to_vec();
        body.push(0xE4);
        body.extend_from_slice(b"t</title></head></html>");
        let mut parser = FormParser::new(base()).with_content_type(Some("text/html"));
        parser.feed(&body);
        let page = parser.finish();
        assert_eq!(page.title, "Universität");
    }

    #[test]
    fn test_undeclared_charset_defaults_to_utf8() {
        assert_eq!(decode_html("Zürich".as_bytes(), None), "Zürich");
        assert_eq!(decode_html("Zürich".as_bytes(), Some("text/html; charset=bogus")), "Zürich");
    }

    #[test]
    fn test_form_fields_set_adds_missing() {
        let mut fields = FormFields::new();
        fields.insert("a", "1", FieldKind::Hidden);
        fields.set("a", "2");
        fields.set("b", "3");
        assert_eq!(
            fields.to_pairs(),
            vec![("a".to_string(), "2".to_string()), ("b".to_string(), "3".to_string())]
        );
        assert_eq!(fields.iter().next().unwrap().kind, FieldKind::Hidden);
    }
}
