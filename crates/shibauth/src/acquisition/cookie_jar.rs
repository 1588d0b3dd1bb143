//! RFC 6265 cookie jar with Netscape cookie-file persistence.
//!
//! Cookies are unique by `(name, domain, path)` and keep their insertion
//! order, so the `Cookie` header a request carries is deterministic. The jar
//! is exported in the tab-separated format curl, wget and browser extensions
//! read, so a session established here can be reused by other tools.

use crate::error::{Error, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::header::{HeaderMap, SET_COOKIE};
use std::net::IpAddr;
use std::path::Path;
use url::Url;

/// Name prefix of the cookie a Shibboleth service provider sets once the
/// federated login is accepted.
pub const SESSION_COOKIE_PREFIX: &str = "_shibsession_";

/// Validity window stamped onto expiry-less session cookies (8 hours, the
/// default service-provider session lifetime).
pub const SESSION_COOKIE_LIFETIME_SECS: i64 = 28_800;

const NETSCAPE_HEADER: &str = "# Netscape HTTP Cookie File";
const HTTP_ONLY_PREFIX: &str = "#HttpOnly_";

/// Current time as Unix seconds.
pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}

/// A single stored cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    /// Lowercased, without a leading dot.
    pub domain: String,
    /// Set when the cookie carried no `Domain` attribute.
    pub host_only: bool,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    /// Expiry as Unix seconds; `None` for a browser-session cookie.
    pub expires: Option<i64>,
    /// Discard when the client closes.
    pub discard: bool,
}

impl Cookie {
    /// A host-only, expiry-less cookie.
    pub fn new(name: &str, value: &str, domain: &str, path: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            domain: domain.trim_start_matches('.').to_ascii_lowercase(),
            host_only: true,
            path: path.to_string(),
            secure: false,
            http_only: false,
            expires: None,
            discard: true,
        }
    }

    /// Whether this is a Shibboleth SP session cookie.
    pub fn is_shib_session(&self) -> bool {
        self.name.starts_with(SESSION_COOKIE_PREFIX)
    }

    pub fn is_expired(&self, now: i64) -> bool {
        matches!(self.expires, Some(at) if at <= now)
    }

    pub fn domain_matches(&self, host: &str) -> bool {
        let host = host.to_ascii_lowercase();
        if self.host_only {
            host == self.domain
        } else {
            domain_match(&host, &self.domain)
        }
    }

    pub fn path_matches(&self, request_path: &str) -> bool {
        path_match(request_path, &self.path)
    }

    /// Whether this cookie belongs on a request to `url` at time `now`.
    pub fn matches(&self, url: &Url, now: i64) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        if self.secure && url.scheme() != "https" {
            return false;
        }
        !self.is_expired(now) && self.domain_matches(host) && self.path_matches(url.path())
    }

    fn same_key(&self, other: &Cookie) -> bool {
        self.name == other.name && self.domain == other.domain && self.path == other.path
    }
}

/// Ordered cookie store keyed by `(name, domain, path)`.
#[derive(Debug, Clone, Default)]
pub struct CookieJar {
    cookies: Vec<Cookie>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cookie> {
        self.cookies.iter()
    }

    pub fn get(&self, name: &str, domain: &str, path: &str) -> Option<&Cookie> {
        self.cookies
            .iter()
            .find(|c| c.name == name && c.domain == domain && c.path == path)
    }

    /// Add, replace, or (for an already expired cookie) delete.
    ///
    /// A replaced cookie keeps its original position.
    pub fn insert(&mut self, cookie: Cookie, now: i64) {
        let existing = self.cookies.iter().position(|c| c.same_key(&cookie));
        match (existing, cookie.is_expired(now)) {
            (Some(idx), true) => {
                self.cookies.remove(idx);
            }
            (Some(idx), false) => self.cookies[idx] = cookie,
            (None, true) => {}
            (None, false) => self.cookies.push(cookie),
        }
    }

    /// Merge every `Set-Cookie` header of a response received from `url`.
    ///
    /// Returns the number of headers that parsed into a cookie.
    pub fn extract(&mut self, url: &Url, headers: &HeaderMap, now: i64) -> usize {
        let mut accepted = 0;
        for raw in headers.get_all(SET_COOKIE) {
            let Ok(raw) = raw.to_str() else {
                continue;
            };
            if let Some(cookie) = parse_set_cookie(raw, url, now) {
                self.insert(cookie, now);
                accepted += 1;
            }
        }
        accepted
    }

    /// `Cookie` header value for a request to `url`, if any cookie applies.
    ///
    /// Cookies with longer paths come first; ties keep insertion order.
    pub fn cookie_header(&self, url: &Url, now: i64) -> Option<String> {
        let mut matching: Vec<&Cookie> =
            self.cookies.iter().filter(|c| c.matches(url, now)).collect();
        if matching.is_empty() {
            return None;
        }
        matching.sort_by(|a, b| b.path.len().cmp(&a.path.len()));
        Some(
            matching
                .iter()
                .map(|c| format!("{}={}", c.name, c.value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    pub fn remove_expired(&mut self, now: i64) {
        self.cookies.retain(|c| !c.is_expired(now));
    }

    /// The live Shibboleth session cookie scoped to `host`, if one is stored.
    pub fn session_cookie_for(&self, host: &str, now: i64) -> Option<&Cookie> {
        self.cookies
            .iter()
            .find(|c| c.is_shib_session() && !c.is_expired(now) && c.domain_matches(host))
    }

    /// Give expiry-less Shibboleth session cookies a fixed validity window.
    ///
    /// Each such cookie expires at `now + SESSION_COOKIE_LIFETIME_SECS` and
    /// loses its discard flag; cookies that already carry an expiry are left
    /// alone. Returns the number of cookies rewritten.
    pub fn extend_session_cookies(&mut self, now: i64) -> usize {
        let mut rewritten = 0;
        for cookie in self.cookies.iter_mut().filter(|c| c.is_shib_session()) {
            if cookie.expires.is_none() {
                cookie.expires = Some(now + SESSION_COOKIE_LIFETIME_SECS);
                cookie.discard = false;
                rewritten += 1;
            }
        }
        rewritten
    }

    /// Serialize in Netscape cookie-file format.
    ///
    /// Discard-flagged cookies are skipped unless `include_discarded`.
    pub fn to_netscape(&self, include_discarded: bool) -> String {
        let mut out = String::from(NETSCAPE_HEADER);
        out.push('\n');
        for c in self.cookies.iter().filter(|c| include_discarded || !c.discard) {
            let domain = if c.host_only {
                c.domain.clone()
            } else {
                format!(".{}", c.domain)
            };
            let prefix = if c.http_only { HTTP_ONLY_PREFIX } else { "" };
            out.push_str(&format!(
                "{prefix}{domain}\t{}\t{}\t{}\t{}\t{}\t{}\n",
                flag(!c.host_only),
                c.path,
                flag(c.secure),
                c.expires.unwrap_or(0),
                c.name,
                c.value,
            ));
        }
        out
    }

    /// Parse a Netscape cookie file.
    pub fn from_netscape(text: &str) -> Result<Self> {
        let mut jar = CookieJar::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            let (line, http_only) = match line.strip_prefix(HTTP_ONLY_PREFIX) {
                Some(rest) => (rest, true),
                None if line.starts_with('#') => continue,
                None => (line, false),
            };

            let fields: Vec<&str> = line.split('\t').collect();
            let [domain, subdomains, path, secure, expires, name, value] = fields[..] else {
                return Err(Error::CookieFile {
                    line: idx + 1,
                    reason: format!("expected 7 tab-separated fields, found {}", fields.len()),
                });
            };
            let expires: i64 = expires.trim().parse().map_err(|_| Error::CookieFile {
                line: idx + 1,
                reason: format!("bad expiry {expires:?}"),
            })?;
            let expires = (expires != 0).then_some(expires);

            // Not routed through `insert`: stale entries are kept as written.
            jar.cookies.push(Cookie {
                name: name.to_string(),
                value: value.to_string(),
                domain: domain.trim_start_matches('.').to_ascii_lowercase(),
                host_only: subdomains != "TRUE",
                path: path.to_string(),
                secure: secure == "TRUE",
                http_only,
                expires,
                discard: expires.is_none(),
            });
        }
        Ok(jar)
    }

    pub fn save(&self, path: &Path, include_discarded: bool) -> Result<()> {
        std::fs::write(path, self.to_netscape(include_discarded))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_netscape(&text)
    }
}

fn flag(value: bool) -> &'static str {
    if value {
        "TRUE"
    } else {
        "FALSE"
    }
}

/// Parse one `Set-Cookie` header received from `request_url`.
///
/// Returns `None` for malformed headers and for cookies whose `Domain`
/// attribute does not cover the request host.
pub fn parse_set_cookie(header: &str, request_url: &Url, now: i64) -> Option<Cookie> {
    let mut parts = header.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let value = value.trim();

    let mut domain_attr: Option<String> = None;
    let mut path_attr: Option<String> = None;
    let mut expires_attr: Option<i64> = None;
    let mut max_age: Option<i64> = None;
    let mut secure = false;
    let mut http_only = false;

    for attr in parts {
        let (key, val) = match attr.split_once('=') {
            Some((k, v)) => (k.trim(), v.trim()),
            None => (attr.trim(), ""),
        };
        match key.to_ascii_lowercase().as_str() {
            "domain" => {
                let d = val.trim_start_matches('.').to_ascii_lowercase();
                if !d.is_empty() {
                    domain_attr = Some(d);
                }
            }
            "path" if val.starts_with('/') => path_attr = Some(val.to_string()),
            "expires" => expires_attr = parse_cookie_date(val).or(expires_attr),
            "max-age" => {
                if let Ok(secs) = val.parse::<i64>() {
                    max_age = Some(if secs <= 0 { i64::MIN } else { now.saturating_add(secs) });
                }
            }
            "secure" => secure = true,
            "httponly" => http_only = true,
            _ => {}
        }
    }

    let host = request_url.host_str()?.to_ascii_lowercase();
    let (domain, host_only) = match domain_attr {
        Some(d) if domain_match(&host, &d) => (d, false),
        Some(_) => return None,
        None => (host, true),
    };
    let expires = max_age.or(expires_attr);

    Some(Cookie {
        name: name.to_string(),
        value: value.to_string(),
        domain,
        host_only,
        path: path_attr.unwrap_or_else(|| default_path(request_url)),
        secure,
        http_only,
        expires,
        discard: expires.is_none(),
    })
}

fn parse_cookie_date(value: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.timestamp());
    }
    const FORMATS: [&str; 3] = [
        "%a, %d-%b-%Y %H:%M:%S GMT",
        "%a, %d-%b-%y %H:%M:%S GMT",
        "%A, %d-%b-%y %H:%M:%S GMT",
    ];
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc().timestamp())
}

fn domain_match(host: &str, domain: &str) -> bool {
    if host == domain {
        return true;
    }
    host.parse::<IpAddr>().is_err()
        && host.len() > domain.len()
        && host.ends_with(domain)
        && host[..host.len() - domain.len()].ends_with('.')
}

fn path_match(request_path: &str, cookie_path: &str) -> bool {
    if request_path == cookie_path {
        return true;
    }
    request_path.starts_with(cookie_path)
        && (cookie_path.ends_with('/') || request_path[cookie_path.len()..].starts_with('/'))
}

fn default_path(url: &Url) -> String {
    let path = url.path();
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    const NOW: i64 = 1_700_000_000;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_parse_set_cookie_host_only_defaults() {
        let c = parse_set_cookie(
            "MoodleSession=abc123; HttpOnly",
            &url("https://www.moodle.example.edu/auth/shibboleth/index.php"),
            NOW,
        )
        .unwrap();

        assert_eq!(c.name, "MoodleSession");
        assert_eq!(c.value, "abc123");
        assert_eq!(c.domain, "www.moodle.example.edu");
        assert!(c.host_only);
        assert_eq!(c.path, "/auth/shibboleth");
        assert!(c.http_only);
        assert!(c.discard);
        assert_eq!(c.expires, None);
    }

    #[test]
    fn test_parse_set_cookie_domain_and_max_age() {
        let c = parse_set_cookie(
            "pref=dark; Domain=.example.edu; Path=/; Max-Age=60; Expires=Wed, 21 Oct 2015 07:28:00 GMT; Secure",
            &url("https://idp.example.edu/login"),
            NOW,
        )
        .unwrap();

        assert_eq!(c.domain, "example.edu");
        assert!(!c.host_only);
        assert!(c.secure);
        // Max-Age wins over Expires.
        assert_eq!(c.expires, Some(NOW + 60));
        assert!(!c.discard);
    }

    #[test]
    fn test_parse_set_cookie_rejects_foreign_domain() {
        let c = parse_set_cookie(
            "tracker=1; Domain=evil.org",
            &url("https://idp.example.edu/"),
            NOW,
        );
        assert!(c.is_none());
    }

    #[test]
    fn test_parse_cookie_date_variants() {
        assert_eq!(
            parse_cookie_date("Wed, 21 Oct 2015 07:28:00 GMT"),
            Some(1_445_412_480)
        );
        assert_eq!(
            parse_cookie_date("Wed, 21-Oct-2015 07:28:00 GMT"),
            Some(1_445_412_480)
        );
        assert_eq!(parse_cookie_date("not a date"), None);
    }

    #[test]
    fn test_insert_replaces_in_place_and_deletes_expired() {
        let mut jar = CookieJar::new();
        jar.insert(Cookie::new("a", "1", "sp.example.org", "/"), NOW);
        jar.insert(Cookie::new("b", "2", "sp.example.org", "/"), NOW);
        jar.insert(Cookie::new("a", "3", "sp.example.org", "/"), NOW);

        let names: Vec<_> = jar.iter().map(|c| (c.name.as_str(), c.value.as_str())).collect();
        assert_eq!(names, vec![("a", "3"), ("b", "2")]);

        let mut gone = Cookie::new("a", "", "sp.example.org", "/");
        gone.expires = Some(NOW - 1);
        jar.insert(gone, NOW);
        assert_eq!(jar.len(), 1);
        assert!(jar.get("a", "sp.example.org", "/").is_none());
    }

    #[test]
    fn test_extract_and_cookie_header() {
        let mut headers = HeaderMap::new();
        headers.append(SET_COOKIE, HeaderValue::from_static("root=r; Path=/"));
        headers.append(SET_COOKIE, HeaderValue::from_static("deep=d; Path=/course"));
        headers.append(SET_COOKIE, HeaderValue::from_static("sec=s; Path=/; Secure"));

        let mut jar = CookieJar::new();
        let origin = url("https://sp.example.org/course/view.php");
        assert_eq!(jar.extract(&origin, &headers, NOW), 3);

        assert_eq!(
            jar.cookie_header(&url("https://sp.example.org/course/7"), NOW).as_deref(),
            Some("deep=d; root=r; sec=s")
        );
        // Secure cookies stay off plain http; /courses is not under /course.
        assert_eq!(
            jar.cookie_header(&url("http://sp.example.org/courses"), NOW).as_deref(),
            Some("root=r")
        );
        assert_eq!(jar.cookie_header(&url("https://other.org/"), NOW), None);
    }

    #[test]
    fn test_subdomain_matching() {
        let mut c = Cookie::new("idp", "1", "example.edu", "/");
        c.host_only = false;
        assert!(c.domain_matches("idp.example.edu"));
        assert!(c.domain_matches("example.edu"));
        assert!(!c.domain_matches("badexample.edu"));

        let host_only = Cookie::new("sp", "1", "sp.example.edu", "/");
        assert!(!host_only.domain_matches("www.sp.example.edu"));
    }

    #[test]
    fn test_extend_session_cookies() {
        let mut jar = CookieJar::new();
        jar.insert(Cookie::new("_shibsession_64656661756c74", "x", "sp.example.org", "/"), NOW);
        let mut dated = Cookie::new("_shibsession_other", "y", "sp.example.org", "/");
        dated.expires = Some(NOW + 5);
        dated.discard = false;
        jar.insert(dated, NOW);
        jar.insert(Cookie::new("MoodleSession", "z", "sp.example.org", "/"), NOW);

        assert_eq!(jar.extend_session_cookies(NOW), 1);

        let shib = jar.get("_shibsession_64656661756c74", "sp.example.org", "/").unwrap();
        assert_eq!(shib.expires, Some(NOW + SESSION_COOKIE_LIFETIME_SECS));
        assert!(!shib.discard);
        let other = jar.get("_shibsession_other", "sp.example.org", "/").unwrap();
        assert_eq!(other.expires, Some(NOW + 5));
        let moodle = jar.get("MoodleSession", "sp.example.org", "/").unwrap();
        assert_eq!(moodle.expires, None);
        assert!(moodle.discard);
    }

    #[test]
    fn test_remove_expired_keeps_live_and_session_cookies() {
        let mut jar = CookieJar::new();
        let mut stale = Cookie::new("stale", "1", "sp.example.org", "/");
        stale.expires = Some(NOW + 10);
        jar.insert(stale, NOW);
        jar.insert(Cookie::new("session", "2", "sp.example.org", "/"), NOW);

        jar.remove_expired(NOW + 10);
        let names: Vec<_> = jar.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["session"]);
    }

    #[test]
    fn test_session_cookie_for_host() {
        let mut jar = CookieJar::new();
        assert!(jar.session_cookie_for("sp.example.org", NOW).is_none());
        jar.insert(Cookie::new("_shibsession_1", "x", "sp.example.org", "/"), NOW);
        assert!(jar.session_cookie_for("sp.example.org", NOW).is_some());
        assert!(jar.session_cookie_for("idp.example.org", NOW).is_none());
    }

    #[test]
    fn test_netscape_export_and_import() {
        let mut jar = CookieJar::new();
        let mut shib = Cookie::new("_shibsession_1", "tok", "sp.example.org", "/");
        shib.expires = Some(NOW + 100);
        shib.discard = false;
        shib.secure = true;
        jar.insert(shib, NOW);
        let mut wide = Cookie::new("_idp_session", "s", "example.org", "/idp");
        wide.host_only = false;
        wide.http_only = true;
        jar.insert(wide, NOW);

        let persistent_only = jar.to_netscape(false);
        assert!(persistent_only.starts_with(NETSCAPE_HEADER));
        assert!(persistent_only
            .contains(&format!("sp.example.org\tFALSE\t/\tTRUE\t{}\t_shibsession_1\ttok", NOW + 100)));
        assert!(!persistent_only.contains("_idp_session"));

        let everything = jar.to_netscape(true);
        assert!(everything.contains("#HttpOnly_.example.org\tTRUE\t/idp\tFALSE\t0\t_idp_session\ts"));

        let reloaded = CookieJar::from_netscape(&everything).unwrap();
        assert_eq!(reloaded.iter().cloned().collect::<Vec<_>>(), jar.iter().cloned().collect::<Vec<_>>());
    }

    #[test]
    fn test_from_netscape_rejects_short_line() {
        let err = CookieJar::from_netscape("# Netscape HTTP Cookie File\nexample.org\tTRUE\t/\n")
            .unwrap_err();
        assert!(matches!(err, Error::CookieFile { line: 2, .. }));
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.txt");

        let mut jar = CookieJar::new();
        let mut c = Cookie::new("_shibsession_1", "tok", "sp.example.org", "/");
        c.expires = Some(NOW + 10);
        c.discard = false;
        jar.insert(c, NOW);
        jar.save(&path, false).unwrap();

        let loaded = CookieJar::load(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.get("_shibsession_1", "sp.example.org", "/").unwrap().value, "tok");
    }
}
