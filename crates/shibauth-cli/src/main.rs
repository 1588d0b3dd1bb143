//! `shib-login`: run a Shibboleth handshake and persist the session cookies.
//!
//! Credentials come from `SHIBAUTH_USERNAME` and `SHIBAUTH_PASSWORD`;
//! client tunables from the other `SHIBAUTH_*` variables.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;
use shibauth::acquisition::cookie_jar::unix_now;
use shibauth::{
    ClientConfig, CookieJar, Credentials, IdpSelection, Outcome, RedirectRewrite, Shibboleth,
    StaticCredentials,
};
use tracing::info;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "shib-login", version, about = "Log in to a Shibboleth-protected service")]
struct Cli {
    /// URL that starts the handshake, usually a protected page.
    #[arg(long)]
    start_url: Url,

    /// Identity provider to select: entity id or the label shown on the WAYF page.
    #[arg(long)]
    idp: String,

    /// Service root whose redirects are replaced by the callback.
    #[arg(long, requires = "callback")]
    service_root: Option<Url>,

    /// Authentication callback used in place of the service root.
    #[arg(long, requires = "service_root")]
    callback: Option<Url>,

    /// Page to fetch with the established session; its body goes to stdout.
    #[arg(long)]
    read: Option<Url>,

    /// Netscape cookie file to load before and save after the handshake.
    #[arg(long)]
    cookie_jar: Option<PathBuf>,

    /// Print a JSON summary of the stored cookies (values redacted).
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct CookieSummary<'a> {
    name: &'a str,
    domain: &'a str,
    path: &'a str,
    secure: bool,
    expires: Option<i64>,
    shib_session: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("shibauth=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let username = std::env::var("SHIBAUTH_USERNAME").context("SHIBAUTH_USERNAME is not set")?;
    let password = std::env::var("SHIBAUTH_PASSWORD").context("SHIBAUTH_PASSWORD is not set")?;

    let mut config = ClientConfig::from_env();
    if let (Some(root), Some(callback)) = (cli.service_root.clone(), cli.callback.clone()) {
        config = config.with_redirect_rewrite(RedirectRewrite::new(root, callback));
    }

    let jar = match &cli.cookie_jar {
        Some(path) if path.exists() => CookieJar::load(path)
            .with_context(|| format!("failed to load cookie file {}", path.display()))?,
        _ => CookieJar::new(),
    };

    let supplier = StaticCredentials::new(Credentials::new(username, password));
    let mut shib =
        Shibboleth::with_cookie_jar(IdpSelection::new(cli.idp.clone()), Box::new(supplier), config, jar)?;

    match shib.initiate(cli.start_url.clone()).await? {
        Outcome::Complete(page) => info!(url = %page.url, status = page.status, "logged in"),
        Outcome::Suspended(request) => {
            bail!("handshake stopped at a {:?} prompt ({})", request.kind, request.title)
        }
    }

    if let Some(url) = &cli.read {
        let body = shib.read(url).await?;
        println!("{body}");
    }

    if let Some(path) = &cli.cookie_jar {
        shib.cookie_jar_mut().remove_expired(unix_now());
        shib.cookie_jar()
            .save(path, true)
            .with_context(|| format!("failed to write cookie file {}", path.display()))?;
        info!(path = %path.display(), cookies = shib.cookie_jar().len(), "saved cookies");
    }

    if cli.json {
        let summary: Vec<CookieSummary<'_>> = shib
            .cookie_jar()
            .iter()
            .map(|c| CookieSummary {
                name: &c.name,
                domain: &c.domain,
                path: &c.path,
                secure: c.secure,
                expires: c.expires,
                shib_session: c.is_shib_session(),
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    Ok(())
}
