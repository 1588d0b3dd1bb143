//! HTTP acquisition: cookie jar, Basic challenges, and the session that
//! ties them to a reqwest client.

pub mod challenge;
pub mod cookie_jar;
pub mod http_session;
