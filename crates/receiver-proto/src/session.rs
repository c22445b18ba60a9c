use url::Url;

use crate::protocol::Hello;

/// Identity of one receiver session.  Built by the host from its persisted
/// configuration and handed to the core; immutable for the session lifetime.
/// A session reset drops it and builds a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub company_name: String,
    pub secret_code: String,
    pub channel_url: String,
    pub api_url: Option<String>,
}

impl SessionIdentity {
    pub fn new(
        company_name: impl Into<String>,
        secret_code: impl Into<String>,
        channel_url: impl Into<String>,
        api_url: Option<String>,
    ) -> Self {
        Self {
            company_name: company_name.into(),
            secret_code: secret_code.into(),
            channel_url: channel_url.into(),
            api_url: api_url.filter(|u| !u.trim().is_empty()),
        }
    }

    /// Room key the server routes on: `lowercase(companyName + "__" + secretCode)`.
    pub fn room_key(&self) -> String {
        format!("{}__{}", self.company_name, self.secret_code).to_lowercase()
    }

    /// Handshake payload announced on every (re)connect.
    pub fn hello(&self) -> Hello {
        Hello::receiver(&self.company_name, &self.secret_code)
    }

    /// Pull-fetch URL: `apiUrl` plus `companyName` and `secretCode` query
    /// parameters, appended with `&` when the URL already carries a query.
    /// `None` when no api URL is configured or it does not parse.
    pub fn playlist_url(&self) -> Option<Url> {
        let base = self.api_url.as_deref()?;
        let mut url = Url::parse(base).ok()?;
        url.query_pairs_mut()
            .append_pair("companyName", &self.company_name)
            .append_pair("secretCode", &self.secret_code);
        Some(url)
    }
}
