//! Session identity — the (baseUrl, userId, credential) triple that selects
//! one upstream stream (spec §3).

use url::Url;

/// A (baseUrl, userId, credential) triple. Two identities are equal iff all
/// three components are equal.
///
/// `Debug` redacts the credential so it never lands in a log line by
/// accident — identities get logged routinely (connect/reconnect/identity
/// change events) and the credential is a bearer token.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub base_url: String,
    pub user_id: String,
    pub credential: String,
}

impl std::fmt::Debug for SessionIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionIdentity")
            .field("base_url", &self.base_url)
            .field("user_id", &self.user_id)
            .field("credential", &"<redacted>")
            .finish()
    }
}

impl SessionIdentity {
    pub fn new(base_url: impl Into<String>, user_id: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            user_id: user_id.into(),
            credential: credential.into(),
        }
    }

    /// Derives the stream URL as `{baseUrl}/{userId}?token={url-encoded credential}`.
    ///
    /// No other query parameters are appended by the core (spec §6).
    pub fn stream_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let mut url = format!("{base}/{}", self.user_id);
        url.push_str("?token=");
        url.push_str(&percent_encode_component(&self.credential));
        url
    }
}

/// Percent-encodes a single query-parameter value using `url`'s query
/// encode set, matching what a browser's `encodeURIComponent` would produce
/// for the characters a bearer token plausibly contains.
fn percent_encode_component(value: &str) -> String {
    // `Url::parse` gives us access to the same percent-encoding machinery
    // the `url` crate uses for query strings, without pulling in the
    // lower-level `percent_encoding` crate directly as a separate dependency.
    let mut dummy = Url::parse("https://placeholder.invalid/").expect("static URL parses");
    dummy.query_pairs_mut().append_pair("token", value);
    let query = dummy.query().unwrap_or_default();
    query.strip_prefix("token=").unwrap_or(query).to_string()
}
