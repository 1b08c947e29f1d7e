//! HTTP authentication: challenge capture, `Authorization` headers and
//! promotion of working credentials to their server.

use std::collections::BTreeMap;

use arcfetch_core::{CrawlItem, Credential, ServerCache};
use data_encoding::BASE64;
use http::{HeaderMap, HeaderName, HeaderValue};

/// Collects the challenges of every `name` header, keyed by realm. A
/// challenge without a realm is keyed by the empty string.
pub fn parse_challenges(headers: &HeaderMap, name: &HeaderName) -> BTreeMap<String, String> {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(|challenge| (realm_of(challenge).unwrap_or_default(), challenge.to_string()))
        .collect()
}

fn realm_of(challenge: &str) -> Option<String> {
    let lower = challenge.to_ascii_lowercase();
    let start = lower.find("realm=")? + "realm=".len();
    let rest = &challenge[start..];
    let realm = match rest.strip_prefix('"') {
        Some(quoted) => quoted.split('"').next().unwrap_or_default(),
        None => rest.split([',', ' ']).next().unwrap_or_default(),
    };
    Some(realm.to_string())
}

pub fn basic_authorization(credential: &Credential) -> Option<HeaderValue> {
    let token = BASE64.encode(format!("{}:{}", credential.login, credential.password).as_bytes());
    let mut value = HeaderValue::from_str(&format!("Basic {token}")).ok()?;
    value.set_sensitive(true);
    Some(value)
}

/// Moves every credential off the item and onto the server named by its
/// domain, together with the challenges the item captured. Credentials for
/// servers the cache does not know are dropped. Returns how many were
/// promoted.
pub fn promote_credentials(item: &mut CrawlItem, servers: &dyn ServerCache) -> usize {
    let mut promoted = 0;
    for credential in std::mem::take(&mut item.credentials) {
        match servers.server_for(&credential.domain) {
            Some(server) => {
                server.add_credential(credential);
                server.set_http_auth_challenges(item.http_auth_challenges.clone());
                promoted += 1;
            }
            None => {
                tracing::debug!(domain = %credential.domain, "no server for credential, dropping it");
            }
        }
    }
    promoted
}
