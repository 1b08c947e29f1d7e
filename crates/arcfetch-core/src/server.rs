//! Host/server bookkeeping consulted by the fetcher, and the credentials that
//! get attached to requests.

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use url::Url;

/// HTTP authentication credential scoped to one domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub domain:   String,
    #[serde(default)]
    pub realm:    Option<String>,
    pub login:    String,
    pub password: String,
}

impl Credential {
    pub fn applies_to(&self, host: &str) -> bool { self.domain.eq_ignore_ascii_case(host) }

    /// True when the credential has no realm or its realm is among the
    /// challenged ones.
    pub fn answers(&self, challenges: &BTreeMap<String, String>) -> bool {
        match &self.realm {
            None => true,
            Some(realm) => challenges.contains_key(realm),
        }
    }
}

/// DNS state for a host name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlHost {
    pub name:      String,
    pub ip:        Option<IpAddr>,
    pub looked_up: bool,
}

impl CrawlHost {
    /// Looked up and definitively failed, as opposed to not yet tried.
    pub fn is_unresolvable(&self) -> bool { self.ip.is_none() && self.looked_up }
}

/// Per-server state shared by every worker fetching from that server.
#[derive(Debug, Default)]
pub struct CrawlServer {
    key:             String,
    credentials:     Mutex<Vec<Credential>>,
    auth_challenges: Mutex<BTreeMap<String, String>>,
}

impl CrawlServer {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into(), ..Self::default() }
    }

    pub fn key(&self) -> &str { &self.key }

    pub fn add_credential(&self, credential: Credential) {
        let mut credentials = self.credentials.lock();
        if !credentials.contains(&credential) {
            credentials.push(credential);
        }
    }

    pub fn credentials(&self) -> Vec<Credential> { self.credentials.lock().clone() }

    pub fn set_http_auth_challenges(&self, challenges: BTreeMap<String, String>) {
        *self.auth_challenges.lock() = challenges;
    }

    pub fn http_auth_challenges(&self) -> BTreeMap<String, String> {
        self.auth_challenges.lock().clone()
    }
}

pub trait ServerCache: Send + Sync {
    /// DNS state for the URL's host, if the cache knows the host at all.
    fn host_for(&self, url: &Url) -> Option<Arc<CrawlHost>>;

    fn server_for(&self, domain: &str) -> Option<Arc<CrawlServer>>;

    /// Returns the server for `key`, creating it on first use.
    fn get_or_create_server(&self, key: &str) -> Arc<CrawlServer>;
}

#[derive(Debug, Default)]
pub struct MemoryServerCache {
    hosts:   RwLock<HashMap<String, Arc<CrawlHost>>>,
    servers: RwLock<HashMap<String, Arc<CrawlServer>>>,
}

impl MemoryServerCache {
    pub fn new() -> Self { Self::default() }

    pub fn set_host(&self, name: &str, ip: Option<IpAddr>) {
        let host = CrawlHost { name: name.to_ascii_lowercase(), ip, looked_up: true };
        self.hosts.write().insert(host.name.clone(), Arc::new(host));
    }
}

impl ServerCache for MemoryServerCache {
    fn host_for(&self, url: &Url) -> Option<Arc<CrawlHost>> {
        let host = url.host_str()?.to_ascii_lowercase();
        self.hosts.read().get(&host).cloned()
    }

    fn server_for(&self, domain: &str) -> Option<Arc<CrawlServer>> {
        self.servers.read().get(&domain.to_ascii_lowercase()).cloned()
    }

    fn get_or_create_server(&self, key: &str) -> Arc<CrawlServer> {
        let key = key.to_ascii_lowercase();
        if let Some(server) = self.servers.read().get(&key) {
            return Arc::clone(server);
        }
        let mut servers = self.servers.write();
        Arc::clone(servers.entry(key.clone()).or_insert_with(|| Arc::new(CrawlServer::new(key))))
    }
}

/// Operator-configured credentials, handed out per target host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialStore {
    credentials: Vec<Credential>,
}

impl CredentialStore {
    pub fn new(credentials: Vec<Credential>) -> Self { Self { credentials } }

    pub fn for_host<'a>(&'a self, host: &'a str) -> impl Iterator<Item = &'a Credential> + 'a {
        self.credentials.iter().filter(move |c| c.applies_to(host))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(domain: &str, realm: Option<&str>) -> Credential {
        Credential {
            domain:   domain.to_string(),
            realm:    realm.map(str::to_string),
            login:    "user".to_string(),
            password: "secret".to_string(),
        }
    }

    #[test]
    fn test_unresolvable_only_after_lookup() {
        let cache = MemoryServerCache::new();
        let url = Url::parse("http://nowhere.example/").unwrap();
        assert!(cache.host_for(&url).is_none());

        cache.set_host("nowhere.example", None);
        assert!(cache.host_for(&url).unwrap().is_unresolvable());

        cache.set_host("nowhere.example", Some("127.0.0.1".parse().unwrap()));
        assert!(!cache.host_for(&url).unwrap().is_unresolvable());
    }

    #[test]
    fn test_server_credentials_deduplicated() {
        let cache = MemoryServerCache::new();
        let server = cache.get_or_create_server("Example.org");
        server.add_credential(credential("example.org", None));
        server.add_credential(credential("example.org", None));

        let same = cache.server_for("example.org").unwrap();
        assert_eq!(same.credentials().len(), 1);
        assert!(Arc::ptr_eq(&server, &same));
    }

    #[test]
    fn test_credential_realm_matching() {
        let mut challenges = BTreeMap::new();
        challenges.insert("members".to_string(), "Basic realm=\"members\"".to_string());

        assert!(credential("a", None).answers(&challenges));
        assert!(credential("a", Some("members")).answers(&challenges));
        assert!(!credential("a", Some("staff")).answers(&challenges));
    }

    #[test]
    fn test_store_filters_by_host() {
        let store = CredentialStore::new(vec![
            credential("example.org", None),
            credential("other.org", None),
        ]);
        assert_eq!(store.for_host("EXAMPLE.org").count(), 1);
        assert_eq!(store.for_host("missing.org").count(), 0);
    }
}
