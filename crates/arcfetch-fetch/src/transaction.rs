//! One HTTP fetch of one work item.
//!
//! [`FetchHttp::execute`] never returns an error: every failure ends up as
//! item state (status, annotations, non-fatal failures) plus a log line, and
//! the recorder handed back is always closed.

use std::collections::BTreeMap;
use std::sync::Arc;

use arcfetch_core::item::{ANNOTATION_LENGTH_TRUNC, ANNOTATION_MIDFETCH_ABORT, ANNOTATION_TIMER_TRUNC};
use arcfetch_core::{
    CrawlItem, CredentialStore, FetchMethod, FetchStatus, RecordedTransfer, ResponseSummary, ServerCache,
};
use chrono::Utc;
use http::header::{
    ACCEPT_ENCODING, AUTHORIZATION, CONNECTION, PROXY_AUTHENTICATE, RANGE, REFERER, USER_AGENT,
    WWW_AUTHENTICATE,
};
use http::{HeaderMap, HeaderValue, Method, Version};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::auth;
use crate::client::{FetchRequest, HttpClient};
use crate::conditional;
use crate::config::{FetchConfig, Limits};
use crate::error::{FetchError, RecorderError, Result};
use crate::recorder::Recorder;

/// Where an attempt ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    NotStarted,
    HeadersReceived,
    MidfetchAbort,
    BodyStreaming,
    Completed,
    TimedOutTruncated,
    LengthTruncated,
    ConnectLost,
    ConnectFailed,
}

#[derive(Debug)]
pub struct FetchOutcome {
    pub state:            FetchState,
    /// Closed; replayable for an archive writer.
    pub recorder:         Recorder,
    pub request_envelope: Vec<u8>,
}

pub struct FetchHttp<C> {
    client:                C,
    config:                FetchConfig,
    accept_headers:        HeaderMap,
    servers:               Arc<dyn ServerCache>,
    credential_store:      Arc<CredentialStore>,
    proxy_auth_challenges: Mutex<BTreeMap<String, String>>,
}

impl<C: HttpClient> FetchHttp<C> {
    pub fn new(
        client: C,
        config: FetchConfig,
        servers: Arc<dyn ServerCache>,
        credential_store: Arc<CredentialStore>,
    ) -> Result<Self> {
        config.validate()?;
        let accept_headers = config.accept_header_map()?;
        Ok(Self {
            client,
            config,
            accept_headers,
            servers,
            credential_store,
            proxy_auth_challenges: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn config(&self) -> &FetchConfig { &self.config }

    /// Challenges from the last 407 seen by this fetcher. Informational only:
    /// proxy credentials come from `http_proxy_user` and are attached by the
    /// client.
    pub fn proxy_auth_challenges(&self) -> BTreeMap<String, String> {
        self.proxy_auth_challenges.lock().clone()
    }

    /// Only http(s) items whose host has not definitively failed DNS. The
    /// latter are marked with a prerequisite failure. Accepted items get a
    /// server entry so credentials can be promoted onto it.
    pub fn should_process(&self, item: &mut CrawlItem) -> bool {
        if !matches!(item.url().scheme(), "http" | "https") {
            return false;
        }
        if let Some(host) = self.servers.host_for(item.url())
            && host.is_unresolvable()
        {
            debug!(url = %item.url(), host = %host.name, "host did not resolve");
            item.set_fetch_status(FetchStatus::DomainPrerequisiteFailure);
            return false;
        }
        let Some(host) = item.url().host_str() else {
            return false;
        };
        self.servers.get_or_create_server(host);
        true
    }

    pub async fn execute(&self, item: &mut CrawlItem, cancel: &CancellationToken) -> FetchOutcome {
        item.set_fetch_begin(Utc::now());

        let limits = self.config.resolve(item.overrides());
        let mut recorder = Recorder::open(item.url().as_str(), limits, self.config.digest());

        let (request, added_credentials) = self.build_request(item, &limits);
        let request_envelope = request.envelope();

        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Connect("cancelled before response".to_string())),
            r = self.client.send(request) => r.map_err(|e| FetchError::Connect(e.to_string())),
        };
        let response = match sent {
            Ok(response) => response,
            Err(e) => {
                return self.abandon(item, recorder, request_envelope, FetchState::ConnectFailed, e);
            }
        };

        let status = response.status.as_u16();
        item.set_fetch_status(FetchStatus::Http(status));
        item.set_content_type(response.content_type());
        item.scoped.response = Some(ResponseSummary { status, headers: response.headers.clone() });
        let mut state = FetchState::HeadersReceived;

        match recorder.record_envelope(&response.envelope()) {
            Ok(()) => {}
            Err(RecorderError::LengthExceeded(_)) => {
                item.annotate(ANNOTATION_LENGTH_TRUNC);
                state = FetchState::LengthTruncated;
            }
            Err(e) => {
                let lost = FetchError::ConnectLost(e.to_string());
                return self.abandon(item, recorder, request_envelope, FetchState::ConnectLost, lost);
            }
        }

        if state == FetchState::HeadersReceived {
            if !item.is_prerequisite() && self.config.midfetch_rule.rejects(&response.headers) {
                debug!(url = %item.url(), "aborting after headers");
                item.annotate(ANNOTATION_MIDFETCH_ABORT);
                state = FetchState::MidfetchAbort;
            } else {
                let soft_max = response.content_length();
                state = match recorder.read_fully_or_until(response.body, soft_max, cancel).await {
                    Ok(()) => FetchState::Completed,
                    Err(RecorderError::Timeout(elapsed)) => {
                        debug!(url = %item.url(), ?elapsed, "body read timed out");
                        item.annotate(ANNOTATION_TIMER_TRUNC);
                        FetchState::TimedOutTruncated
                    }
                    Err(RecorderError::LengthExceeded(max)) => {
                        debug!(url = %item.url(), max, "body truncated at length cap");
                        item.annotate(ANNOTATION_LENGTH_TRUNC);
                        FetchState::LengthTruncated
                    }
                    Err(e) => {
                        let lost = FetchError::ConnectLost(e.to_string());
                        return self.abandon(item, recorder, request_envelope, FetchState::ConnectLost, lost);
                    }
                };
            }
        }

        recorder.close();
        self.set_sizes(item, &recorder, request_envelope.len() as u64);
        if state != FetchState::MidfetchAbort
            && let Some(digest) = recorder.digest()
        {
            item.set_content_digest(digest.clone());
        }

        let headers = item.scoped.response.as_ref().map(|r| r.headers.clone()).unwrap_or_default();
        self.resolve_auth(item, status, added_credentials, &headers);

        if recorder.is_open() {
            error!(url = %item.url(), "recorder still open after fetch, closing it");
            recorder.close();
        }

        // Auth challenges leave no snapshot.
        if !matches!(status, 401 | 407) {
            conditional::record_fetch_history(item, self.config.history_length);
        }
        item.set_fetch_completed(Utc::now());

        debug!(
            method = %item.method(),
            url = %item.url(),
            status,
            size = item.content_size(),
            content_type = item.content_type().unwrap_or("-"),
            ?state,
            "fetched"
        );
        FetchOutcome { state, recorder, request_envelope }
    }

    fn build_request(&self, item: &CrawlItem, limits: &Limits) -> (FetchRequest, bool) {
        let method = match item.method() {
            FetchMethod::Get => Method::GET,
            FetchMethod::Post => Method::POST,
        };
        let mut request = FetchRequest::new(method, item.url().clone());
        request.version = if self.config.use_http11 { Version::HTTP_11 } else { Version::HTTP_10 };

        let headers = &mut request.headers;
        headers.extend(self.accept_headers.clone());
        if let Some(agent) = self.config.user_agent.as_deref()
            && let Ok(value) = HeaderValue::from_str(agent)
        {
            headers.insert(USER_AGENT, value);
        }
        if self.config.accept_compression {
            headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip,deflate"));
        }
        if self.config.send_connection_close {
            headers.insert(CONNECTION, HeaderValue::from_static("close"));
        }
        if self.config.send_referer
            && let Some(via) = item.via()
            && let Ok(value) = HeaderValue::from_str(via.as_str())
        {
            headers.insert(REFERER, value);
        }
        if self.config.send_range
            && limits.hard_max_bytes > 0
            && let Ok(value) = HeaderValue::from_str(&format!("bytes=0-{}", limits.hard_max_bytes - 1))
        {
            headers.insert(RANGE, value);
        }
        conditional::apply_conditional_headers(&self.config, item, headers);
        let added_credentials = self.apply_credentials(item, headers);

        (request, added_credentials)
    }

    /// Item credentials come first; otherwise the server's promoted ones are
    /// offered preemptively. Returns true when an item credential was used.
    fn apply_credentials(&self, item: &CrawlItem, headers: &mut HeaderMap) -> bool {
        let Some(host) = item.url().host_str() else {
            return false;
        };

        let from_item = item
            .credentials
            .iter()
            .find(|c| c.applies_to(host) && c.answers(&item.http_auth_challenges));
        if let Some(value) = from_item.and_then(auth::basic_authorization) {
            headers.insert(AUTHORIZATION, value);
            return true;
        }

        if let Some(server) = self.servers.server_for(host) {
            let challenges = server.http_auth_challenges();
            if let Some(value) = server
                .credentials()
                .iter()
                .find(|c| c.answers(&challenges))
                .and_then(auth::basic_authorization)
            {
                headers.insert(AUTHORIZATION, value);
            }
        }
        false
    }

    /// Content size is the recorded size. A 304 reports a virtual size that
    /// adds the reference length of the previous full fetch and carries that
    /// length forward.
    fn set_sizes(&self, item: &mut CrawlItem, recorder: &Recorder, request_length: u64) {
        let size = recorder.size();
        item.set_content_size(size);
        item.scoped.recorded =
            Some(RecordedTransfer { size, content_begin: recorder.content_begin(), request_length });

        let not_modified = item.fetch_status().is_some_and(|s| s.is_not_modified());
        if not_modified && let Some(reference) = item.latest_history().and_then(|h| h.reference_length) {
            item.scoped.reference_length = Some(reference);
            item.set_content_size(size + reference);
        }
    }

    fn resolve_auth(&self, item: &mut CrawlItem, status: u16, added_credentials: bool, headers: &HeaderMap) {
        match status {
            401 => self.handle_401(item, headers),
            407 => {
                let challenges = auth::parse_challenges(headers, &PROXY_AUTHENTICATE);
                if self.config.http_proxy_user.is_none() {
                    warn!(url = %item.url(), realms = ?challenges.keys(), "proxy wants credentials, none configured");
                }
                if !challenges.is_empty() {
                    *self.proxy_auth_challenges.lock() = challenges;
                }
            }
            _ if added_credentials && FetchStatus::Http(status).is_success() => {
                let promoted = auth::promote_credentials(item, self.servers.as_ref());
                debug!(url = %item.url(), promoted, "promoted credentials");
            }
            _ => {}
        }
    }

    fn handle_401(&self, item: &mut CrawlItem, headers: &HeaderMap) {
        let challenges = auth::parse_challenges(headers, &WWW_AUTHENTICATE);
        if challenges.is_empty() {
            debug!(url = %item.url(), "401 without challenges");
            return;
        }
        item.http_auth_challenges = challenges;

        if item.has_credentials() {
            debug!(url = %item.url(), "credentials rejected, not retrying them");
            item.credentials.clear();
            return;
        }
        let Some(host) = item.url().host_str().map(str::to_string) else {
            return;
        };
        let matching: Vec<_> = self
            .credential_store
            .for_host(&host)
            .filter(|c| c.answers(&item.http_auth_challenges))
            .cloned()
            .collect();
        item.credentials.extend(matching);
    }

    fn abandon(
        &self,
        item: &mut CrawlItem,
        mut recorder: Recorder,
        request_envelope: Vec<u8>,
        state: FetchState,
        failure: FetchError,
    ) -> FetchOutcome {
        warn!(url = %item.url(), error = %failure, "fetch failed");
        item.non_fatal_failures.push(failure.to_string());
        item.set_fetch_status(if state == FetchState::ConnectLost {
            FetchStatus::ConnectLost
        } else {
            FetchStatus::ConnectFailed
        });
        recorder.close();
        item.set_fetch_completed(Utc::now());
        FetchOutcome { state, recorder, request_envelope }
    }
}
