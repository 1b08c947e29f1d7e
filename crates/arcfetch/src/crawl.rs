use std::sync::Arc;

use anyhow::{Context, Result};
use arcfetch_core::{
    CrawlItem, CredentialStore, DigestHistory, MemoryDigestHistory, MemoryServerCache, RecordSet, ServerCache,
};
use arcfetch_fetch::{FetchHttp, HttpClient, ReqwestClient};
use arcfetch_warc::{ArchiveDecision, ArchivePipeline};
use futures_util::{StreamExt, stream};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

use crate::cli::Settings;

/// One line of output per URL.
#[derive(Debug, Serialize)]
pub struct Report {
    pub url:         String,
    pub status:      Option<i32>,
    pub state:       String,
    pub size:        u64,
    pub digest:      Option<String>,
    pub annotations: Vec<String>,
    pub failures:    Vec<String>,
    pub decision:    ArchiveDecision,
    pub records:     RecordSet,
}

impl Report {
    fn new(item: CrawlItem, state: String, decision: ArchiveDecision) -> Self {
        Self {
            url: item.url().to_string(),
            status: item.fetch_status().map(|s| s.code()),
            state,
            size: item.content_size(),
            digest: item.content_digest().map(ToString::to_string),
            annotations: item.annotations.clone(),
            failures: item.non_fatal_failures.clone(),
            decision,
            records: item.scoped.records.clone(),
        }
    }
}

pub struct Crawler<C: HttpClient> {
    fetcher:  FetchHttp<C>,
    pipeline: ArchivePipeline,
}

impl Crawler<ReqwestClient> {
    pub fn from_settings(settings: &Settings, history: Arc<dyn DigestHistory>) -> Result<Self> {
        let client = ReqwestClient::new(&settings.fetch).context("Failed to build HTTP client")?;
        Self::new(client, settings, history)
    }
}

impl<C: HttpClient> Crawler<C> {
    pub fn new(client: C, settings: &Settings, history: Arc<dyn DigestHistory>) -> Result<Self> {
        let servers: Arc<dyn ServerCache> = Arc::new(MemoryServerCache::new());
        let store = Arc::new(CredentialStore::new(settings.credentials.clone()));
        let fetcher = FetchHttp::new(client, settings.fetch.clone(), servers, store)
            .context("Invalid fetch settings")?;
        let pipeline = ArchivePipeline::new(history)
            .key_by_length(settings.key_by_length)
            .with_request_records(settings.request_records);
        Ok(Self { fetcher, pipeline })
    }

    /// Fetches and archives one URL. A 401 that attached credentials is
    /// retried once so they get presented.
    pub async fn crawl(&self, url: Url, cancel: &CancellationToken) -> Report {
        let mut item = CrawlItem::new(url);
        if !self.fetcher.should_process(&mut item) {
            return Report::new(item, "Skipped".to_string(), ArchiveDecision::Skipped);
        }

        let mut outcome = self.fetcher.execute(&mut item, cancel).await;
        let challenged = item.fetch_status().and_then(|s| s.http()) == Some(401);
        if challenged && item.has_credentials() && !cancel.is_cancelled() {
            info!(url = %item.url(), "retrying with credentials");
            item.reset_for_retry();
            outcome = self.fetcher.execute(&mut item, cancel).await;
        }

        let decision = self.pipeline.process(&mut item);
        Report::new(item, format!("{:?}", outcome.state), decision)
    }

    /// Runs `urls` through `workers` concurrent fetches, calling `emit` as
    /// each finishes. Stops handing out URLs once `cancel` fires.
    pub async fn run<F>(&self, urls: Vec<Url>, workers: usize, cancel: &CancellationToken, mut emit: F)
    where
        F: FnMut(Report),
    {
        let mut reports = stream::iter(urls)
            .take_while(|_| std::future::ready(!cancel.is_cancelled()))
            .map(|url| self.crawl(url, cancel))
            .buffer_unordered(workers);
        while let Some(report) = reports.next().await {
            emit(report);
        }
    }
}

pub fn load_history(settings: &Settings) -> Result<Arc<MemoryDigestHistory>> {
    let history = match &settings.history {
        Some(path) => MemoryDigestHistory::load(path)
            .with_context(|| format!("Failed to load digest history from {}", path.display()))?,
        None => MemoryDigestHistory::new(),
    };
    Ok(Arc::new(history))
}

pub fn save_history(settings: &Settings, history: &MemoryDigestHistory) -> Result<()> {
    let Some(path) = &settings.history else {
        return Ok(());
    };
    history
        .persist(path)
        .with_context(|| format!("Failed to save digest history to {}", path.display()))?;
    info!(path = %path.display(), entries = history.len(), "saved digest history");
    Ok(())
}

pub fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("interrupted, finishing in-flight fetches");
                cancel.cancel();
            }
            Err(e) => warn!(error = %e, "could not listen for Ctrl-C"),
        }
    });
}
