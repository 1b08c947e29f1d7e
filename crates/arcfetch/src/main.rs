use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use arcfetch_core::DigestHistory;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::cli::{App, Settings};
use crate::crawl::Crawler;

mod cli;
mod crawl;

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "arcfetch=info,warn",
        1 => "arcfetch=debug,arcfetch_fetch=debug,arcfetch_warc=debug,info",
        _ => "trace",
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let app = App::parse();
    init_tracing(app.verbose);

    let mut settings = match &app.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    settings.apply(&app);

    let history = crawl::load_history(&settings)?;
    let store: Arc<dyn DigestHistory> = history.clone();
    let crawler = Crawler::from_settings(&settings, store)?;

    let cancel = CancellationToken::new();
    crawl::cancel_on_ctrl_c(cancel.clone());

    let mut stdout = std::io::stdout().lock();
    let mut write_error = None;
    crawler
        .run(app.urls.clone(), settings.workers, &cancel, |report| {
            if write_error.is_some() {
                return;
            }
            let line = serde_json::to_string(&report).map_err(anyhow::Error::from);
            if let Err(e) = line.and_then(|l| writeln!(stdout, "{l}").map_err(anyhow::Error::from)) {
                write_error = Some(e);
                cancel.cancel();
            }
        })
        .await;

    crawl::save_history(&settings, &history)?;
    match write_error {
        Some(e) => Err(e).context("Failed to write report"),
        None => Ok(()),
    }
}
