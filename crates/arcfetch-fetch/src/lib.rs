//! Bounded, digesting HTTP fetches for archival crawling.
//!
//! # Key Features
//!
//! - **Bounded recording**: hard length cap, wall-clock timeout and byte-rate
//!   pacing enforced per chunk by [`Recorder`]
//! - **Single pass**: the content digest is computed while bytes stream
//! - **Failures as state**: [`FetchHttp::execute`] turns every failure into
//!   item status plus a log line, so one bad URL never stops a worker
//! - **Cooperative cancellation**: a [`CancellationToken`](tokio_util::sync::CancellationToken)
//!   is checked at every chunk
//!
//! The HTTP stack sits behind [`HttpClient`]; [`ReqwestClient`] is the
//! default implementation.

pub mod auth;
mod client;
pub mod conditional;
mod config;
mod error;
mod rate;
mod recorder;
mod transaction;

pub use client::{BoxStream, FetchRequest, FetchResponse, HttpClient};
#[cfg(feature = "reqwest")]
pub use client::ReqwestClient;
pub use config::{DEFAULT_ACCEPT_HEADER, FetchConfig, Limits, MidfetchRule, SslTrustLevel};
pub use error::{FetchError, RecorderError, Result};
pub use rate::TokenBucket;
pub use recorder::{Recorder, SPOOL_MEMORY_THRESHOLD};
pub use transaction::{FetchHttp, FetchOutcome, FetchState};
