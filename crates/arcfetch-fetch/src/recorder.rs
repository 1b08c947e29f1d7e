//! Bounded recording of one HTTP response.
//!
//! A [`Recorder`] is opened per fetch. The response envelope (status line and
//! headers) is written first with [`Recorder::record_envelope`]; the body is
//! then pulled through [`Recorder::read_fully_or_until`], which enforces the
//! hard length cap, the wall-clock timeout and the byte rate, and feeds the
//! running digest. Only body bytes are digested.
//!
//! Recorded bytes are spooled in memory and spill to an anonymous temporary
//! file past [`SPOOL_MEMORY_THRESHOLD`].

use std::fmt::Display;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use arcfetch_verify::{ContentDigest, ContentHasher, DigestAlgorithm, Hasher};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::Limits;
use crate::error::RecorderError;
use crate::rate::TokenBucket;

pub const SPOOL_MEMORY_THRESHOLD: usize = 64 * 1024;

enum Spool {
    Memory(Vec<u8>),
    File(File),
}

impl Spool {
    fn write(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        match self {
            Spool::Memory(buf) => {
                if buf.len() + bytes.len() <= SPOOL_MEMORY_THRESHOLD {
                    buf.extend_from_slice(bytes);
                    return Ok(());
                }
                let mut file = tempfile::tempfile()?;
                file.write_all(buf)?;
                file.write_all(bytes)?;
                *self = Spool::File(file);
                Ok(())
            }
            Spool::File(file) => file.write_all(bytes),
        }
    }

    fn read_all(&mut self) -> std::io::Result<Vec<u8>> {
        match self {
            Spool::Memory(buf) => Ok(buf.clone()),
            Spool::File(file) => {
                file.flush()?;
                file.seek(SeekFrom::Start(0))?;
                let mut out = Vec::new();
                file.read_to_end(&mut out)?;
                Ok(out)
            }
        }
    }
}

pub struct Recorder {
    limits:        Limits,
    label:         String,
    started:       Instant,
    bucket:        Option<TokenBucket>,
    hasher:        Option<ContentHasher>,
    digest:        Option<ContentDigest>,
    spool:         Spool,
    size:          u64,
    content_begin: u64,
    open:          bool,
}

impl Recorder {
    /// Opens a recorder. The timeout clock starts now. `label` only appears
    /// in log lines.
    pub fn open(label: impl Into<String>, limits: Limits, digest: Option<DigestAlgorithm>) -> Self {
        Self {
            limits,
            label: label.into(),
            started: Instant::now(),
            bucket: (limits.max_bytes_per_sec > 0)
                .then(|| TokenBucket::per_second(limits.max_bytes_per_sec)),
            hasher: digest.map(|a| a.hasher()),
            digest: None,
            spool: Spool::Memory(Vec::new()),
            size: 0,
            content_begin: 0,
            open: true,
        }
    }

    pub fn is_open(&self) -> bool { self.open }

    /// Total bytes recorded, envelope included. Never above a non-zero hard
    /// max.
    pub fn size(&self) -> u64 { self.size }

    /// Offset of the first body byte.
    pub fn content_begin(&self) -> u64 { self.content_begin }

    pub fn body_size(&self) -> u64 { self.size - self.content_begin }

    /// Digest over the recorded body bytes, available once closed.
    pub fn digest(&self) -> Option<&ContentDigest> { self.digest.as_ref() }

    pub fn limits(&self) -> &Limits { &self.limits }

    /// Writes as much of `bytes` as the hard max allows. Returns
    /// `LengthExceeded` when anything had to be dropped.
    fn write(&mut self, bytes: &[u8], digest: bool) -> Result<(), RecorderError> {
        if !self.open {
            return Err(RecorderError::Closed);
        }
        let hard_max = self.limits.hard_max_bytes;
        let room = if hard_max > 0 { hard_max.saturating_sub(self.size) } else { u64::MAX };
        let take = bytes.len().min(usize::try_from(room).unwrap_or(usize::MAX));
        let kept = &bytes[..take];

        self.spool.write(kept)?;
        if digest && let Some(hasher) = self.hasher.as_mut() {
            hasher.update(kept);
        }
        self.size += take as u64;

        if take < bytes.len() {
            return Err(RecorderError::LengthExceeded(hard_max));
        }
        Ok(())
    }

    /// Records the response envelope. Must precede the body.
    pub fn record_envelope(&mut self, envelope: &[u8]) -> Result<(), RecorderError> {
        let result = self.write(envelope, false);
        self.content_begin = self.size;
        result
    }

    /// Pulls the body until the stream ends or `soft_max` body bytes have
    /// been recorded. Checks cancellation, the deadline and the rate at
    /// every chunk.
    pub async fn read_fully_or_until<S, E>(
        &mut self,
        mut stream: S,
        soft_max: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<(), RecorderError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin,
        E: Display,
    {
        let deadline = self.limits.timeout.map(|t| self.started + t);

        loop {
            if soft_max.is_some_and(|max| self.body_size() >= max) {
                return Ok(());
            }

            let next = guarded(cancel, deadline, self.started, stream.next()).await?;
            let chunk = match next {
                None => return Ok(()),
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => return Err(RecorderError::Stream(e.to_string())),
            };
            if chunk.is_empty() {
                continue;
            }

            // Bytes past the declared length are dropped, not recorded.
            let room = soft_max.map_or(u64::MAX, |max| max.saturating_sub(self.body_size()));
            let kept = &chunk[..chunk.len().min(usize::try_from(room).unwrap_or(usize::MAX))];
            self.write(kept, true)?;

            if let Some(bucket) = &self.bucket {
                guarded(cancel, deadline, self.started, bucket.acquire(kept.len() as u64)).await?;
            }
        }
    }

    /// Finalizes the digest. Safe to call any number of times.
    pub fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        if let Some(hasher) = self.hasher.take() {
            self.digest = Some(hasher.finish());
        }
    }

    /// Every recorded byte, envelope first.
    pub fn replay(&mut self) -> Result<Vec<u8>, RecorderError> { Ok(self.spool.read_all()?) }
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("label", &self.label)
            .field("size", &self.size)
            .field("content_begin", &self.content_begin)
            .field("open", &self.open)
            .finish()
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if self.open {
            tracing::error!(url = %self.label, size = self.size, "recorder dropped while still open");
            self.close();
        }
    }
}

async fn guarded<F: Future>(
    cancel: &CancellationToken,
    deadline: Option<Instant>,
    started: Instant,
    fut: F,
) -> Result<F::Output, RecorderError> {
    let expired = async {
        match deadline {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending().await,
        }
    };
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(RecorderError::Cancelled),
        _ = expired => Err(RecorderError::Timeout(started.elapsed())),
        out = fut => Ok(out),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::stream;

    use super::*;

    type Chunk = Result<Bytes, std::io::Error>;

    fn chunks<B: AsRef<[u8]>>(parts: &[B]) -> impl Stream<Item = Chunk> + Unpin + use<B> {
        let parts: Vec<Chunk> = parts.iter().map(|p| Ok(Bytes::copy_from_slice(p.as_ref()))).collect();
        stream::iter(parts)
    }

    fn limits(hard_max_bytes: u64) -> Limits { Limits { hard_max_bytes, ..Limits::default() } }

    #[tokio::test]
    async fn test_records_envelope_then_body() {
        let mut rec = Recorder::open("t", limits(0), Some(DigestAlgorithm::Sha1));
        rec.record_envelope(b"HTTP/1.1 200 OK\r\n\r\n").unwrap();
        rec.read_fully_or_until(chunks(&["hello ", "world"]), None, &CancellationToken::new())
            .await
            .unwrap();
        rec.close();

        assert_eq!(rec.content_begin(), 19);
        assert_eq!(rec.size(), 30);
        assert_eq!(rec.body_size(), 11);
        assert_eq!(rec.digest(), Some(&DigestAlgorithm::Sha1.digest(b"hello world")));
        assert_eq!(rec.replay().unwrap(), b"HTTP/1.1 200 OK\r\n\r\nhello world");
    }

    #[tokio::test]
    async fn test_hard_max_never_exceeded() {
        for body_len in [0usize, 5, 10, 11, 100, 100_000] {
            let body = vec![b'x'; body_len];
            let mut rec = Recorder::open("t", limits(10), None);
            let result = rec
                .read_fully_or_until(chunks(&[&body]), None, &CancellationToken::new())
                .await;
            assert!(rec.size() <= 10, "len {body_len} recorded {}", rec.size());
            assert_eq!(matches!(result, Err(RecorderError::LengthExceeded(10))), body_len > 10);
            rec.close();
        }
    }

    #[tokio::test]
    async fn test_truncated_digest_covers_recorded_bytes() {
        let mut rec = Recorder::open("t", limits(8), Some(DigestAlgorithm::Sha1));
        rec.record_envelope(b"HDR\n").unwrap();
        let err = rec
            .read_fully_or_until(chunks(&["abc", "defgh"]), None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_truncation());
        rec.close();

        assert_eq!(rec.size(), 8);
        assert_eq!(rec.digest(), Some(&DigestAlgorithm::Sha1.digest(b"abcd")));
    }

    #[tokio::test]
    async fn test_soft_max_stops_early() {
        let mut rec = Recorder::open("t", limits(0), None);
        rec.read_fully_or_until(chunks(&["12345", "67890", "extra"]), Some(10), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(rec.body_size(), 10);
        rec.close();
    }

    #[tokio::test]
    async fn test_soft_max_clips_overlong_chunk() {
        let mut rec = Recorder::open("t", limits(0), Some(DigestAlgorithm::Sha1));
        rec.read_fully_or_until(chunks(&["0123456789EXTRA"]), Some(10), &CancellationToken::new())
            .await
            .unwrap();
        rec.close();

        assert_eq!(rec.body_size(), 10);
        assert_eq!(rec.digest(), Some(&DigestAlgorithm::Sha1.digest(b"0123456789")));
        assert_eq!(rec.replay().unwrap(), b"0123456789");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_on_stalled_stream() {
        let limits = Limits { timeout: Some(Duration::from_secs(5)), ..Limits::default() };
        let mut rec = Recorder::open("t", limits, None);
        let stalled = chunks(&["partial"]).chain(stream::pending());
        let err = rec
            .read_fully_or_until(stalled, None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RecorderError::Timeout(_)));
        assert_eq!(rec.body_size(), 7);
        rec.close();
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_paces_reads() {
        let limits = Limits { max_bytes_per_sec: 1000, ..Limits::default() };
        let mut rec = Recorder::open("t", limits, None);
        let start = Instant::now();
        let body = vec![0u8; 1000];
        rec.read_fully_or_until(chunks(&[&body, &body, &body]), None, &CancellationToken::new())
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_secs(2));
        rec.close();
    }

    #[tokio::test]
    async fn test_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut rec = Recorder::open("t", limits(0), None);
        let err = rec.read_fully_or_until(stream::pending::<Chunk>(), None, &cancel).await.unwrap_err();
        assert!(matches!(err, RecorderError::Cancelled));
        rec.close();
    }

    #[tokio::test]
    async fn test_stream_error_surfaces() {
        let mut rec = Recorder::open("t", limits(0), None);
        let failing = stream::iter(vec![
            Ok(Bytes::from_static(b"ok")),
            Err(std::io::Error::other("reset by peer")),
        ]);
        let err = rec.read_fully_or_until(failing, None, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, RecorderError::Stream(ref m) if m.contains("reset")));
        rec.close();
    }

    #[tokio::test]
    async fn test_spills_to_file() {
        let mut rec = Recorder::open("t", limits(0), Some(DigestAlgorithm::Md5));
        let body: Vec<u8> = (0..SPOOL_MEMORY_THRESHOLD * 2).map(|i| (i % 251) as u8).collect();
        let parts: Vec<&[u8]> = body.chunks(4096).collect();
        rec.read_fully_or_until(chunks(&parts), None, &CancellationToken::new()).await.unwrap();
        rec.close();

        assert!(matches!(rec.spool, Spool::File(_)));
        assert_eq!(rec.replay().unwrap(), body);
        assert_eq!(rec.digest(), Some(&DigestAlgorithm::Md5.digest(&body)));
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut rec = Recorder::open("t", limits(0), Some(DigestAlgorithm::Sha1));
        rec.close();
        let first = rec.digest().cloned();
        rec.close();
        assert!(!rec.is_open());
        assert_eq!(rec.digest().cloned(), first);
        assert!(matches!(rec.record_envelope(b"x"), Err(RecorderError::Closed)));
    }
}
