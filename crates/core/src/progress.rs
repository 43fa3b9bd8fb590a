//! Progress accounting
//!
//! `Accounter` counts transferred bytes from any number of concurrent
//! workers and keeps a throughput figure refreshed by a background sampler.
//! `ProgressReader` wraps a byte stream so every successful read is counted.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::sync::CancellationToken;

use crate::display::DisplaySink;
use crate::traits::ObjectReader;

/// Sampling cadence of the background refresher
pub const DEFAULT_REFRESH: Duration = Duration::from_millis(200);

/// Point-in-time progress figures
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AccountStat {
    pub total: u64,
    pub transferred: u64,
    /// Bytes per second since start, 0 without positive progress
    pub speed: f64,
}

struct Inner {
    total: AtomicU64,
    current: AtomicU64,
    /// Bytes credited without transfer; excluded from throughput
    start_value: AtomicU64,
    start: Instant,
    last_sampled: AtomicU64,
    speed_bits: AtomicU64,
    stop: CancellationToken,
    finished: OnceLock<AccountStat>,
    sink: Arc<dyn DisplaySink>,
}

impl Inner {
    fn speed_at(&self, current: u64) -> f64 {
        let start_value = self.start_value.load(Ordering::Acquire);
        let elapsed = self.start.elapsed().as_secs_f64();
        if current > start_value && elapsed > 0.0 {
            (current - start_value) as f64 / elapsed
        } else {
            0.0
        }
    }

    fn stat(&self, current: u64, speed: f64) -> AccountStat {
        AccountStat {
            total: self.total.load(Ordering::Acquire),
            transferred: current,
            speed,
        }
    }
}

/// Byte counter shared by all transfer workers of a run
///
/// Cloning is cheap; clones share the same counters. The sampler stops on
/// `finalize` or once every clone has been dropped.
#[derive(Clone)]
pub struct Accounter {
    inner: Arc<Inner>,
}

impl Accounter {
    /// Start accounting for `total` bytes. Must be called inside a Tokio runtime.
    pub fn start(total: u64, sink: Arc<dyn DisplaySink>) -> Self {
        Self::with_refresh(total, DEFAULT_REFRESH, sink)
    }

    pub fn with_refresh(total: u64, refresh: Duration, sink: Arc<dyn DisplaySink>) -> Self {
        let inner = Arc::new(Inner {
            total: AtomicU64::new(total),
            current: AtomicU64::new(0),
            start_value: AtomicU64::new(0),
            start: Instant::now(),
            last_sampled: AtomicU64::new(u64::MAX),
            speed_bits: AtomicU64::new(0f64.to_bits()),
            stop: CancellationToken::new(),
            finished: OnceLock::new(),
            sink,
        });

        tokio::spawn(sampler(
            Arc::downgrade(&inner),
            inner.stop.clone(),
            refresh,
        ));

        Self { inner }
    }

    /// Count `n` transferred bytes, returning the new cumulative total
    pub fn add(&self, n: u64) -> u64 {
        self.inner.current.fetch_add(n, Ordering::AcqRel) + n
    }

    /// Credit bytes of an already completed unit without counting them as throughput
    pub fn fast_forward(&self, n: u64) -> u64 {
        self.inner.start_value.fetch_add(n, Ordering::AcqRel);
        self.add(n)
    }

    pub fn transferred(&self) -> u64 {
        self.inner.current.load(Ordering::Acquire)
    }

    /// Throughput computed by the most recent sample
    pub fn speed(&self) -> f64 {
        f64::from_bits(self.inner.speed_bits.load(Ordering::Acquire))
    }

    /// Recompute throughput if the counter moved since the last sample
    pub fn sample(&self) -> AccountStat {
        let inner = &self.inner;
        let current = inner.current.load(Ordering::Acquire);
        if inner.last_sampled.swap(current, Ordering::AcqRel) != current {
            let speed = inner.speed_at(current);
            inner.speed_bits.store(speed.to_bits(), Ordering::Release);
        }
        inner.stat(current, self.speed())
    }

    /// Stop the sampler and return the final snapshot.
    ///
    /// Only the first call stops anything; every caller, concurrent or
    /// later, receives the same snapshot.
    pub fn finalize(&self) -> AccountStat {
        *self.inner.finished.get_or_init(|| {
            self.inner.stop.cancel();
            let current = self.inner.current.load(Ordering::Acquire);
            let speed = self.inner.speed_at(current);
            self.inner.speed_bits.store(speed.to_bits(), Ordering::Release);
            self.inner.stat(current, speed)
        })
    }

    /// Wrap `reader` so its reads are counted
    pub fn wrap(&self, reader: ObjectReader) -> ObjectReader {
        Box::pin(ProgressReader::new(reader, self.clone()))
    }
}

async fn sampler(inner: Weak<Inner>, stop: CancellationToken, refresh: Duration) {
    let mut interval = tokio::time::interval(refresh);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = interval.tick() => {
                let Some(inner) = inner.upgrade() else { break };
                let moved = inner.last_sampled.load(Ordering::Acquire)
                    != inner.current.load(Ordering::Acquire);
                let acct = Accounter { inner };
                let stat = acct.sample();
                if moved {
                    acct.inner.sink.progress(&stat);
                }
            }
        }
    }
}

/// Stream decorator reporting every successful read to an `Accounter`
pub struct ProgressReader<R> {
    inner: R,
    acct: Accounter,
}

impl<R> ProgressReader<R> {
    pub fn new(inner: R, acct: Accounter) -> Self {
        Self { inner, acct }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ProgressReader<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let this = &mut *self;
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let n = buf.filled().len() - before;
                if n > 0 {
                    this.acct.add(n as u64);
                }
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::NullDisplay;
    use std::io::Cursor;
    use tokio::io::AsyncReadExt as _;

    fn accounter(total: u64) -> Accounter {
        Accounter::start(total, Arc::new(NullDisplay))
    }

    struct FailingReader;

    impl AsyncRead for FailingReader {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::other("disk gone")))
        }
    }

    #[tokio::test]
    async fn test_add_returns_cumulative_total() {
        let acct = accounter(10);
        assert_eq!(acct.add(3), 3);
        assert_eq!(acct.add(0), 3);
        assert_eq!(acct.add(4), 7);
        assert_eq!(acct.transferred(), 7);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_adds_sum_exactly() {
        let acct = accounter(0);
        let mut handles = Vec::new();
        for worker in 0..16u64 {
            let acct = acct.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..1000u64 {
                    acct.add((worker + i) % 7);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let expected: u64 = (0..16u64)
            .flat_map(|w| (0..1000u64).map(move |i| (w + i) % 7))
            .sum();
        assert_eq!(acct.transferred(), expected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_finalize_is_idempotent_under_concurrency() {
        let acct = accounter(500);
        acct.add(250);

        let mut handles = Vec::new();
        for _ in 0..32 {
            let acct = acct.clone();
            handles.push(std::thread::spawn(move || acct.finalize()));
        }
        let stats: Vec<AccountStat> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(acct.inner.finished.get().is_some());
        assert!(acct.inner.stop.is_cancelled());
        assert!(stats.iter().all(|s| *s == stats[0]));
        assert_eq!(stats[0].total, 500);
        assert_eq!(stats[0].transferred, 250);

        // later adds do not change the recorded snapshot
        acct.add(100);
        assert_eq!(acct.finalize(), stats[0]);
    }

    #[tokio::test]
    async fn test_speed_zero_without_progress() {
        let acct = accounter(100);
        assert_eq!(acct.sample().speed, 0.0);
        acct.fast_forward(60);
        let stat = acct.sample();
        assert_eq!(stat.transferred, 60);
        assert_eq!(stat.speed, 0.0);
    }

    #[tokio::test]
    async fn test_speed_positive_after_transfer() {
        let acct = accounter(100);
        tokio::time::sleep(Duration::from_millis(5)).await;
        acct.add(100);
        assert!(acct.sample().speed > 0.0);
    }

    #[tokio::test]
    async fn test_reader_counts_successful_reads() {
        let acct = accounter(11);
        let mut reader = acct.wrap(Box::pin(Cursor::new(b"hello world".to_vec())));
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"hello world");
        assert_eq!(acct.transferred(), 11);
    }

    #[tokio::test]
    async fn test_reader_passes_errors_through() {
        let acct = accounter(0);
        let mut reader = ProgressReader::new(FailingReader, acct.clone());
        let mut buf = [0u8; 8];
        let err = reader.read(&mut buf).await.unwrap_err();
        assert_eq!(err.to_string(), "disk gone");
        assert_eq!(acct.transferred(), 0);
    }
}
