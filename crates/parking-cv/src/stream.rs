//! Video stream sampling
//!
//! A [`FrameSource`] opens stream addresses into [`FrameReader`]s. The
//! [`StreamSession`] uses one to probe reachability and to take single
//! samples: open, discard the warm-up frames, keep the next one, and release
//! the stream. Reading is blocking I/O, so both run on the blocking pool.
//! When the caller gives up (timeout or dropped future) the blocking reader
//! is told to stop and releases the stream after its current `read()`.

use crate::{CvError, CvResult, Frame, StreamConfig};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Sequential reader over an open stream
///
/// Dropping the reader releases the stream.
pub trait FrameReader: Send {
    /// Read the next frame, `None` once the stream has no more frames
    fn read(&mut self) -> CvResult<Option<Frame>>;
}

/// Opens stream addresses
pub trait FrameSource: Send + Sync {
    fn open(&self, address: &str) -> CvResult<Box<dyn FrameReader>>;
}

/// Probes and samples video streams
#[derive(Clone)]
pub struct StreamSession {
    source: Arc<dyn FrameSource>,
    config: StreamConfig,
}

impl StreamSession {
    pub fn new(source: Arc<dyn FrameSource>, config: StreamConfig) -> Self {
        Self { source, config }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// True if the stream opens and yields at least one frame
    pub async fn probe(&self, address: &str) -> bool {
        let source = self.source.clone();
        let addr = address.to_string();
        let cancel = CancelOnDrop::new();
        let flag = cancel.flag();
        let task = tokio::task::spawn_blocking(move || probe_blocking(source.as_ref(), &addr, &flag));

        match tokio::time::timeout(self.config.sample_timeout(), task).await {
            Ok(Ok(reachable)) => reachable,
            Ok(Err(e)) => {
                warn!(address, "Stream probe task failed: {}", e);
                false
            }
            Err(_) => {
                warn!(address, "Stream probe timed out");
                false
            }
        }
    }

    /// Take one sample from the stream
    ///
    /// Opens the stream, skips `warmup_frames` frames and returns the next.
    /// The stream is released before returning, on success or failure.
    pub async fn sample(&self, address: &str) -> CvResult<Frame> {
        let source = self.source.clone();
        let addr = address.to_string();
        let warmup = self.config.warmup_frames;
        let timeout = self.config.sample_timeout();
        let cancel = CancelOnDrop::new();
        let flag = cancel.flag();
        let task =
            tokio::task::spawn_blocking(move || sample_blocking(source.as_ref(), &addr, warmup, &flag));

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(CvError::frame_processing(format!("sample task failed: {e}"))),
            Err(_) => Err(CvError::Timeout(timeout)),
        }
    }
}

/// Raises the shared stop flag when dropped
struct CancelOnDrop(Arc<AtomicBool>);

impl CancelOnDrop {
    fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    fn flag(&self) -> Arc<AtomicBool> {
        self.0.clone()
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

fn probe_blocking(source: &dyn FrameSource, address: &str, cancel: &AtomicBool) -> bool {
    let mut reader = match source.open(address) {
        Ok(reader) => reader,
        Err(e) => {
            debug!(address, "Stream probe failed to open: {}", e);
            return false;
        }
    };
    if cancel.load(Ordering::SeqCst) {
        return false;
    }

    match reader.read() {
        Ok(Some(_)) => true,
        Ok(None) => {
            debug!(address, "Stream probe read no frame");
            false
        }
        Err(e) => {
            debug!(address, "Stream probe read failed: {}", e);
            false
        }
    }
}

/// Skip `warmup` frames and return the one after them
///
/// Stops before the next read once `cancel` is set.
pub fn sample_blocking(
    source: &dyn FrameSource,
    address: &str,
    warmup: usize,
    cancel: &AtomicBool,
) -> CvResult<Frame> {
    let mut reader = source.open(address)?;
    let mut skipped = 0usize;

    loop {
        if cancel.load(Ordering::SeqCst) {
            debug!(address, skipped, "Stream sample cancelled");
            return Err(CvError::Cancelled(address.to_string()));
        }
        match reader.read()? {
            Some(frame) if skipped >= warmup => {
                trace!(address, skipped, "Sampled frame");
                return Ok(frame);
            }
            Some(_) => skipped += 1,
            None => {
                return Err(CvError::StreamEnded {
                    address: address.to_string(),
                    frames_read: skipped,
                });
            }
        }
    }
}

// ============================================================================
// SCRIPTED SOURCE
// ============================================================================

/// Behavior of one scripted stream
#[derive(Debug, Clone)]
pub struct ScriptedStream {
    pub reachable: bool,
    /// Frames available per open, `None` for endless
    pub frame_limit: Option<usize>,
    pub width: u32,
    pub height: u32,
    pub color: [u8; 3],
    /// Delay before each frame is delivered
    pub frame_interval: Duration,
}

impl Default for ScriptedStream {
    fn default() -> Self {
        Self {
            reachable: true,
            frame_limit: None,
            width: 64,
            height: 48,
            color: [32, 32, 32],
            frame_interval: Duration::ZERO,
        }
    }
}

/// In-process [`FrameSource`] producing uniform frames
///
/// Unknown addresses fail to open. Counts opens and currently held readers
/// so callers can check that streams are released.
#[derive(Default)]
pub struct ScriptedSource {
    streams: RwLock<HashMap<String, ScriptedStream>>,
    opens: AtomicUsize,
    active: Arc<AtomicUsize>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an endless, reachable stream
    pub fn add_stream(&self, address: impl Into<String>) {
        self.set_stream(address, ScriptedStream::default());
    }

    pub fn set_stream(&self, address: impl Into<String>, stream: ScriptedStream) {
        self.streams.write().insert(address.into(), stream);
    }

    /// Toggle reachability, adding the stream if unknown
    pub fn set_reachable(&self, address: &str, reachable: bool) {
        self.streams
            .write()
            .entry(address.to_string())
            .or_default()
            .reachable = reachable;
    }

    /// Total successful opens
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Readers opened and not yet dropped
    pub fn active_readers(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

impl FrameSource for ScriptedSource {
    fn open(&self, address: &str) -> CvResult<Box<dyn FrameReader>> {
        let stream = self
            .streams
            .read()
            .get(address)
            .cloned()
            .filter(|s| s.reachable)
            .ok_or_else(|| CvError::stream_unavailable(address))?;

        self.opens.fetch_add(1, Ordering::SeqCst);
        self.active.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(ScriptedReader {
            template: Frame::blank(stream.width, stream.height, stream.color, address),
            remaining: stream.frame_limit,
            frame_interval: stream.frame_interval,
            active: self.active.clone(),
        }))
    }
}

struct ScriptedReader {
    template: Frame,
    remaining: Option<usize>,
    frame_interval: Duration,
    active: Arc<AtomicUsize>,
}

impl FrameReader for ScriptedReader {
    fn read(&mut self) -> CvResult<Option<Frame>> {
        match self.remaining.as_mut() {
            Some(0) => return Ok(None),
            Some(n) => *n -= 1,
            None => {}
        }
        if !self.frame_interval.is_zero() {
            std::thread::sleep(self.frame_interval);
        }
        let mut frame = self.template.clone();
        frame.captured_at = chrono::Utc::now();
        Ok(Some(frame))
    }
}

impl Drop for ScriptedReader {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn session(source: Arc<ScriptedSource>) -> StreamSession {
        StreamSession::new(source, StreamConfig::default())
    }

    #[tokio::test]
    async fn test_probe() {
        let source = Arc::new(ScriptedSource::new());
        source.add_stream("rtsp://cam-1");
        let session = session(source.clone());

        assert!(session.probe("rtsp://cam-1").await);
        assert!(!session.probe("rtsp://missing").await);

        source.set_reachable("rtsp://cam-1", false);
        assert!(!session.probe("rtsp://cam-1").await);
        assert_eq!(source.active_readers(), 0);
    }

    #[tokio::test]
    async fn test_probe_fails_on_empty_stream() {
        let source = Arc::new(ScriptedSource::new());
        source.set_stream(
            "file://empty.mp4",
            ScriptedStream {
                frame_limit: Some(0),
                ..Default::default()
            },
        );
        assert!(!session(source).probe("file://empty.mp4").await);
    }

    #[tokio::test]
    async fn test_sample_skips_warmup_and_releases() {
        let source = Arc::new(ScriptedSource::new());
        source.set_stream(
            "rtsp://cam-1",
            ScriptedStream {
                frame_limit: Some(16),
                ..Default::default()
            },
        );
        let session = session(source.clone());

        let frame = session.sample("rtsp://cam-1").await.unwrap();
        assert_eq!(frame.source, "rtsp://cam-1");
        assert_eq!(source.open_count(), 1);
        assert_eq!(source.active_readers(), 0);
    }

    #[tokio::test]
    async fn test_sample_fails_when_stream_ends_during_warmup() {
        let source = Arc::new(ScriptedSource::new());
        source.set_stream(
            "rtsp://short",
            ScriptedStream {
                frame_limit: Some(15),
                ..Default::default()
            },
        );
        let err = session(source.clone()).sample("rtsp://short").await.unwrap_err();
        assert!(matches!(err, CvError::StreamEnded { frames_read: 15, .. }));
        assert_eq!(source.active_readers(), 0);
    }

    #[tokio::test]
    async fn test_sample_unreachable() {
        let source = Arc::new(ScriptedSource::new());
        let err = session(source).sample("rtsp://nowhere").await.unwrap_err();
        assert!(matches!(err, CvError::StreamUnavailable(_)));
    }

    #[test]
    fn test_sample_blocking_without_warmup() {
        let source = ScriptedSource::new();
        source.add_stream("a");
        let frame = sample_blocking(&source, "a", 0, &AtomicBool::new(false)).unwrap();
        assert_eq!((frame.width(), frame.height()), (64, 48));
    }

    #[test]
    fn test_sample_blocking_stops_when_cancelled() {
        let source = ScriptedSource::new();
        source.add_stream("a");
        let err = sample_blocking(&source, "a", 0, &AtomicBool::new(true)).unwrap_err();
        assert!(matches!(err, CvError::Cancelled(_)));
        assert_eq!(source.active_readers(), 0);
    }

    #[tokio::test]
    async fn test_timed_out_sample_releases_stream() {
        let source = Arc::new(ScriptedSource::new());
        source.set_stream(
            "rtsp://stalled",
            ScriptedStream {
                frame_interval: Duration::from_millis(200),
                ..Default::default()
            },
        );
        let session = StreamSession::new(
            source.clone(),
            StreamConfig {
                warmup_frames: 15,
                sample_timeout_secs: 1,
            },
        );

        let err = session.sample("rtsp://stalled").await.unwrap_err();
        assert!(matches!(err, CvError::Timeout(_)));

        // the reader stops after its in-flight frame
        for _ in 0..50 {
            if source.active_readers() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(source.active_readers(), 0);
        assert_eq!(source.open_count(), 1);
    }
}
