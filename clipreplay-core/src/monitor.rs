//! Clipboard change handling.
//!
//! The platform adapter calls [`ChangeListener::on_clipboard_changed`] from
//! its notification context.  That call only timestamps the event and
//! hands it to the capture worker, so it never blocks the caller.  The
//! worker runs each change through [`CapturePipeline::handle_change`]:
//!
//! debounce -> open (bounded retry) -> empty/unsupported classification ->
//! exclusion formats -> suppression token -> extraction -> dedup -> queue.
//!
//! All mutable capture state (debounce time, last hash, suppression token)
//! belongs to one monitor instance.

use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::config::CaptureConfig;
use crate::content::{
    files_hash, image_hash, text_hash, ClipCandidate, ContentHasher, ImageSignature, Sha256Hasher,
    SourceInfo,
};
use crate::dedup::{ContentDeduplicator, DedupVerdict};
use crate::errors::{ClipReplayError, Result};
use crate::extract::FormatExtractor;
use crate::format::{
    names, AllowAllFormats, ClipboardBackend, ClipboardSession, FormatPolicy,
};
use crate::guard::{classify_formats, ClipboardState, Debouncer, SuppressionGuard, SuppressionHandle};
use crate::queue::{self, QueueReader, QueueWriter};
use crate::target::WindowSystem;

/// Receiver of OS clipboard-change notifications.
pub trait ChangeListener: Send + Sync {
    fn on_clipboard_changed(&self);
}

/// Collaborator signals that are not dispatched items.
pub trait CaptureObserver: Send + Sync {
    /// The user copied the last dispatched content again.
    fn on_intentional_repeat(&self, _candidate: &ClipCandidate) {}

    /// The clipboard now holds no formats at all.
    fn on_clipboard_erased(&self) {}

    /// Every processed notification, for diagnostics.
    fn on_capture(&self, _outcome: CaptureOutcome) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl CaptureObserver for NoopObserver {}

/// What happened to one notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureOutcome {
    Debounced,
    /// The clipboard stayed locked by another process.
    Unavailable,
    Erased,
    Unsupported,
    /// Flagged by the owner as not for clipboard monitors.
    Excluded,
    Suppressed,
    /// Formats present but nothing capturable after filtering.
    NothingCaptured,
    /// Payload failed validation.
    Rejected,
    Duplicate,
    IntentionalRepeat,
    Dispatched,
    /// The queue was closed; the item was dropped.
    Dropped,
}

/// Host-provided collaborators.
#[derive(Clone)]
pub struct MonitorHooks {
    pub policy: Arc<dyn FormatPolicy>,
    pub hasher: Arc<dyn ContentHasher>,
    pub observer: Arc<dyn CaptureObserver>,
    /// Used to attribute captures to the foreground application.
    pub windows: Option<Arc<dyn WindowSystem>>,
}

impl Default for MonitorHooks {
    fn default() -> Self {
        Self {
            policy: Arc::new(AllowAllFormats),
            hasher: Arc::new(Sha256Hasher),
            observer: Arc::new(NoopObserver),
            windows: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Clipboard open
// ---------------------------------------------------------------------------

/// Open the clipboard, retrying with linearly increasing sleeps.
///
/// `None` after `attempts` failures; the caller treats that as "no data".
pub fn open_with_retry(
    backend: &dyn ClipboardBackend,
    attempts: u32,
    backoff: Duration,
) -> Option<Box<dyn ClipboardSession + '_>> {
    let attempts = attempts.max(1);
    for attempt in 1..=attempts {
        if let Some(session) = backend.try_open() {
            return Some(session);
        }
        if attempt < attempts {
            thread::sleep(backoff * attempt);
        }
    }
    None
}

/// Hash of the primary payload as the OS currently holds it, without
/// allow-set filtering or image conversion.  Matches the candidate hash
/// for text, encoded images and file lists.
pub fn fingerprint(session: &dyn ClipboardSession, hasher: &dyn ContentHasher) -> Option<String> {
    if let Some(text) = session.read_text().filter(|t| !t.is_empty()) {
        return Some(text_hash(hasher, &text));
    }
    for (name, expected) in [(names::PNG, ImageSignature::Png), (names::JFIF, ImageSignature::Jpeg)] {
        if let Some(bytes) = session
            .read_bytes(name)
            .filter(|b| ImageSignature::classify(b) == expected)
        {
            return Some(image_hash(hasher, &bytes));
        }
    }
    session
        .read_files()
        .filter(|p| !p.is_empty())
        .map(|p| files_hash(hasher, &p))
}

fn is_excluded(session: &dyn ClipboardSession) -> bool {
    if session.has_format(names::EXCLUDE_FROM_MONITOR) {
        return true;
    }
    session
        .read_bytes(names::CAN_INCLUDE_IN_HISTORY)
        .and_then(|b| b.get(..4).map(|d| u32::from_le_bytes([d[0], d[1], d[2], d[3]])))
        .map_or(false, |v| v == 0)
}

fn source_info(windows: Option<&dyn WindowSystem>) -> SourceInfo {
    let Some(ws) = windows else {
        return SourceInfo::default();
    };
    ws.foreground_window()
        .and_then(|h| ws.describe(h))
        .map(|t| SourceInfo {
            process_name: Some(t.process_name).filter(|p| !p.is_empty()),
            window_title: Some(t.window_title).filter(|t| !t.is_empty()),
        })
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Synchronous capture state machine; owned by the worker thread.
pub struct CapturePipeline {
    config: CaptureConfig,
    backend: Arc<dyn ClipboardBackend>,
    extractor: FormatExtractor,
    guard: SuppressionHandle,
    debouncer: Debouncer,
    dedup: ContentDeduplicator,
    writer: QueueWriter<ClipCandidate>,
    hooks: MonitorHooks,
}

impl CapturePipeline {
    pub fn new(
        config: CaptureConfig,
        backend: Arc<dyn ClipboardBackend>,
        hooks: MonitorHooks,
        guard: SuppressionHandle,
        writer: QueueWriter<ClipCandidate>,
    ) -> Self {
        Self {
            extractor: FormatExtractor::new(
                config.clone(),
                Arc::clone(&hooks.policy),
                Arc::clone(&hooks.hasher),
            ),
            debouncer: Debouncer::new(config.debounce()),
            dedup: ContentDeduplicator::new(config.repeat_window()),
            config,
            backend,
            guard,
            writer,
            hooks,
        }
    }

    /// Process one notification observed at `at`.
    pub fn handle_change(&mut self, at: Instant) -> CaptureOutcome {
        let outcome = self.run(at);
        log::debug!("monitor: change -> {outcome:?}");
        self.hooks.observer.on_capture(outcome);
        outcome
    }

    fn run(&mut self, at: Instant) -> CaptureOutcome {
        if !self.debouncer.accept_at(at) {
            return CaptureOutcome::Debounced;
        }
        if self.config.pre_probe_delay_ms > 0 {
            thread::sleep(Duration::from_millis(self.config.pre_probe_delay_ms));
        }

        let source = source_info(self.hooks.windows.as_deref());

        let backend = Arc::clone(&self.backend);
        let Some(session) = open_with_retry(
            backend.as_ref(),
            self.config.open_retries,
            Duration::from_millis(self.config.open_backoff_ms),
        ) else {
            log::warn!(
                "monitor: clipboard still locked after {} attempts, change skipped",
                self.config.open_retries
            );
            return CaptureOutcome::Unavailable;
        };

        match classify_formats(&session.formats()) {
            ClipboardState::Empty => {
                drop(session);
                self.hooks.observer.on_clipboard_erased();
                return CaptureOutcome::Erased;
            }
            ClipboardState::Unsupported => return CaptureOutcome::Unsupported,
            ClipboardState::Supported => {}
        }

        if self.config.honor_exclusion_formats && is_excluded(session.as_ref()) {
            return CaptureOutcome::Excluded;
        }

        if let Some(token) = self.guard.take_live(at) {
            let observed = fingerprint(session.as_ref(), self.hooks.hasher.as_ref());
            if observed.as_deref() == Some(token.expected_hash.as_str()) {
                return CaptureOutcome::Suppressed;
            }
        }

        let candidate = match self.extractor.extract(session.as_ref(), &source) {
            Ok(Some(c)) => c,
            Ok(None) => return CaptureOutcome::NothingCaptured,
            Err(e) => {
                log::warn!("monitor: candidate rejected: {e}");
                return CaptureOutcome::Rejected;
            }
        };
        drop(session);

        match self.dedup.observe_at(candidate.content_hash(), at) {
            DedupVerdict::Duplicate => CaptureOutcome::Duplicate,
            DedupVerdict::IntentionalRepeat => {
                self.hooks.observer.on_intentional_repeat(&candidate);
                CaptureOutcome::IntentionalRepeat
            }
            DedupVerdict::New => match self.writer.push(candidate) {
                Ok(evicted) => {
                    if evicted.is_some() {
                        log::debug!("monitor: queue full, evicted oldest item");
                    }
                    CaptureOutcome::Dispatched
                }
                Err(e) => {
                    log::warn!("monitor: {e}, item dropped");
                    CaptureOutcome::Dropped
                }
            },
        }
    }

    /// Close the dispatch queue.
    pub fn close(&self) {
        self.writer.close();
    }
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

struct Worker {
    tx: Sender<Instant>,
    handle: JoinHandle<CapturePipeline>,
}

#[derive(Default)]
struct MonitorState {
    /// Parked pipeline while not monitoring.
    idle: Option<CapturePipeline>,
    worker: Option<Worker>,
}

/// One clipboard watcher: a capture worker plus its dispatch queue.
pub struct ClipboardMonitor {
    state: Mutex<MonitorState>,
    guard: SuppressionHandle,
    reader: QueueReader<ClipCandidate>,
}

impl ClipboardMonitor {
    pub fn new(config: CaptureConfig, backend: Arc<dyn ClipboardBackend>, hooks: MonitorHooks) -> Self {
        let guard = Arc::new(SuppressionGuard::new(config.suppression()));
        let (writer, reader) = queue::bounded(config.queue_capacity);
        let pipeline = CapturePipeline::new(config, backend, hooks, Arc::clone(&guard), writer);
        Self {
            state: Mutex::new(MonitorState {
                idle: Some(pipeline),
                worker: None,
            }),
            guard,
            reader,
        }
    }

    /// Read side of the dispatch queue.  Clone it for more consumers.
    pub fn reader(&self) -> QueueReader<ClipCandidate> {
        self.reader.clone()
    }

    /// Handle for registering programmatic writes before a replay.
    pub fn suppression(&self) -> SuppressionHandle {
        Arc::clone(&self.guard)
    }

    pub fn is_monitoring(&self) -> bool {
        self.state.lock().worker.is_some()
    }

    /// Start the capture worker.  No-op when already running.
    pub fn start_monitoring(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.worker.is_some() {
            return Ok(());
        }
        let mut pipeline = state
            .idle
            .take()
            .ok_or_else(|| ClipReplayError::InvalidArgument("monitor is closed".into()))?;

        let (tx, rx) = mpsc::channel::<Instant>();
        let handle = thread::Builder::new()
            .name("clipreplay-capture".into())
            .spawn(move || {
                for at in rx {
                    pipeline.handle_change(at);
                }
                pipeline
            })
            .map_err(|e| ClipReplayError::Clipboard(format!("cannot spawn capture worker: {e}")))?;

        state.worker = Some(Worker { tx, handle });
        log::info!("monitor: started");
        Ok(())
    }

    /// Stop the worker after it finishes queued notifications.  The
    /// dispatch queue stays open so monitoring can be restarted.
    pub fn stop_monitoring(&self) {
        let worker = self.state.lock().worker.take();
        let Some(Worker { tx, handle }) = worker else {
            return;
        };
        drop(tx);
        match handle.join() {
            Ok(pipeline) => self.state.lock().idle = Some(pipeline),
            Err(_) => log::warn!("monitor: capture worker panicked"),
        }
        log::info!("monitor: stopped");
    }

    /// Stop monitoring and close the dispatch queue for good.  Readers see
    /// end-of-stream after draining.
    pub fn close(&self) {
        self.stop_monitoring();
        if let Some(pipeline) = self.state.lock().idle.take() {
            pipeline.close();
        }
    }

    /// Queue a notification observed at `at`.  Dropped when not monitoring.
    pub fn notify_at(&self, at: Instant) {
        let state = self.state.lock();
        match &state.worker {
            Some(w) => {
                if w.tx.send(at).is_err() {
                    log::warn!("monitor: capture worker gone, notification dropped");
                }
            }
            None => log::debug!("monitor: not monitoring, notification ignored"),
        }
    }
}

impl ChangeListener for ClipboardMonitor {
    fn on_clipboard_changed(&self) {
        self.notify_at(Instant::now());
    }
}

impl Drop for ClipboardMonitor {
    fn drop(&mut self) {
        self.close();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ClipKind;
    use crate::memory::MemoryClipboard;
    use crate::queue::Recv;
    use std::path::PathBuf;

    #[derive(Default)]
    struct Recorder {
        repeats: Mutex<u32>,
        erased: Mutex<u32>,
        outcomes: Mutex<Vec<CaptureOutcome>>,
    }

    impl CaptureObserver for Recorder {
        fn on_intentional_repeat(&self, _candidate: &ClipCandidate) {
            *self.repeats.lock() += 1;
        }

        fn on_clipboard_erased(&self) {
            *self.erased.lock() += 1;
        }

        fn on_capture(&self, outcome: CaptureOutcome) {
            self.outcomes.lock().push(outcome);
        }
    }

    struct Fixture {
        clip: Arc<MemoryClipboard>,
        recorder: Arc<Recorder>,
        guard: SuppressionHandle,
        reader: QueueReader<ClipCandidate>,
        pipeline: CapturePipeline,
    }

    fn fixture(config: CaptureConfig) -> Fixture {
        let clip = Arc::new(MemoryClipboard::new());
        let recorder = Arc::new(Recorder::default());
        let hooks = MonitorHooks {
            observer: recorder.clone(),
            ..MonitorHooks::default()
        };
        let guard = Arc::new(SuppressionGuard::new(config.suppression()));
        let (writer, reader) = queue::bounded(config.queue_capacity);
        let pipeline = CapturePipeline::new(config, clip.clone(), hooks, guard.clone(), writer);
        Fixture {
            clip,
            recorder,
            guard,
            reader,
            pipeline,
        }
    }

    fn fast_config() -> CaptureConfig {
        CaptureConfig {
            open_backoff_ms: 0,
            ..CaptureConfig::default()
        }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_notifications_inside_debounce_window_extract_once() {
        let mut f = fixture(fast_config());
        f.clip.set_text("one");
        let t0 = Instant::now();
        assert_eq!(f.pipeline.handle_change(t0), CaptureOutcome::Dispatched);
        f.clip.set_text("two");
        assert_eq!(f.pipeline.handle_change(t0 + ms(100)), CaptureOutcome::Debounced);
        assert_eq!(f.clip.open_count(), 1);
        assert_eq!(f.reader.len(), 1);
    }

    #[test]
    fn test_suppressed_echo_not_dispatched() {
        let mut f = fixture(fast_config());
        let hash = text_hash(&Sha256Hasher, "pasted");
        let t0 = Instant::now();
        f.guard.register_at(&hash, t0);
        f.clip.set_text("pasted");
        assert_eq!(f.pipeline.handle_change(t0 + ms(50)), CaptureOutcome::Suppressed);
        assert!(f.reader.is_empty());
    }

    #[test]
    fn test_echo_after_expiry_dispatched() {
        let mut f = fixture(fast_config());
        let hash = text_hash(&Sha256Hasher, "pasted");
        let t0 = Instant::now();
        f.guard.register_at(&hash, t0);
        f.clip.set_text("pasted");
        assert_eq!(f.pipeline.handle_change(t0 + ms(600)), CaptureOutcome::Dispatched);
        assert_eq!(f.reader.len(), 1);
    }

    #[test]
    fn test_duplicate_and_intentional_repeat() {
        let config = CaptureConfig {
            debounce_ms: 0,
            ..fast_config()
        };
        let mut f = fixture(config);
        f.clip.set_text("same");
        let t0 = Instant::now();
        assert_eq!(f.pipeline.handle_change(t0), CaptureOutcome::Dispatched);
        assert_eq!(f.pipeline.handle_change(t0 + ms(50)), CaptureOutcome::Duplicate);
        assert_eq!(*f.recorder.repeats.lock(), 0);
        assert_eq!(f.pipeline.handle_change(t0 + ms(300)), CaptureOutcome::IntentionalRepeat);
        assert_eq!(*f.recorder.repeats.lock(), 1);
        assert_eq!(f.reader.len(), 1);
    }

    #[test]
    fn test_empty_clipboard_signals_erase() {
        let mut f = fixture(fast_config());
        assert_eq!(f.pipeline.handle_change(Instant::now()), CaptureOutcome::Erased);
        assert_eq!(*f.recorder.erased.lock(), 1);
    }

    #[test]
    fn test_unsupported_format_does_not_signal_erase() {
        let mut f = fixture(fast_config());
        f.clip.add_bytes("Ole Private Data", vec![1]);
        assert_eq!(f.pipeline.handle_change(Instant::now()), CaptureOutcome::Unsupported);
        assert_eq!(*f.recorder.erased.lock(), 0);
    }

    #[test]
    fn test_busy_clipboard_retried_then_read() {
        let mut f = fixture(fast_config());
        f.clip.set_text("late");
        f.clip.set_busy(4);
        assert_eq!(f.pipeline.handle_change(Instant::now()), CaptureOutcome::Dispatched);
    }

    #[test]
    fn test_busy_clipboard_gives_up() {
        let mut f = fixture(fast_config());
        f.clip.set_text("never");
        f.clip.set_busy(5);
        assert_eq!(f.pipeline.handle_change(Instant::now()), CaptureOutcome::Unavailable);
        assert!(f.reader.is_empty());
        assert_eq!(*f.recorder.erased.lock(), 0);
    }

    #[test]
    fn test_exclusion_format_skips_capture() {
        let mut f = fixture(fast_config());
        f.clip.set_text("secret");
        f.clip.add_bytes(names::EXCLUDE_FROM_MONITOR, vec![]);
        assert_eq!(f.pipeline.handle_change(Instant::now()), CaptureOutcome::Excluded);
    }

    #[test]
    fn test_history_opt_out_skips_capture() {
        let mut f = fixture(fast_config());
        f.clip.set_text("secret");
        f.clip.add_bytes(names::CAN_INCLUDE_IN_HISTORY, 0u32.to_le_bytes().to_vec());
        assert_eq!(f.pipeline.handle_change(Instant::now()), CaptureOutcome::Excluded);

        let mut g = fixture(fast_config());
        g.clip.set_text("fine");
        g.clip.add_bytes(names::CAN_INCLUDE_IN_HISTORY, 1u32.to_le_bytes().to_vec());
        assert_eq!(g.pipeline.handle_change(Instant::now()), CaptureOutcome::Dispatched);
    }

    #[test]
    fn test_jfif_only_clipboard_captured() {
        let img = image::RgbImage::from_pixel(4, 3, image::Rgb([200, 40, 40]));
        let mut jpeg = Vec::new();
        image::codecs::jpeg::JpegEncoder::new(&mut jpeg)
            .encode_image(&img)
            .unwrap();
        let mut f = fixture(fast_config());
        f.clip.add_bytes(names::JFIF, jpeg.clone());
        assert_eq!(f.pipeline.handle_change(Instant::now()), CaptureOutcome::Dispatched);
        match f.reader.recv_timeout(Duration::from_secs(1)) {
            Recv::Item(c) => {
                assert_eq!(c.kind(), ClipKind::Image);
                assert_eq!(c.image_bytes(), Some(jpeg.as_slice()));
                assert_eq!(c.image_size(), Some((4, 3)));
            }
            other => panic!("expected jfif candidate, got {other:?}"),
        }
    }

    #[test]
    fn test_closed_queue_drops_item() {
        let mut f = fixture(fast_config());
        f.pipeline.close();
        f.clip.set_text("late");
        assert_eq!(f.pipeline.handle_change(Instant::now()), CaptureOutcome::Dropped);
    }

    #[test]
    fn test_fingerprint_matches_candidate_hash_for_files() {
        let clip = MemoryClipboard::new();
        let paths = vec![PathBuf::from("C:\\x.txt")];
        clip.set_files(paths.clone());
        let session = clip.try_open().unwrap();
        let fp = fingerprint(session.as_ref(), &Sha256Hasher).unwrap();
        let c = ClipCandidate::from_files(paths, SourceInfo::default(), &Sha256Hasher);
        assert_eq!(fp, c.content_hash());
    }

    #[test]
    fn test_monitor_worker_dispatches_and_closes() {
        let clip = Arc::new(MemoryClipboard::new());
        let monitor = ClipboardMonitor::new(fast_config(), clip.clone(), MonitorHooks::default());
        let reader = monitor.reader();
        monitor.start_monitoring().unwrap();
        assert!(monitor.is_monitoring());
        clip.set_text("from worker");
        monitor.on_clipboard_changed();
        match reader.recv_timeout(Duration::from_secs(5)) {
            Recv::Item(c) => assert_eq!(c.text_content(), Some("from worker")),
            other => panic!("expected item, got {other:?}"),
        }
        monitor.close();
        assert!(!monitor.is_monitoring());
        assert_eq!(reader.recv(), None);
        assert!(monitor.start_monitoring().is_err());
    }

    #[test]
    fn test_stop_and_restart_keeps_queue_open() {
        let clip = Arc::new(MemoryClipboard::new());
        let monitor = ClipboardMonitor::new(fast_config(), clip.clone(), MonitorHooks::default());
        monitor.start_monitoring().unwrap();
        monitor.stop_monitoring();
        assert!(!monitor.reader().is_closed());
        monitor.start_monitoring().unwrap();
        assert!(monitor.is_monitoring());
    }
}
