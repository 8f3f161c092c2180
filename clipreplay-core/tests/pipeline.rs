//! End-to-end capture and replay over the in-memory clipboard.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use clipreplay_core::config::Config;
use clipreplay_core::content::{ClipCandidate, ClipKind, Sha256Hasher, SourceInfo, TextPayload};
use clipreplay_core::input::{vk, Key, KeyKind, RecordingKeyboard};
use clipreplay_core::memory::MemoryClipboard;
use clipreplay_core::monitor::{CaptureObserver, CaptureOutcome, ClipboardMonitor, MonitorHooks};
use clipreplay_core::queue::Recv;
use clipreplay_core::replay::ReplayEngine;
use clipreplay_core::target::{TargetDescriptor, WindowHandle, WindowSystem};

const EDITOR: WindowHandle = 42;

struct Editor;

impl WindowSystem for Editor {
    fn foreground_window(&self) -> Option<WindowHandle> {
        Some(EDITOR)
    }

    fn describe(&self, handle: WindowHandle) -> Option<TargetDescriptor> {
        (handle == EDITOR).then(|| TargetDescriptor {
            process_name: "notepad.exe".into(),
            window_class: "Notepad".into(),
            window_title: "notes.txt - Notepad".into(),
            window_handle: EDITOR,
            process_id: 4242,
        })
    }

    fn is_window(&self, handle: WindowHandle) -> bool {
        handle == EDITOR
    }

    fn focus(&self, _handle: WindowHandle) -> bool {
        true
    }

    fn own_process_id(&self) -> u32 {
        1
    }
}

#[derive(Default)]
struct Outcomes(Mutex<Vec<CaptureOutcome>>);

impl CaptureObserver for Outcomes {
    fn on_capture(&self, outcome: CaptureOutcome) {
        self.0.lock().push(outcome);
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.capture.suppression_ms = 60_000;
    config.replay.focus_settle_ms = 0;
    config.replay.inter_token_delay_ms = 0;
    config
}

fn text_candidate(text: &str) -> ClipCandidate {
    ClipCandidate::from_text(
        TextPayload {
            text: text.into(),
            ..TextPayload::default()
        },
        SourceInfo::default(),
        &Sha256Hasher,
        100,
    )
}

#[test]
fn test_capture_then_replay_echo_is_suppressed() {
    let config = test_config();
    let clipboard = Arc::new(MemoryClipboard::new());
    let outcomes = Arc::new(Outcomes::default());
    let hooks = MonitorHooks {
        observer: Arc::clone(&outcomes) as _,
        windows: Some(Arc::new(Editor)),
        ..MonitorHooks::default()
    };
    let monitor = ClipboardMonitor::new(config.capture.clone(), Arc::clone(&clipboard) as _, hooks);
    let reader = monitor.reader();
    monitor.start_monitoring().unwrap();

    let t0 = Instant::now();
    clipboard.set_text("first copy");
    monitor.notify_at(t0);
    let first = match reader.recv_timeout(Duration::from_secs(5)) {
        Recv::Item(c) => c,
        other => panic!("expected a dispatched item, got {other:?}"),
    };
    assert_eq!(first.text_content(), Some("first copy"));
    assert_eq!(first.source().process_name.as_deref(), Some("notepad.exe"));

    let keyboard = Arc::new(RecordingKeyboard::new());
    let mut engine = ReplayEngine::new(
        Arc::clone(&keyboard) as _,
        Arc::new(Editor),
        Arc::clone(&clipboard) as _,
        &config,
    )
    .with_suppression(monitor.suppression());

    let target = engine.paste(&text_candidate("replayed text")).unwrap();
    assert_eq!(target.window_handle, EDITOR);
    let pasted: Vec<Key> = keyboard
        .events()
        .iter()
        .filter(|e| e.kind == KeyKind::KeyDown)
        .map(|e| e.key)
        .collect();
    assert_eq!(pasted, vec![Key::Virtual(vk::CONTROL), Key::Virtual(vk::V)]);

    // The replay's own write comes back as a notification.
    monitor.notify_at(t0 + Duration::from_secs(1));

    clipboard.set_text("user copy");
    monitor.notify_at(t0 + Duration::from_secs(2));

    monitor.close();
    let mut rest: Vec<ClipCandidate> = Vec::new();
    assert_eq!(reader.pump(&mut rest), 1);
    assert_eq!(rest[0].text_content(), Some("user copy"));
    assert_eq!(rest[0].kind(), ClipKind::Text);

    assert_eq!(
        *outcomes.0.lock(),
        vec![
            CaptureOutcome::Dispatched,
            CaptureOutcome::Suppressed,
            CaptureOutcome::Dispatched,
        ]
    );
}

#[test]
fn test_macro_replay_into_resolved_target() {
    let config = test_config();
    let keyboard = Arc::new(RecordingKeyboard::new());
    let mut engine = ReplayEngine::new(
        Arc::clone(&keyboard) as _,
        Arc::new(Editor),
        Arc::new(MemoryClipboard::new()),
        &config,
    );

    assert!(engine.execute_macro("hi{ENTER}"));
    assert_eq!(engine.current_target().map(|t| t.window_handle), Some(EDITOR));

    let downs: Vec<Key> = keyboard
        .events()
        .iter()
        .filter(|e| e.kind == KeyKind::KeyDown)
        .map(|e| e.key)
        .collect();
    assert_eq!(downs.last(), Some(&Key::Virtual(vk::RETURN)));
    assert_eq!(downs.len(), 3);
}

#[test]
fn test_repeated_copy_is_not_dispatched_twice() {
    let mut config = test_config();
    config.capture.debounce_ms = 0;
    let clipboard = Arc::new(MemoryClipboard::new());
    let monitor = ClipboardMonitor::new(
        config.capture,
        Arc::clone(&clipboard) as _,
        MonitorHooks::default(),
    );
    let reader = monitor.reader();
    monitor.start_monitoring().unwrap();

    let t0 = Instant::now();
    clipboard.set_text("same");
    monitor.notify_at(t0);
    monitor.notify_at(t0 + Duration::from_millis(50));
    clipboard.set_text("other");
    monitor.notify_at(t0 + Duration::from_millis(100));
    monitor.close();

    let texts: Vec<String> = reader
        .map(|c| c.text_content().unwrap_or_default().to_owned())
        .collect();
    assert_eq!(texts, vec!["same", "other"]);
}
