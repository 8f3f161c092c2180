//! Replay into the target application.
//!
//! A paste runs: resolve target -> focus it and wait for the switch to
//! settle -> register a suppression token for the content -> write the
//! clipboard through the host's [`ClipboardWriter`] -> send the paste
//! chord.  Registering before the write keeps the monitor from capturing
//! its own echo.
//!
//! Replays are sequential; callers serialize concurrent requests.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, PasteShortcut, ReplayConfig};
use crate::content::ClipCandidate;
use crate::errors::{ClipReplayError, Result};
use crate::guard::SuppressionHandle;
use crate::input::{vk, Key, KeyboardSink, KeystrokeSimulator, ModifierMask};
use crate::macros::{self, CancelToken, MacroInterpreter, MacroReport};
use crate::target::{TargetDescriptor, TargetMode, TargetResolver, WindowSystem};

/// Host-owned primitive that puts a candidate on the OS clipboard.
pub trait ClipboardWriter: Send + Sync {
    fn write(&self, candidate: &ClipCandidate) -> Result<()>;
}

pub struct ReplayEngine {
    simulator: KeystrokeSimulator,
    interpreter: MacroInterpreter,
    resolver: TargetResolver,
    writer: Arc<dyn ClipboardWriter>,
    suppression: Option<SuppressionHandle>,
    config: ReplayConfig,
}

impl ReplayEngine {
    pub fn new(
        keyboard: Arc<dyn KeyboardSink>,
        windows: Arc<dyn WindowSystem>,
        writer: Arc<dyn ClipboardWriter>,
        config: &Config,
    ) -> Self {
        let simulator = KeystrokeSimulator::new(keyboard);
        Self {
            interpreter: MacroInterpreter::new(simulator.clone(), &config.replay),
            simulator,
            resolver: TargetResolver::new(windows, &config.target),
            writer,
            suppression: None,
            config: config.replay.clone(),
        }
    }

    /// Register clipboard writes with a monitor's suppression guard.
    pub fn with_suppression(mut self, handle: SuppressionHandle) -> Self {
        self.suppression = Some(handle);
        self
    }

    pub fn resolve_foreground_target(&mut self) -> Option<TargetDescriptor> {
        self.resolver.resolve_foreground_target()
    }

    pub fn set_target_lock(&mut self, locked: bool) -> Result<()> {
        self.resolver.set_target_lock(locked)
    }

    pub fn target_mode(&self) -> TargetMode {
        self.resolver.mode()
    }

    pub fn current_target(&self) -> Option<&TargetDescriptor> {
        self.resolver.current_target()
    }

    pub fn is_macro_safe(text: &str) -> bool {
        macros::is_macro_safe(text)
    }

    /// Paste `candidate` into the resolved target.
    pub fn paste(&mut self, candidate: &ClipCandidate) -> Result<TargetDescriptor> {
        let target = self.prepare_target()?;

        if let Some(guard) = &self.suppression {
            guard.register(candidate.content_hash());
        }
        self.writer.write(candidate)?;

        let (modifiers, key) = match self.config.paste_shortcut {
            PasteShortcut::CtrlV => (ModifierMask::CTRL, vk::V),
            PasteShortcut::ShiftInsert => (ModifierMask::SHIFT, vk::INSERT),
        };
        self.simulator.chord(modifiers, Key::Virtual(key));
        log::info!(
            "replay: pasted {:?} into {} ({})",
            candidate.kind(),
            target.process_name,
            target.window_title
        );
        Ok(target)
    }

    /// Run a macro in the resolved target; `false` if no target could be
    /// resolved or the run was cancelled.
    pub fn execute_macro(&mut self, text: &str) -> bool {
        match self.run_macro(text, &CancelToken::new()) {
            Ok(_) => true,
            Err(e) => {
                log::warn!("replay: macro not completed: {e}");
                false
            }
        }
    }

    pub fn run_macro(&mut self, text: &str, cancel: &CancelToken) -> Result<MacroReport> {
        self.prepare_target()?;
        self.interpreter.run(text, cancel)
    }

    fn prepare_target(&mut self) -> Result<TargetDescriptor> {
        let target = self
            .resolver
            .resolve_foreground_target()
            .ok_or_else(|| ClipReplayError::Target("no replay target".into()))?;
        self.resolver
            .activate(&target, Duration::from_millis(self.config.focus_settle_ms))?;
        Ok(target)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TargetConfig;
    use crate::content::{SourceInfo, Sha256Hasher, TextPayload};
    use crate::guard::SuppressionGuard;
    use crate::input::{KeyKind, RecordingKeyboard};
    use crate::target::WindowHandle;
    use parking_lot::Mutex;
    use std::time::Instant;

    struct OneWindow {
        target: TargetDescriptor,
        foreground: Mutex<Option<WindowHandle>>,
    }

    impl WindowSystem for OneWindow {
        fn foreground_window(&self) -> Option<WindowHandle> {
            *self.foreground.lock()
        }

        fn describe(&self, handle: WindowHandle) -> Option<TargetDescriptor> {
            (handle == self.target.window_handle).then(|| self.target.clone())
        }

        fn is_window(&self, handle: WindowHandle) -> bool {
            handle == self.target.window_handle
        }

        fn focus(&self, handle: WindowHandle) -> bool {
            *self.foreground.lock() = Some(handle);
            true
        }

        fn own_process_id(&self) -> u32 {
            1
        }
    }

    #[derive(Default)]
    struct Writes(Mutex<Vec<String>>);

    impl ClipboardWriter for Writes {
        fn write(&self, candidate: &ClipCandidate) -> Result<()> {
            self.0.lock().push(candidate.content_hash().to_owned());
            Ok(())
        }
    }

    fn editor(foreground: bool) -> Arc<OneWindow> {
        Arc::new(OneWindow {
            target: TargetDescriptor {
                process_name: "notepad.exe".into(),
                window_class: "Notepad".into(),
                window_title: "notes.txt".into(),
                window_handle: 42,
                process_id: 77,
            },
            foreground: Mutex::new(foreground.then_some(42)),
        })
    }

    fn config(shortcut: PasteShortcut) -> Config {
        Config {
            replay: ReplayConfig {
                paste_shortcut: shortcut,
                ..ReplayConfig::immediate()
            },
            ..Config::default()
        }
    }

    fn candidate(text: &str) -> ClipCandidate {
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
    fn test_paste_registers_then_writes_then_chords() {
        let keyboard = Arc::new(RecordingKeyboard::new());
        let writes = Arc::new(Writes::default());
        let guard = Arc::new(SuppressionGuard::new(Duration::from_millis(500)));
        let mut engine = ReplayEngine::new(
            keyboard.clone(),
            editor(true),
            writes.clone(),
            &config(PasteShortcut::CtrlV),
        )
        .with_suppression(guard.clone());

        let c = candidate("hello");
        let target = engine.paste(&c).unwrap();
        assert_eq!(target.window_handle, 42);
        assert_eq!(*writes.0.lock(), vec![c.content_hash().to_owned()]);
        assert!(guard.should_suppress_at(c.content_hash(), Instant::now()));

        let downs: Vec<Key> = keyboard
            .events()
            .iter()
            .filter(|e| e.kind == KeyKind::KeyDown)
            .map(|e| e.key)
            .collect();
        assert_eq!(downs, vec![Key::Virtual(vk::CONTROL), Key::Virtual(vk::V)]);
    }

    #[test]
    fn test_shift_insert_shortcut() {
        let keyboard = Arc::new(RecordingKeyboard::new());
        let mut engine = ReplayEngine::new(
            keyboard.clone(),
            editor(true),
            Arc::new(Writes::default()),
            &config(PasteShortcut::ShiftInsert),
        );
        engine.paste(&candidate("x")).unwrap();
        assert_eq!(keyboard.events()[1].key, Key::Virtual(vk::INSERT));
    }

    #[test]
    fn test_paste_without_target_writes_nothing() {
        let keyboard = Arc::new(RecordingKeyboard::new());
        let writes = Arc::new(Writes::default());
        let mut engine = ReplayEngine::new(
            keyboard.clone(),
            editor(false),
            writes.clone(),
            &config(PasteShortcut::CtrlV),
        );
        assert!(matches!(
            engine.paste(&candidate("x")),
            Err(ClipReplayError::Target(_))
        ));
        assert!(writes.0.lock().is_empty());
        assert!(keyboard.batches().is_empty());
    }

    #[test]
    fn test_locked_target_is_refocused() {
        let windows = editor(true);
        let keyboard = Arc::new(RecordingKeyboard::new());
        let mut engine = ReplayEngine::new(
            keyboard.clone(),
            windows.clone(),
            Arc::new(Writes::default()),
            &config(PasteShortcut::CtrlV),
        );
        engine.set_target_lock(true).unwrap();
        assert_eq!(engine.target_mode(), TargetMode::Locked);

        *windows.foreground.lock() = Some(9);
        assert!(engine.execute_macro("ok{ENTER}"));
        assert_eq!(*windows.foreground.lock(), Some(42));
        assert_eq!(keyboard.batches().len(), 3);
    }

    #[test]
    fn test_denied_target_blocks_macro() {
        let mut cfg = config(PasteShortcut::CtrlV);
        cfg.target = TargetConfig {
            deny_patterns: vec!["NOTEPAD:".into()],
            ..TargetConfig::default()
        };
        let keyboard = Arc::new(RecordingKeyboard::new());
        let mut engine = ReplayEngine::new(
            keyboard.clone(),
            editor(true),
            Arc::new(Writes::default()),
            &cfg,
        );
        assert!(!engine.execute_macro("abc"));
        assert!(keyboard.batches().is_empty());
    }

    #[test]
    fn test_macro_safety_is_advisory() {
        assert!(!ReplayEngine::is_macro_safe("@{F4}@{F4}@{F4}"));
        let keyboard = Arc::new(RecordingKeyboard::new());
        let mut engine = ReplayEngine::new(
            keyboard.clone(),
            editor(true),
            Arc::new(Writes::default()),
            &config(PasteShortcut::CtrlV),
        );
        assert!(engine.execute_macro("@{F4}@{F4}@{F4}"));
        assert_eq!(keyboard.batches().len(), 3);
    }
}
