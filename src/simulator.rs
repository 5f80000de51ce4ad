//! Synthetic keyboard and mouse output.
//!
//! The engine talks to an `InputSimulator`, which turns actions into ordered
//! batches of `SyntheticInput` and hands them to an `InputSink`. On Windows
//! the sink is `SendInput`; elsewhere output is only logged.

use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::debug;

use crate::keys::KeyCombo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntheticInput {
    Key { vk: u16, down: bool },
    MouseMove { dx: i32, dy: i32 },
    Scroll(i32),
    /// A literal character, injected as Unicode down/up.
    Text(char),
}

/// Output surface for synthetic events.
pub trait InputSink: Send + Sync {
    /// Injects the batch in order. Returns `false` if the platform refused
    /// any of it. Callers never retry.
    fn send(&self, batch: &[SyntheticInput]) -> bool;
}

/// Fire-and-forget wrapper that builds correctly ordered batches.
#[derive(Clone)]
pub struct InputSimulator {
    sink: Arc<dyn InputSink>,
}

impl InputSimulator {
    pub fn new(sink: Arc<dyn InputSink>) -> Self {
        Self { sink }
    }

    /// Simulator backed by the platform's native sink.
    pub fn platform() -> Self {
        #[cfg(windows)]
        let sink: Arc<dyn InputSink> = Arc::new(windows_sink::SendInputSink);
        #[cfg(not(windows))]
        let sink: Arc<dyn InputSink> = Arc::new(LogSink);
        Self::new(sink)
    }

    /// Modifiers down, then the key down.
    pub fn press(&self, combo: KeyCombo) -> bool {
        if combo.is_empty() {
            return true;
        }
        let batch: SmallVec<[SyntheticInput; 4]> = combo
            .press_sequence()
            .into_iter()
            .map(|vk| SyntheticInput::Key { vk, down: true })
            .collect();
        self.sink.send(&batch)
    }

    /// Key up, then modifiers up in reverse order.
    pub fn release(&self, combo: KeyCombo) -> bool {
        if combo.is_empty() {
            return true;
        }
        let batch: SmallVec<[SyntheticInput; 4]> = combo
            .release_sequence()
            .into_iter()
            .map(|vk| SyntheticInput::Key { vk, down: false })
            .collect();
        self.sink.send(&batch)
    }

    /// Full press and release in one batch.
    pub fn tap(&self, combo: KeyCombo) -> bool {
        if combo.is_empty() {
            return true;
        }
        let mut batch: SmallVec<[SyntheticInput; 8]> = SmallVec::new();
        batch.extend(
            combo
                .press_sequence()
                .into_iter()
                .map(|vk| SyntheticInput::Key { vk, down: true }),
        );
        batch.extend(
            combo
                .release_sequence()
                .into_iter()
                .map(|vk| SyntheticInput::Key { vk, down: false }),
        );
        self.sink.send(&batch)
    }

    pub fn move_mouse(&self, dx: i32, dy: i32) -> bool {
        if dx == 0 && dy == 0 {
            return true;
        }
        self.sink.send(&[SyntheticInput::MouseMove { dx, dy }])
    }

    pub fn scroll(&self, delta: i32) -> bool {
        if delta == 0 {
            return true;
        }
        self.sink.send(&[SyntheticInput::Scroll(delta)])
    }

    pub fn type_text(&self, text: &str) -> bool {
        if text.is_empty() {
            return true;
        }
        let batch: Vec<SyntheticInput> = text.chars().map(SyntheticInput::Text).collect();
        self.sink.send(&batch)
    }
}

/// Sink that only logs what would have been injected.
#[derive(Debug, Default)]
pub struct LogSink;

impl InputSink for LogSink {
    fn send(&self, batch: &[SyntheticInput]) -> bool {
        debug!(?batch, "Synthetic input");
        true
    }
}

/// Sink that records every event, for tests and dry runs.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SyntheticInput>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drains the recorded events.
    pub fn take(&self) -> Vec<SyntheticInput> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl InputSink for RecordingSink {
    fn send(&self, batch: &[SyntheticInput]) -> bool {
        self.events.lock().extend_from_slice(batch);
        true
    }
}

#[cfg(windows)]
mod windows_sink {
    use smallvec::SmallVec;
    use windows::Win32::UI::Input::KeyboardAndMouse::*;

    use super::{InputSink, SyntheticInput};
    use crate::keys::{SIMULATED_EVENT_MARKER, is_extended_vk, vk_to_scancode};

    pub struct SendInputSink;

    #[inline]
    fn keyboard(vk: u16, scan: u16, flags: KEYBD_EVENT_FLAGS) -> INPUT {
        INPUT {
            r#type: INPUT_KEYBOARD,
            Anonymous: INPUT_0 {
                ki: KEYBDINPUT {
                    wVk: VIRTUAL_KEY(vk),
                    wScan: scan,
                    dwFlags: flags,
                    time: 0,
                    dwExtraInfo: SIMULATED_EVENT_MARKER,
                },
            },
        }
    }

    #[inline]
    fn mouse(dx: i32, dy: i32, data: u32, flags: MOUSE_EVENT_FLAGS) -> INPUT {
        INPUT {
            r#type: INPUT_MOUSE,
            Anonymous: INPUT_0 {
                mi: MOUSEINPUT {
                    dx,
                    dy,
                    mouseData: data,
                    dwFlags: flags,
                    time: 0,
                    dwExtraInfo: SIMULATED_EVENT_MARKER,
                },
            },
        }
    }

    fn push_input(inputs: &mut SmallVec<[INPUT; 8]>, input: &SyntheticInput) {
        match *input {
            SyntheticInput::Key { vk, down } => {
                let scancode = vk_to_scancode(vk);
                let mut flags = if is_extended_vk(vk) {
                    KEYEVENTF_EXTENDEDKEY
                } else {
                    KEYBD_EVENT_FLAGS(0)
                };
                if !down {
                    flags |= KEYEVENTF_KEYUP;
                }
                // Keys without a known scancode go by virtual key.
                if scancode == 0 {
                    inputs.push(keyboard(vk, 0, flags));
                } else {
                    inputs.push(keyboard(0, scancode, flags | KEYEVENTF_SCANCODE));
                }
            }
            SyntheticInput::MouseMove { dx, dy } => {
                inputs.push(mouse(dx, dy, 0, MOUSEEVENTF_MOVE));
            }
            SyntheticInput::Scroll(delta) => {
                inputs.push(mouse(0, 0, delta as u32, MOUSEEVENTF_WHEEL));
            }
            SyntheticInput::Text(c) => {
                let mut units = [0u16; 2];
                for &unit in c.encode_utf16(&mut units).iter() {
                    inputs.push(keyboard(0, unit, KEYEVENTF_UNICODE));
                    inputs.push(keyboard(0, unit, KEYEVENTF_UNICODE | KEYEVENTF_KEYUP));
                }
            }
        }
    }

    impl InputSink for SendInputSink {
        fn send(&self, batch: &[SyntheticInput]) -> bool {
            let mut inputs: SmallVec<[INPUT; 8]> = SmallVec::with_capacity(batch.len());
            for input in batch {
                push_input(&mut inputs, input);
            }
            if inputs.is_empty() {
                return true;
            }
            let sent = unsafe { SendInput(&inputs, std::mem::size_of::<INPUT>() as i32) };
            sent as usize == inputs.len()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{Modifiers, VK_CONTROL, VK_SHIFT};

    fn simulator() -> (InputSimulator, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        (InputSimulator::new(sink.clone()), sink)
    }

    #[test]
    fn test_press_and_release_order() {
        let (sim, sink) = simulator();
        let combo = KeyCombo::new(0x41, Modifiers::CTRL | Modifiers::SHIFT);
        sim.press(combo);
        sim.release(combo);

        assert_eq!(
            sink.take(),
            vec![
                SyntheticInput::Key { vk: VK_CONTROL, down: true },
                SyntheticInput::Key { vk: VK_SHIFT, down: true },
                SyntheticInput::Key { vk: 0x41, down: true },
                SyntheticInput::Key { vk: 0x41, down: false },
                SyntheticInput::Key { vk: VK_SHIFT, down: false },
                SyntheticInput::Key { vk: VK_CONTROL, down: false },
            ]
        );
    }

    #[test]
    fn test_tap_matches_press_then_release() {
        let (sim, sink) = simulator();
        let combo = KeyCombo::new(0x42, Modifiers::ALT);
        sim.tap(combo);
        let tapped = sink.take();

        sim.press(combo);
        sim.release(combo);
        assert_eq!(tapped, sink.take());
    }

    #[test]
    fn test_empty_actions_emit_nothing() {
        let (sim, sink) = simulator();
        sim.press(KeyCombo::default());
        sim.move_mouse(0, 0);
        sim.scroll(0);
        sim.type_text("");
        assert!(sink.is_empty());
    }

    #[test]
    fn test_type_text_emits_characters() {
        let (sim, sink) = simulator();
        sim.type_text("hé!");
        assert_eq!(
            sink.take(),
            vec![
                SyntheticInput::Text('h'),
                SyntheticInput::Text('é'),
                SyntheticInput::Text('!'),
            ]
        );
    }
}
