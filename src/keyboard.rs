//! Low-level keyboard hook used while learn mode waits for an action key.
//!
//! The hook lives on its own thread with its own message loop and is
//! removed as soon as the capture ends. Captured keys are swallowed so the
//! key that completes a mapping never reaches the focused application.

use std::sync::mpsc::sync_channel;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tracing::{debug, warn};
use windows::Win32::Foundation::{LPARAM, LRESULT, WPARAM};
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::UI::Input::KeyboardAndMouse::GetAsyncKeyState;
use windows::Win32::UI::WindowsAndMessaging::*;

use crate::keys::{Modifiers, SIMULATED_EVENT_MARKER, VK_CONTROL, VK_MENU, VK_SHIFT, is_modifier_vk};
use crate::service::ServiceInput;

static CAPTURE_SINK: Mutex<Option<Sender<ServiceInput>>> = Mutex::new(None);

pub struct KeyCaptureHook {
    thread_id: u32,
    thread: Option<JoinHandle<()>>,
}

impl KeyCaptureHook {
    /// Installs the hook. Only one capture can be active at a time.
    pub fn start(sink: Sender<ServiceInput>) -> anyhow::Result<Self> {
        {
            let mut slot = CAPTURE_SINK.lock();
            if slot.is_some() {
                anyhow::bail!("Keyboard capture is already active");
            }
            *slot = Some(sink);
        }

        let (ready_tx, ready_rx) = sync_channel::<anyhow::Result<u32>>(1);
        let spawned = thread::Builder::new()
            .name("key_capture".to_string())
            .spawn(move || Self::hook_thread(ready_tx));
        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                CAPTURE_SINK.lock().take();
                return Err(e.into());
            }
        };

        match ready_rx.recv() {
            Ok(Ok(thread_id)) => {
                debug!("Keyboard capture hook installed");
                Ok(Self {
                    thread_id,
                    thread: Some(thread),
                })
            }
            Ok(Err(e)) => {
                CAPTURE_SINK.lock().take();
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                CAPTURE_SINK.lock().take();
                let _ = thread.join();
                anyhow::bail!("Keyboard capture thread exited before installing the hook")
            }
        }
    }

    fn hook_thread(ready: std::sync::mpsc::SyncSender<anyhow::Result<u32>>) {
        unsafe {
            // Force create message queue
            let mut msg = MSG::default();
            let _ = PeekMessageW(&mut msg, None, WM_USER, WM_USER, PM_NOREMOVE);

            let hook = match SetWindowsHookExW(WH_KEYBOARD_LL, Some(Self::keyboard_proc), None, 0)
            {
                Ok(hook) if !hook.0.is_null() => hook,
                Ok(_) => {
                    let _ = ready.send(Err(anyhow::anyhow!("Failed to set keyboard hook.")));
                    return;
                }
                Err(e) => {
                    let _ = ready.send(Err(e.into()));
                    return;
                }
            };
            let _ = ready.send(Ok(GetCurrentThreadId()));

            loop {
                let result = GetMessageW(&mut msg, None, 0, 0);
                if result.0 == 0 || result.0 == -1 {
                    break;
                }
                let _ = TranslateMessage(&msg);
                DispatchMessageW(&msg);
            }

            let _ = UnhookWindowsHookEx(hook);
        }
    }

    unsafe extern "system" fn keyboard_proc(
        code: i32,
        w_param: WPARAM,
        l_param: LPARAM,
    ) -> LRESULT {
        if code < 0 {
            return unsafe { CallNextHookEx(None, code, w_param, l_param) };
        }

        let kb_struct = unsafe { &*(l_param.0 as *const KBDLLHOOKSTRUCT) };

        // Skip simulated key events
        if kb_struct.dwExtraInfo == SIMULATED_EVENT_MARKER {
            return unsafe { CallNextHookEx(None, code, w_param, l_param) };
        }

        let message = w_param.0 as u32;
        let vk = kb_struct.vkCode as u16;
        if (message == WM_KEYDOWN || message == WM_SYSKEYDOWN) && !is_modifier_vk(vk) {
            let modifiers = held_modifiers();
            if let Some(sink) = CAPTURE_SINK.lock().as_ref() {
                if sink.send(ServiceInput::Key { vk, modifiers }).is_err() {
                    warn!("Control loop gone, dropping captured key");
                }
                return LRESULT(1);
            }
        }

        unsafe { CallNextHookEx(None, code, w_param, l_param) }
    }
}

fn held_modifiers() -> Modifiers {
    let down = |vk: u16| unsafe { GetAsyncKeyState(vk as i32) as u16 & 0x8000 != 0 };
    let mut modifiers = Modifiers::NONE;
    if down(VK_CONTROL) {
        modifiers |= Modifiers::CTRL;
    }
    if down(VK_SHIFT) {
        modifiers |= Modifiers::SHIFT;
    }
    if down(VK_MENU) {
        modifiers |= Modifiers::ALT;
    }
    modifiers
}

impl Drop for KeyCaptureHook {
    fn drop(&mut self) {
        CAPTURE_SINK.lock().take();
        unsafe {
            let _ = PostThreadMessageW(self.thread_id, WM_QUIT, WPARAM(0), LPARAM(0));
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        debug!("Keyboard capture hook removed");
    }
}
