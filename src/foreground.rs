//! Foreground window tracking.
//!
//! A WinEvent hook on its own thread refreshes the shared context on every
//! foreground change and forwards changes to the control loop.

use std::sync::Arc;
use std::sync::mpsc::sync_channel;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tracing::{debug, trace};
use windows::Win32::Foundation::{CloseHandle, HWND, LPARAM, MAX_PATH, WPARAM};
use windows::Win32::System::Threading::{
    GetCurrentThreadId, OpenProcess, PROCESS_NAME_WIN32, PROCESS_QUERY_LIMITED_INFORMATION,
    QueryFullProcessImageNameW,
};
use windows::Win32::UI::Accessibility::{HWINEVENTHOOK, SetWinEventHook, UnhookWinEvent};
use windows::Win32::UI::WindowsAndMessaging::*;
use windows::core::PWSTR;

use crate::context::{AppContext, ContextTracker};
use crate::service::ServiceInput;

struct WatchTarget {
    tracker: Arc<ContextTracker>,
    sink: Sender<ServiceInput>,
}

static WATCH_TARGET: Mutex<Option<WatchTarget>> = Mutex::new(None);

pub struct ForegroundWatcher {
    thread_id: u32,
    thread: Option<JoinHandle<()>>,
}

impl ForegroundWatcher {
    pub fn start(tracker: Arc<ContextTracker>, sink: Sender<ServiceInput>) -> anyhow::Result<Self> {
        {
            let mut target = WATCH_TARGET.lock();
            if target.is_some() {
                anyhow::bail!("Foreground watcher is already running");
            }
            *target = Some(WatchTarget { tracker, sink });
        }
        refresh();

        let (ready_tx, ready_rx) = sync_channel::<anyhow::Result<u32>>(1);
        let thread = thread::Builder::new()
            .name("foreground_watch".to_string())
            .spawn(move || unsafe {
                let mut msg = MSG::default();
                let _ = PeekMessageW(&mut msg, None, WM_USER, WM_USER, PM_NOREMOVE);

                let hook = SetWinEventHook(
                    EVENT_SYSTEM_FOREGROUND,
                    EVENT_SYSTEM_FOREGROUND,
                    None,
                    Some(win_event_proc),
                    0,
                    0,
                    WINEVENT_OUTOFCONTEXT,
                );
                if hook.0.is_null() {
                    let _ = ready_tx.send(Err(anyhow::anyhow!(
                        "Failed to install foreground event hook"
                    )));
                    return;
                }
                let _ = ready_tx.send(Ok(GetCurrentThreadId()));

                loop {
                    let result = GetMessageW(&mut msg, None, 0, 0);
                    if result.0 == 0 || result.0 == -1 {
                        break;
                    }
                    let _ = TranslateMessage(&msg);
                    DispatchMessageW(&msg);
                }
                let _ = UnhookWinEvent(hook);
            });
        let thread = match thread {
            Ok(thread) => thread,
            Err(e) => {
                WATCH_TARGET.lock().take();
                return Err(e.into());
            }
        };

        match ready_rx.recv() {
            Ok(Ok(thread_id)) => {
                debug!("Foreground watcher started");
                Ok(Self {
                    thread_id,
                    thread: Some(thread),
                })
            }
            Ok(Err(e)) => {
                WATCH_TARGET.lock().take();
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                WATCH_TARGET.lock().take();
                let _ = thread.join();
                anyhow::bail!("Foreground watcher exited before installing its hook")
            }
        }
    }
}

impl Drop for ForegroundWatcher {
    fn drop(&mut self) {
        WATCH_TARGET.lock().take();
        unsafe {
            let _ = PostThreadMessageW(self.thread_id, WM_QUIT, WPARAM(0), LPARAM(0));
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

unsafe extern "system" fn win_event_proc(
    _hook: HWINEVENTHOOK,
    _event: u32,
    _hwnd: HWND,
    _id_object: i32,
    _id_child: i32,
    _event_thread: u32,
    _event_time: u32,
) {
    refresh();
}

fn refresh() {
    let Some(context) = foreground_context() else {
        return;
    };
    let target = WATCH_TARGET.lock();
    let Some(target) = target.as_ref() else {
        return;
    };
    if target.tracker.update(context.clone()) {
        trace!(process = %context.process_name, title = %context.window_title, "Foreground changed");
        let _ = target.sink.send(ServiceInput::Focus(context));
    }
}

/// Process image name (case preserved) and title of the foreground window.
pub fn foreground_context() -> Option<AppContext> {
    unsafe {
        let hwnd = GetForegroundWindow();
        if hwnd.0.is_null() {
            return None;
        }

        let mut title_buffer = [0u16; 512];
        let title_len = GetWindowTextW(hwnd, &mut title_buffer).max(0) as usize;
        let window_title = String::from_utf16_lossy(&title_buffer[..title_len]);

        let mut process_id: u32 = 0;
        GetWindowThreadProcessId(hwnd, Some(&mut process_id as *mut u32));
        if process_id == 0 {
            return None;
        }

        let process_handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, process_id).ok()?;

        let mut buffer = [0u16; MAX_PATH as usize];
        let mut size = buffer.len() as u32;
        let queried = QueryFullProcessImageNameW(
            process_handle,
            PROCESS_NAME_WIN32,
            PWSTR(buffer.as_mut_ptr()),
            &mut size,
        );
        let _ = CloseHandle(process_handle);
        queried.ok()?;

        let path = String::from_utf16_lossy(&buffer[..size as usize]);
        let process_name = path.split('\\').next_back().unwrap_or_default().to_string();
        Some(AppContext::new(process_name, window_title))
    }
}
