use crossbeam_channel::Sender;
use parking_lot::Mutex;
use windows::Win32::System::Console::*;
use windows::core::*;

use crate::service::{Command, ServiceInput};

static SHUTDOWN_SINK: Mutex<Option<Sender<ServiceInput>>> = Mutex::new(None);

/// Routes Ctrl+C, Ctrl+Break and console close into a `Shutdown` command.
pub fn set_control_ctrl_handler(sink: Sender<ServiceInput>) -> Result<()> {
    *SHUTDOWN_SINK.lock() = Some(sink);
    unsafe { SetConsoleCtrlHandler(Some(console_handler), true) }
}

#[allow(non_snake_case)]
unsafe extern "system" fn console_handler(ctrl_type: u32) -> BOOL {
    match ctrl_type {
        CTRL_C_EVENT | CTRL_BREAK_EVENT | CTRL_CLOSE_EVENT => {
            let delivered = SHUTDOWN_SINK
                .lock()
                .as_ref()
                .is_some_and(|sink| sink.send(ServiceInput::Command(Command::Shutdown)).is_ok());
            if !delivered {
                std::process::exit(0); // force shutdown
            }
            BOOL(1) // Event has been handled
        }
        _ => BOOL(0), // Leave other events to the default handler
    }
}
