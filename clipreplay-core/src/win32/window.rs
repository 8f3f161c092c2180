//! Foreground window queries and activation.

use std::sync::OnceLock;

use parking_lot::Mutex;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use windows::Win32::Foundation::HWND;
use windows::Win32::UI::WindowsAndMessaging::{
    GetClassNameW, GetForegroundWindow, GetWindowTextLengthW, GetWindowTextW,
    GetWindowThreadProcessId, IsIconic, IsWindow, SetForegroundWindow, ShowWindow, SW_RESTORE,
};

use crate::target::{TargetDescriptor, WindowHandle, WindowSystem};

use super::wide_to_string;

static SYSTEM: OnceLock<Mutex<System>> = OnceLock::new();

fn process_name(pid: u32) -> Option<String> {
    let mut sys = SYSTEM.get_or_init(|| Mutex::new(System::new())).lock();
    let pid = Pid::from_u32(pid);
    sys.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        true,
        ProcessRefreshKind::nothing(),
    );
    sys.process(pid)
        .map(|p| p.name().to_string_lossy().into_owned())
}

fn hwnd_of(handle: WindowHandle) -> HWND {
    HWND(handle as *mut core::ffi::c_void)
}

fn read_window_title(hwnd: HWND) -> String {
    let len = unsafe { GetWindowTextLengthW(hwnd) };
    if len <= 0 {
        return String::new();
    }
    let mut buf = vec![0u16; (len + 1) as usize];
    let copied = unsafe { GetWindowTextW(hwnd, &mut buf) };
    if copied <= 0 {
        return String::new();
    }
    wide_to_string(&buf[..copied as usize])
}

fn read_class_name(hwnd: HWND) -> String {
    let mut buf = [0u16; 256];
    let len = unsafe { GetClassNameW(hwnd, &mut buf) };
    if len <= 0 {
        return String::new();
    }
    wide_to_string(&buf[..len as usize])
}

fn read_pid(hwnd: HWND) -> u32 {
    let mut pid: u32 = 0;
    unsafe { GetWindowThreadProcessId(hwnd, Some(&mut pid)) };
    pid
}

/// The desktop window manager.
#[derive(Debug, Default, Clone, Copy)]
pub struct Win32Windows;

impl WindowSystem for Win32Windows {
    fn foreground_window(&self) -> Option<WindowHandle> {
        let hwnd = unsafe { GetForegroundWindow() };
        (!hwnd.0.is_null()).then(|| hwnd.0 as WindowHandle)
    }

    fn describe(&self, handle: WindowHandle) -> Option<TargetDescriptor> {
        let hwnd = hwnd_of(handle);
        if !self.is_window(handle) {
            return None;
        }
        let process_id = read_pid(hwnd);
        Some(TargetDescriptor {
            process_name: process_name(process_id).unwrap_or_default(),
            window_class: read_class_name(hwnd),
            window_title: read_window_title(hwnd),
            window_handle: handle,
            process_id,
        })
    }

    fn is_window(&self, handle: WindowHandle) -> bool {
        unsafe { IsWindow(hwnd_of(handle)) }.as_bool()
    }

    fn focus(&self, handle: WindowHandle) -> bool {
        let hwnd = hwnd_of(handle);
        unsafe {
            if IsIconic(hwnd).as_bool() {
                let _ = ShowWindow(hwnd, SW_RESTORE);
            }
            SetForegroundWindow(hwnd).as_bool()
        }
    }
}
