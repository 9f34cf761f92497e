// src/platform/windows.rs

use std::ffi::c_void;
use std::io;
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::time::Duration;

use windows_sys::Win32::Foundation::{HANDLE, NO_ERROR};
use windows_sys::Win32::NetworkManagement::IpHelper::{
    CancelMibChangeNotify2, NotifyIpInterfaceChange, MIB_IPINTERFACE_ROW,
    MIB_NOTIFICATION_TYPE,
};
use windows_sys::Win32::Networking::WinSock::AF_UNSPEC;

use crate::monitor::ChangeNotifier;
use crate::platform::parse_netsh_connect_state;

/// Queries `netsh interface show interface`. netsh exits non-zero when the
/// adapter is not registered, which maps to `None`.
pub fn adapter_state(name: &str) -> io::Result<Option<bool>> {
    let output = Command::new("netsh")
        .args(["interface", "show", "interface", &format!("name={}", name)])
        .stdin(Stdio::null())
        .output()?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    match parse_netsh_connect_state(&stdout) {
        Some(up) => Ok(Some(up)),
        None if !output.status.success() => Ok(None),
        None => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unexpected netsh output for adapter {:?}", name),
        )),
    }
}

/// `net session` only succeeds from an elevated token.
pub fn is_elevated() -> bool {
    Command::new("net")
        .arg("session")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

pub fn change_notifier() -> io::Result<Box<dyn ChangeNotifier>> {
    Ok(Box::new(InterfaceNotifier::open()?))
}

/// IP Helper subscription to interface changes (IPv4 and IPv6). The callback
/// runs on a system thread and only nudges a one-slot channel.
struct InterfaceNotifier {
    handle: HANDLE,
    // Boxed so the address handed to the callback stays put.
    _sender: Box<SyncSender<()>>,
    changes: Receiver<()>,
}

impl InterfaceNotifier {
    fn open() -> io::Result<Self> {
        let (tx, rx) = mpsc::sync_channel(1);
        let sender = Box::new(tx);
        let mut handle: HANDLE = 0;

        let rc = unsafe {
            NotifyIpInterfaceChange(
                AF_UNSPEC,
                Some(on_interface_change),
                &*sender as *const SyncSender<()> as *const c_void,
                0,
                &mut handle,
            )
        };
        if rc != NO_ERROR {
            return Err(io::Error::from_raw_os_error(rc as i32));
        }

        Ok(Self {
            handle,
            _sender: sender,
            changes: rx,
        })
    }
}

unsafe extern "system" fn on_interface_change(
    context: *const c_void,
    _row: *const MIB_IPINTERFACE_ROW,
    _kind: MIB_NOTIFICATION_TYPE,
) {
    if let Some(sender) = (context as *const SyncSender<()>).as_ref() {
        // A full slot already means "changed"; bursts coalesce.
        let _ = sender.try_send(());
    }
}

impl ChangeNotifier for InterfaceNotifier {
    fn wait_for_change(&mut self, timeout: Duration) -> io::Result<bool> {
        match self.changes.recv_timeout(timeout) {
            Ok(()) => Ok(true),
            Err(RecvTimeoutError::Timeout) => Ok(false),
            Err(RecvTimeoutError::Disconnected) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "interface change subscription closed",
            )),
        }
    }
}

impl Drop for InterfaceNotifier {
    fn drop(&mut self) {
        // Waits for in-flight callbacks, so `_sender` outlives every use.
        unsafe {
            CancelMibChangeNotify2(self.handle);
        }
    }
}
