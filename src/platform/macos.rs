// macOS and other BSD-style unixes.

use std::io;
use std::process::{Command, Stdio};

use crate::monitor::ChangeNotifier;
use crate::platform::parse_ifconfig;

pub fn adapter_state(name: &str) -> io::Result<Option<bool>> {
    let output = Command::new("ifconfig")
        .arg(name)
        .stdin(Stdio::null())
        .output()?;

    if !output.status.success() {
        // "interface <name> does not exist"
        return Ok(None);
    }
    Ok(parse_ifconfig(&String::from_utf8_lossy(&output.stdout)))
}

pub fn is_elevated() -> bool {
    unsafe { libc::geteuid() == 0 }
}

pub fn change_notifier() -> io::Result<Box<dyn ChangeNotifier>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "adapter change notifications are not implemented on this platform",
    ))
}
