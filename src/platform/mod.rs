// src/platform/mod.rs
//
// Per-OS adapter status lookup, change notification and privilege check. The
// output parsers live here so they are tested on every host.

#[cfg(target_os = "linux")]
mod linux;

#[cfg(all(unix, not(target_os = "linux")))]
mod macos;

#[cfg(windows)]
mod windows;

#[cfg(target_os = "linux")]
pub use linux::{adapter_state, change_notifier, is_elevated};

#[cfg(all(unix, not(target_os = "linux")))]
pub use macos::{adapter_state, change_notifier, is_elevated};

#[cfg(windows)]
pub use windows::{adapter_state, change_notifier, is_elevated};

/// `IFF_UP | IFF_RUNNING`
const IFF_UP_RUNNING: u32 = 0x1 | 0x40;

/// Link state from sysfs `operstate` and, for tun-style devices that report
/// `unknown`, the hex `flags` file.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
pub(crate) fn parse_sysfs_state(operstate: &str, flags: Option<&str>) -> bool {
    match operstate.trim() {
        "up" => true,
        "unknown" => flags
            .and_then(|f| u32::from_str_radix(f.trim().trim_start_matches("0x"), 16).ok())
            .map(|f| f & IFF_UP_RUNNING == IFF_UP_RUNNING)
            .unwrap_or(false),
        _ => false,
    }
}

/// `Connect state:` from `netsh interface show interface name=...`.
#[cfg_attr(not(windows), allow(dead_code))]
pub(crate) fn parse_netsh_connect_state(stdout: &str) -> Option<bool> {
    stdout.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        if key.trim().eq_ignore_ascii_case("connect state") {
            Some(value.trim().eq_ignore_ascii_case("connected"))
        } else {
            None
        }
    })
}

/// `ifconfig <name>` output: up when flags carry UP and RUNNING and any
/// `status:` line says active.
#[cfg_attr(any(target_os = "linux", windows), allow(dead_code))]
pub(crate) fn parse_ifconfig(stdout: &str) -> Option<bool> {
    let flags_line = stdout.lines().next()?;
    let flags = flags_line
        .split_once('<')
        .and_then(|(_, rest)| rest.split_once('>'))
        .map(|(flags, _)| flags)?;
    let has = |flag: &str| flags.split(',').any(|f| f == flag);
    let mut up = has("UP") && has("RUNNING");

    for line in stdout.lines() {
        if let Some(status) = line.trim().strip_prefix("status:") {
            up &= status.trim() == "active";
        }
    }
    Some(up)
}
