use std::fs;
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::path::Path;
use std::time::Duration;

use libc::{
    c_int, c_void, pollfd, sockaddr, sockaddr_nl, socklen_t, AF_NETLINK, NETLINK_ROUTE, POLLIN,
    SOCK_CLOEXEC, SOCK_RAW,
};

use crate::monitor::ChangeNotifier;
use crate::platform::parse_sysfs_state;

pub fn adapter_state(name: &str) -> io::Result<Option<bool>> {
    if name.is_empty() || name.contains('/') || name == "." || name == ".." {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid adapter name {:?}", name),
        ));
    }

    let base = Path::new("/sys/class/net").join(name);
    let operstate = match fs::read_to_string(base.join("operstate")) {
        Ok(s) => s,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let flags = fs::read_to_string(base.join("flags")).ok();

    Ok(Some(parse_sysfs_state(&operstate, flags.as_deref())))
}

pub fn is_elevated() -> bool {
    unsafe { libc::geteuid() == 0 }
}

pub fn change_notifier() -> io::Result<Box<dyn ChangeNotifier>> {
    Ok(Box::new(NetlinkNotifier::open()?))
}

/// rtnetlink subscription to link and address changes.
struct NetlinkNotifier {
    fd: OwnedFd,
}

impl NetlinkNotifier {
    fn open() -> io::Result<Self> {
        let raw = unsafe { libc::socket(AF_NETLINK, SOCK_RAW | SOCK_CLOEXEC, NETLINK_ROUTE) };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let mut addr: sockaddr_nl = unsafe { mem::zeroed() };
        addr.nl_family = AF_NETLINK as libc::sa_family_t;
        addr.nl_groups =
            (libc::RTMGRP_LINK | libc::RTMGRP_IPV4_IFADDR | libc::RTMGRP_IPV6_IFADDR) as u32;

        let rc = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                &addr as *const sockaddr_nl as *const sockaddr,
                mem::size_of::<sockaddr_nl>() as socklen_t,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { fd })
    }

    fn drain(&self) {
        let mut buf = [0u8; 8192];
        loop {
            let n = unsafe {
                libc::recv(
                    self.fd.as_raw_fd(),
                    buf.as_mut_ptr() as *mut c_void,
                    buf.len(),
                    libc::MSG_DONTWAIT,
                )
            };
            if n <= 0 {
                break;
            }
        }
    }
}

impl ChangeNotifier for NetlinkNotifier {
    fn wait_for_change(&mut self, timeout: Duration) -> io::Result<bool> {
        let mut pfd = pollfd {
            fd: self.fd.as_raw_fd(),
            events: POLLIN,
            revents: 0,
        };
        let millis = timeout.as_millis().min(c_int::MAX as u128) as c_int;
        let rc = unsafe { libc::poll(&mut pfd, 1, millis) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(err);
        }
        if rc == 0 {
            return Ok(false);
        }
        // Contents do not matter; the probe re-reads adapter state.
        self.drain();
        Ok(true)
    }
}
