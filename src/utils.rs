//! Utility functions for fleet operations

use crate::errors::{FleetError, Result};
use log::debug;
#[cfg(test)]
use std::cell::Cell;
use std::net::{Ipv4Addr, UdpSocket};

#[cfg(test)]
thread_local! {
    static ROOT_OVERRIDE: Cell<Option<bool>> = const { Cell::new(None) };
}

/// Check if running as root
pub fn is_root() -> bool {
    #[cfg(test)]
    {
        if let Some(value) = ROOT_OVERRIDE.with(|cell| cell.get()) {
            return value;
        }
    }

    nix::unistd::geteuid().is_root()
}

/// Get current UID
pub fn get_uid() -> u32 {
    nix::unistd::geteuid().as_raw()
}

/// Get current GID
pub fn get_gid() -> u32 {
    nix::unistd::getegid().as_raw()
}

/// Ensure we have root privileges
pub fn require_root() -> Result<()> {
    if !is_root() {
        Err(FleetError::Privilege(
            "You need superuser privileges to manage user accounts".to_string(),
        ))
    } else {
        Ok(())
    }
}

/// Best guess at the address other hosts use to reach this one.
///
/// Connecting a UDP socket sends no packets but makes the kernel pick the outbound
/// interface; falls back to loopback when there is no route.
pub fn detect_server_address() -> String {
    let detect = || -> std::io::Result<String> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect(("8.8.8.8", 80))?;
        Ok(socket.local_addr()?.ip().to_string())
    };

    match detect() {
        Ok(address) => address,
        Err(e) => {
            debug!("Server address detection failed: {}", e);
            Ipv4Addr::LOCALHOST.to_string()
        }
    }
}

#[cfg(test)]
pub fn set_root_override(value: Option<bool>) {
    ROOT_OVERRIDE.with(|cell| cell.set(value));
}
