//! Hostname resolution for distributed launches.

use std::io;

/// Environment override for the advertised hostname.
pub const HOSTNAME_ENV: &str = "IPCLUSTER_HOSTNAME";

/// The name engines use to reach the coordinator on this host.
///
/// `IPCLUSTER_HOSTNAME` wins when set and non-empty; otherwise
/// `gethostname(2)`.
pub fn hostname() -> io::Result<String> {
    if let Ok(name) = std::env::var(HOSTNAME_ENV) {
        let name = name.trim();
        if !name.is_empty() {
            return Ok(name.to_string());
        }
    }
    system_hostname()
}

#[cfg(unix)]
fn system_hostname() -> io::Result<String> {
    let mut buf = [0u8; 256];
    // SAFETY: buf is valid for writes of buf.len() bytes.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    let name = String::from_utf8_lossy(&buf[..end]).trim().to_string();
    if name.is_empty() {
        return Err(io::Error::new(io::ErrorKind::NotFound, "empty hostname"));
    }
    Ok(name)
}

#[cfg(not(unix))]
fn system_hostname() -> io::Result<String> {
    std::env::var("COMPUTERNAME")
        .map_err(|e| io::Error::new(io::ErrorKind::NotFound, e))
}
