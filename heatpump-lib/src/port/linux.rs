use glob::glob;
use std::fs;
use std::path::PathBuf;

/// Whether any process holds `port_name` open. Links such as
/// `/dev/serial/by-id/...` are resolved to the device node first.
pub fn is_port_open(port_name: &str) -> bool {
    let device = fs::canonicalize(port_name).unwrap_or_else(|_| PathBuf::from(port_name));

    let descriptors = match glob("/proc/[0-9]*/fd/*") {
        Ok(descriptors) => descriptors,
        Err(_) => return false,
    };

    descriptors
        .flatten()
        .filter_map(|fd| fs::read_link(fd).ok())
        .any(|target| target == device)
}
