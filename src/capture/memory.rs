//! Process memory sampling

#[cfg(target_os = "linux")]
static PAGE_SIZE: std::sync::LazyLock<u64> = std::sync::LazyLock::new(|| {
    use nix::unistd::{sysconf, SysconfVar};

    match sysconf(SysconfVar::PAGE_SIZE) {
        Ok(Some(size)) if size > 0 => size as u64,
        _ => 4096,
    }
});

/// Resident set size of the current process in bytes, 0 when unavailable
#[cfg(target_os = "linux")]
pub fn resident_memory_bytes() -> u64 {
    let Ok(statm) = std::fs::read_to_string("/proc/self/statm") else {
        return 0;
    };
    let resident_pages = statm
        .split_whitespace()
        .nth(1)
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);
    resident_pages * *PAGE_SIZE
}

#[cfg(not(target_os = "linux"))]
pub fn resident_memory_bytes() -> u64 {
    0
}
