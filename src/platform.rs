//! Small platform helpers: environment parsing, cache-root resolution,
//! process liveness, and free-disk queries.

use std::env;
use std::path::{Path, PathBuf};

/// Check if an environment variable is set to a truthy value.
/// Accepts: "1", "true", "on", "yes", "t" (case insensitive).
pub fn is_env_true(key: &str) -> bool {
    match env::var(key) {
        Ok(val) => {
            let val = val.to_lowercase();
            matches!(val.as_str(), "1" | "true" | "on" | "yes" | "t")
        }
        Err(_) => false,
    }
}

/// Normalized platform string in `os_arch` form, e.g. `linux_amd64`.
pub fn platform_string() -> String {
    let os = match env::consts::OS {
        "macos" => "darwin",
        other => other,
    };

    let arch = match env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    };

    format!("{os}_{arch}")
}

/// Resolve the cache root hosting all work environments.
///
/// Order: `XDG_CACHE_HOME`, then `$HOME/.cache`, each suffixed with
/// `flavor`. Windows falls back to `LOCALAPPDATA`, everything else to the
/// system temp directory.
pub fn cache_root() -> PathBuf {
    if let Ok(xdg_cache) = env::var("XDG_CACHE_HOME") {
        return PathBuf::from(xdg_cache).join("flavor");
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".cache").join("flavor");
    }

    #[cfg(target_os = "windows")]
    {
        if let Ok(local_app_data) = env::var("LOCALAPPDATA") {
            return PathBuf::from(local_app_data).join("flavor").join("cache");
        }
    }

    env::temp_dir().join("flavor")
}

/// Check whether a process with the given pid is still running.
#[cfg(target_os = "linux")]
pub fn process_running(pid: u32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(all(unix, not(target_os = "linux")))]
#[allow(unsafe_code)] // kill(pid, 0) liveness probe
pub fn process_running(pid: u32) -> bool {
    // Signal 0 performs the permission/liveness checks without delivering
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn process_running(_pid: u32) -> bool {
    // Conservative: treat unknown pids as dead so stale locks get reclaimed
    false
}

/// Query the free bytes available on the filesystem holding `path`.
///
/// Returns `None` when the OS query fails; callers treat that as
/// "unknown, don't block".
#[cfg(unix)]
#[allow(unsafe_code)] // statvfs FFI
pub fn free_disk_space(path: &Path) -> Option<u64> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes()).ok()?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return None;
    }

    Some(stat.f_bavail as u64 * stat.f_frsize as u64)
}

#[cfg(windows)]
#[allow(unsafe_code)] // GetDiskFreeSpaceExW FFI
pub fn free_disk_space(path: &Path) -> Option<u64> {
    use windows::Win32::Storage::FileSystem::GetDiskFreeSpaceExW;
    use windows::core::HSTRING;

    let wide = HSTRING::from(path.as_os_str());
    let mut available: u64 = 0;
    let ok = unsafe { GetDiskFreeSpaceExW(&wide, Some(&mut available), None, None) };
    ok.ok().map(|_| available)
}

#[cfg(not(any(unix, windows)))]
pub fn free_disk_space(_path: &Path) -> Option<u64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_string_has_two_parts() {
        let s = platform_string();
        assert_eq!(s.split('_').count(), 2);
    }

    #[test]
    fn own_process_is_running() {
        assert!(process_running(std::process::id()));
    }

    #[cfg(unix)]
    #[test]
    fn free_space_reported_for_tmp() {
        let free = free_disk_space(Path::new("/tmp"));
        assert!(free.is_some());
    }
}
