//! Utility functions for disk space, filenames and formatting

use crate::config::DiskSpaceConfig;
use crate::error::{Error, Result};
use reqwest::header::{CONTENT_DISPOSITION, HeaderMap};
use sha2::{Digest, Sha256};
use std::path::Path;

/// Filename a server suggests for a download
///
/// Tries the Content-Disposition header first (`filename=` and the RFC 5987
/// `filename*=` form), then falls back to the last segment of the URL path.
/// Returns None when neither yields a name.
///
/// # Examples
///
/// ```
/// use reqwest::header::HeaderMap;
/// use zip_packager::utils::suggested_filename;
///
/// let headers = HeaderMap::new();
/// let name = suggested_filename(&headers, "https://irsa.example/data/w1.fits");
/// assert_eq!(name.as_deref(), Some("w1.fits"));
/// ```
pub fn suggested_filename(headers: &HeaderMap, url: &str) -> Option<String> {
    if let Some(content_disposition) = headers.get(CONTENT_DISPOSITION)
        && let Ok(value) = content_disposition.to_str()
    {
        // Format: attachment; filename="file.fits" or filename*=UTF-8''file.fits
        for part in value.split(';') {
            let part = part.trim();
            if let Some(filename) = part.strip_prefix("filename=") {
                let filename = filename.trim_matches('"');
                if !filename.is_empty() {
                    return Some(filename.to_string());
                }
            } else if let Some(filename) = part.strip_prefix("filename*=") {
                // charset'lang'encoded-filename
                if let Some(idx) = filename.rfind('\'')
                    && let Ok(decoded) = urlencoding::decode(&filename[idx + 1..])
                    && !decoded.is_empty()
                {
                    return Some(decoded.into_owned());
                }
            }
        }
    }

    if let Ok(parsed_url) = url::Url::parse(url)
        && let Some(mut segments) = parsed_url.path_segments()
        && let Some(last_segment) = segments.next_back()
        && !last_segment.is_empty()
    {
        let decoded = urlencoding::decode(last_segment)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| last_segment.to_string());
        return Some(decoded);
    }

    None
}

/// Get available disk space for a given path
///
/// Uses platform-specific APIs to query filesystem statistics:
/// - Linux: statvfs
/// - macOS: statvfs
/// - Windows: GetDiskFreeSpaceExW
pub fn get_available_space(path: &Path) -> std::io::Result<u64> {
    #[cfg(unix)]
    {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        // SAFETY: c_path is a valid, null-terminated C string; stat is zeroed
        // before the call and only read after statvfs reports success.
        unsafe {
            let mut stat: libc::statvfs = std::mem::zeroed();
            if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
                return Err(std::io::Error::last_os_error());
            }

            // f_bavail is available blocks for unprivileged users
            #[allow(clippy::unnecessary_cast)]
            let available_bytes = (stat.f_bavail as u64).saturating_mul(stat.f_frsize as u64);
            Ok(available_bytes)
        }
    }

    #[cfg(windows)]
    {
        use std::os::windows::ffi::OsStrExt;
        use winapi::um::fileapi::GetDiskFreeSpaceExW;

        let wide_path: Vec<u16> = path
            .as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect();

        // SAFETY: wide_path is a valid, null-terminated wide string and all
        // output pointers point to properly aligned u64 variables.
        unsafe {
            let mut free_bytes_available: u64 = 0;
            let mut _total_bytes: u64 = 0;
            let mut _total_free_bytes: u64 = 0;

            if GetDiskFreeSpaceExW(
                wide_path.as_ptr(),
                &mut free_bytes_available as *mut u64 as *mut _,
                &mut _total_bytes as *mut u64 as *mut _,
                &mut _total_free_bytes as *mut u64 as *mut _,
            ) == 0
            {
                return Err(std::io::Error::last_os_error());
            }

            Ok(free_bytes_available)
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "Disk space checking is not supported on this platform",
        ))
    }
}

/// Ensure `dir` can hold `size_bytes` more data
///
/// Required space is `size_bytes × size_multiplier + min_free_space`. When
/// `dir` does not exist yet its parent is checked instead.
pub fn check_disk_space(config: &DiskSpaceConfig, dir: &Path, size_bytes: u64) -> Result<()> {
    if !config.enabled {
        return Ok(());
    }

    let required = (size_bytes as f64 * config.size_multiplier) as u64;
    let required_with_buffer = required.saturating_add(config.min_free_space);

    let check_path = if dir.exists() {
        dir
    } else {
        dir.parent().ok_or_else(|| {
            Error::DiskSpaceCheckFailed(format!(
                "Cannot determine parent directory of '{}'",
                dir.display()
            ))
        })?
    };

    let available = get_available_space(check_path).map_err(|e| {
        Error::DiskSpaceCheckFailed(format!(
            "Failed to check disk space for '{}': {}",
            check_path.display(),
            e
        ))
    })?;

    if available < required_with_buffer {
        return Err(Error::InsufficientSpace {
            required: required_with_buffer,
            available,
        });
    }

    Ok(())
}

/// First four hex characters of the SHA-256 of `id`
///
/// Used to keep artifact names of different packages apart.
pub fn hash4(id: &str) -> String {
    let digest = Sha256::digest(id.as_bytes());
    let hex = format!("{:x}", digest);
    hex[..4].to_string()
}

/// Human-readable byte count (e.g. "1.5 MB")
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
