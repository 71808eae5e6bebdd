//! Resource guards: disk-space checks and safe file writes

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use crate::{CommonError, CommonResult};

/// Minimum free bytes required before ledger/artifact writes proceed
pub const MIN_FREE_BYTES: u64 = 64 * 1024 * 1024;

/// Free bytes available to unprivileged writers on the filesystem holding
/// `path`
pub fn free_disk_bytes(path: &Path) -> CommonResult<u64> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| CommonError::Resource(format!("invalid path: {}", e)))?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return Err(CommonError::Resource(format!(
            "statvfs failed for {}",
            path.display()
        )));
    }
    Ok(stat.f_bavail as u64 * stat.f_frsize as u64)
}

/// Fail when the filesystem holding `path` is below the floor. Disk-full
/// on the ledger path is a fatal condition for the caller to escalate.
pub fn check_disk_space(path: &Path, min_free_bytes: u64) -> CommonResult<()> {
    let free = free_disk_bytes(path)?;
    if free < min_free_bytes {
        return Err(CommonError::Resource(format!(
            "{}: {} bytes free, {} required",
            path.display(),
            free,
            min_free_bytes
        )));
    }
    Ok(())
}

/// Write a file atomically: temp file in the same directory, then rename.
/// Readers never observe a partial write.
pub fn safe_write_file(path: &Path, contents: &[u8]) -> CommonResult<()> {
    let parent = path
        .parent()
        .ok_or_else(|| CommonError::Resource(format!("{} has no parent", path.display())))?;
    std::fs::create_dir_all(parent)?;

    let tmp = parent.join(format!(
        ".{}.tmp",
        path.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "unnamed".to_string())
    ));
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_space_is_positive_on_tempdir() {
        let dir = tempfile::tempdir().unwrap();
        let free = free_disk_bytes(dir.path()).unwrap();
        assert!(free > 0);
    }

    #[test]
    fn check_disk_space_with_zero_floor_passes() {
        let dir = tempfile::tempdir().unwrap();
        assert!(check_disk_space(dir.path(), 0).is_ok());
    }

    #[test]
    fn safe_write_replaces_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/policy.json");

        safe_write_file(&path, b"first").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"first");

        safe_write_file(&path, b"second").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");

        // no temp residue
        let residue: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with('.'))
            .collect();
        assert!(residue.is_empty());
    }
}
