use std::path::{Path, PathBuf};

use crate::app::models::LogSourceKind;

/// Push targets must be absolute device paths without `..` segments.
pub fn validate_device_path(path: &str) -> Result<(), String> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err("Target path is required".to_string());
    }
    if !trimmed.starts_with('/') {
        return Err("Target path must be an absolute device path starting with '/'".to_string());
    }
    if trimmed.contains('\0') {
        return Err("Target path contains invalid characters".to_string());
    }
    if trimmed == "/" {
        return Err("Target path must not be root".to_string());
    }
    if trimmed.split('/').any(|segment| segment == "..") {
        return Err("Target path must not contain '..' segments".to_string());
    }
    Ok(())
}

/// `<output_dir>/<kind>.txt`, the destination used when none is given.
pub fn default_capture_path(output_dir: &Path, kind: LogSourceKind) -> PathBuf {
    output_dir.join(kind.default_file_name())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_device_path_requires_absolute() {
        assert!(validate_device_path("").is_err());
        assert!(validate_device_path("system/lib/libfoo.so").is_err());
        assert!(validate_device_path("/").is_err());
        assert!(validate_device_path("/system/lib64/").is_ok());
        assert!(validate_device_path(" /vendor/bin/tool ").is_ok());
    }

    #[test]
    fn validate_device_path_blocks_dotdot() {
        assert!(validate_device_path("/sdcard/../etc/passwd").is_err());
        assert!(validate_device_path("/sdcard/..").is_err());
    }

    #[test]
    fn default_capture_paths_use_kind_file_names() {
        let dir = Path::new("/tmp/captures");
        assert_eq!(
            default_capture_path(dir, LogSourceKind::Logcat),
            PathBuf::from("/tmp/captures/logcat.txt")
        );
        assert_eq!(
            default_capture_path(dir, LogSourceKind::QseeLog),
            PathBuf::from("/tmp/captures/qsee_log.txt")
        );
    }
}
