use std::path::Path;

use crate::app::config::ToolSettings;

pub fn normalize_command_path(value: &str) -> String {
    let trimmed = value.trim();
    for quote in ['"', '\''] {
        if let Some(inner) = trimmed
            .strip_prefix(quote)
            .and_then(|candidate| candidate.strip_suffix(quote))
        {
            return inner.trim().to_string();
        }
    }
    trimmed.to_string()
}

/// Configured path, or the bare program name looked up on PATH.
pub fn resolve_program(configured: &str, default_name: &str) -> String {
    let normalized = normalize_command_path(configured);
    if normalized.is_empty() {
        default_name.to_string()
    } else {
        normalized
    }
}

pub fn resolve_adb_program(tools: &ToolSettings) -> String {
    resolve_program(&tools.adb_path, "adb")
}

pub fn resolve_fastboot_program(tools: &ToolSettings) -> String {
    resolve_program(&tools.fastboot_path, "fastboot")
}

pub fn resolve_scrcpy_program(tools: &ToolSettings) -> String {
    resolve_program(&tools.scrcpy_path, "scrcpy")
}

/// Checks an explicit path up front. Bare names are left for the spawn to find.
pub fn validate_program(program: &str, label: &str) -> Result<(), String> {
    if program.trim().is_empty() {
        return Err(format!("{label} command is empty"));
    }
    if !program.contains('/') && !program.contains('\\') {
        return Ok(());
    }
    let path = Path::new(program);
    if path.is_dir() {
        return Err(format!("{label} path must point to an executable file"));
    }
    if !path.exists() {
        return Err(format!("{label} executable not found at the configured path"));
    }
    Ok(())
}

/// Optional `-s <serial>` prefix for adb and fastboot invocations.
pub fn serial_args(serial: &str) -> Vec<String> {
    let serial = serial.trim();
    if serial.is_empty() {
        Vec::new()
    } else {
        vec!["-s".to_string(), serial.to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_wrapping_quotes() {
        assert_eq!(
            normalize_command_path("  \"/opt/android/platform-tools/adb\"  "),
            "/opt/android/platform-tools/adb"
        );
        assert_eq!(
            normalize_command_path("  '/opt/android/platform-tools/fastboot'  "),
            "/opt/android/platform-tools/fastboot"
        );
    }

    #[test]
    fn empty_settings_resolve_to_bare_names() {
        let tools = ToolSettings::default();
        assert_eq!(resolve_adb_program(&tools), "adb");
        assert_eq!(resolve_fastboot_program(&tools), "fastboot");
        assert_eq!(resolve_scrcpy_program(&tools), "scrcpy");

        let tools = ToolSettings {
            adb_path: " /sdk/adb ".to_string(),
            ..ToolSettings::default()
        };
        assert_eq!(resolve_adb_program(&tools), "/sdk/adb");
    }

    #[test]
    fn validates_explicit_paths_only() {
        assert!(validate_program("adb", "ADB").is_ok());
        assert!(validate_program("  ", "ADB").is_err());
        let err = validate_program("/this/path/should/not/exist/adb", "ADB").unwrap_err();
        assert!(err.to_lowercase().contains("not found"));
        let dir = tempfile::tempdir().expect("tempdir");
        let err = validate_program(&dir.path().to_string_lossy(), "Fastboot").unwrap_err();
        assert!(err.starts_with("Fastboot path"));
    }

    #[test]
    fn serial_args_skip_blank_serials() {
        assert!(serial_args("  ").is_empty());
        assert_eq!(serial_args(" emulator-5554 "), vec!["-s", "emulator-5554"]);
    }
}
