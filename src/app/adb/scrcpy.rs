use std::path::Path;
use std::process::{Command, Stdio};

use crate::app::error::AppError;
use crate::app::models::ScrcpyLaunch;

/// Configured program when usable, otherwise the first well-known install
/// location that exists, otherwise the bare name for a PATH lookup.
pub fn locate_scrcpy(configured: &str) -> String {
    let configured = configured.trim();
    if !configured.is_empty() && configured != "scrcpy" {
        return configured.to_string();
    }
    let common_paths: &[&str] = if std::env::consts::OS == "macos" {
        &["/opt/homebrew/bin/scrcpy", "/usr/local/bin/scrcpy"]
    } else {
        &[
            "/usr/bin/scrcpy",
            "/usr/local/bin/scrcpy",
            "/snap/bin/scrcpy",
            "~/.local/bin/scrcpy",
            "/opt/scrcpy/scrcpy",
        ]
    };
    common_paths
        .iter()
        .map(|path| expand_home(path))
        .find(|path| Path::new(path).is_file())
        .unwrap_or_else(|| "scrcpy".to_string())
}

pub fn build_scrcpy_args(serial: &str) -> Vec<String> {
    let serial = serial.trim();
    if serial.is_empty() {
        Vec::new()
    } else {
        vec!["-s".to_string(), serial.to_string()]
    }
}

/// Starts scrcpy detached; the mirroring window outlives this call.
pub fn launch_scrcpy(program: &str, serial: &str, trace_id: &str) -> Result<ScrcpyLaunch, AppError> {
    let child = Command::new(program)
        .args(build_scrcpy_args(serial))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|err| AppError::spawn(format!("Failed to launch scrcpy: {err}"), trace_id))?;
    Ok(ScrcpyLaunch {
        program: program.to_string(),
        serial: serial.trim().to_string(),
        pid: child.id(),
    })
}

fn expand_home(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest).to_string_lossy().to_string();
        }
    }
    path.to_string()
}
