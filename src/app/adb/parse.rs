use std::sync::OnceLock;

use regex::Regex;

use crate::app::models::DeviceSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceMode {
    Adb,
    Fastboot,
}

/// True when `adb devices` / `fastboot devices` output lists at least one device.
/// A device line holds a tab, or a space together with the word `fastboot`.
pub fn has_connected_device(output: &str, mode: DeviceMode) -> bool {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !(mode == DeviceMode::Adb && line.contains("List of devices")))
        .any(|line| line.contains('\t') || (line.contains(' ') && line.contains("fastboot")))
}

pub fn parse_adb_devices(output: &str) -> Vec<DeviceSummary> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter(|line| !line.trim_start().starts_with('*'))
        .filter(|line| !line.to_lowercase().contains("list of devices"))
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            let serial = tokens.next()?;
            let state = tokens.next()?;
            Some(DeviceSummary {
                serial: serial.to_string(),
                state: state.to_string(),
            })
        })
        .collect()
}

/// Devices usable for shell commands (state `device`).
pub fn online_serials(devices: &[DeviceSummary]) -> Vec<String> {
    devices
        .iter()
        .filter(|device| device.state == "device")
        .map(|device| device.serial.clone())
        .collect()
}

fn fastboot_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?P<serial>\S+)\s+fastboot\b").unwrap())
}

pub fn parse_fastboot_devices(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| {
            fastboot_line_regex()
                .captures(line.trim())
                .and_then(|caps| caps.name("serial"))
                .map(|serial| serial.as_str().to_string())
        })
        .collect()
}
