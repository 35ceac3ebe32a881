use std::path::PathBuf;
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use crate::app::adb::locator::{
    resolve_adb_program, resolve_fastboot_program, resolve_scrcpy_program, serial_args,
    validate_program,
};
use crate::app::adb::parse::{
    has_connected_device, parse_adb_devices, parse_fastboot_devices, DeviceMode,
};
use crate::app::adb::runner::{run_command_with_timeout, CommandOutput};
use crate::app::adb::scrcpy::{launch_scrcpy as launch_scrcpy_process, locate_scrcpy};
use crate::app::capture::CaptureDesk;
use crate::app::config::{load_config, save_config, validate_config, AppConfig};
use crate::app::error::AppError;
use crate::app::flash::{
    resolve_partition, run_adb_push, run_fastboot_flash, AdbPushPlan, CommandHost, FastbootPlan,
    FlashEmitter, SystemHost,
};
use crate::app::models::{
    CaptureRequest, CommandResponse, DeviceStatus, EnvironmentReport, FlashResult,
    HistorySnapshot, ScrcpyLaunch, SessionId, SessionInfo, ToolCheck,
};
use crate::app::state::AppState;


const STATUS_TIMEOUT: Duration = Duration::from_secs(2);
const VERSION_TIMEOUT: Duration = Duration::from_secs(5);
const REBOOT_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs a short host command and captures its output.
type Probe<'a> = &'a dyn Fn(&str, &[String], Duration) -> Result<CommandOutput, AppError>;

fn resolve_trace_id(input: Option<String>) -> String {
    input
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn ensure_non_empty(value: &str, field: &str, trace_id: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::validation(
            format!("{field} is required"),
            trace_id,
        ));
    }
    Ok(())
}

fn args(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| item.to_string()).collect()
}

pub fn get_config(
    state: &AppState,
    trace_id: Option<String>,
) -> Result<CommandResponse<AppConfig>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    Ok(CommandResponse {
        trace_id,
        data: state.config(),
    })
}

/// Reloads the config file from disk into the shared state.
pub fn reload_config(
    state: &AppState,
    trace_id: Option<String>,
) -> Result<CommandResponse<AppConfig>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let config = load_config(&trace_id)?;
    state.replace_config(config.clone());
    Ok(CommandResponse {
        trace_id,
        data: config,
    })
}

pub fn save_app_config(
    state: &AppState,
    config: AppConfig,
    trace_id: Option<String>,
) -> Result<CommandResponse<AppConfig>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let config = validate_config(config);
    save_config(&config, &trace_id)?;
    state.replace_config(config.clone());
    info!(trace_id = %trace_id, "config saved");
    Ok(CommandResponse {
        trace_id,
        data: config,
    })
}

fn check_tool(program: &str, label: &str, version_args: &[String], probe: Probe<'_>) -> ToolCheck {
    if let Err(message) = validate_program(program, label) {
        return ToolCheck {
            program: program.to_string(),
            available: false,
            error: Some(message),
        };
    }
    match probe(program, version_args, VERSION_TIMEOUT) {
        Ok(output) if output.success() => ToolCheck {
            program: program.to_string(),
            available: true,
            error: None,
        },
        Ok(output) => ToolCheck {
            program: program.to_string(),
            available: false,
            error: Some(format!(
                "{label} exited with {:?}: {}",
                output.exit_code,
                output.stderr.trim()
            )),
        },
        Err(err) => ToolCheck {
            program: program.to_string(),
            available: false,
            error: Some(err.error),
        },
    }
}

fn check_environment_inner(config: &AppConfig, probe: Probe<'_>) -> EnvironmentReport {
    EnvironmentReport {
        adb: check_tool(
            &resolve_adb_program(&config.tools),
            "ADB",
            &args(&["version"]),
            probe,
        ),
        fastboot: check_tool(
            &resolve_fastboot_program(&config.tools),
            "Fastboot",
            &args(&["--version"]),
            probe,
        ),
    }
}

pub fn check_environment(
    state: &AppState,
    trace_id: Option<String>,
) -> Result<CommandResponse<EnvironmentReport>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let config = state.config();
    let report = check_environment_inner(&config, &|program, args, timeout| {
        run_command_with_timeout(program, args, timeout, &trace_id)
    });
    if !report.is_ready() {
        warn!(
            trace_id = %trace_id,
            adb = report.adb.available,
            fastboot = report.fastboot.available,
            "environment check failed"
        );
    }
    Ok(CommandResponse {
        trace_id,
        data: report,
    })
}

fn device_status_inner(config: &AppConfig, probe: Probe<'_>, trace_id: &str) -> DeviceStatus {
    let adb_output = probe(
        &resolve_adb_program(&config.tools),
        &args(&["devices"]),
        STATUS_TIMEOUT,
    )
    .map(|output| output.stdout)
    .unwrap_or_else(|err| {
        warn!(trace_id = %trace_id, error = %err, "adb devices failed");
        String::new()
    });
    let fastboot_output = probe(
        &resolve_fastboot_program(&config.tools),
        &args(&["devices"]),
        STATUS_TIMEOUT,
    )
    .map(|output| output.stdout)
    .unwrap_or_else(|err| {
        warn!(trace_id = %trace_id, error = %err, "fastboot devices failed");
        String::new()
    });

    DeviceStatus {
        adb_connected: has_connected_device(&adb_output, DeviceMode::Adb),
        fastboot_connected: has_connected_device(&fastboot_output, DeviceMode::Fastboot),
        adb_devices: parse_adb_devices(&adb_output),
        fastboot_serials: parse_fastboot_devices(&fastboot_output),
    }
}

pub fn device_status(
    state: &AppState,
    trace_id: Option<String>,
) -> Result<CommandResponse<DeviceStatus>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let config = state.config();
    let status = device_status_inner(
        &config,
        &|program, args, timeout| run_command_with_timeout(program, args, timeout, &trace_id),
        &trace_id,
    );
    Ok(CommandResponse {
        trace_id,
        data: status,
    })
}

fn require_adb_device(config: &AppConfig, probe: Probe<'_>, trace_id: &str) -> Result<(), AppError> {
    if device_status_inner(config, probe, trace_id).adb_connected {
        Ok(())
    } else {
        Err(AppError::validation("No ADB device connected", trace_id))
    }
}

fn reboot_device_inner(
    config: &AppConfig,
    probe: Probe<'_>,
    trace_id: &str,
) -> Result<String, AppError> {
    require_adb_device(config, probe, trace_id)?;
    let mut reboot_args = serial_args(&config.tools.serial);
    reboot_args.push("reboot".to_string());
    let output = probe(&resolve_adb_program(&config.tools), &reboot_args, REBOOT_TIMEOUT)?;
    if !output.success() {
        return Err(AppError::dependency(
            format!("Reboot failed: {}", output.stderr.trim()),
            trace_id,
        ));
    }
    Ok("Reboot command sent, the device is restarting".to_string())
}

pub fn reboot_device(
    state: &AppState,
    trace_id: Option<String>,
) -> Result<CommandResponse<String>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    info!(trace_id = %trace_id, "reboot_device");
    let config = state.config();
    let message = reboot_device_inner(
        &config,
        &|program, args, timeout| run_command_with_timeout(program, args, timeout, &trace_id),
        &trace_id,
    )?;
    Ok(CommandResponse {
        trace_id,
        data: message,
    })
}

pub fn start_capture(
    desk: &mut CaptureDesk,
    requests: Vec<CaptureRequest>,
    trace_id: Option<String>,
) -> Result<CommandResponse<Vec<SessionInfo>>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let sessions = desk.start(&requests, &trace_id)?;
    Ok(CommandResponse {
        trace_id,
        data: sessions,
    })
}

/// Same effect as the user closing the session's view.
pub fn stop_capture(
    desk: &mut CaptureDesk,
    session_id: String,
    trace_id: Option<String>,
) -> Result<CommandResponse<bool>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    ensure_non_empty(&session_id, "session_id", &trace_id)?;
    let session_id: SessionId = session_id
        .parse()
        .map_err(|_| AppError::validation("session_id is not a valid id", &trace_id))?;
    let closed = desk.close_view(&session_id, &trace_id);
    Ok(CommandResponse {
        trace_id,
        data: closed,
    })
}

pub fn list_captures(
    state: &AppState,
    trace_id: Option<String>,
) -> Result<CommandResponse<Vec<SessionInfo>>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    Ok(CommandResponse {
        trace_id,
        data: state.registry.active_sessions(),
    })
}

pub fn keyword_history(
    state: &AppState,
    trace_id: Option<String>,
) -> Result<CommandResponse<Vec<String>>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    Ok(CommandResponse {
        trace_id,
        data: state.registry.keyword_history(),
    })
}

pub fn history_snapshot(
    state: &AppState,
    trace_id: Option<String>,
) -> Result<CommandResponse<HistorySnapshot>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let files = state
        .file_history
        .lock()
        .map(|history| history.entries().to_vec())
        .unwrap_or_default();
    let targets = state
        .target_history
        .lock()
        .map(|history| history.entries().to_vec())
        .unwrap_or_default();
    Ok(CommandResponse {
        trace_id,
        data: HistorySnapshot {
            keywords: state.registry.keyword_history(),
            files,
            targets,
        },
    })
}

fn remember_paths(state: &AppState, file: &str, target: Option<&str>, trace_id: &str) {
    if let Ok(mut history) = state.file_history.lock() {
        if history.touch(file) {
            if let Err(err) = history.save(trace_id) {
                warn!(trace_id = %trace_id, error = %err, "failed to save file history");
            }
        }
    }
    let Some(target) = target else {
        return;
    };
    if let Ok(mut history) = state.target_history.lock() {
        if history.touch(target) {
            if let Err(err) = history.save(trace_id) {
                warn!(trace_id = %trace_id, error = %err, "failed to save target history");
            }
        }
    }
}

fn flash_adb_push_inner<H: CommandHost>(
    state: &AppState,
    host: &mut H,
    file: &str,
    target: &str,
    emitter: FlashEmitter,
    trace_id: &str,
) -> Result<FlashResult, AppError> {
    ensure_non_empty(file, "file", trace_id)?;
    ensure_non_empty(target, "target", trace_id)?;
    let config = state.config();
    let plan = AdbPushPlan {
        adb: resolve_adb_program(&config.tools),
        serial: config.tools.serial.clone(),
        file: PathBuf::from(file.trim()),
        target: target.trim().to_string(),
        reboot_settle: Duration::from_secs(config.flash.reboot_settle_secs),
    };
    let result = run_adb_push(host, &plan, emitter, trace_id)?;
    remember_paths(state, &result.file.path, Some(&result.destination), trace_id);
    Ok(result)
}

pub fn flash_adb_push(
    state: &AppState,
    file: String,
    target: String,
    emitter: FlashEmitter,
    trace_id: Option<String>,
) -> Result<CommandResponse<FlashResult>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    info!(trace_id = %trace_id, file = %file, target = %target, "flash_adb_push");
    let result = flash_adb_push_inner(state, &mut SystemHost, &file, &target, emitter, &trace_id)?;
    Ok(CommandResponse {
        trace_id,
        data: result,
    })
}

fn flash_fastboot_inner<H: CommandHost>(
    state: &AppState,
    host: &mut H,
    file: &str,
    emitter: FlashEmitter,
    trace_id: &str,
) -> Result<FlashResult, AppError> {
    ensure_non_empty(file, "file", trace_id)?;
    let config = state.config();
    let path = PathBuf::from(file.trim());
    let partition = resolve_partition(&path, &config.flash.partition_map).ok_or_else(|| {
        AppError::validation(
            format!(
                "Cannot determine the partition for {}",
                path.file_name()
                    .map(|name| name.to_string_lossy().to_string())
                    .unwrap_or_else(|| file.to_string())
            ),
            trace_id,
        )
    })?;
    let plan = FastbootPlan {
        adb: resolve_adb_program(&config.tools),
        fastboot: resolve_fastboot_program(&config.tools),
        serial: config.tools.serial.clone(),
        file: path,
        partition,
        fastboot_wait_secs: config.flash.fastboot_wait_secs,
    };
    let result = run_fastboot_flash(host, &plan, emitter, trace_id)?;
    remember_paths(state, &result.file.path, None, trace_id);
    Ok(result)
}

pub fn flash_fastboot_image(
    state: &AppState,
    file: String,
    emitter: FlashEmitter,
    trace_id: Option<String>,
) -> Result<CommandResponse<FlashResult>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    info!(trace_id = %trace_id, file = %file, "flash_fastboot_image");
    let result = flash_fastboot_inner(state, &mut SystemHost, &file, emitter, &trace_id)?;
    Ok(CommandResponse {
        trace_id,
        data: result,
    })
}

pub fn launch_scrcpy(
    state: &AppState,
    trace_id: Option<String>,
) -> Result<CommandResponse<ScrcpyLaunch>, AppError> {
    let trace_id = resolve_trace_id(trace_id);
    let config = state.config();
    require_adb_device(
        &config,
        &|program, args, timeout| run_command_with_timeout(program, args, timeout, &trace_id),
        &trace_id,
    )?;
    let program = locate_scrcpy(&resolve_scrcpy_program(&config.tools));
    let launch = launch_scrcpy_process(&program, &config.tools.serial, &trace_id)?;
    info!(trace_id = %trace_id, program = %launch.program, pid = launch.pid, "scrcpy launched");
    Ok(CommandResponse {
        trace_id,
        data: launch,
    })
}
