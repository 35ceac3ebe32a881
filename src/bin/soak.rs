use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use adb_toolbox_lib::app::adb::locator::{resolve_adb_program, serial_args};
use adb_toolbox_lib::app::adb::parse::{online_serials, parse_adb_devices};
use adb_toolbox_lib::app::adb::runner::run_command_with_timeout;
use adb_toolbox_lib::app::capture::{adb_spawner, CaptureSettings, SessionRegistry};
use adb_toolbox_lib::app::config::load_config;
use adb_toolbox_lib::app::history::KeywordHistory;
use adb_toolbox_lib::app::logging::init_logging;
use adb_toolbox_lib::app::models::{CaptureRequest, LogSourceKind};
use serde::Serialize;
use uuid::Uuid;

const MARKER_TAG: &str = "adb_toolbox_soak";

#[derive(Debug, Clone)]
struct Args {
    serial: Option<String>,
    out_dir: Option<PathBuf>,
    duration_secs: u64,
    settle_ms: u64,
    json: bool,
}

#[derive(Serialize)]
struct SoakSummary {
    tool: &'static str,
    status: &'static str,
    trace_id: String,
    serial: String,
    adb_program: String,
    out_dir: String,
    iterations: usize,
    failures: usize,
    warnings: usize,
    checks: Vec<SoakIteration>,
}

#[derive(Serialize)]
struct SoakIteration {
    index: usize,
    status: &'static str, // pass|fail|warn
    duration_ms: u128,
    relayed_lines: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn parse_args() -> Result<Args, String> {
    let mut serial = std::env::var("ANDROID_SERIAL")
        .ok()
        .filter(|s| !s.trim().is_empty());
    let mut out_dir: Option<PathBuf> = None;
    let mut duration_secs: u64 = 60;
    let mut settle_ms: u64 = 1500;
    let mut json = false;

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--serial" => {
                serial = it
                    .next()
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty());
                if serial.is_none() {
                    return Err("--serial requires a value".to_string());
                }
            }
            "--out" => {
                let value = it
                    .next()
                    .ok_or_else(|| "--out requires a value".to_string())?;
                out_dir = Some(PathBuf::from(value));
            }
            "--duration-secs" => {
                let value = it
                    .next()
                    .ok_or_else(|| "--duration-secs requires a value".to_string())?;
                duration_secs = value
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| "--duration-secs must be a number".to_string())?;
            }
            "--settle-ms" => {
                let value = it
                    .next()
                    .ok_or_else(|| "--settle-ms requires a value".to_string())?;
                settle_ms = value
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| "--settle-ms must be a number".to_string())?;
            }
            "--json" => json = true,
            "-h" | "--help" => {
                return Err("Usage: cargo run --bin capture-soak -- [--serial SERIAL] [--out DIR] [--duration-secs N] [--settle-ms N] [--json]\n".to_string());
            }
            other => return Err(format!("Unknown arg: {other}")),
        }
    }

    Ok(Args {
        serial,
        out_dir,
        duration_secs: duration_secs.max(10),
        settle_ms: settle_ms.clamp(200, 10_000),
        json,
    })
}

fn pick_single_device(adb_program: &str, trace_id: &str) -> Result<String, String> {
    let args = vec!["devices".to_string()];
    let out = run_command_with_timeout(adb_program, &args, Duration::from_secs(5), trace_id)
        .map_err(|err| err.to_string())?;
    if !out.success() {
        return Err(format!("adb devices failed: {}", out.stderr.trim()));
    }
    let online = online_serials(&parse_adb_devices(&out.stdout));
    match online.as_slice() {
        [] => Err("No online adb devices found.".to_string()),
        [serial] => Ok(serial.clone()),
        many => Err(format!(
            "Multiple online devices found ({}). Set ANDROID_SERIAL or pass --serial.",
            many.join(", ")
        )),
    }
}

fn main() {
    let args = match parse_args() {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("{msg}");
            std::process::exit(2);
        }
    };

    let trace_id = Uuid::new_v4().to_string();
    let out_dir = args.out_dir.unwrap_or_else(|| {
        let mut p = std::env::temp_dir();
        p.push(format!("adb_toolbox_soak_{trace_id}"));
        p
    });
    let _ = fs::create_dir_all(&out_dir);

    let config = match load_config(&trace_id) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("Failed to load config: {err}");
            std::process::exit(1);
        }
    };
    init_logging(&config.logging.log_level);
    let adb_program = resolve_adb_program(&config.tools);
    let serial = match args.serial {
        Some(s) => s,
        None => match pick_single_device(&adb_program, &trace_id) {
            Ok(s) => s,
            Err(err) => {
                eprintln!("{err}");
                std::process::exit(1);
            }
        },
    };

    // Soak keywords stay out of the user's keyword history.
    let registry = Arc::new(SessionRegistry::new(
        adb_spawner(adb_program.clone(), serial.clone()),
        KeywordHistory::empty(out_dir.join("soak_keywords.txt"), 20),
        CaptureSettings::from_config(&config.capture),
    ));

    let deadline = Instant::now() + Duration::from_secs(args.duration_secs);
    let mut iterations: Vec<SoakIteration> = Vec::new();
    let mut failures = 0usize;
    let mut warnings = 0usize;

    let mut index = 0usize;
    while Instant::now() < deadline {
        index += 1;
        let iter_start = Instant::now();
        let mut status = "pass";
        let mut error: Option<String> = None;
        let mut relayed_lines = 0usize;

        // start -> write marker -> settle -> stop -> marker must be in the file
        let marker = format!("soak-{}-{index}", &trace_id[..8]);
        let path = out_dir.join(format!("logcat_{index}.txt"));
        let request = CaptureRequest::new(
            LogSourceKind::Logcat,
            marker.clone(),
            path.to_string_lossy(),
        );

        match registry.start_all(&[request], &trace_id) {
            Err(err) => {
                status = "fail";
                error = Some(format!("capture start failed: {err}"));
            }
            Ok(started) => {
                let mut write_args = serial_args(&serial);
                write_args.extend(
                    ["shell", "log", "-t", MARKER_TAG, marker.as_str()]
                        .iter()
                        .map(|s| s.to_string()),
                );
                let out = run_command_with_timeout(
                    &adb_program,
                    &write_args,
                    Duration::from_secs(3),
                    &trace_id,
                );
                if !out.as_ref().map(|o| o.success()).unwrap_or(false) {
                    status = "warn";
                    warnings += 1;
                    error = Some("logcat marker write failed".to_string());
                }

                std::thread::sleep(Duration::from_millis(args.settle_ms));

                for session in &started {
                    registry.stop(&session.info.session_id, &trace_id);
                    relayed_lines += session.relay.try_iter().count();
                }

                let persisted = fs::read_to_string(&path).unwrap_or_default();
                if !persisted.contains(&marker) && status == "pass" {
                    status = "warn";
                    warnings += 1;
                    error = Some("logcat marker not persisted".to_string());
                }
                if !registry.active_sessions().is_empty() {
                    status = "fail";
                    error = Some("session still registered after stop".to_string());
                }
            }
        }

        if status == "fail" {
            failures += 1;
        }
        iterations.push(SoakIteration {
            index,
            status,
            duration_ms: iter_start.elapsed().as_millis(),
            relayed_lines,
            error,
        });
    }

    let details_path = out_dir.join("soak_iterations.json");
    let _ = fs::write(
        &details_path,
        serde_json::to_string_pretty(&iterations).unwrap_or_default(),
    );

    let overall = if failures > 0 { "fail" } else { "pass" };
    let summary = SoakSummary {
        tool: "adb_toolbox_capture_soak",
        status: overall,
        trace_id,
        serial,
        adb_program,
        out_dir: out_dir.to_string_lossy().to_string(),
        iterations: iterations.len(),
        failures,
        warnings,
        checks: iterations,
    };

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).unwrap_or_default()
        );
    } else {
        println!(
            "status: {}\niterations: {}\nfailures: {}\nwarnings: {}\nout: {}\n",
            summary.status, summary.iterations, summary.failures, summary.warnings, summary.out_dir
        );
    }

    if overall != "pass" {
        std::process::exit(1);
    }
}
