use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use adb_toolbox_lib::app::adb::paths::default_capture_path;
use adb_toolbox_lib::app::capture::{CaptureDesk, ConsoleView, LogView};
use adb_toolbox_lib::app::commands;
use adb_toolbox_lib::app::config::load_config;
use adb_toolbox_lib::app::error::AppError;
use adb_toolbox_lib::app::flash::FlashEmitter;
use adb_toolbox_lib::app::logging::init_logging;
use adb_toolbox_lib::app::models::{
    CaptureRequest, CommandResponse, FlashEvent, LogSourceKind, SessionInfo,
};
use adb_toolbox_lib::app::state::AppState;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

const USAGE: &str = "\
Usage: adb-toolbox [--json] [--serial SERIAL] <command> [options]

Commands:
  capture [--logcat] [--kmsg] [--qsee] [--keyword K] [--case-sensitive]
          [--out DIR] [--duration SECS]
  status                        ADB / fastboot connection state
  env                           check that adb and fastboot run
  reboot                        adb reboot
  flash-adb --file F --target T push a file through adb (root + remount)
  flash-fastboot --file F.img   flash an image through fastboot
  scrcpy                        start screen mirroring
  history                       keyword, file and target histories
";

#[derive(Debug, Clone, PartialEq)]
struct CaptureArgs {
    kinds: Vec<LogSourceKind>,
    keyword: String,
    case_sensitive: bool,
    out_dir: Option<PathBuf>,
    duration: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Capture(CaptureArgs),
    Status,
    Env,
    Reboot,
    FlashAdb { file: String, target: String },
    FlashFastboot { file: String },
    Scrcpy,
    History,
}

#[derive(Debug, Clone, PartialEq)]
struct Invocation {
    command: Command,
    json: bool,
    serial: Option<String>,
}

fn take_value(it: &mut impl Iterator<Item = String>, flag: &str) -> Result<String, String> {
    it.next()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| format!("{flag} requires a value"))
}

fn parse_args(raw: impl IntoIterator<Item = String>) -> Result<Invocation, String> {
    let mut json = false;
    let mut serial = None;
    let mut command_name = None;
    let mut kinds = Vec::new();
    let mut keyword = String::new();
    let mut case_sensitive = false;
    let mut out_dir = None;
    let mut duration = None;
    let mut file = None;
    let mut target = None;

    let mut it = raw.into_iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--json" => json = true,
            "--serial" => serial = Some(take_value(&mut it, "--serial")?),
            "--logcat" => kinds.push(LogSourceKind::Logcat),
            "--kmsg" => kinds.push(LogSourceKind::Kmsg),
            "--qsee" => kinds.push(LogSourceKind::QseeLog),
            "--keyword" => keyword = it.next().unwrap_or_default(),
            "--case-sensitive" => case_sensitive = true,
            "--out" => out_dir = Some(PathBuf::from(take_value(&mut it, "--out")?)),
            "--duration" => {
                let value = take_value(&mut it, "--duration")?;
                let secs = value
                    .parse::<u64>()
                    .map_err(|_| "--duration must be a number of seconds".to_string())?;
                duration = Some(Duration::from_secs(secs));
            }
            "--file" => file = Some(take_value(&mut it, "--file")?),
            "--target" => target = Some(take_value(&mut it, "--target")?),
            "-h" | "--help" => return Err(USAGE.to_string()),
            other if other.starts_with('-') => return Err(format!("Unknown arg: {other}")),
            other => {
                if command_name.is_some() {
                    return Err(format!("Unexpected argument: {other}"));
                }
                command_name = Some(other.to_string());
            }
        }
    }

    let command = match command_name.as_deref() {
        Some("capture") => {
            if kinds.is_empty() {
                return Err("capture needs at least one of --logcat, --kmsg, --qsee".to_string());
            }
            let mut unique: Vec<LogSourceKind> = Vec::with_capacity(kinds.len());
            for kind in kinds {
                if !unique.contains(&kind) {
                    unique.push(kind);
                }
            }
            Command::Capture(CaptureArgs {
                kinds: unique,
                keyword,
                case_sensitive,
                out_dir,
                duration,
            })
        }
        Some("status") => Command::Status,
        Some("env") => Command::Env,
        Some("reboot") => Command::Reboot,
        Some("flash-adb") => Command::FlashAdb {
            file: file.ok_or_else(|| "flash-adb requires --file".to_string())?,
            target: target.ok_or_else(|| "flash-adb requires --target".to_string())?,
        },
        Some("flash-fastboot") => Command::FlashFastboot {
            file: file.ok_or_else(|| "flash-fastboot requires --file".to_string())?,
        },
        Some("scrcpy") => Command::Scrcpy,
        Some("history") => Command::History,
        Some(other) => return Err(format!("Unknown command: {other}\n\n{USAGE}")),
        None => return Err(USAGE.to_string()),
    };

    Ok(Invocation {
        command,
        json,
        serial,
    })
}

fn print_response<T: Serialize + std::fmt::Debug>(response: &CommandResponse<T>, json: bool) {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(response).unwrap_or_default()
        );
    } else {
        println!("{:#?}", response.data);
    }
}

fn console_emitter() -> FlashEmitter {
    Arc::new(|event: FlashEvent| match event {
        FlashEvent::StepStarted { command } => println!("\n>>> {command}"),
        FlashEvent::Output { line } => println!("{line}"),
        FlashEvent::StepFinished { exit_code, .. } => match exit_code {
            Some(code) => println!("exit code: {code}"),
            None => println!("exit code: terminated"),
        },
        FlashEvent::Notice { message } => println!("== {message}"),
    })
}

fn run_capture(
    state: &AppState,
    args: CaptureArgs,
    trace_id: &str,
) -> Result<Vec<SessionInfo>, AppError> {
    let config = state.config();
    let out_dir = args
        .out_dir
        .unwrap_or_else(|| PathBuf::from(&config.capture.output_dir));
    let requests: Vec<CaptureRequest> = args
        .kinds
        .iter()
        .map(|kind| {
            CaptureRequest::new(
                *kind,
                args.keyword.clone(),
                default_capture_path(&out_dir, *kind).to_string_lossy(),
            )
            .case_sensitive(args.case_sensitive)
        })
        .collect();

    let mut desk = CaptureDesk::new(Arc::clone(&state.registry), |info: &SessionInfo| {
        Box::new(ConsoleView::new(info)) as Box<dyn LogView>
    });
    let sessions = commands::start_capture(&mut desk, requests, Some(trace_id.to_string()))?.data;
    for session in &sessions {
        eprintln!("{} -> {}", session.title(), session.path);
    }

    let deadline = args.duration.map(|duration| Instant::now() + duration);
    let finished = desk.run_until(deadline);
    if !finished {
        info!(trace_id = %trace_id, "capture duration elapsed");
    }
    desk.shutdown(trace_id);
    Ok(sessions)
}

fn run(invocation: Invocation, state: &AppState, trace_id: &str) -> Result<(), AppError> {
    let trace = || Some(trace_id.to_string());
    let json = invocation.json;
    match invocation.command {
        Command::Capture(args) => {
            let sessions = run_capture(state, args, trace_id)?;
            if json {
                let response = CommandResponse {
                    trace_id: trace_id.to_string(),
                    data: sessions,
                };
                print_response(&response, true);
            }
        }
        Command::Status => print_response(&commands::device_status(state, trace())?, json),
        Command::Env => {
            let response = commands::check_environment(state, trace())?;
            print_response(&response, json);
            if !response.data.is_ready() {
                return Err(AppError::dependency("Environment is not ready", trace_id));
            }
        }
        Command::Reboot => print_response(&commands::reboot_device(state, trace())?, json),
        Command::FlashAdb { file, target } => {
            let response =
                commands::flash_adb_push(state, file, target, console_emitter(), trace())?;
            print_response(&response, json);
        }
        Command::FlashFastboot { file } => {
            let response = commands::flash_fastboot_image(state, file, console_emitter(), trace())?;
            print_response(&response, json);
        }
        Command::Scrcpy => print_response(&commands::launch_scrcpy(state, trace())?, json),
        Command::History => print_response(&commands::history_snapshot(state, trace())?, json),
    }
    Ok(())
}

fn main() {
    let invocation = match parse_args(std::env::args().skip(1)) {
        Ok(invocation) => invocation,
        Err(msg) => {
            eprintln!("{msg}");
            std::process::exit(2);
        }
    };

    let trace_id = Uuid::new_v4().to_string();
    let mut config = match load_config(&trace_id) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Failed to load config: {err}");
            std::process::exit(1);
        }
    };
    init_logging(&config.logging.log_level);
    if let Some(serial) = invocation.serial.clone() {
        config.tools.serial = serial;
    }

    let state = AppState::new(config);
    if let Err(err) = run(invocation, &state, &trace_id) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
