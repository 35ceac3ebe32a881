use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use tracing::{info, warn};

use crate::app::adb::locator::serial_args;
use crate::app::adb::parse::{has_connected_device, DeviceMode};
use crate::app::adb::paths::validate_device_path;
use crate::app::adb::runner::{run_command_with_timeout, run_streaming_command, CommandOutput};
use crate::app::error::AppError;
use crate::app::models::{FileInfo, FlashEvent, FlashResult, FlashStepResult};

pub type FlashEmitter = Arc<dyn Fn(FlashEvent) + Send + Sync>;

const FASTBOOT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Process and clock access for the flash workflows.
pub trait CommandHost {
    /// Runs a step to completion, forwarding its output lines. Returns the exit code.
    fn run_step(
        &mut self,
        program: &str,
        args: &[String],
        on_line: &mut dyn FnMut(&str),
        trace_id: &str,
    ) -> Result<Option<i32>, AppError>;

    fn probe(
        &mut self,
        program: &str,
        args: &[String],
        timeout: Duration,
        trace_id: &str,
    ) -> Result<CommandOutput, AppError>;

    fn sleep(&mut self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemHost;

impl CommandHost for SystemHost {
    fn run_step(
        &mut self,
        program: &str,
        args: &[String],
        on_line: &mut dyn FnMut(&str),
        trace_id: &str,
    ) -> Result<Option<i32>, AppError> {
        run_streaming_command(program, args, on_line, trace_id)
    }

    fn probe(
        &mut self,
        program: &str,
        args: &[String],
        timeout: Duration,
        trace_id: &str,
    ) -> Result<CommandOutput, AppError> {
        run_command_with_timeout(program, args, timeout, trace_id)
    }

    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Clone)]
pub struct AdbPushPlan {
    pub adb: String,
    pub serial: String,
    pub file: PathBuf,
    pub target: String,
    pub reboot_settle: Duration,
}

#[derive(Debug, Clone)]
pub struct FastbootPlan {
    pub adb: String,
    pub fastboot: String,
    pub serial: String,
    pub file: PathBuf,
    pub partition: String,
    pub fastboot_wait_secs: u64,
}

/// Partition for an image file name, matched case-insensitively.
pub fn resolve_partition(file: &Path, partition_map: &BTreeMap<String, String>) -> Option<String> {
    let name = file.file_name()?.to_string_lossy().to_lowercase();
    partition_map
        .iter()
        .find(|(image, _)| image.to_lowercase() == name)
        .map(|(_, partition)| partition.clone())
}

pub fn file_info(path: &Path, trace_id: &str) -> Result<FileInfo, AppError> {
    let metadata = std::fs::metadata(path).map_err(|err| {
        AppError::validation(format!("Cannot read {}: {err}", path.display()), trace_id)
    })?;
    if !metadata.is_file() {
        return Err(AppError::validation(
            format!("{} is not a file", path.display()),
            trace_id,
        ));
    }
    let modified_at = metadata.modified().ok().map(|modified| {
        DateTime::<Local>::from(modified)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
    });
    Ok(FileInfo {
        path: path.to_string_lossy().to_string(),
        name: path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default(),
        modified_at,
    })
}

/// Runs steps in order, streaming events and recording exit codes.
struct StepRunner<'a, H: CommandHost> {
    host: &'a mut H,
    emit: FlashEmitter,
    trace_id: &'a str,
    steps: Vec<FlashStepResult>,
}

impl<'a, H: CommandHost> StepRunner<'a, H> {
    fn new(host: &'a mut H, emit: FlashEmitter, trace_id: &'a str) -> Self {
        Self {
            host,
            emit,
            trace_id,
            steps: Vec::new(),
        }
    }

    fn notice(&self, message: impl Into<String>) {
        (self.emit)(FlashEvent::Notice {
            message: message.into(),
        });
    }

    fn run(&mut self, program: &str, args: &[String]) -> Result<bool, AppError> {
        let command = std::iter::once(program.to_string())
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");
        (self.emit)(FlashEvent::StepStarted {
            command: command.clone(),
        });
        let emit = Arc::clone(&self.emit);
        let mut forward = |line: &str| {
            emit(FlashEvent::Output {
                line: line.to_string(),
            })
        };
        let exit_code = self
            .host
            .run_step(program, args, &mut forward, self.trace_id)?;
        (self.emit)(FlashEvent::StepFinished {
            command: command.clone(),
            exit_code,
        });
        self.steps.push(FlashStepResult { command, exit_code });
        Ok(exit_code == Some(0))
    }

    fn require(&mut self, program: &str, args: &[String], failure: &str) -> Result<(), AppError> {
        if self.run(program, args)? {
            Ok(())
        } else {
            warn!(trace_id = %self.trace_id, step = %failure, "flash step failed");
            Err(AppError::dependency(failure, self.trace_id))
        }
    }
}

fn with_serial(serial: &str, args: &[&str]) -> Vec<String> {
    let mut full = serial_args(serial);
    full.extend(args.iter().map(|arg| arg.to_string()));
    full
}

/// wait-for-device, root, disable-verity (one reboot retry), remount, push.
pub fn run_adb_push<H: CommandHost>(
    host: &mut H,
    plan: &AdbPushPlan,
    emit: FlashEmitter,
    trace_id: &str,
) -> Result<FlashResult, AppError> {
    let file = file_info(&plan.file, trace_id)?;
    validate_device_path(&plan.target).map_err(|err| AppError::validation(err, trace_id))?;
    let target = plan.target.trim().to_string();
    let adb = plan.adb.as_str();

    let mut steps = StepRunner::new(host, emit, trace_id);
    steps.require(adb, &with_serial(&plan.serial, &["wait-for-device"]), "Device not connected")?;
    steps.require(adb, &with_serial(&plan.serial, &["root"]), "Failed to obtain root")?;
    if !steps.run(adb, &with_serial(&plan.serial, &["disable-verity"]))? {
        steps.notice("disable-verity failed, rebooting the device and retrying");
        steps.run(adb, &with_serial(&plan.serial, &["reboot"]))?;
        steps.host.sleep(plan.reboot_settle);
        steps.require(
            adb,
            &with_serial(&plan.serial, &["wait-for-device"]),
            "Device did not reconnect after reboot",
        )?;
        steps.require(
            adb,
            &with_serial(&plan.serial, &["root"]),
            "Failed to obtain root after reboot",
        )?;
    }
    steps.require(adb, &with_serial(&plan.serial, &["remount"]), "Failed to remount partitions")?;
    let push_args = {
        let mut args = serial_args(&plan.serial);
        args.push("push".to_string());
        args.push(file.path.clone());
        args.push(target.clone());
        args
    };
    steps.require(adb, &push_args, "Failed to push file")?;
    steps.notice("File pushed");

    info!(trace_id = %trace_id, file = %file.path, target = %target, "adb push finished");
    Ok(FlashResult {
        file,
        destination: target,
        steps: steps.steps,
    })
}

/// Reboots into the bootloader, waits for fastboot, flashes the partition and
/// reboots.
pub fn run_fastboot_flash<H: CommandHost>(
    host: &mut H,
    plan: &FastbootPlan,
    emit: FlashEmitter,
    trace_id: &str,
) -> Result<FlashResult, AppError> {
    let file = file_info(&plan.file, trace_id)?;
    if plan.partition.trim().is_empty() {
        return Err(AppError::validation(
            format!("No partition known for {}", file.name),
            trace_id,
        ));
    }
    let adb = plan.adb.as_str();
    let fastboot = plan.fastboot.as_str();

    let mut steps = StepRunner::new(host, emit, trace_id);
    steps.require(adb, &with_serial(&plan.serial, &["wait-for-device"]), "Device not connected")?;
    steps.require(
        adb,
        &with_serial(&plan.serial, &["reboot", "bootloader"]),
        "Failed to reboot into the bootloader",
    )?;

    steps.notice("Waiting for fastboot mode");
    let attempts = plan.fastboot_wait_secs.max(1);
    let mut in_fastboot = false;
    for attempt in 0..attempts {
        match steps.host.probe(
            fastboot,
            &["devices".to_string()],
            FASTBOOT_PROBE_TIMEOUT,
            trace_id,
        ) {
            Ok(output) if has_connected_device(&output.stdout, DeviceMode::Fastboot) => {
                in_fastboot = true;
                break;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(trace_id = %trace_id, attempt, error = %err, "fastboot probe failed");
            }
        }
        steps.host.sleep(Duration::from_secs(1));
    }
    if !in_fastboot {
        return Err(AppError::dependency(
            format!(
                "Device did not enter fastboot mode within {}s",
                plan.fastboot_wait_secs
            ),
            trace_id,
        ));
    }
    steps.notice("Fastboot device detected");

    let flash_args = {
        let mut args = serial_args(&plan.serial);
        args.push("flash".to_string());
        args.push(plan.partition.clone());
        args.push(file.path.clone());
        args
    };
    steps.require(fastboot, &flash_args, "Fastboot flash failed")?;
    steps.require(fastboot, &with_serial(&plan.serial, &["reboot"]), "Fastboot reboot failed")?;
    steps.notice("Flash finished, device is rebooting");

    info!(
        trace_id = %trace_id,
        file = %file.path,
        partition = %plan.partition,
        "fastboot flash finished"
    );
    Ok(FlashResult {
        file,
        destination: plan.partition.clone(),
        steps: steps.steps,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::config::default_partition_map;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedHost {
        exit_codes: HashMap<String, VecDeque<Option<i32>>>,
        probes: VecDeque<String>,
        calls: Vec<String>,
        slept: Vec<Duration>,
    }

    impl ScriptedHost {
        fn fail(mut self, command: &str, codes: &[Option<i32>]) -> Self {
            self.exit_codes
                .insert(command.to_string(), codes.iter().copied().collect());
            self
        }

        fn probe_outputs(mut self, outputs: &[&str]) -> Self {
            self.probes = outputs.iter().map(|s| s.to_string()).collect();
            self
        }
    }

    impl CommandHost for ScriptedHost {
        fn run_step(
            &mut self,
            program: &str,
            args: &[String],
            on_line: &mut dyn FnMut(&str),
            _trace_id: &str,
        ) -> Result<Option<i32>, AppError> {
            let command = format!("{program} {}", args.join(" "));
            on_line(&format!("ran {command}"));
            self.calls.push(command.clone());
            let code = self
                .exit_codes
                .get_mut(&command)
                .and_then(|codes| codes.pop_front())
                .unwrap_or(Some(0));
            Ok(code)
        }

        fn probe(
            &mut self,
            program: &str,
            args: &[String],
            _timeout: Duration,
            _trace_id: &str,
        ) -> Result<CommandOutput, AppError> {
            self.calls.push(format!("{program} {}", args.join(" ")));
            Ok(CommandOutput {
                stdout: self.probes.pop_front().unwrap_or_default(),
                stderr: String::new(),
                exit_code: Some(0),
            })
        }

        fn sleep(&mut self, duration: Duration) {
            self.slept.push(duration);
        }
    }

    fn collecting_emitter() -> (FlashEmitter, Arc<Mutex<Vec<FlashEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let emitter: FlashEmitter = Arc::new(move |event: FlashEvent| {
            sink.lock().expect("events").push(event);
        });
        (emitter, events)
    }

    fn image(dir: &tempfile::TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, b"image").expect("write image");
        path
    }

    fn push_plan(file: PathBuf) -> AdbPushPlan {
        AdbPushPlan {
            adb: "adb".to_string(),
            serial: String::new(),
            file,
            target: "/system/lib64/".to_string(),
            reboot_settle: Duration::from_secs(20),
        }
    }

    #[test]
    fn adb_push_runs_the_happy_path_in_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = image(&dir, "libfoo.so");
        let mut host = ScriptedHost::default();
        let (emit, events) = collecting_emitter();

        let result = run_adb_push(&mut host, &push_plan(file.clone()), emit, "t").expect("push");

        let push = format!("adb push {} /system/lib64/", file.display());
        assert_eq!(
            host.calls,
            vec![
                "adb wait-for-device".to_string(),
                "adb root".to_string(),
                "adb disable-verity".to_string(),
                "adb remount".to_string(),
                push,
            ]
        );
        assert!(host.slept.is_empty());
        assert_eq!(result.file.name, "libfoo.so");
        assert!(result.file.modified_at.is_some());
        assert_eq!(result.steps.len(), 5);
        let events = events.lock().expect("events");
        assert!(events.contains(&FlashEvent::Output {
            line: "ran adb root".to_string()
        }));
        assert!(events.contains(&FlashEvent::StepFinished {
            command: "adb remount".to_string(),
            exit_code: Some(0)
        }));
    }

    #[test]
    fn adb_push_reboots_once_when_disable_verity_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = image(&dir, "libfoo.so");
        let mut host = ScriptedHost::default().fail("adb disable-verity", &[Some(1)]);
        let (emit, _events) = collecting_emitter();

        run_adb_push(&mut host, &push_plan(file), emit, "t").expect("push");

        assert_eq!(&host.calls[2..7], &[
            "adb disable-verity",
            "adb reboot",
            "adb wait-for-device",
            "adb root",
            "adb remount",
        ]);
        assert_eq!(host.slept, vec![Duration::from_secs(20)]);
    }

    #[test]
    fn adb_push_stops_at_the_first_failing_step() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = image(&dir, "libfoo.so");
        let mut host = ScriptedHost::default().fail("adb remount", &[Some(1)]);
        let (emit, _events) = collecting_emitter();

        let err = run_adb_push(&mut host, &push_plan(file), emit, "t").expect_err("fail");
        assert_eq!(err.error, "Failed to remount partitions");
        assert!(host.calls.iter().all(|call| !call.contains(" push ")));
    }

    #[test]
    fn adb_push_validates_inputs_before_running_anything() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut host = ScriptedHost::default();
        let (emit, _events) = collecting_emitter();

        let missing = push_plan(dir.path().join("missing.so"));
        let err = run_adb_push(&mut host, &missing, Arc::clone(&emit), "t").expect_err("missing");
        assert_eq!(err.code, crate::app::error::ERR_VALIDATION);

        let mut relative = push_plan(image(&dir, "libfoo.so"));
        relative.target = "system/lib64".to_string();
        let err = run_adb_push(&mut host, &relative, emit, "t").expect_err("relative");
        assert_eq!(err.code, crate::app::error::ERR_VALIDATION);
        assert!(host.calls.is_empty());
    }

    #[test]
    fn resolves_partitions_case_insensitively() {
        let map = default_partition_map();
        assert_eq!(
            resolve_partition(Path::new("/images/BOOT.IMG"), &map),
            Some("boot_a".to_string())
        );
        assert_eq!(
            resolve_partition(Path::new("recovery.img"), &map),
            Some("recovery".to_string())
        );
        assert_eq!(resolve_partition(Path::new("userdata.img"), &map), None);
    }

    fn fastboot_plan(file: PathBuf, wait: u64) -> FastbootPlan {
        FastbootPlan {
            adb: "adb".to_string(),
            fastboot: "fastboot".to_string(),
            serial: String::new(),
            file,
            partition: "boot_a".to_string(),
            fastboot_wait_secs: wait,
        }
    }

    #[test]
    fn fastboot_flow_waits_for_the_bootloader_then_flashes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = image(&dir, "boot.img");
        let mut host =
            ScriptedHost::default().probe_outputs(&["", "", "0123456789ABCDEF\tfastboot\n"]);
        let (emit, _events) = collecting_emitter();

        let result = run_fastboot_flash(&mut host, &fastboot_plan(file.clone(), 30), emit, "t")
            .expect("flash");

        assert_eq!(result.destination, "boot_a");
        assert_eq!(host.slept, vec![Duration::from_secs(1); 2]);
        let flash = format!("fastboot flash boot_a {}", file.display());
        assert_eq!(
            host.calls,
            vec![
                "adb wait-for-device".to_string(),
                "adb reboot bootloader".to_string(),
                "fastboot devices".to_string(),
                "fastboot devices".to_string(),
                "fastboot devices".to_string(),
                flash,
                "fastboot reboot".to_string(),
            ]
        );
    }

    #[test]
    fn fastboot_flow_times_out_without_a_device() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = image(&dir, "boot.img");
        let mut host = ScriptedHost::default();
        let (emit, _events) = collecting_emitter();

        let err = run_fastboot_flash(&mut host, &fastboot_plan(file, 3), emit, "t")
            .expect_err("timeout");
        assert_eq!(err.code, crate::app::error::ERR_DEPENDENCY);
        assert_eq!(host.slept.len(), 3);
        assert!(host.calls.iter().all(|call| !call.contains("flash")));
    }
}
