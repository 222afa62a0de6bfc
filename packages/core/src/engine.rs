use chrono::{DateTime, Local};
use parking_lot::RwLock;
use serde::Serialize;
use std::{
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use strum::Display;

use benchlink_protocol::{Command, CommandLink, GpioDriver, SleepMode};

use crate::{
    profile::DutProfile,
    sequence::{Sequence, Step},
};

/// Firmware task numbers the QA agent accepts.
const TASK_MIN: i64 = 1;
const TASK_MAX: i64 = 4;

/// How often a paused run re-checks its flags.
const PAUSE_POLL: Duration = Duration::from_millis(100);

type DataMap = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Idle,
    Running,
    Paused,
    Completed,
    Failed,
    Stopped,
}

/// Outcome of one step attempt. Created once, appended to the run result,
/// never mutated afterwards.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub step: Step,
    pub success: bool,
    pub message: String,
    /// Wall-clock seconds spent in the step.
    pub duration: f64,
    pub timestamp: DateTime<Local>,
    /// Free-form extras, e.g. the raw MCU response.
    pub data: DataMap,
}

/// Outcome of a whole run. Owned exclusively by the runner while in
/// progress, frozen once a terminal status is reached.
#[derive(Debug, Clone)]
pub struct SequenceResult {
    pub sequence_name: String,
    pub status: ExecutionStatus,
    pub start_time: DateTime<Local>,
    pub end_time: Option<DateTime<Local>>,
    pub step_results: Vec<StepResult>,
    pub total_duration: f64,
    pub pass_count: u32,
    pub fail_count: u32,
    pub error_message: String,
}

impl SequenceResult {
    fn started(sequence_name: String, start_time: DateTime<Local>) -> Self {
        Self {
            sequence_name,
            status: ExecutionStatus::Running,
            start_time,
            end_time: None,
            step_results: Vec::new(),
            total_duration: 0.0,
            pass_count: 0,
            fail_count: 0,
            error_message: String::new(),
        }
    }

    /// Run that failed before any step could execute.
    fn aborted(sequence_name: String, start_time: DateTime<Local>, error: String) -> Self {
        let mut result = Self::started(sequence_name, start_time);
        result.status = ExecutionStatus::Failed;
        result.end_time = Some(Local::now());
        result.error_message = error;
        result
    }

    pub fn is_passed(&self) -> bool {
        self.status == ExecutionStatus::Completed && self.fail_count == 0
    }
}

/// Progress notification emitted after each completed step. The receiving
/// side marshals to its own thread; no assumptions are made here.
#[derive(Debug, Clone, Serialize)]
pub struct Progress {
    pub step_index: usize,
    pub total_steps: usize,
    pub status: ExecutionStatus,
    pub message: String,
}

/// Cloneable cross-thread handle for pausing, resuming and stopping a run.
/// All requests are cooperative: the runner checks them between steps, never
/// mid-step.
#[derive(Clone)]
pub struct RunnerControls {
    stop: Arc<AtomicBool>,
    pause: Arc<AtomicBool>,
    status: Arc<RwLock<ExecutionStatus>>,
}

impl RunnerControls {
    fn new() -> Self {
        Self {
            stop: Arc::new(AtomicBool::new(false)),
            pause: Arc::new(AtomicBool::new(false)),
            status: Arc::new(RwLock::new(ExecutionStatus::Idle)),
        }
    }

    /// Request the run to end. Idempotent; a no-op once the run is over.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn pause(&self) {
        self.pause.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.pause.store(false, Ordering::SeqCst);
    }

    pub fn status(&self) -> ExecutionStatus {
        *self.status.read()
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn pause_requested(&self) -> bool {
        self.pause.load(Ordering::SeqCst)
    }

    fn set_status(&self, status: ExecutionStatus) {
        *self.status.write() = status;
    }

    fn begin_run(&self) {
        self.stop.store(false, Ordering::SeqCst);
        self.pause.store(false, Ordering::SeqCst);
        self.set_status(ExecutionStatus::Running);
    }
}

/// Interprets a [`Sequence`] against a DUT profile over a [`CommandLink`].
///
/// Designed to run on a dedicated worker thread: the owner moves the runner
/// there, keeps a [`RunnerControls`] clone and the progress receiver, and
/// calls [`execute`](Self::execute). `execute` takes `&mut self`, so a
/// second concurrent run on the same instance cannot compile.
pub struct SequenceRunner {
    link: Box<dyn CommandLink>,
    gpio: Box<dyn GpioDriver>,
    controls: RunnerControls,
    progress_tx: Option<flume::Sender<Progress>>,
}

impl SequenceRunner {
    pub fn new(link: Box<dyn CommandLink>, gpio: Box<dyn GpioDriver>) -> Self {
        Self {
            link,
            gpio,
            controls: RunnerControls::new(),
            progress_tx: None,
        }
    }

    pub fn controls(&self) -> RunnerControls {
        self.controls.clone()
    }

    /// Subscribe to per-step progress events. Replaces any previous
    /// subscription.
    pub fn progress_events(&mut self) -> flume::Receiver<Progress> {
        let (tx, rx) = flume::unbounded();
        self.progress_tx = Some(tx);
        rx
    }

    /// Run every step of `sequence` in order against the DUT described by
    /// `profile`. The first failing step halts the run. The UART link is
    /// opened from the profile up front and deliberately left open when the
    /// run ends so consecutive runs reuse the connection.
    pub fn execute(&mut self, sequence: &Sequence, profile: &DutProfile) -> SequenceResult {
        self.controls.begin_run();
        let start_time = Local::now();
        log::info!(
            "Executing sequence '{}' ({} steps) against '{}'",
            sequence.name,
            sequence.steps.len(),
            profile.name
        );

        if let Err(err) = self.link.open(&profile.uart_port, profile.uart_baud) {
            self.controls.set_status(ExecutionStatus::Failed);
            let message = format!(
                "{err}. Check permissions and that no other program is using the port."
            );
            log::error!("{message}");
            return SequenceResult::aborted(sequence.name.clone(), start_time, message);
        }

        let mut result = SequenceResult::started(sequence.name.clone(), start_time);
        let total = sequence.steps.len();
        let mut step_index = 0usize;
        let mut repeat_count = 0u32;

        while step_index < total {
            if self.controls.stop_requested() {
                break;
            }
            if self.controls.pause_requested() {
                self.controls.set_status(ExecutionStatus::Paused);
                log::info!("Sequence '{}' paused", sequence.name);
                while self.controls.pause_requested() && !self.controls.stop_requested() {
                    std::thread::sleep(PAUSE_POLL);
                }
                if self.controls.stop_requested() {
                    break;
                }
                self.controls.set_status(ExecutionStatus::Running);
                log::info!("Sequence '{}' resumed", sequence.name);
            }

            let step = &sequence.steps[step_index];
            let step_result = self.execute_step(step, profile);
            let success = step_result.success;
            let message = step_result.message.clone();
            result.step_results.push(step_result);
            self.notify_progress(step_index, total, &message);

            if !success {
                result.fail_count += 1;
                result.error_message = message.clone();
                self.controls.set_status(ExecutionStatus::Failed);
                log::warn!(
                    "Step {}/{} ({}) failed: {message}",
                    step_index + 1,
                    total,
                    step.kind()
                );
                break;
            }
            result.pass_count += 1;
            step_index += 1;

            // A repeat marker restarts the entire sequence from index 0,
            // not a sub-block.
            if let Step::Repeat { count } = *step {
                if repeat_count < count {
                    repeat_count += 1;
                    step_index = 0;
                } else {
                    repeat_count = 0;
                }
            }
        }

        let status = if self.controls.status() == ExecutionStatus::Failed {
            ExecutionStatus::Failed
        } else if self.controls.stop_requested() {
            ExecutionStatus::Stopped
        } else {
            ExecutionStatus::Completed
        };
        self.controls.set_status(status);
        result.status = status;
        let end_time = Local::now();
        result.end_time = Some(end_time);
        result.total_duration = (end_time - start_time).num_milliseconds() as f64 / 1000.0;
        log::info!(
            "Sequence '{}' finished: {status} ({} passed, {} failed, {:.3}s)",
            sequence.name,
            result.pass_count,
            result.fail_count,
            result.total_duration
        );
        // Link stays open for the next run.
        result
    }

    fn notify_progress(&self, step_index: usize, total_steps: usize, message: &str) {
        if let Some(tx) = &self.progress_tx {
            // A dropped receiver just means nobody is listening.
            let _ = tx.send(Progress {
                step_index,
                total_steps,
                status: self.controls.status(),
                message: message.to_string(),
            });
        }
    }

    fn execute_step(&mut self, step: &Step, profile: &DutProfile) -> StepResult {
        let started = Instant::now();
        let timestamp = Local::now();
        log::debug!("Executing {} step", step.kind());

        let (success, message, data) = match step {
            Step::Wake { gpio } => self.run_wake(*gpio, profile),
            Step::Task { number, .. } => self.run_task(*number, profile),
            Step::Sleep {
                mode,
                duration,
                unit,
            } => self.run_sleep(mode, *duration, unit.as_deref()),
            Step::Wait { duration, unit } => run_wait(*duration, unit),
            Step::Repeat { .. } => (true, "Repeat marker".to_string(), DataMap::new()),
            Step::Pass { message } => (
                true,
                message.clone().unwrap_or_else(|| "Pass".to_string()),
                DataMap::new(),
            ),
            Step::Fail { message } => (
                false,
                message.clone().unwrap_or_else(|| "Fail".to_string()),
                DataMap::new(),
            ),
        };

        StepResult {
            step: step.clone(),
            success,
            message,
            duration: started.elapsed().as_secs_f64(),
            timestamp,
            data,
        }
    }

    fn run_wake(&mut self, gpio: Option<u8>, profile: &DutProfile) -> (bool, String, DataMap) {
        let Some(pin) = gpio.or(profile.gpio_wake) else {
            return (
                false,
                "No GPIO specified for wake".to_string(),
                DataMap::new(),
            );
        };
        let mut data = DataMap::new();
        data.insert("gpio".to_string(), pin.into());
        match self.gpio.pulse_wake(pin) {
            Ok(()) => (true, format!("Wake pulse on GPIO {pin}"), data),
            Err(err) => (false, format!("Wake failed: {err}"), data),
        }
    }

    fn run_task(&mut self, number: i64, profile: &DutProfile) -> (bool, String, DataMap) {
        if !(TASK_MIN..=TASK_MAX).contains(&number) {
            return (
                false,
                format!("Invalid task number: {number} (must be {TASK_MIN}-{TASK_MAX})"),
                DataMap::new(),
            );
        }
        let command = Command::Task(number as u8);
        let (ok, response) = self.link.send_command(&command.to_string());

        let mut data = DataMap::new();
        data.insert("task_number".to_string(), number.into());
        data.insert("response".to_string(), response.clone().into());
        if let Some(label) = profile.task_description(number) {
            data.insert("description".to_string(), label.into());
        }

        let message = if response.is_empty() {
            format!("Task {number} executed")
        } else {
            response
        };
        (ok, message, data)
    }

    fn run_sleep(
        &mut self,
        mode: &str,
        duration: Option<f64>,
        unit: Option<&str>,
    ) -> (bool, String, DataMap) {
        let Ok(parsed) = SleepMode::from_str(mode) else {
            return (
                false,
                format!("Invalid sleep mode: {mode} (must be one of ACTIVE, LIGHT, DEEP, SHUTDOWN)"),
                DataMap::new(),
            );
        };
        let (ok, response) = self.link.send_command(&Command::Sleep(parsed).to_string());

        let mut data = DataMap::new();
        data.insert("mode".to_string(), parsed.to_string().into());
        data.insert("response".to_string(), response.clone().into());

        // MCU is assumed unreachable while asleep; hold the run locally for
        // the configured span before moving on.
        if let Some(span) = duration {
            let unit = unit.unwrap_or("seconds");
            match convert_duration(span, unit) {
                Some(wait) => std::thread::sleep(wait),
                None => {
                    return (
                        false,
                        format!("Invalid sleep duration: {span} {unit}"),
                        data,
                    )
                }
            }
        }

        let message = if response.is_empty() {
            format!("Sleep mode {parsed} commanded")
        } else {
            response
        };
        (ok, message, data)
    }
}

fn run_wait(duration: f64, unit: &str) -> (bool, String, DataMap) {
    let Some(wait) = convert_duration(duration, unit) else {
        return (
            false,
            format!("Invalid wait duration: {duration} {unit}"),
            DataMap::new(),
        );
    };
    std::thread::sleep(wait);
    (true, format!("Waited {duration} {unit}"), DataMap::new())
}

/// Convert a `(value, unit)` pair to a `Duration`. Unrecognized units are
/// treated as seconds, negative and NaN values as zero. Returns `None` when
/// the span does not fit in a `Duration`, so a malformed step fails instead
/// of panicking mid-run.
fn convert_duration(value: f64, unit: &str) -> Option<Duration> {
    let seconds = match unit.to_ascii_lowercase().as_str() {
        "ms" => value / 1000.0,
        "seconds" | "s" => value,
        "minutes" | "min" => value * 60.0,
        _ => value,
    };
    Duration::try_from_secs_f64(seconds.max(0.0)).ok()
}
