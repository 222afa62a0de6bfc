use anyhow::{anyhow, Context, Result};
use clap::ArgMatches;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};

use benchlink_core::{
    ExecutionStatus, ProfileStore, ResultFormat, ResultsStore, RunnerControls, Sequence,
    SequenceRunner,
};
use benchlink_protocol::{LogGpio, UartTransport};

/// Controls of the run a Ctrl-C should stop. `ctrlc` allows one handler per
/// process, so the handler is installed once and reads the current slot.
static INTERRUPT_TARGET: Mutex<Option<RunnerControls>> = Mutex::new(None);
static INTERRUPT_HANDLER_INSTALLED: Mutex<bool> = Mutex::new(false);

fn install_interrupt_handler(controls: RunnerControls) -> Result<()> {
    *INTERRUPT_TARGET.lock() = Some(controls);
    let mut installed = INTERRUPT_HANDLER_INSTALLED.lock();
    if !*installed {
        ctrlc::set_handler(|| {
            if let Some(controls) = INTERRUPT_TARGET.lock().as_ref() {
                log::warn!("Interrupt received, stopping after the current step");
                controls.stop();
            }
        })
        .context("Failed to install interrupt handler")?;
        *installed = true;
    }
    Ok(())
}

fn profiles_dir(matches: &ArgMatches) -> Result<PathBuf> {
    match matches.get_one::<String>("profiles-dir") {
        Some(dir) => Ok(PathBuf::from(dir)),
        None => ProfileStore::default_dir(),
    }
}

fn results_dir(matches: &ArgMatches) -> Result<PathBuf> {
    match matches.get_one::<String>("results-dir") {
        Some(dir) => Ok(PathBuf::from(dir)),
        None => ResultsStore::default_dir(),
    }
}

pub fn handle_list_ports() -> Result<()> {
    let ports = UartTransport::list_ports();
    if ports.is_empty() {
        println!("No serial ports found");
        return Ok(());
    }
    for (device, description) in ports {
        println!("{device}\t{description}");
    }
    Ok(())
}

pub fn handle_list_profiles(matches: &ArgMatches) -> Result<()> {
    let store = ProfileStore::open(profiles_dir(matches)?)?;
    for profile in store.list() {
        println!(
            "{}\t{} @ {} baud",
            profile.name, profile.uart_port, profile.uart_baud
        );
    }
    Ok(())
}

pub fn handle_init_profiles(matches: &ArgMatches) -> Result<()> {
    let store = ProfileStore::open(profiles_dir(matches)?)?;
    println!("Profiles directory ready at {}", store.dir().display());
    Ok(())
}

/// Load the sequence and profile, run the engine, persist the result.
/// Returns whether the run passed.
pub fn handle_run(matches: &ArgMatches, sequence_file: &str) -> Result<bool> {
    let sequence = Sequence::load(Path::new(sequence_file))?;

    let profile_name = matches
        .get_one::<String>("profile")
        .expect("has default")
        .clone();
    let profile_store = ProfileStore::open(profiles_dir(matches)?)?;
    let profile = profile_store
        .get(&profile_name)
        .ok_or_else(|| anyhow!("No DUT profile named '{profile_name}'"))?
        .clone();

    let format: ResultFormat = matches
        .get_one::<String>("format")
        .expect("has default")
        .parse()?;

    let mut runner = SequenceRunner::new(Box::new(UartTransport::new()), Box::new(LogGpio));
    let controls = runner.controls();
    let progress = runner.progress_events();

    // Ctrl-C requests a cooperative stop; the run ends after the step in
    // flight completes.
    install_interrupt_handler(controls)?;

    let printer = std::thread::spawn(move || {
        for event in progress.iter() {
            log::info!(
                "Step {}/{} [{}]: {}",
                event.step_index + 1,
                event.total_steps,
                event.status,
                event.message
            );
        }
    });

    let result = runner.execute(&sequence, &profile);
    drop(runner); // closes the progress channel so the printer exits
    let _ = printer.join();

    let mut results_store = ResultsStore::open(results_dir(matches)?)?;
    let saved = results_store.save(&result, format)?;

    let passed = result.is_passed();
    if matches.get_flag("json") {
        let summary = serde_json::json!({
            "sequence": result.sequence_name,
            "status": result.status.to_string(),
            "passed": passed,
            "pass_count": result.pass_count,
            "fail_count": result.fail_count,
            "total_duration": result.total_duration,
            "error_message": result.error_message,
            "result_file": saved.display().to_string(),
        });
        println!("{summary}");
    } else {
        println!(
            "{}: {} ({} passed, {} failed, {:.3}s) -> {}",
            result.sequence_name,
            result.status,
            result.pass_count,
            result.fail_count,
            result.total_duration,
            saved.display()
        );
        if result.status == ExecutionStatus::Failed && !result.error_message.is_empty() {
            println!("error: {}", result.error_message);
        }
    }
    results_store.add(result);

    Ok(passed)
}
