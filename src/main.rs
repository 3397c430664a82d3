// src/main.rs
use clap::Parser;
use std::{
    io,
    path::PathBuf,
    process,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use thermofan::config::{CliArgs, Settings, load_config_file};
use thermofan::device::{Device, Peripherals};
use thermofan::hardware::{
    self, AutoModeGuard, HwmonPwm, HwmonSensor, NoUpdates, NullSwitch, Switch, SysfsSwitch,
};
use thermofan::remote::{OfflineLink, TcpLink, TelemetryLink};
use thermofan::scheduler::Millis;

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "thermofan=debug"
    } else {
        "thermofan=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(io::stderr)
        .init();
}

fn switch_for(path: Option<PathBuf>) -> Box<dyn Switch> {
    match path {
        Some(path) => Box::new(SysfsSwitch::new(path)),
        None => Box::new(NullSwitch::default()),
    }
}

fn link_for(settings: &Settings) -> Box<dyn TelemetryLink> {
    match &settings.endpoint {
        Some(endpoint) => Box::new(TcpLink::new(
            endpoint.clone(),
            settings.device_name.clone(),
            settings.token.clone(),
        )),
        None => {
            info!("No telemetry endpoint configured; running offline.");
            Box::new(OfflineLink)
        }
    }
}

/// Runs the cooperative control loop until a termination signal arrives.
fn run_control_loop(device: &mut Device, boot: Instant, loop_period: Millis, running: &AtomicBool) {
    info!("--- Starting Control Loop ---");

    while running.load(Ordering::SeqCst) {
        let now = boot.elapsed().as_millis() as Millis;
        device.tick(now);

        // Never sleep past the next due task, never longer than one loop period.
        let now = boot.elapsed().as_millis() as Millis;
        let nap = device
            .next_deadline()
            .map_or(loop_period, |due| due.saturating_sub(now))
            .clamp(1, loop_period);
        thread::sleep(Duration::from_millis(nap));
    }

    info!(
        "Loop terminated. Fan duty {} (override {}), link {:?} after {} reconnect attempts.",
        device.fan().current(),
        device.fan().override_active(),
        device.link_state(),
        device.reconnect_attempts()
    );
}

// --- Main Function ---

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli_args = CliArgs::parse();
    init_tracing(cli_args.verbose);

    // Setup termination flag and Ctrl+C / SIGTERM handler
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        info!("Received termination signal, stopping...");
        r.store(false, Ordering::SeqCst);
    })?;

    // Merge configurations (CLI > File > Default)
    let file_config = load_config_file(cli_args.config.clone());
    let settings = match Settings::resolve(cli_args, file_config) {
        Ok(settings) => settings,
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    };

    // Check root privileges
    if unsafe { libc::geteuid() } != 0 {
        error!("Root required to drive hwmon PWM outputs.");
        process::exit(1);
    }

    // Resolve hardware paths
    let temp_path = hardware::resolve_input_path(&settings.temp_sensor_spec)?;
    let humidity_path = settings
        .humidity_sensor_spec
        .as_deref()
        .map(hardware::resolve_input_path)
        .transpose()?;
    let pwm_paths = hardware::resolve_pwm_paths(&settings.fan_control_spec)?;

    for path in [Some(&temp_path), humidity_path.as_ref(), Some(&pwm_paths.pwm)]
        .into_iter()
        .flatten()
    {
        if !path.exists() {
            return Err(format!("Resolved path does not exist: {}", path.display()).into());
        }
    }

    // Take control of PWM; the guard restores the original mode on exit
    let _guard = AutoModeGuard::take_manual(pwm_paths.enable.clone())?;
    hardware::set_pwm_frequency(&pwm_paths.freq, settings.pwm_frequency);

    let io = Peripherals {
        sensor: Box::new(HwmonSensor::new(
            temp_path,
            humidity_path,
            settings.fahrenheit,
        )),
        fan: Box::new(HwmonPwm::new(pwm_paths.pwm.clone(), settings.control.duty_max)),
        link: link_for(&settings),
        updates: Box::new(NoUpdates),
        liveness: switch_for(settings.led_path.clone()),
        relay: switch_for(settings.relay_path.clone()),
    };

    let boot = Instant::now();
    let mut device = Device::new(settings.control.clone(), settings.endpoint.clone(), io, 0)?;
    run_control_loop(&mut device, boot, settings.loop_period_ms, &running);

    info!("Exited due to signal.");
    Ok(())
}
