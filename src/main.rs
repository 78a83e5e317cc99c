use std::{
    path::{Path, PathBuf},
    sync::mpsc::{self, Receiver, RecvTimeoutError, Sender},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use clap::{Parser, Subcommand};
use log::{LevelFilter, debug, error, info};

use teledash::{
    Dashboard, TeledashError,
    archive::write_calibration_archive,
    calibration::{CalibrationSession, InputValue, Phase},
    config::AppConfig,
    connection::{ConnectionSupervisor, MockTransport, Transport, WsTransport},
    protocol::InboundEvent,
    transcript::{self, TranscriptEntry},
};

const TICK_MS: u64 = 50;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Args {
    /// Log debug output, also in release builds.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Connect to the backend and print status changes and events.
    Monitor {
        #[arg(short, long)]
        addr: Option<String>,

        #[arg(short, long)]
        transcript: Option<PathBuf>,
    },
    /// Walk through the calibration wizard from the terminal.
    Calibrate {
        #[arg(short, long)]
        addr: Option<String>,

        #[arg(short, long)]
        transcript: Option<PathBuf>,
    },
    /// Feed the inbound frames of a transcript through a calibration session.
    Replay {
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Write the settings in effect to the config file and print where it lives.
    Config,
}

/// Everything the main loop reacts to besides the clock.
enum Control {
    Line(String),
    Exit,
}

fn control_channel() -> Result<(Sender<Control>, Receiver<Control>), TeledashError> {
    let (control_tx, control_rx) = mpsc::channel();
    let ctrlc_tx = control_tx.clone();
    ctrlc::set_handler(move || {
        println!("Exiting...");
        let _ = ctrlc_tx.send(Control::Exit);
    })
    .map_err(|e| TeledashError::SignalHandlerError {
        description: e.to_string(),
    })?;
    Ok((control_tx, control_rx))
}

fn spawn_stdin_reader(control_tx: Sender<Control>) {
    thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            if control_tx.send(Control::Line(line)).is_err() {
                return;
            }
        }
        let _ = control_tx.send(Control::Exit);
    });
}

/// Starts the transcript writer when a transcript was requested.
fn start_transcript(
    path: Option<PathBuf>,
    config: &AppConfig,
) -> (Option<Sender<TranscriptEntry>>, Option<JoinHandle<()>>) {
    let path = path.or_else(|| {
        config
            .transcript_dir
            .as_ref()
            .map(|dir| dir.join(transcript::transcript_file_name()))
    });
    let Some(path) = path else {
        return (None, None);
    };
    let (transcript_tx, transcript_rx) = mpsc::channel::<TranscriptEntry>();
    let writer = thread::spawn(move || {
        if let Err(e) = transcript::write_transcript(&path, transcript_rx) {
            error!("Transcript writer stopped: {}", e);
        }
    });
    (Some(transcript_tx), Some(writer))
}

fn dashboard(
    addr: Option<String>,
    transcript_tx: Option<Sender<TranscriptEntry>>,
    config: &AppConfig,
) -> Dashboard<WsTransport> {
    let addr = addr.unwrap_or_else(|| config.backend_addr.clone());
    info!("Using backend at {}", addr);
    let mut supervisor = ConnectionSupervisor::new(WsTransport::new(&addr), config.supervisor_config());
    if let Some(transcript_tx) = transcript_tx {
        supervisor = supervisor.with_transcript(transcript_tx);
    }
    Dashboard::new(supervisor)
}

fn monitor(addr: Option<String>, transcript: Option<PathBuf>) -> Result<(), TeledashError> {
    let config = AppConfig::from_local_file();
    let (control_tx, control_rx) = control_channel()?;
    drop(control_tx);
    let (transcript_tx, writer) = start_transcript(transcript, &config);

    let mut dashboard = dashboard(addr, transcript_tx, &config);
    let status_rx = dashboard.supervisor_mut().status_changes();
    dashboard.start();
    loop {
        match control_rx.recv_timeout(Duration::from_millis(TICK_MS)) {
            Ok(Control::Exit) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(Control::Line(_)) | Err(RecvTimeoutError::Timeout) => {}
        }
        for event in dashboard.tick(Instant::now()) {
            print_event(&event);
        }
        for status in status_rx.try_iter() {
            println!("status: {}", status);
        }
    }
    dashboard.shutdown();
    drop(dashboard);
    if let Some(writer) = writer {
        let _ = writer.join();
    }
    Ok(())
}

fn print_event(event: &InboundEvent) {
    match event {
        InboundEvent::Telemetry { channel, value } => println!("{}: {}", channel.name(), value),
        InboundEvent::Calibration(event) => println!("Calibration: {:?}", event),
        InboundEvent::Unhandled { channel, data } => println!("{} (unhandled): {}", channel, data),
        other => println!("{:?}", other),
    }
}

fn calibrate(addr: Option<String>, transcript: Option<PathBuf>) -> Result<(), TeledashError> {
    let config = AppConfig::from_local_file();
    let (control_tx, control_rx) = control_channel()?;
    spawn_stdin_reader(control_tx);
    let (transcript_tx, writer) = start_transcript(transcript, &config);

    let mut dashboard = dashboard(addr, transcript_tx, &config);
    let status_rx = dashboard.supervisor_mut().status_changes();
    dashboard.start();
    dashboard.open_calibration();
    print_help();

    loop {
        match control_rx.recv_timeout(Duration::from_millis(TICK_MS)) {
            Ok(Control::Exit) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(Control::Line(line)) => match run_command(&mut dashboard, line.trim()) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    eprintln!("{}", e);
                    debug!("Command '{}' rejected: {:?}", line.trim(), e);
                }
            },
            Err(RecvTimeoutError::Timeout) => {}
        }
        dashboard.tick(Instant::now());
        for status in status_rx.try_iter() {
            println!("status: {}", status);
        }
        let archive = dashboard
            .with_calibration(|session, _| session.take_archive())
            .ok()
            .flatten();
        if let Some(archive) = archive {
            match write_calibration_archive(&archive, &config.archive_dir) {
                Ok(path) => println!("Calibration archive saved to {}", path.display()),
                Err(e) => error!("Could not save calibration archive: {}", e),
            }
        }
    }
    dashboard.shutdown();
    drop(dashboard);
    if let Some(writer) = writer {
        let _ = writer.join();
    }
    Ok(())
}

fn print_help() {
    println!("Commands:");
    println!("  show                 print the current step");
    println!("  press <n>            press button n of the current step");
    println!("  set <field> <value>  fill an input of the current step");
    println!("  next | prev          move between steps");
    println!("  step <n>             jump to step n");
    println!("  complete             finish calibration and quit");
    println!("  exit                 abandon calibration and quit");
}

/// Runs one wizard command. Returns false when the wizard should close.
fn run_command<T: Transport>(
    dashboard: &mut Dashboard<T>,
    line: &str,
) -> Result<bool, TeledashError> {
    let mut words = line.split_whitespace();
    match (words.next(), words.next(), words.next()) {
        (None, _, _) => {}
        (Some("show"), _, _) => {
            dashboard.with_calibration(|session, _| print_session(session))?;
        }
        (Some("press"), Some(index), _) => {
            let index = parse_index(index)?;
            dashboard.with_calibration(|session, sink| session.press_button(index, sink))??;
            dashboard.with_calibration(|session, _| print_session(session))?;
        }
        (Some("set"), Some(field), Some(value)) => {
            dashboard.with_calibration(|session, _| session.set_input(field, value))??;
        }
        (Some("next"), _, _) => {
            dashboard.with_calibration(|session, sink| session.next_step(sink))?;
            dashboard.with_calibration(|session, _| print_session(session))?;
        }
        (Some("prev"), _, _) => {
            dashboard.with_calibration(|session, sink| session.previous_step(sink))?;
            dashboard.with_calibration(|session, _| print_session(session))?;
        }
        (Some("step"), Some(index), _) => {
            let index = parse_index(index)?;
            dashboard.with_calibration(|session, sink| session.go_to_step(index, sink))??;
            dashboard.with_calibration(|session, _| print_session(session))?;
        }
        (Some("complete"), _, _) => {
            dashboard.complete_calibration()?;
            return Ok(false);
        }
        (Some("exit"), _, _) => {
            dashboard.exit_calibration();
            return Ok(false);
        }
        _ => print_help(),
    }
    Ok(true)
}

fn parse_index(raw: &str) -> Result<usize, TeledashError> {
    raw.parse().map_err(|_| TeledashError::InvalidUserInput {
        field: "index".to_string(),
        reason: format!("'{}' is not a number", raw),
    })
}

fn print_session(session: &CalibrationSession) {
    let step = session.current_step();
    println!(
        "[{:.0}%] {} ({})",
        session.progress_percentage(),
        session.step_title(),
        step.id
    );
    println!("{}", session.description());
    for field in &step.inputs {
        let value = match &field.value {
            InputValue::Number(Some(value)) => value.to_string(),
            InputValue::Number(None) => String::new(),
            InputValue::Text(text) => text.clone(),
        };
        println!("  {} [{}]: {}", field.label, field.id, value);
    }
    for (index, button) in step.buttons.iter().enumerate() {
        let marker = if session.is_button_enabled(index) { " " } else { "x" };
        println!("  {}{} {}", marker, index, session.render_text(&button.text));
    }
    if session.is_calibration_saved() {
        println!("Calibration saved");
    }
}

fn replay(input: &Path) -> Result<(), TeledashError> {
    let entries = transcript::load_transcript(input)?;
    let frames = transcript::inbound_frames(&entries);
    info!("Replaying {} inbound frames from {:?}", frames.len(), input);

    let config = AppConfig::from_local_file();
    let supervisor = ConnectionSupervisor::new(MockTransport::accepting(), config.supervisor_config());
    let mut dashboard = Dashboard::new(supervisor);
    dashboard.start();
    dashboard.tick(Instant::now());
    dashboard.open_calibration();

    for frame in frames {
        dashboard.supervisor_mut().transport_mut().push_frame(frame);
        for event in dashboard.tick(Instant::now()) {
            print_event(&event);
        }
    }

    dashboard.with_calibration(|session, _| {
        print_session(session);
        for phase in Phase::ALL {
            println!("{:?}: {:?}", phase, session.phase_state(phase));
        }
        if let Some(pending) = session.pending_submission() {
            println!(
                "Submission for {} still waiting, falls back to {}",
                pending.direction, pending.fallback
            );
        }
    })?;
    let sent = dashboard.supervisor_mut().transport_mut().take_sent();
    println!("{} frames would have been sent", sent.len());
    Ok(())
}

fn write_config() -> Result<(), TeledashError> {
    let config = AppConfig::from_local_file();
    config.save()?;
    println!("Config written to {}", AppConfig::config_path()?.display());
    Ok(())
}

/// Warnings and errors always reach the terminal; debug output needs a debug build or
/// `--verbose`.
fn log_level(verbose: bool) -> LevelFilter {
    if verbose || cfg!(debug_assertions) {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    }
}

fn main() {
    let cli = Args::parse();
    colog::default_builder()
        .filter_level(log_level(cli.verbose))
        .init();

    let result = match &cli.command {
        Commands::Monitor { addr, transcript } => monitor(addr.clone(), transcript.clone()),
        Commands::Calibrate { addr, transcript } => calibrate(addr.clone(), transcript.clone()),
        Commands::Replay { input } => replay(input),
        Commands::Config => write_config(),
    };
    if let Err(e) = result {
        eprintln!("teledash: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warnings_are_logged_without_verbose() {
        assert!(log_level(false) >= LevelFilter::Warn);
        assert_eq!(log_level(true), LevelFilter::Debug);
    }

    #[test]
    fn test_rejected_command_is_an_error() {
        let supervisor =
            ConnectionSupervisor::new(MockTransport::accepting(), AppConfig::default().supervisor_config());
        let mut dashboard = Dashboard::new(supervisor);
        dashboard.start();
        dashboard.tick(Instant::now());
        dashboard.open_calibration();
        assert!(matches!(
            run_command(&mut dashboard, "step 99"),
            Err(TeledashError::StepOutOfRange { index: 99 })
        ));
        assert!(matches!(
            run_command(&mut dashboard, "press x"),
            Err(TeledashError::InvalidUserInput { .. })
        ));
        assert!(run_command(&mut dashboard, "next").unwrap());
        assert!(!run_command(&mut dashboard, "exit").unwrap());
    }
}
