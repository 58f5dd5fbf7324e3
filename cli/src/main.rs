mod format;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use solarlink::config::{
    DEFAULT_COMMAND_TIMEOUT_SECS, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_HANDSHAKE_TIMEOUT_SECS, DEFAULT_RETRY_DELAY_SECS,
    DEFAULT_URL,
};
use solarlink::retry::DEFAULT_MAX_ATTEMPTS;
use solarlink::{Device, DeviceError, RetryPolicy, Session, SessionConfig, SessionError, TracingSink};
use tracing::{Level, info};
use wire::ChargeMode;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error("invalid charge mode {0}; expected 0 (manual), 1 (auto), 2 (timing) or 3 (continuous)")]
    InvalidChargeMode(u8),
}

#[derive(Parser, Debug)]
#[command(name = "solarlink", about = "Solar charge controller websocket client")]
struct Cli {
    #[arg(long, env = "SOLAR_WS_URL", default_value = DEFAULT_URL)]
    url: String,

    /// Controller MAC address.
    #[arg(long, env = "SOLAR_MAC")]
    mac: String,

    /// Seconds to wait for the socket to open, per attempt.
    #[arg(long, env = "SOLAR_CONNECT_TIMEOUT_SECS", default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS)]
    connect_timeout: u64,

    /// Seconds to wait for the welcome frame, per attempt.
    #[arg(long, env = "SOLAR_HANDSHAKE_TIMEOUT_SECS", default_value_t = DEFAULT_HANDSHAKE_TIMEOUT_SECS)]
    handshake_timeout: u64,

    /// Seconds to wait for each command's reply.
    #[arg(long, env = "SOLAR_COMMAND_TIMEOUT_SECS", default_value_t = DEFAULT_COMMAND_TIMEOUT_SECS)]
    command_timeout: u64,

    #[arg(long, env = "SOLAR_RETRY_ATTEMPTS", default_value_t = DEFAULT_MAX_ATTEMPTS)]
    attempts: u32,

    /// Seconds between connection attempts.
    #[arg(long, env = "SOLAR_RETRY_DELAY_SECS", default_value_t = DEFAULT_RETRY_DELAY_SECS)]
    retry_delay: u64,

    #[arg(long, short)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print every property as a table.
    GetInfo,
    GetChargeMode,
    /// 0 manual, 1 auto, 2 timing, 3 continuous.
    SetChargeMode {
        #[arg(value_parser = clap::value_parser!(u8).range(0..=3))]
        mode: u8,
    },
    GetLoadState,
    /// Only accepted in manual mode.
    SetLoadOutput { state: Switch },
    SetCutoffVoltage { volts: f64 },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Switch {
    On,
    Off,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).with_writer(std::io::stderr).init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}

fn session_config(cli: &Cli) -> SessionConfig {
    SessionConfig::from_env()
        .with_url(cli.url.clone())
        .with_connect_timeout(Duration::from_secs(cli.connect_timeout))
        .with_handshake_timeout(Duration::from_secs(cli.handshake_timeout))
        .with_command_timeout(Duration::from_secs(cli.command_timeout))
        .with_retry(RetryPolicy::Fixed { delay: Duration::from_secs(cli.retry_delay), max_attempts: cli.attempts })
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let session = Session::new(session_config(&cli), Arc::new(TracingSink));
    session.connect().await?;

    let outcome = execute(&Device::new(&session, cli.mac.as_str()), cli.command).await;
    session.close().await;
    outcome
}

async fn execute(device: &Device<'_>, command: Command) -> Result<(), CliError> {
    match command {
        Command::GetInfo => {
            let records = device.machine_info().await?;
            println!("{}", format::render_table(&records));
        }
        Command::GetChargeMode => {
            let mode = device.charge_mode().await?;
            println!("charge mode: {mode}");
        }
        Command::SetChargeMode { mode } => {
            let mode = ChargeMode::from_code(i64::from(mode)).ok_or(CliError::InvalidChargeMode(mode))?;
            device.set_charge_mode(mode).await?;
            info!(mac = device.mac(), %mode, "charge mode set");
            println!("charge mode set to {mode}");
        }
        Command::GetLoadState => {
            let on = device.load_state().await?;
            println!("load output: {}", if on { "on" } else { "off" });
        }
        Command::SetLoadOutput { state } => {
            let on = matches!(state, Switch::On);
            device.set_load_output(on).await?;
            info!(mac = device.mac(), on, "load output set");
            println!("load output set to {}", if on { "on" } else { "off" });
        }
        Command::SetCutoffVoltage { volts } => {
            device.set_cutoff_voltage(volts).await?;
            info!(mac = device.mac(), volts, "cutoff voltage set");
            println!("cutoff voltage set to {volts:.1} V");
        }
    }
    Ok(())
}
