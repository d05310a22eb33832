//! CAT Monitor
//!
//! Runs the CAT service against a configured rig (or a simulated one) and
//! prints every status snapshot as a JSON line until Ctrl+C.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use cat_protocol::{CommandDefinition, Marker, SerialConfig, StateDefinition};
use cat_service::{
    AppConfig, CatConfig, CatService, FileConfigProvider, RequiredConfigs, RigConfig,
};
use cat_sim::{SimLink, VirtualRig};
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const PKG_DESCRIPTION: &str = concat!(env!("CARGO_PKG_NAME"), " - CAT status monitor");
const SIM_TUNE_STEP_HZ: u64 = 1_000;

#[derive(Debug, Parser)]
#[command(
    author = env!("CARGO_PKG_AUTHORS"),
    version = env!("CARGO_PKG_VERSION"),
    about = PKG_DESCRIPTION,
)]
struct Cli {
    /// Path to configuration file
    #[arg(long = "config", short = 'C', value_name = "FILE")]
    config: Option<PathBuf>,
    /// Print example configuration and exit
    #[arg(long = "print-config")]
    print_config: bool,
    /// Drive a simulated rig instead of a serial port
    #[arg(long = "sim")]
    sim: bool,
    /// Command to send after start, as "NAME [PARAM...]" (repeatable)
    #[arg(short = 's', long = "send", value_name = "COMMAND")]
    send: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.print_config {
        println!("{}", example_config().to_json()?);
        return Ok(());
    }

    init_tracing();

    let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    runtime.block_on(run(cli))
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "cat_monitor=info,cat_service=info,cat_protocol=info,cat_sim=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let builder = CatService::builder().with_current_logger();

    let (builder, sim) = if cli.sim {
        let link = SimLink::with_rig(VirtualRig::new("Simulated TS-2000"));
        let builder = builder
            .config_provider(example_config())
            .connector(link.connector());
        (builder, Some(link))
    } else {
        let path = match cli.config {
            Some(path) => path,
            None => match FileConfigProvider::default_path() {
                Some(path) => path,
                None => bail!("no --config given and no default config location"),
            },
        };
        info!("Loading configuration from {}", path.display());
        let provider = FileConfigProvider::load(&path)?;
        (builder.config_provider(provider), None)
    };

    let service = builder.build();
    service.initialize()?;

    let rig = service.rig_config();
    info!("Starting CAT monitor for {} on {}", rig.name, rig.serial.port);
    service.start().await?;

    let status = service.status_channel()?;

    for line in &cli.send {
        let mut parts = line.split_whitespace();
        let Some(name) = parts.next() else {
            continue;
        };
        let params: Vec<&str> = parts.collect();
        match service.enqueue_command(name, &params) {
            Ok(()) => info!("Queued {}", line),
            Err(e) => warn!("Could not queue {}: {}", line, e),
        }
    }

    let mut sim_tick = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            Some(snapshot) = status.recv() => {
                match serde_json::to_string(&snapshot) {
                    Ok(json) => println!("{}", json),
                    Err(e) => error!("Failed to encode status: {}", e),
                }
            }
            _ = sim_tick.tick(), if sim.is_some() => {
                if let Some(link) = &sim {
                    link.with_rig_mut(|rig| {
                        let hz = rig.frequency_a_hz() + SIM_TUNE_STEP_HZ;
                        rig.set_frequency_a(hz);
                    });
                }
            }
            _ = signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down");
                break;
            }
        }
    }

    service.stop().await?;
    Ok(())
}

/// A Kenwood-style rig description, also used by `--sim`
fn example_config() -> AppConfig {
    let modes = [
        ("1", "LSB"),
        ("2", "USB"),
        ("3", "CW"),
        ("4", "FM"),
        ("5", "AM"),
        ("6", "FSK"),
        ("7", "CW-R"),
        ("9", "FSK-R"),
    ];
    let mode_marker = |index| {
        modes
            .iter()
            .fold(Marker::new(index, 1, "MODE"), |marker, (key, value)| {
                marker.with_mapping(*key, *value)
            })
    };

    let rig = RigConfig {
        id: 1,
        name: "Kenwood TS-2000".into(),
        serial: SerialConfig::new("/dev/ttyUSB0", 38400),
        cat: CatConfig {
            poll_interval_ms: 100,
            ..Default::default()
        },
        states: vec![
            StateDefinition::new("FA", vec![Marker::new(0, 11, "VFOA")]),
            StateDefinition::new("FB", vec![Marker::new(0, 11, "VFOB")]),
            StateDefinition::new("MD", vec![mode_marker(0)]),
            StateDefinition::new(
                "IF",
                vec![
                    Marker::new(0, 11, "VFOA"),
                    Marker::new(26, 1, "PTT")
                        .with_mapping("0", "RX")
                        .with_mapping("1", "TX"),
                    mode_marker(27),
                ],
            ),
            StateDefinition::new("TX", vec![Marker::new(0, 1, "PTT").with_mapping("1", "TX")]),
            StateDefinition::new("RX", vec![]),
            StateDefinition::new("ID", vec![Marker::new(0, 3, "MODEL")]),
        ],
        commands: vec![
            CommandDefinition::new("READ_VFOA", "FA;"),
            CommandDefinition::new("SET_VFOA", "FA%s;"),
            CommandDefinition::new("READ_VFOB", "FB;"),
            CommandDefinition::new("SET_VFOB", "FB%s;"),
            CommandDefinition::new("READ_MODE", "MD;"),
            CommandDefinition::new("SET_MODE", "MD%s;"),
            CommandDefinition::new("READ_INFO", "IF;"),
            CommandDefinition::new("READ_ID", "ID;"),
            CommandDefinition::new("AUTO_INFO", "AI%s;"),
            CommandDefinition::new("TRANSMIT", "TX;"),
            CommandDefinition::new("RECEIVE", "RX;"),
        ],
    };

    AppConfig {
        required: RequiredConfigs { default_rig_id: 1 },
        rigs: vec![rig],
    }
}
