use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use dmx_engine::{DmxEngine, FrameUpdate, IngestOutcome, TransmitHealth, Universe};
use dmx_transport::{self as transport, AdapterDriver, AdapterSession, DeviceRegistry};

mod config;
use config::Config;

const MOCK_SERIAL: &str = "MOCK0001";

#[derive(Parser, Debug)]
#[command(
    name = "dmx",
    version,
    about = "DMX512 output over USB serial adapters",
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Backend {
    Mock,
    Serial,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List attached adapters by serial number
    List {
        /// Backend to query
        #[arg(long, value_enum, default_value_t = Backend::Mock)]
        backend: Backend,
        /// Also print port names and descriptions
        #[arg(long, action = ArgAction::SetTrue)]
        verbose: bool,
    },
    /// Open an adapter, send one blackout frame and close it again
    Doctor {
        /// Adapter serial number (first adapter if omitted)
        #[arg(long)]
        serial: Option<String>,
        /// Backend to use
        #[arg(long, value_enum, default_value_t = Backend::Mock)]
        backend: Backend,
    },
    /// Drive an adapter continuously from fixed levels or a JSON-lines feed
    Run {
        /// Adapter serial number (overrides the config file)
        #[arg(long)]
        serial: Option<String>,
        /// Backend to use
        #[arg(long, value_enum, default_value_t = Backend::Mock)]
        backend: Backend,
        /// JSON config file (created with defaults if missing)
        #[arg(long)]
        config: Option<String>,
        /// Seconds to run (0 runs until Ctrl-C)
        #[arg(long, default_value_t = 10u64)]
        seconds: u64,
        /// Channel levels starting at channel 1, space-separated (e.g. "255 0 128")
        #[arg(long, value_delimiter = ' ')]
        levels: Vec<f32>,
        /// JSON-lines feed: each line is an array of levels or an array of sample arrays
        #[arg(long, conflicts_with = "levels")]
        feed: Option<String>,
        /// Frame updates per second (overrides the config file)
        #[arg(long)]
        update_hz: Option<f64>,
        /// Print prometheus metrics on exit
        #[arg(long, action = ArgAction::SetTrue)]
        metrics: bool,
    },
    /// Write a default config file
    ConfigInit {
        #[arg(long, default_value = "dmx.json")]
        out: String,
    },
}

fn main() -> Result<()> {
    setup_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::List { backend, verbose } => list_adapters(backend, verbose),
        Commands::Doctor { serial, backend } => doctor(backend, serial.as_deref()),
        Commands::Run {
            serial,
            backend,
            config,
            seconds,
            levels,
            feed,
            update_hz,
            metrics,
        } => run(RunArgs {
            serial,
            backend,
            config,
            seconds,
            levels,
            feed,
            update_hz,
            metrics,
        }),
        Commands::ConfigInit { out } => {
            Config::default().save(&out)?;
            println!("wrote {out}");
            Ok(())
        }
    }
}

fn setup_tracing() {
    // Best-effort; avoid panics if already set
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn driver_for(backend: Backend) -> Arc<dyn AdapterDriver> {
    match backend {
        Backend::Mock => Arc::new(transport::MockDriver::with_serials(&[MOCK_SERIAL])),
        Backend::Serial => Arc::new(transport::SerialDriver::new()),
    }
}

fn list_adapters(backend: Backend, verbose: bool) -> Result<()> {
    let mut registry = DeviceRegistry::new(driver_for(backend));
    registry.refresh().context("enumerating adapters")?;
    if verbose {
        println!("{}", dmx_engine::LISTING_HEADER);
        for d in registry.list() {
            println!("{d}");
        }
    } else {
        for row in dmx_engine::serial_listing(registry.list()) {
            println!("{row}");
        }
    }
    Ok(())
}

fn pick_serial(registry: &DeviceRegistry, serial: Option<&str>) -> Result<String> {
    match serial {
        Some(s) => Ok(s.to_string()),
        None => registry
            .list()
            .first()
            .map(|d| d.serial_number.clone())
            .ok_or_else(|| anyhow::anyhow!("no adapters found")),
    }
}

fn doctor(backend: Backend, serial: Option<&str>) -> Result<()> {
    let driver = driver_for(backend);
    let mut registry = DeviceRegistry::new(driver.clone());
    let count = registry.refresh().context("enumerating adapters")?;
    println!("doctor: backend={backend:?} adapters={count}");
    let serial = pick_serial(&registry, serial)?;

    let timing = dmx_engine::FrameTiming::default();
    let session = AdapterSession::new(driver);
    session.open(&registry, &serial)?;
    println!("open: ok ({serial}, {})", session.settings());

    let result = (|| -> Result<()> {
        session.assert_break()?;
        thread::sleep(timing.break_duration());
        session.clear_break()?;
        println!("break: ok ({}us + {}us)", timing.break_us, timing.mark_after_break_us);
        thread::sleep(timing.mark_after_break());
        session.write_frame(Universe::new().as_bytes())?;
        println!("write: ok ({} bytes)", transport::DMX_FRAME_LEN);
        Ok(())
    })();

    session.close();
    println!("close: ok");
    result?;
    println!("doctor: done");
    Ok(())
}

struct RunArgs {
    serial: Option<String>,
    backend: Backend,
    config: Option<String>,
    seconds: u64,
    levels: Vec<f32>,
    feed: Option<String>,
    update_hz: Option<f64>,
    metrics: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FeedLine {
    Levels(Vec<f32>),
    Samples(Vec<Vec<f32>>),
}

impl FeedLine {
    fn into_channels(self) -> Vec<Vec<f32>> {
        match self {
            FeedLine::Levels(levels) => levels.into_iter().map(|l| vec![l]).collect(),
            FeedLine::Samples(samples) => samples,
        }
    }
}

fn read_feed(path: &str) -> Result<Vec<Vec<Vec<f32>>>> {
    let file = File::open(path).with_context(|| format!("opening feed: {path}"))?;
    let mut frames = Vec::new();
    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let parsed: FeedLine = serde_json::from_str(trimmed)
            .with_context(|| format!("{path}:{}: expected a JSON array", n + 1))?;
        frames.push(parsed.into_channels());
    }
    if frames.is_empty() {
        anyhow::bail!("feed {path} has no frames");
    }
    Ok(frames)
}

fn run(args: RunArgs) -> Result<()> {
    let mut cfg = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(hz) = args.update_hz {
        cfg.update_hz = hz;
    }
    if args.serial.is_some() {
        cfg.serial_number = args.serial.clone();
    }
    cfg.validate()?;

    let frames: Vec<Vec<Vec<f32>>> = match &args.feed {
        Some(path) => read_feed(path)?,
        None => vec![args.levels.iter().map(|&l| vec![l]).collect()],
    };

    let mut engine = DmxEngine::new(driver_for(args.backend), cfg.timing)?;
    let serial = match cfg.serial_number.clone() {
        Some(s) => s,
        None => engine
            .devices()
            .first()
            .map(|d| d.serial_number.clone())
            .ok_or_else(|| anyhow::anyhow!("no adapters found"))?,
    };

    let stop = Arc::new(AtomicBool::new(false));
    watch_ctrl_c(stop.clone());

    let period = cfg.update_period()?;
    let limit = (args.seconds > 0).then(|| Duration::from_secs(args.seconds));
    let started = Instant::now();
    let mut tick = 0usize;
    info!(serial = %serial, frames = frames.len(), "running");

    while !stop.load(Ordering::Relaxed) && limit.map_or(true, |l| started.elapsed() < l) {
        let channels = &frames[tick % frames.len()];
        let outcome = engine.update(&FrameUpdate {
            active: true,
            serial_number: &serial,
            channels: Some(channels.as_slice()),
        });
        if let IngestOutcome::ActivationFailed(e) = outcome {
            return Err(e).with_context(|| format!("activating adapter {serial}"));
        }
        tick += 1;
        thread::sleep(period);
    }

    engine.update(&FrameUpdate {
        active: false,
        serial_number: &serial,
        channels: None,
    });
    print_health(&engine.health(), started.elapsed());
    if args.metrics {
        print!("{}", engine.metrics().encode_text()?);
    }
    Ok(())
}

fn watch_ctrl_c(stop: Arc<AtomicBool>) {
    let spawned = thread::Builder::new()
        .name("ctrl-c".to_string())
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    warn!(error = %e, "ctrl-c handler unavailable");
                    return;
                }
            };
            if rt.block_on(tokio::signal::ctrl_c()).is_ok() {
                info!("ctrl-c received, stopping");
                stop.store(true, Ordering::Relaxed);
            }
        });
    if let Err(e) = spawned {
        warn!(error = %e, "ctrl-c handler unavailable");
    }
}

fn print_health(health: &TransmitHealth, elapsed: Duration) {
    let last = health
        .last_frame_at
        .map(|t| {
            t.format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_else(|_| "".into())
        })
        .unwrap_or_else(|| "-".into());
    println!(
        "frames={}\tfailed={}\telapsed={:.1}s\tlast_frame={last}",
        health.frames_sent,
        health.failed_cycles,
        elapsed.as_secs_f64()
    );
    if let Some(err) = &health.last_error {
        println!("last_error={err}");
    }
}
