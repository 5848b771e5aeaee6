//! Sonify a weather dataset from the command line.
//!
//! Usage:
//!
//! ```text
//! wetterklang (--data <json> | --region <name>) [--music <wav>]
//!             [--speed SECS] [--hours N] [--headless]
//! ```

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::{ArgGroup, Parser};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use wetterklang::{
    ControlKey, OutputTarget, SampleBuffer, SessionConfig, SonificationSession, SourceSignal,
    TickSnapshot,
};

#[derive(Parser, Debug)]
#[command(name = "wetterklang")]
#[command(about = "Turn hourly weather data into an evolving soundscape")]
#[command(group(ArgGroup::new("input").required(true).args(["data", "region"])))]
struct Args {
    /// Weather dataset (JSON)
    #[arg(long)]
    data: Option<PathBuf>,

    /// Region name, resolved to `<data-dir>/<region>.json`
    #[arg(long)]
    region: Option<String>,

    /// Directory searched for region datasets
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Session configuration (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Loop a WAV file through the music chain instead of the oscillator
    #[arg(long)]
    music: Option<PathBuf>,

    /// Seconds per simulated hour
    #[arg(long)]
    speed: Option<f64>,

    /// Stop after this many hours (runs until interrupted otherwise)
    #[arg(long)]
    hours: Option<usize>,

    /// Render without an audio device
    #[arg(long)]
    headless: bool,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(false).init();
}

fn main() {
    init_logging();

    let args = Args::parse();
    if let Err(e) = run(args) {
        error!("{e}");
        process::exit(1);
    }
}

fn run(args: Args) -> wetterklang::Result<()> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    if let Some(dir) = args.data_dir {
        config = config.with_data_dir(dir);
    }
    if let Some(speed) = args.speed {
        config = config.with_tick_interval(speed);
    }

    let target = if args.headless {
        OutputTarget::Null
    } else {
        let target = OutputTarget::default_device();
        if matches!(target, OutputTarget::Null) {
            warn!("no audio device available, rendering headless");
        }
        target
    };
    let mut session = SonificationSession::with_engine(config, target)?;

    let source = match &args.music {
        Some(path) => {
            let buffer = SampleBuffer::from_wav(path)?;
            info!(
                path = %path.display(),
                seconds = buffer.duration_secs(),
                channels = buffer.channels(),
                "loaded music"
            );
            SourceSignal::Samples(buffer)
        }
        None => SourceSignal::Oscillator,
    };
    session.attach_source(source)?;

    let mut ticks = session.subscribe();
    if let Some(path) = &args.data {
        session.load_timeline(path)?;
    } else if let Some(region) = &args.region {
        session.load_region(region)?;
    }

    let hours = args.hours.unwrap_or(usize::MAX);
    let patience = session.tick_interval() + Duration::from_secs(2);
    let mut seen = 0;
    while seen < hours {
        match ticks.recv_timeout(patience) {
            Some(tick) => {
                log_tick(&tick);
                seen += 1;
            }
            None => warn!("no tick within {patience:?}"),
        }
    }

    session.shutdown();
    Ok(())
}

fn log_tick(tick: &TickSnapshot) {
    for line in tick.sample.summary(tick.hour_index).lines() {
        info!("{line}");
    }
    let values: Vec<String> = tick
        .values
        .iter()
        .map(|v| format!("{}={:.2}", v.key(), v.value()))
        .collect();
    info!(
        applied = tick.applied,
        frozen = tick.frozen,
        cutoff = ?tick.values.get(ControlKey::CutoffFreqHz),
        "{}",
        values.join(" ")
    );
}
