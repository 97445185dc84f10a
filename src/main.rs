use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use metric_capture::{recorded::RecordedApi, Collector, Config, CounterCatalog, Target};
use std::{fs::File, io::BufReader, path::PathBuf};

/// Replays a recorded monitoring session through the capture pipeline and
/// prints the performance-history output as JSON.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// JSON recording of listed metrics and raw samples
    recording: PathBuf,

    /// Target id the recording belongs to
    target: String,

    /// Monitoring endpoint the target is bound to
    #[arg(long, default_value = "recorded")]
    endpoint: String,

    /// Window start (RFC 3339), defaults to the configured lookback before --end
    #[arg(long)]
    start: Option<DateTime<Utc>>,

    /// Window end (RFC 3339), defaults to now
    #[arg(long)]
    end: Option<DateTime<Utc>>,

    /// JSON config file; missing fields take their defaults
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
            serde_json::from_reader(BufReader::new(file))?
        }
        None => Config::default(),
    };
    let max_datapoints = usize::try_from(config.max_datapoints_per_query)?;
    let api = RecordedApi::open(&args.recording, max_datapoints)
        .with_context(|| format!("loading {}", args.recording.display()))?;

    let collector = Collector::new(&api, CounterCatalog::default(), config)?;
    let target = Target::new(&args.target, &args.endpoint);
    let output = collector.capture(&target, args.start, args.end)?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
